//! Extraction schemas: the caller-supplied description of what to pull out
//! of a document.
//!
//! A [`FieldSchema`] is an ordered list of named fields, each with a semantic
//! type and a human-readable description that is forwarded verbatim to the
//! LLM prompt. Schemas are immutable once passed into a run and carry a
//! deterministic identifier so (content hash, schema id) can key the cache.

use crate::error::LexError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Semantic type of an extraction field.
///
/// Drives both prompt wording and synthesis behaviour: `Array` fields are
/// unioned across chunks instead of picking a single winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Array,
    Object,
    Date,
}

impl FieldType {
    /// Prompt-facing name for the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Date => "date",
        }
    }
}

/// One named field in an extraction schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name; must be unique within the schema and non-empty.
    pub name: String,
    /// Semantic type the extracted value should have.
    pub field_type: FieldType,
    /// Human-readable description, forwarded to the LLM prompt.
    pub description: String,
    /// Required fields that are absent from every chunk are flagged for
    /// review; optional fields are not.
    #[serde(default)]
    pub required: bool,
}

/// Ordered field schema for one analysis run.
///
/// # Example
/// ```rust
/// use lexextract::{FieldSchema, FieldSpec, FieldType};
///
/// let schema = FieldSchema::new(
///     "personal_injury_complaint",
///     vec![
///         FieldSpec {
///             name: "case_number".into(),
///             field_type: FieldType::String,
///             description: "Court case number".into(),
///             required: true,
///         },
///         FieldSpec {
///             name: "defendants".into(),
///             field_type: FieldType::Array,
///             description: "All named defendants".into(),
///             required: false,
///         },
///     ],
/// );
/// assert!(schema.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Schema name, part of the cache key.
    pub name: String,
    /// Ordered fields. Order is preserved in prompts and output.
    pub fields: Vec<FieldSpec>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Validate the schema is a well-formed field mapping.
    ///
    /// Called at submission time; a run is never created for an invalid
    /// schema.
    pub fn validate(&self) -> Result<(), LexError> {
        if self.name.trim().is_empty() {
            return Err(LexError::SchemaValidation(
                "schema name cannot be empty".into(),
            ));
        }
        if self.fields.is_empty() {
            return Err(LexError::SchemaValidation(
                "schema must define at least one field".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(LexError::SchemaValidation(
                    "field name cannot be empty".into(),
                ));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(LexError::SchemaValidation(format!(
                    "duplicate field name '{}'",
                    field.name
                )));
            }
        }
        Ok(())
    }

    /// Deterministic schema identifier: name plus a SHA-256 fingerprint of
    /// the field layout. Two schemas with the same name but different fields
    /// get different identifiers, so they never share cache entries.
    pub fn identifier(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        for field in &self.fields {
            hasher.update([0u8]);
            hasher.update(field.name.as_bytes());
            hasher.update([0u8]);
            hasher.update(field.field_type.as_str().as_bytes());
            hasher.update([field.required as u8]);
        }
        let hex = format!("{:x}", hasher.finalize());
        format!("{}-{}", self.name.trim(), &hex[..16])
    }
}
