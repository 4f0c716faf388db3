//! Output types: per-chunk extraction records, synthesized field results,
//! and the analysis run that callers receive.
//!
//! Everything here serialises to JSON so the excluded API/UI layers can
//! forward runs verbatim.

use crate::error::ChunkError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Run lifecycle state. Terminal states (`Completed`, `Failed`) are final;
/// a reprocessed document gets a new run rather than a mutated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Processing => "processing",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

/// How the page text was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMethod {
    DirectText,
    Ocr,
}

/// Coarse document classification from text content.
///
/// A routing hint for downstream review queues, not a guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Complaint,
    RetainerAgreement,
    SettlementAgreement,
    MedicalRecord,
    Other,
}

/// Metadata from the text-source stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Total pages in the document.
    pub total_pages: usize,
    /// Pages actually processed under the page-limit policy.
    pub pages_processed: usize,
    /// Whether text came from direct extraction or the OCR fallback.
    pub processing_method: ProcessingMethod,
    /// Average non-whitespace characters per processed page.
    pub avg_chars_per_page: f64,
    /// Total non-whitespace characters across processed pages.
    pub total_characters: usize,
}

/// One field extracted from one chunk.
///
/// Invariant: `value` is `None` iff `confidence_score == 0.0` and
/// `source_text` is `None`. "Not found" is a valid result, never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRecord {
    /// Extracted value, or None when the chunk does not state it.
    pub value: Option<serde_json::Value>,
    /// Exact substring of the chunk text that supports the extraction.
    pub source_text: Option<String>,
    /// Textual-clarity confidence in [0, 1].
    pub confidence_score: f64,
    /// Index of the chunk this record came from.
    pub chunk_index: usize,
}

impl ExtractionRecord {
    /// A "not found" record for the given chunk.
    pub fn not_found(chunk_index: usize) -> Self {
        Self {
            value: None,
            source_text: None,
            confidence_score: 0.0,
            chunk_index,
        }
    }

    pub fn is_found(&self) -> bool {
        self.value.is_some()
    }
}

/// Per-chunk extraction output: one record per schema field, plus any
/// recoverable error that degraded this chunk.
#[derive(Debug, Clone)]
pub struct ChunkExtraction {
    pub chunk_index: usize,
    /// 1-based page numbers the chunk spans.
    pub pages: Vec<usize>,
    pub records: BTreeMap<String, ExtractionRecord>,
    pub error: Option<ChunkError>,
}

/// One field after synthesis across all chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldResult {
    pub value: Option<serde_json::Value>,
    pub source_text: Option<String>,
    pub confidence_score: f64,
    /// True when confidence fell below the configured threshold and a human
    /// should sign off before downstream use.
    pub requires_review: bool,
    /// Best-guess 1-based page number, from the winning chunk's page span.
    pub page_number: Option<usize>,
}

/// Aggregate counters for a completed run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub chunk_count: usize,
    /// Chunks whose extraction degraded to null records.
    pub failed_chunks: usize,
    /// Fields with `requires_review == true`.
    pub review_required_count: usize,
    /// Mean confidence across synthesized fields (0.0 when empty).
    pub overall_confidence: f64,
    pub total_duration_ms: u64,
    pub source_duration_ms: u64,
    pub extraction_duration_ms: u64,
}

/// A single analysis run: the unit callers submit, poll, and fetch.
///
/// Owned exclusively by the orchestrator; immutable once terminal. A
/// force-reprocess creates a new run that supersedes this one in the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRun {
    /// Orchestrator-assigned run identifier.
    pub run_id: String,
    /// SHA-256 digest of the raw document bytes.
    pub content_hash: String,
    /// Deterministic schema identifier.
    pub schema_id: String,
    pub status: RunStatus,
    /// Synthesized result per schema field. Empty for failed runs.
    pub extracted_data: BTreeMap<String, FieldResult>,
    /// Recoverable errors collected during processing. A completed run may
    /// carry a non-empty list; a failed run always does.
    pub processing_errors: Vec<String>,
    pub source: Option<SourceMetadata>,
    pub document_kind: Option<DocumentKind>,
    pub stats: RunStats,
}

impl AnalysisRun {
    /// Recompute the derived counters from the synthesized fields.
    pub(crate) fn finalize_stats(&mut self) {
        self.stats.review_required_count = self
            .extracted_data
            .values()
            .filter(|f| f.requires_review)
            .count();
        self.stats.overall_confidence = if self.extracted_data.is_empty() {
            0.0
        } else {
            self.extracted_data
                .values()
                .map(|f| f.confidence_score)
                .sum::<f64>()
                / self.extracted_data.len() as f64
        };
    }
}

/// Classify a document from its extracted text.
///
/// Indicator phrases come from hard-won experience with personal-injury
/// filings; matching is case-insensitive and first-hit-wins in the order
/// below.
pub fn detect_document_kind(text: &str) -> DocumentKind {
    let lower = text.to_lowercase();

    const COMPLAINT: &[&str] = &[
        "complaint for damages",
        "civil complaint",
        "plaintiff",
        "defendant",
        "cause of action",
        "prayer for relief",
    ];
    const RETAINER: &[&str] = &[
        "retainer agreement",
        "attorney-client agreement",
        "legal services agreement",
        "fee agreement",
    ];
    const SETTLEMENT: &[&str] = &[
        "settlement agreement",
        "release and settlement",
        "settlement and release",
    ];
    const MEDICAL: &[&str] = &["medical record", "patient", "diagnosis", "treatment", "hospital"];

    if COMPLAINT.iter().any(|s| lower.contains(s)) {
        DocumentKind::Complaint
    } else if RETAINER.iter().any(|s| lower.contains(s)) {
        DocumentKind::RetainerAgreement
    } else if SETTLEMENT.iter().any(|s| lower.contains(s)) {
        DocumentKind::SettlementAgreement
    } else if MEDICAL.iter().any(|s| lower.contains(s)) {
        DocumentKind::MedicalRecord
    } else {
        DocumentKind::Other
    }
}
