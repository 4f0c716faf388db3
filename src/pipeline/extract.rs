//! Per-chunk field extraction via the completion client.
//!
//! One LLM call per chunk asks for every schema field at once; the response
//! is a JSON object keyed by field name with a value / source_text /
//! confidence_score triple per field.
//!
//! Failure policy: a malformed response or API error earns exactly one
//! corrective retry with a stricter instruction appended. A timeout, or a
//! second failure, degrades the chunk — every field becomes a null record
//! and the error is attached to the [`ChunkExtraction`] — but never aborts
//! the run. Partial results from nine good chunks beat losing the document
//! to one bad one.

use crate::error::ChunkError;
use crate::llm::{CompletionClient, CompletionError};
use crate::output::{ChunkExtraction, ExtractionRecord};
use crate::pipeline::chunk::Chunk;
use crate::prompts::{build_extraction_prompt, CORRECTIVE_RETRY_INSTRUCTION, EXTRACTION_SYSTEM_PROMPT};
use crate::schema::FieldSchema;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Extracts schema fields from single chunks.
pub struct FieldExtractor {
    client: Arc<dyn CompletionClient>,
}

impl FieldExtractor {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }

    /// Extract every schema field from one chunk.
    ///
    /// Always returns a [`ChunkExtraction`] with one record per schema
    /// field; chunk-level failures surface through its `error`, never as
    /// `Err`.
    pub async fn extract(&self, schema: &FieldSchema, chunk: &Chunk) -> ChunkExtraction {
        let prompt = build_extraction_prompt(schema, &chunk.text);

        let first_failure = match self.attempt(schema, chunk, &prompt).await {
            Ok(records) => return self.done(chunk, records, None),
            // A timeout already cost the full per-call budget; retrying
            // would double the worst-case latency for a call that is
            // unlikely to come back faster. Degrade immediately.
            Err(AttemptError::Timeout { secs }) => {
                return self.degrade(schema, chunk, ChunkError::Timeout {
                    chunk: chunk.index,
                    secs,
                });
            }
            Err(other) => other,
        };

        warn!(
            "chunk {}: first attempt failed ({first_failure}), retrying once",
            chunk.index
        );
        let retry_prompt = format!("{prompt}\n{CORRECTIVE_RETRY_INSTRUCTION}");
        match self.attempt(schema, chunk, &retry_prompt).await {
            Ok(records) => self.done(chunk, records, None),
            Err(AttemptError::Timeout { secs }) => self.degrade(schema, chunk, ChunkError::Timeout {
                chunk: chunk.index,
                secs,
            }),
            Err(AttemptError::Api(detail)) => self.degrade(schema, chunk, ChunkError::LlmFailed {
                chunk: chunk.index,
                detail,
            }),
            Err(AttemptError::Malformed(detail)) => {
                self.degrade(schema, chunk, ChunkError::MalformedResponse {
                    chunk: chunk.index,
                    attempts: 2,
                    detail,
                })
            }
        }
    }

    async fn attempt(
        &self,
        schema: &FieldSchema,
        chunk: &Chunk,
        prompt: &str,
    ) -> Result<BTreeMap<String, ExtractionRecord>, AttemptError> {
        let raw = self
            .client
            .complete(EXTRACTION_SYSTEM_PROMPT, prompt)
            .await
            .map_err(|e| match e {
                CompletionError::Timeout { secs } => AttemptError::Timeout { secs },
                CompletionError::Api(detail) => AttemptError::Api(detail),
            })?;
        parse_response(schema, chunk.index, &raw).map_err(AttemptError::Malformed)
    }

    fn done(
        &self,
        chunk: &Chunk,
        records: BTreeMap<String, ExtractionRecord>,
        error: Option<ChunkError>,
    ) -> ChunkExtraction {
        let found = records.values().filter(|r| r.is_found()).count();
        debug!(
            "chunk {}: {}/{} fields found",
            chunk.index,
            found,
            records.len()
        );
        ChunkExtraction {
            chunk_index: chunk.index,
            pages: chunk.pages.clone(),
            records,
            error,
        }
    }

    fn degrade(&self, schema: &FieldSchema, chunk: &Chunk, error: ChunkError) -> ChunkExtraction {
        warn!("chunk {}: degrading to null records: {error}", chunk.index);
        let records = schema
            .fields
            .iter()
            .map(|f| (f.name.clone(), ExtractionRecord::not_found(chunk.index)))
            .collect();
        self.done(chunk, records, Some(error))
    }
}

enum AttemptError {
    Timeout { secs: u64 },
    Api(String),
    Malformed(String),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Timeout { secs } => write!(f, "timeout after {secs}s"),
            AttemptError::Api(d) => write!(f, "api error: {d}"),
            AttemptError::Malformed(d) => write!(f, "malformed response: {d}"),
        }
    }
}

/// Parse a raw completion into one record per schema field.
///
/// Tolerant of markdown fences and prose around the JSON object; strict
/// about the object itself. Fields the model omitted become null records —
/// omission is an answer, not an error.
fn parse_response(
    schema: &FieldSchema,
    chunk_index: usize,
    raw: &str,
) -> Result<BTreeMap<String, ExtractionRecord>, String> {
    let json = extract_json_object(raw).ok_or_else(|| "no JSON object in response".to_string())?;
    let parsed: Value =
        serde_json::from_str(json).map_err(|e| format!("invalid JSON: {e}"))?;
    let obj = parsed
        .as_object()
        .ok_or_else(|| "top-level JSON value is not an object".to_string())?;

    let mut records = BTreeMap::new();
    for field in &schema.fields {
        let record = match obj.get(&field.name) {
            None => ExtractionRecord::not_found(chunk_index),
            Some(Value::Object(triple)) => record_from_triple(triple, chunk_index),
            // A bare value without the triple: usable, but the model gave
            // no provenance, so cap the confidence.
            Some(bare) => match sanitize_value(bare.clone()) {
                Some(value) => ExtractionRecord {
                    value: Some(value),
                    source_text: None,
                    confidence_score: 0.5,
                    chunk_index,
                },
                None => ExtractionRecord::not_found(chunk_index),
            },
        };
        records.insert(field.name.clone(), record);
    }
    Ok(records)
}

fn record_from_triple(
    triple: &serde_json::Map<String, Value>,
    chunk_index: usize,
) -> ExtractionRecord {
    let value = triple
        .get("value")
        .cloned()
        .and_then(sanitize_value);
    let confidence = triple
        .get("confidence_score")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    let source_text = triple
        .get("source_text")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    match value {
        // A value the model itself scored at zero is a guess; treat it as
        // not found so the null invariant holds.
        Some(v) if confidence > 0.0 => ExtractionRecord {
            value: Some(v),
            source_text,
            confidence_score: confidence,
            chunk_index,
        },
        _ => ExtractionRecord::not_found(chunk_index),
    }
}

/// Normalise a model-supplied value, mapping the various spellings of
/// "nothing" to None.
fn sanitize_value(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty()
                || trimmed.eq_ignore_ascii_case("null")
                || trimmed.eq_ignore_ascii_case("none")
                || trimmed.eq_ignore_ascii_case("n/a")
                || trimmed.eq_ignore_ascii_case("not found")
            {
                None
            } else {
                Some(Value::String(trimmed.to_string()))
            }
        }
        Value::Array(items) => {
            let kept: Vec<Value> = items.into_iter().filter_map(sanitize_value).collect();
            if kept.is_empty() {
                None
            } else {
                Some(Value::Array(kept))
            }
        }
        other => Some(other),
    }
}

/// Locate the outermost JSON object in a completion that may carry fences
/// or prose around it.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSpec, FieldType};
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    struct ScriptedClient {
        responses: Mutex<VecDeque<Result<String, CompletionError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<Result<String, CompletionError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(vec![]),
            })
        }

        async fn calls(&self) -> usize {
            self.prompts.lock().await.len()
        }
    }

    #[async_trait::async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, _system: &str, user: &str) -> Result<String, CompletionError> {
            self.prompts.lock().await.push(user.to_string());
            self.responses
                .lock()
                .await
                .pop_front()
                .unwrap_or(Err(CompletionError::Api("script exhausted".into())))
        }
    }

    fn schema() -> FieldSchema {
        FieldSchema::new(
            "complaint",
            vec![
                FieldSpec {
                    name: "case_number".into(),
                    field_type: FieldType::String,
                    description: "Court case number".into(),
                    required: true,
                },
                FieldSpec {
                    name: "plaintiff_name".into(),
                    field_type: FieldType::String,
                    description: "Plaintiff's full name".into(),
                    required: true,
                },
            ],
        )
    }

    fn chunk(text: &str) -> Chunk {
        Chunk {
            index: 0,
            text: text.into(),
            token_count: estimate(text),
            pages: vec![1],
            overlap_len: 0,
        }
    }

    fn estimate(text: &str) -> usize {
        (text.len() + 3) / 4
    }

    const GOOD_RESPONSE: &str = r#"{
        "case_number": {"value": "CIV-2024-1138", "source_text": "Case No. CIV-2024-1138", "confidence_score": 0.97},
        "plaintiff_name": {"value": "Jane Doe", "source_text": "Jane Doe, Plaintiff", "confidence_score": 0.92}
    }"#;

    #[tokio::test]
    async fn extracts_every_schema_field() {
        let client = ScriptedClient::new(vec![Ok(GOOD_RESPONSE.into())]);
        let extractor = FieldExtractor::new(client.clone());
        let result = extractor.extract(&schema(), &chunk("Case No. CIV-2024-1138")).await;

        assert!(result.error.is_none());
        assert_eq!(result.records.len(), 2);
        let case = &result.records["case_number"];
        assert_eq!(case.value, Some(serde_json::json!("CIV-2024-1138")));
        assert_eq!(case.confidence_score, 0.97);
        assert_eq!(case.source_text.as_deref(), Some("Case No. CIV-2024-1138"));
        assert_eq!(client.calls().await, 1);
    }

    #[tokio::test]
    async fn omitted_field_becomes_null_record() {
        let partial = r#"{"case_number": {"value": "CIV-1", "source_text": "CIV-1", "confidence_score": 0.9}}"#;
        let client = ScriptedClient::new(vec![Ok(partial.into())]);
        let result = FieldExtractor::new(client).extract(&schema(), &chunk("text")).await;

        assert!(result.error.is_none());
        let missing = &result.records["plaintiff_name"];
        assert!(missing.value.is_none());
        assert_eq!(missing.confidence_score, 0.0);
    }

    #[tokio::test]
    async fn null_value_with_positive_confidence_is_not_found() {
        let resp = r#"{
            "case_number": {"value": null, "source_text": null, "confidence_score": 0.8},
            "plaintiff_name": {"value": "Jane", "source_text": "Jane", "confidence_score": 0.0}
        }"#;
        let client = ScriptedClient::new(vec![Ok(resp.into())]);
        let result = FieldExtractor::new(client).extract(&schema(), &chunk("text")).await;

        for name in ["case_number", "plaintiff_name"] {
            let r = &result.records[name];
            assert!(r.value.is_none(), "{name} should be not-found");
            assert!(r.source_text.is_none());
            assert_eq!(r.confidence_score, 0.0);
        }
    }

    #[tokio::test]
    async fn fenced_response_is_parsed() {
        let fenced = format!("```json\n{GOOD_RESPONSE}\n```");
        let client = ScriptedClient::new(vec![Ok(fenced)]);
        let result = FieldExtractor::new(client).extract(&schema(), &chunk("text")).await;
        assert!(result.error.is_none());
        assert!(result.records["case_number"].is_found());
    }

    #[tokio::test]
    async fn bare_value_accepted_at_reduced_confidence() {
        let resp = r#"{"case_number": "CIV-7", "plaintiff_name": null}"#;
        let client = ScriptedClient::new(vec![Ok(resp.into())]);
        let result = FieldExtractor::new(client).extract(&schema(), &chunk("text")).await;

        let case = &result.records["case_number"];
        assert_eq!(case.value, Some(serde_json::json!("CIV-7")));
        assert_eq!(case.confidence_score, 0.5);
        assert!(case.source_text.is_none());
    }

    #[tokio::test]
    async fn malformed_then_valid_retries_with_corrective_instruction() {
        let client = ScriptedClient::new(vec![
            Ok("I could not find a JSON representation.".into()),
            Ok(GOOD_RESPONSE.into()),
        ]);
        let extractor = FieldExtractor::new(client.clone());
        let result = extractor.extract(&schema(), &chunk("text")).await;

        assert!(result.error.is_none());
        assert!(result.records["case_number"].is_found());
        assert_eq!(client.calls().await, 2);
        let prompts = client.prompts.lock().await;
        assert!(!prompts[0].contains("previous response"));
        assert!(prompts[1].contains("previous response was not valid JSON"));
    }

    #[tokio::test]
    async fn malformed_twice_degrades_with_error() {
        let client = ScriptedClient::new(vec![
            Ok("not json".into()),
            Ok("[1, 2, 3]".into()),
        ]);
        let extractor = FieldExtractor::new(client.clone());
        let result = extractor.extract(&schema(), &chunk("text")).await;

        assert!(matches!(
            result.error,
            Some(ChunkError::MalformedResponse { attempts: 2, .. })
        ));
        assert_eq!(result.records.len(), 2);
        assert!(result.records.values().all(|r| !r.is_found()));
        assert_eq!(client.calls().await, 2);
    }

    #[tokio::test]
    async fn timeout_degrades_without_retry() {
        let client = ScriptedClient::new(vec![Err(CompletionError::Timeout { secs: 30 })]);
        let extractor = FieldExtractor::new(client.clone());
        let result = extractor.extract(&schema(), &chunk("text")).await;

        assert!(matches!(result.error, Some(ChunkError::Timeout { secs: 30, .. })));
        assert!(result.records.values().all(|r| !r.is_found()));
        assert_eq!(client.calls().await, 1);
    }

    #[tokio::test]
    async fn api_error_retries_then_degrades() {
        let client = ScriptedClient::new(vec![
            Err(CompletionError::Api("429".into())),
            Err(CompletionError::Api("429 again".into())),
        ]);
        let extractor = FieldExtractor::new(client.clone());
        let result = extractor.extract(&schema(), &chunk("text")).await;

        assert!(matches!(result.error, Some(ChunkError::LlmFailed { .. })));
        assert_eq!(client.calls().await, 2);
    }

    #[test]
    fn sanitize_maps_nothing_spellings_to_none() {
        assert!(sanitize_value(serde_json::json!("  ")).is_none());
        assert!(sanitize_value(serde_json::json!("N/A")).is_none());
        assert!(sanitize_value(serde_json::json!("null")).is_none());
        assert!(sanitize_value(serde_json::json!(["", "null"])).is_none());
        assert_eq!(
            sanitize_value(serde_json::json!("  Jane Doe ")),
            Some(serde_json::json!("Jane Doe"))
        );
        assert_eq!(sanitize_value(serde_json::json!(42)), Some(serde_json::json!(42)));
    }
}
