//! Merge per-chunk extraction records into one result per schema field.
//!
//! Scalar fields keep the single highest-confidence record; a later chunk
//! must score strictly higher to displace an earlier one, so ties resolve
//! to the earliest chunk and adding chunks can never lower a field's
//! confidence. Array fields union their items instead — a parties list
//! split across chunks should come back whole, not truncated to whichever
//! chunk the model liked best.
//!
//! "Nothing found anywhere" is a valid outcome: the field synthesizes to a
//! null result, flagged for review only when the schema marks it required.

use crate::output::{ChunkExtraction, ExtractionRecord, FieldResult};
use crate::schema::{FieldSchema, FieldType};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Synthesize one [`FieldResult`] per schema field from all chunk
/// extractions.
///
/// `extractions` may arrive in any order (extraction fans out
/// concurrently); synthesis re-sorts by chunk index so the outcome is
/// deterministic.
pub fn synthesize(
    schema: &FieldSchema,
    extractions: &[ChunkExtraction],
    confidence_threshold: f64,
) -> BTreeMap<String, FieldResult> {
    let mut ordered: Vec<&ChunkExtraction> = extractions.iter().collect();
    ordered.sort_by_key(|e| e.chunk_index);

    let mut results = BTreeMap::new();
    for field in &schema.fields {
        let found: Vec<(&ChunkExtraction, &ExtractionRecord)> = ordered
            .iter()
            .filter_map(|e| {
                e.records
                    .get(&field.name)
                    .filter(|r| r.is_found())
                    .map(|r| (*e, r))
            })
            .collect();

        let result = if found.is_empty() {
            FieldResult {
                value: None,
                source_text: None,
                confidence_score: 0.0,
                requires_review: field.required,
                page_number: None,
            }
        } else if field.field_type == FieldType::Array {
            union_arrays(&found, confidence_threshold)
        } else {
            best_scalar(&found, confidence_threshold)
        };

        debug!(
            "field '{}': {} candidate(s), confidence {:.2}{}",
            field.name,
            found.len(),
            result.confidence_score,
            if result.requires_review { " (review)" } else { "" }
        );
        results.insert(field.name.clone(), result);
    }
    results
}

/// Highest confidence wins; strictly-greater to displace, so the earliest
/// chunk takes ties.
fn best_scalar(
    found: &[(&ChunkExtraction, &ExtractionRecord)],
    threshold: f64,
) -> FieldResult {
    let mut winner = found[0];
    for &candidate in &found[1..] {
        if candidate.1.confidence_score > winner.1.confidence_score {
            winner = candidate;
        }
    }
    let (extraction, record) = winner;
    FieldResult {
        value: record.value.clone(),
        source_text: record.source_text.clone(),
        confidence_score: record.confidence_score,
        requires_review: record.confidence_score < threshold,
        page_number: extraction.pages.first().copied(),
    }
}

/// Union of all items across chunks, de-duplicated case-insensitively on
/// the serialized item. Confidence is the minimum across contributing
/// records: the merged list is only as trustworthy as its shakiest source.
fn union_arrays(
    found: &[(&ChunkExtraction, &ExtractionRecord)],
    threshold: f64,
) -> FieldResult {
    let mut items: Vec<Value> = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    let mut confidence = f64::MAX;
    let mut sources: Vec<&str> = Vec::new();
    let mut page = None;

    for (extraction, record) in found {
        confidence = confidence.min(record.confidence_score);
        if page.is_none() {
            page = extraction.pages.first().copied();
        }
        if let Some(src) = record.source_text.as_deref() {
            if !sources.contains(&src) {
                sources.push(src);
            }
        }

        let values = match record.value.as_ref() {
            Some(Value::Array(a)) => a.clone(),
            // Tolerate a scalar where an array was requested.
            Some(other) => vec![other.clone()],
            None => vec![],
        };
        for item in values {
            let key = item.to_string().to_lowercase();
            if !seen.contains(&key) {
                seen.push(key);
                items.push(item);
            }
        }
    }

    FieldResult {
        value: Some(Value::Array(items)),
        source_text: if sources.is_empty() {
            None
        } else {
            Some(sources.join("; "))
        },
        confidence_score: confidence,
        requires_review: confidence < threshold,
        page_number: page,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSpec;
    use serde_json::json;

    fn scalar_schema() -> FieldSchema {
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
                    name: "settlement_amount".into(),
                    field_type: FieldType::Number,
                    description: "Settlement amount if any".into(),
                    required: false,
                },
            ],
        )
    }

    fn record(value: Value, confidence: f64, chunk_index: usize) -> ExtractionRecord {
        ExtractionRecord {
            value: Some(value),
            source_text: Some(format!("source from chunk {chunk_index}")),
            confidence_score: confidence,
            chunk_index,
        }
    }

    fn extraction(
        chunk_index: usize,
        pages: Vec<usize>,
        records: Vec<(&str, ExtractionRecord)>,
    ) -> ChunkExtraction {
        ChunkExtraction {
            chunk_index,
            pages,
            records: records
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            error: None,
        }
    }

    #[test]
    fn highest_confidence_wins_across_chunks() {
        let extractions = vec![
            extraction(0, vec![1], vec![("case_number", record(json!("CIV-1"), 0.7, 0))]),
            extraction(1, vec![2], vec![("case_number", record(json!("CIV-2"), 0.95, 1))]),
        ];
        let out = synthesize(&scalar_schema(), &extractions, 0.9);

        let case = &out["case_number"];
        assert_eq!(case.value, Some(json!("CIV-2")));
        assert_eq!(case.confidence_score, 0.95);
        assert!(!case.requires_review);
        assert_eq!(case.page_number, Some(2));
    }

    #[test]
    fn tie_resolves_to_earliest_chunk() {
        let extractions = vec![
            // Out of chunk order on purpose.
            extraction(2, vec![5], vec![("case_number", record(json!("LATE"), 0.9, 2))]),
            extraction(0, vec![1], vec![("case_number", record(json!("EARLY"), 0.9, 0))]),
        ];
        let out = synthesize(&scalar_schema(), &extractions, 0.9);
        assert_eq!(out["case_number"].value, Some(json!("EARLY")));
        assert_eq!(out["case_number"].page_number, Some(1));
    }

    #[test]
    fn adding_a_chunk_never_lowers_confidence() {
        let two = vec![
            extraction(0, vec![1], vec![("case_number", record(json!("A"), 0.8, 0))]),
            extraction(1, vec![2], vec![("case_number", record(json!("B"), 0.6, 1))]),
        ];
        let base = synthesize(&scalar_schema(), &two, 0.9)["case_number"].confidence_score;

        let mut three = two.clone();
        three.push(extraction(
            2,
            vec![3],
            vec![("case_number", record(json!("C"), 0.1, 2))],
        ));
        let more = synthesize(&scalar_schema(), &three, 0.9)["case_number"].confidence_score;
        assert!(more >= base);
    }

    #[test]
    fn below_threshold_requires_review() {
        let extractions = vec![extraction(
            0,
            vec![1],
            vec![("case_number", record(json!("CIV-1"), 0.5, 0))],
        )];
        let out = synthesize(&scalar_schema(), &extractions, 0.9);
        assert!(out["case_number"].requires_review);
    }

    #[test]
    fn all_null_required_field_flagged_optional_not() {
        let extractions = vec![extraction(
            0,
            vec![1],
            vec![
                ("case_number", ExtractionRecord::not_found(0)),
                ("settlement_amount", ExtractionRecord::not_found(0)),
            ],
        )];
        let out = synthesize(&scalar_schema(), &extractions, 0.9);

        let required = &out["case_number"];
        assert!(required.value.is_none());
        assert_eq!(required.confidence_score, 0.0);
        assert!(required.requires_review);

        let optional = &out["settlement_amount"];
        assert!(optional.value.is_none());
        assert!(!optional.requires_review);
    }

    #[test]
    fn array_fields_union_with_min_confidence() {
        let schema = FieldSchema::new(
            "complaint",
            vec![FieldSpec {
                name: "defendants".into(),
                field_type: FieldType::Array,
                description: "All named defendants".into(),
                required: true,
            }],
        );
        let extractions = vec![
            extraction(
                0,
                vec![1],
                vec![("defendants", record(json!(["Acme Corp", "John Roe"]), 0.95, 0))],
            ),
            extraction(
                1,
                vec![3],
                // "ACME CORP" duplicates case-insensitively.
                vec![("defendants", record(json!(["ACME CORP", "Mary Moe"]), 0.8, 1))],
            ),
        ];
        let out = synthesize(&schema, &extractions, 0.9);

        let d = &out["defendants"];
        assert_eq!(d.value, Some(json!(["Acme Corp", "John Roe", "Mary Moe"])));
        assert_eq!(d.confidence_score, 0.8);
        assert!(d.requires_review);
        assert_eq!(d.page_number, Some(1));
        let src = d.source_text.as_deref().unwrap();
        assert!(src.contains("chunk 0") && src.contains("chunk 1"));
    }

    #[test]
    fn empty_extractions_yield_null_results() {
        let out = synthesize(&scalar_schema(), &[], 0.9);
        assert_eq!(out.len(), 2);
        assert!(out.values().all(|f| f.value.is_none()));
    }
}
