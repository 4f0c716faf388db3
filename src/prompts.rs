//! Prompts for LLM-based field extraction and vision OCR.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing extraction behaviour (e.g.
//!    tightening the no-inference rule) requires editing exactly one place.
//!
//! 2. **Testability** — unit tests can inspect prompts directly without
//!    spinning up a real LLM, making prompt regressions easy to catch.

use crate::schema::FieldSchema;

/// System prompt for structured field extraction from legal document text.
///
/// The role framing ("expert paralegal") and the conservative-extraction
/// rules materially improve precision on legal filings: the model must quote
/// supporting text and must prefer null over a guess.
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are an expert paralegal specializing in personal injury cases.
Your task is to extract specific information from legal documents with extreme accuracy.

CRITICAL RULES:
1. Extract information ONLY from the provided text
2. Do not infer or add information not explicitly stated
3. For each field, provide the exact source text that justifies the extraction
4. Assign confidence scores from 0.0 to 1.0 based on text clarity
5. If information is not found, return null values with 0.0 confidence
6. Be extremely conservative - better to return null than guess"#;

/// Instruction appended to the retry prompt after a malformed response.
///
/// One corrective retry is allowed per chunk; a second malformed response
/// degrades the chunk to null records.
pub const CORRECTIVE_RETRY_INSTRUCTION: &str = r#"
IMPORTANT: Your previous response was not valid JSON matching the requested shape.
Respond with ONLY a single JSON object. No prose, no markdown fences, no commentary.
Every field name from the schema must appear exactly once as a key."#;

/// System prompt for the vision-OCR fallback: transcribe a scanned page.
///
/// Plain-text transcription, not Markdown — the chunker and extractor
/// downstream work on raw text and page provenance, not layout.
pub const OCR_SYSTEM_PROMPT: &str = r#"You are a precise OCR engine. Transcribe ALL text visible in the page image.

Rules:
1. Output the text content only, in natural reading order
2. Preserve line breaks between paragraphs and list items
3. Do not describe images, layout, or formatting
4. Do not add commentary, headers, or page numbers of your own
5. If the page is blank, output nothing"#;

/// Build the per-chunk user prompt: schema description plus chunk text.
///
/// The response contract (value / source_text / confidence_score per field)
/// is spelled out with a worked example because models follow shapes far
/// more reliably than they follow abstract instructions.
pub fn build_extraction_prompt(schema: &FieldSchema, chunk_text: &str) -> String {
    let mut schema_lines = String::new();
    for field in &schema.fields {
        schema_lines.push_str(&format!(
            "  \"{}\": {} ({}) — {}\n",
            field.name,
            field.field_type.as_str(),
            if field.required { "required" } else { "optional" },
            field.description,
        ));
    }

    format!(
        r#"Extract the following information from this legal document text:

TARGET SCHEMA:
{schema_lines}
DOCUMENT TEXT:
{chunk_text}

Return a JSON object where each field contains:
- value: The extracted value (null if not found)
- source_text: The exact text that supports this extraction (null if not found)
- confidence_score: A score from 0.0 to 1.0 indicating confidence

Example format:
{{
    "case_number": {{
        "value": "CIV-2024-1138",
        "source_text": "Case Number: CIV-2024-1138",
        "confidence_score": 0.99
    }},
    "plaintiff_name": {{
        "value": "Jane Doe",
        "source_text": "Jane Doe, an individual, Plaintiff",
        "confidence_score": 0.95
    }}
}}

IMPORTANT: Only extract information that is explicitly stated in the text. Do not infer or guess."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSpec, FieldType};

    #[test]
    fn prompt_names_every_schema_field() {
        let schema = FieldSchema::new(
            "complaint",
            vec![
                FieldSpec {
                    name: "case_number".into(),
                    field_type: FieldType::String,
                    description: "Court case number".into(),
                    required: true,
                },
                FieldSpec {
                    name: "filing_date".into(),
                    field_type: FieldType::Date,
                    description: "Date the complaint was filed".into(),
                    required: false,
                },
            ],
        );
        let prompt = build_extraction_prompt(&schema, "some text");
        assert!(prompt.contains("\"case_number\": string (required)"));
        assert!(prompt.contains("\"filing_date\": date (optional)"));
        assert!(prompt.contains("some text"));
    }

    #[test]
    fn system_prompt_forbids_inference() {
        assert!(EXTRACTION_SYSTEM_PROMPT.contains("ONLY from the provided text"));
        assert!(EXTRACTION_SYSTEM_PROMPT.contains("0.0 confidence"));
    }
}
