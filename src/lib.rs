//! # lexextract
//!
//! Extract structured fields from legal PDF documents using LLMs.
//!
//! ## Why this crate?
//!
//! Legal intake is reading the same handful of facts — case number, parties,
//! incident date, damages — out of documents that arrive as arbitrary PDFs:
//! machine-readable filings, flattened scans, or something in between.
//! This crate turns a PDF plus a caller-defined field schema into typed
//! values with supporting quotes and confidence scores, flagging anything
//! uncertain for human review instead of guessing.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Source      page text via pdfium; density check routes scans
//!  │                 through the vision-OCR fallback
//!  ├─ 2. Chunk       token-bounded overlapping segments, cut at sentence
//!  │                 and section boundaries, page provenance kept
//!  ├─ 3. Extract     one LLM call per chunk → value / source_text /
//!  │                 confidence per field (concurrent, retry-then-degrade)
//!  ├─ 4. Synthesize  merge per-chunk records: highest confidence wins,
//!  │                 arrays union, low confidence flags review
//!  └─ 5. Run         cached by (content hash, schema id) — identical
//!                    requests never recompute
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lexextract::{
//!     AnalysisConfig, AnalyzeOptions, DocumentAnalyzer, EdgequakeClient,
//!     FieldSchema, FieldSpec, FieldType, PdfiumTextSource, TextSourceAdapter,
//!     VisionOcrEngine,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AnalysisConfig::default();
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let client = Arc::new(EdgequakeClient::from_config(&config)?);
//!     let ocr = Arc::new(VisionOcrEngine::new(client.provider(), 30, 2000));
//!     let adapter = TextSourceAdapter::new(
//!         Arc::new(PdfiumTextSource),
//!         ocr,
//!         config.text_density_threshold,
//!     );
//!     let analyzer = DocumentAnalyzer::new(adapter, client, config);
//!
//!     let schema = FieldSchema::new(
//!         "personal_injury_complaint",
//!         vec![FieldSpec {
//!             name: "case_number".into(),
//!             field_type: FieldType::String,
//!             description: "Court case number".into(),
//!             required: true,
//!         }],
//!     );
//!
//!     let bytes = std::fs::read("complaint.pdf")?;
//!     let run = analyzer
//!         .analyze(&bytes, &schema, AnalyzeOptions::default())
//!         .await?;
//!     for (field, result) in &run.extracted_data {
//!         println!("{field}: {:?} (confidence {:.2})", result.value, result.confidence_score);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`     | on    | Enables the `lexextract` binary (clap + anyhow + tracing-subscriber) |
//! | `bundled` | on    | Downloads a pdfium binary at build time via `pdfium-auto` |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! lexextract = { version = "0.3", default-features = false, features = ["bundled"] }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod cache;
pub mod config;
pub mod error;
pub mod llm;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{content_hash, AnalyzeOptions, DocumentAnalyzer};
pub use cache::{MemoryRunCache, RunCache, RunKey};
pub use config::{AnalysisConfig, AnalysisConfigBuilder, PageLimit};
pub use error::{ChunkError, LexError};
pub use llm::{CompletionClient, CompletionError, EdgequakeClient};
pub use output::{
    AnalysisRun, ChunkExtraction, DocumentKind, ExtractionRecord, FieldResult, ProcessingMethod,
    RunStats, RunStatus, SourceMetadata,
};
pub use pipeline::chunk::{Chunk, Chunker};
pub use pipeline::ocr::VisionOcrEngine;
pub use pipeline::source::{
    DirectTextSource, ExtractedPages, OcrEngine, PageText, PdfiumTextSource, SourceOutput,
    TextSourceAdapter,
};
pub use schema::{FieldSchema, FieldSpec, FieldType};
