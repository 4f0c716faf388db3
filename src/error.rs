//! Error types for the lexextract library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`LexError`] — **Fatal**: the analysis run cannot proceed at all
//!   (unreadable source document, invalid schema, provider not configured).
//!   Returned as `Err(LexError)` from submission-time validation, or recorded
//!   on a run with status `Failed`.
//!
//! * [`ChunkError`] — **Non-fatal**: extraction over a single chunk failed
//!   (malformed LLM response, per-call timeout) but the other chunks are fine.
//!   Stored in the run's `processing_errors` list so callers can inspect
//!   partial success rather than losing the whole document to one bad chunk.
//!
//! The separation encodes the propagation policy directly in the type system:
//! only whole-document failures abort a run.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the lexextract library.
///
/// Chunk-level failures use [`ChunkError`] and are recorded on the
/// [`crate::output::AnalysisRun`] rather than propagated here.
#[derive(Debug, Error)]
pub enum LexError {
    // ── Source errors ─────────────────────────────────────────────────────
    /// The document bytes could not be opened as a PDF at all.
    ///
    /// Low text density is NOT this error — that routes the document through
    /// the OCR fallback instead.
    #[error("Source document is unreadable: {detail}")]
    SourceUnreadable { detail: String },

    /// Input file was not found at the given path (CLI convenience).
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// OCR fallback was required but every page failed to transcribe.
    #[error("OCR fallback failed for all {pages} pages: {detail}")]
    OcrFailed { pages: usize, detail: String },

    // ── Schema errors ─────────────────────────────────────────────────────
    /// The extraction schema is not a well-formed field mapping.
    ///
    /// Raised at submission time, before a run is created.
    #[error("Invalid extraction schema: {0}")]
    SchemaValidation(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Run lookup errors ─────────────────────────────────────────────────
    /// No run is registered under the given identifier.
    #[error("Unknown run id: '{0}'")]
    UnknownRun(String),

    /// The run exists but has not reached a terminal state yet.
    #[error("Run '{id}' is still {status} — result not available")]
    RunNotFinished { id: String, status: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error scoped to a single chunk's field extraction.
///
/// Recorded in `AnalysisRun::processing_errors`; the run still completes
/// with best-effort synthesized results for the remaining chunks.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ChunkError {
    /// The LLM response could not be parsed as the expected structured shape,
    /// even after one corrective retry. The chunk's fields degrade to null.
    #[error("Chunk {chunk}: malformed LLM response after {attempts} attempts: {detail}")]
    MalformedResponse {
        chunk: usize,
        attempts: u8,
        detail: String,
    },

    /// The LLM call exceeded the per-call timeout. Treated exactly like a
    /// malformed response: degrade the chunk and continue.
    #[error("Chunk {chunk}: LLM call timed out after {secs}s")]
    Timeout { chunk: usize, secs: u64 },

    /// The LLM API returned an error for this chunk.
    #[error("Chunk {chunk}: LLM call failed: {detail}")]
    LlmFailed { chunk: usize, detail: String },

    /// A page could not be transcribed during OCR fallback; its text is
    /// treated as empty rather than aborting the run.
    #[error("Page {page}: OCR transcription failed: {detail}")]
    OcrPageFailed { page: usize, detail: String },
}
