//! Pipeline stages for document field extraction.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. a different OCR backend) without touching
//! other stages.
//!
//! ## Data Flow
//!
//! ```text
//! source ──▶ chunk ──▶ extract ──▶ synthesize
//! (text/OCR)  (overlap)  (LLM×N)    (merge)
//! ```
//!
//! 1. [`source`]     — page-indexed text via direct extraction, with a
//!    density-based OCR fallback for scanned documents
//! 2. [`ocr`]        — the default OCR collaborator: rasterise a page and
//!    transcribe it with a vision LLM
//! 3. [`chunk`]      — token-bounded overlapping segments with page
//!    provenance; the only stage with nontrivial boundary arithmetic
//! 4. [`extract`]    — one LLM call per chunk returning per-field
//!    value/source/confidence records; the only stage with network I/O
//!    besides OCR
//! 5. [`synthesize`] — merge per-chunk records into one answer per field,
//!    resolving conflicts by confidence

pub mod chunk;
pub mod extract;
pub mod ocr;
pub mod source;
pub mod synthesize;
