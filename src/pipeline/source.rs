//! Text source adapter: page-indexed text with OCR fallback.
//!
//! Two collaborators hide behind one contract: a [`DirectTextSource`] that
//! reads the machine text layer, and an [`OcrEngine`] consulted only when the
//! direct text is too sparse to be real. The classification heuristic is
//! average non-whitespace characters per page — machine-readable documents
//! produce orders of magnitude more than a blank scan, so a single threshold
//! separates them reliably.
//!
//! Low density is never an error. Only a document that cannot be opened at
//! all fails the run.

use crate::config::PageLimit;
use crate::error::{ChunkError, LexError};
use crate::output::{ProcessingMethod, SourceMetadata};
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};

/// Text of a single processed page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    /// 1-based page number.
    pub page_number: usize,
    pub text: String,
    /// Non-whitespace character count, used for density classification.
    pub char_count: usize,
}

impl PageText {
    pub fn new(page_number: usize, text: impl Into<String>) -> Self {
        let text = text.into();
        let char_count = text.chars().filter(|c| !c.is_whitespace()).count();
        Self {
            page_number,
            text,
            char_count,
        }
    }
}

/// Result of direct text extraction.
#[derive(Debug, Clone)]
pub struct ExtractedPages {
    /// One entry per processed page, in page order.
    pub pages: Vec<PageText>,
    /// Total pages in the document (may exceed `pages.len()` under a
    /// page limit).
    pub total_pages: usize,
}

/// Direct (machine text layer) extraction collaborator.
///
/// May return empty or sparse text for image pages — that is not an error
/// condition; the adapter decides whether to fall back to OCR.
#[async_trait]
pub trait DirectTextSource: Send + Sync {
    async fn extract_pages(
        &self,
        bytes: &[u8],
        limit: PageLimit,
    ) -> Result<ExtractedPages, LexError>;
}

/// OCR collaborator: produce per-page text for the given 1-based pages.
///
/// OCR text may be noisy; it is treated as equally authoritative input to
/// the chunker. Individual page failures are reported alongside the pages
/// (with empty text) rather than failing the whole call.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn transcribe_pages(
        &self,
        bytes: &[u8],
        page_numbers: &[usize],
    ) -> Result<(Vec<PageText>, Vec<ChunkError>), LexError>;
}

/// Output of the adapter: page texts plus classification metadata.
#[derive(Debug, Clone)]
pub struct SourceOutput {
    pub pages: Vec<PageText>,
    pub used_ocr: bool,
    pub metadata: SourceMetadata,
    /// Recoverable per-page errors from the OCR fallback.
    pub errors: Vec<ChunkError>,
}

/// The text source adapter: direct extraction first, OCR when density says
/// the text layer is not real.
pub struct TextSourceAdapter {
    direct: Arc<dyn DirectTextSource>,
    ocr: Arc<dyn OcrEngine>,
    density_threshold: f64,
}

impl TextSourceAdapter {
    pub fn new(
        direct: Arc<dyn DirectTextSource>,
        ocr: Arc<dyn OcrEngine>,
        density_threshold: f64,
    ) -> Self {
        Self {
            direct,
            ocr,
            density_threshold,
        }
    }

    /// Extract page-indexed text for the pages selected by `limit`.
    pub async fn extract(
        &self,
        bytes: &[u8],
        limit: PageLimit,
    ) -> Result<SourceOutput, LexError> {
        let extracted = self.direct.extract_pages(bytes, limit).await?;
        let processed = extracted.pages.len();
        if processed == 0 {
            return Err(LexError::SourceUnreadable {
                detail: "document has no pages".into(),
            });
        }

        let total_chars: usize = extracted.pages.iter().map(|p| p.char_count).sum();
        let avg_density = total_chars as f64 / processed as f64;
        debug!(
            "direct extraction: {} pages, {:.1} chars/page (threshold {})",
            processed, avg_density, self.density_threshold
        );

        if avg_density >= self.density_threshold {
            return Ok(SourceOutput {
                pages: extracted.pages,
                used_ocr: false,
                metadata: SourceMetadata {
                    total_pages: extracted.total_pages,
                    pages_processed: processed,
                    processing_method: ProcessingMethod::DirectText,
                    avg_chars_per_page: avg_density,
                    total_characters: total_chars,
                },
                errors: vec![],
            });
        }

        // Sparse text layer: re-run the same page range through OCR and
        // replace the text for those pages.
        info!(
            "text density {:.1} below threshold — routing {} pages through OCR",
            avg_density, processed
        );
        let page_numbers: Vec<usize> = extracted.pages.iter().map(|p| p.page_number).collect();
        let (ocr_pages, errors) = self.ocr.transcribe_pages(bytes, &page_numbers).await?;

        let ocr_chars: usize = ocr_pages.iter().map(|p| p.char_count).sum();
        let ocr_density = ocr_chars as f64 / processed.max(1) as f64;

        Ok(SourceOutput {
            pages: ocr_pages,
            used_ocr: true,
            metadata: SourceMetadata {
                total_pages: extracted.total_pages,
                pages_processed: processed,
                processing_method: ProcessingMethod::Ocr,
                avg_chars_per_page: ocr_density,
                total_characters: ocr_chars,
            },
            errors,
        })
    }
}

/// Default [`DirectTextSource`] over the pdfium text layer.
///
/// pdfium is not async-safe, so all work happens on `spawn_blocking`.
pub struct PdfiumTextSource;

#[async_trait]
impl DirectTextSource for PdfiumTextSource {
    async fn extract_pages(
        &self,
        bytes: &[u8],
        limit: PageLimit,
    ) -> Result<ExtractedPages, LexError> {
        let owned = bytes.to_vec();
        tokio::task::spawn_blocking(move || extract_pages_blocking(&owned, limit))
            .await
            .map_err(|e| LexError::Internal(format!("extraction task panicked: {e}")))?
    }
}

fn extract_pages_blocking(bytes: &[u8], limit: PageLimit) -> Result<ExtractedPages, LexError> {
    let pdfium = Pdfium::default();
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| LexError::SourceUnreadable {
            detail: format!("{e:?}"),
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    let process = limit.pages_to_process(total_pages);

    let mut out = Vec::with_capacity(process);
    for idx in 0..process {
        let page = pages
            .get(idx as u16)
            .map_err(|e| LexError::SourceUnreadable {
                detail: format!("page {}: {e:?}", idx + 1),
            })?;
        let text = page
            .text()
            .map(|t| t.all())
            .unwrap_or_default();
        out.push(PageText::new(idx + 1, text));
    }

    Ok(ExtractedPages {
        pages: out,
        total_pages,
    })
}
