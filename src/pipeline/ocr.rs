//! Vision-OCR engine: rasterise a page and transcribe it with a vision LLM.
//!
//! Traditional OCR stacks need binary dependencies and language packs; a
//! vision model reads a rendered page the way a human would and copes with
//! stamps, handwriting, and skewed scans. The engine reuses the same
//! provider abstraction as field extraction, so one API key drives the
//! whole pipeline.
//!
//! pdfium rasterisation is CPU-bound and not async-safe, so rendering runs
//! on `spawn_blocking`; only the transcription calls suspend.

use crate::error::{ChunkError, LexError};
use crate::pipeline::source::{OcrEngine, PageText};
use crate::prompts::OCR_SYSTEM_PROMPT;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default longest-edge cap for rendered pages, in pixels.
///
/// Large enough for fine print to survive, small enough to stay well under
/// provider upload limits.
const DEFAULT_MAX_PIXELS: u32 = 2000;

/// [`OcrEngine`] backed by a vision LLM provider.
pub struct VisionOcrEngine {
    provider: Arc<dyn LLMProvider>,
    max_pixels: u32,
    timeout: Duration,
    max_tokens: usize,
}

impl VisionOcrEngine {
    pub fn new(provider: Arc<dyn LLMProvider>, timeout_secs: u64, max_tokens: usize) -> Self {
        Self {
            provider,
            max_pixels: DEFAULT_MAX_PIXELS,
            timeout: Duration::from_secs(timeout_secs),
            max_tokens,
        }
    }

    pub fn with_max_pixels(mut self, px: u32) -> Self {
        self.max_pixels = px.max(100);
        self
    }

    async fn transcribe_one(&self, page_number: usize, image: ImageData) -> Result<String, String> {
        let messages = vec![
            ChatMessage::system(OCR_SYSTEM_PROMPT),
            // VLM APIs require a user turn; the image carries the content.
            ChatMessage::user_with_images("", vec![image]),
        ];
        let options = CompletionOptions {
            temperature: Some(0.0),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let call = self.provider.chat(&messages, Some(&options));
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(response)) => {
                debug!(
                    "OCR page {}: {} chars transcribed",
                    page_number,
                    response.content.len()
                );
                Ok(response.content)
            }
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {}s", self.timeout.as_secs())),
        }
    }
}

#[async_trait]
impl OcrEngine for VisionOcrEngine {
    async fn transcribe_pages(
        &self,
        bytes: &[u8],
        page_numbers: &[usize],
    ) -> Result<(Vec<PageText>, Vec<ChunkError>), LexError> {
        let owned = bytes.to_vec();
        let indices: Vec<usize> = page_numbers.iter().map(|&n| n - 1).collect();
        let max_pixels = self.max_pixels;

        let rendered =
            tokio::task::spawn_blocking(move || render_pages_blocking(&owned, &indices, max_pixels))
                .await
                .map_err(|e| LexError::Internal(format!("render task panicked: {e}")))??;

        let mut pages = Vec::with_capacity(rendered.len());
        let mut errors = Vec::new();

        for (idx, outcome) in rendered {
            let page_number = idx + 1;
            let image = match outcome {
                Ok(img) => img,
                Err(detail) => {
                    warn!("OCR page {}: render failed: {}", page_number, detail);
                    errors.push(ChunkError::OcrPageFailed {
                        page: page_number,
                        detail: format!("render: {detail}"),
                    });
                    pages.push(PageText::new(page_number, ""));
                    continue;
                }
            };
            let encoded = match encode_page(&image) {
                Ok(data) => data,
                Err(e) => {
                    warn!("OCR page {}: PNG encoding failed: {}", page_number, e);
                    errors.push(ChunkError::OcrPageFailed {
                        page: page_number,
                        detail: format!("image encoding: {e}"),
                    });
                    pages.push(PageText::new(page_number, ""));
                    continue;
                }
            };

            match self.transcribe_one(page_number, encoded).await {
                Ok(text) => pages.push(PageText::new(page_number, text)),
                Err(detail) => {
                    warn!("OCR page {}: transcription failed: {}", page_number, detail);
                    errors.push(ChunkError::OcrPageFailed {
                        page: page_number,
                        detail,
                    });
                    // Keep the page with empty text so provenance stays intact.
                    pages.push(PageText::new(page_number, ""));
                }
            }
        }

        if !pages.is_empty() && errors.len() == pages.len() {
            let detail = errors
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".into());
            return Err(LexError::OcrFailed {
                pages: pages.len(),
                detail,
            });
        }

        Ok((pages, errors))
    }
}

/// Rasterise the selected 0-based pages of a PDF.
///
/// Failure to open the document is fatal; a page that fails to render is
/// reported per page so the caller can degrade it instead of losing the
/// other pages with it.
fn render_pages_blocking(
    bytes: &[u8],
    page_indices: &[usize],
    max_pixels: u32,
) -> Result<Vec<(usize, Result<DynamicImage, String>)>, LexError> {
    let pdfium = Pdfium::default();
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| LexError::SourceUnreadable {
            detail: format!("{e:?}"),
        })?;

    let pages = document.pages();
    let total = pages.len() as usize;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::with_capacity(page_indices.len());
    for &idx in page_indices {
        if idx >= total {
            warn!("skipping page {} (out of range, total={})", idx + 1, total);
            continue;
        }
        let rendered = pages
            .get(idx as u16)
            .and_then(|page| {
                page.render_with_config(&render_config)
                    .map(|bitmap| bitmap.as_image())
            })
            .map_err(|e| format!("{e:?}"));
        results.push((idx, rendered));
    }

    Ok(results)
}

/// Encode a rendered page as base64 PNG for the vision API.
///
/// PNG over JPEG: lossless compression preserves text crispness, and
/// compression artefacts on rendered text measurably degrade transcription.
fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    let b64 = STANDARD.encode(&buf);
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255])));
        let data = encode_page(&img).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert!(!decoded.is_empty());
    }
}
