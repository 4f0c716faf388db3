//! Configuration types for document analysis.
//!
//! All pipeline behaviour is controlled through [`AnalysisConfig`], built via
//! its [`AnalysisConfigBuilder`] and passed into the orchestrator at
//! construction. The pipeline never reads ambient process state, so two
//! analyzers with different configs can coexist in one process and tests can
//! construct exactly the knobs they need.
//!
//! The density and confidence thresholds are empirical tuning constants
//! inherited from production use on legal documents; both are configurable
//! rather than fixed.

use crate::error::LexError;
use serde::{Deserialize, Serialize};

/// How many pages of the document to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageLimit {
    /// Process the first N pages (1-based count). The default policy for
    /// long documents — most legal filings state the key facts up front.
    FirstN(usize),
    /// Full-document mode: process every page.
    All,
}

impl Default for PageLimit {
    fn default() -> Self {
        PageLimit::FirstN(10)
    }
}

impl PageLimit {
    /// Number of pages to process for a document with `total` pages.
    pub fn pages_to_process(&self, total: usize) -> usize {
        match self {
            PageLimit::FirstN(n) => (*n).min(total),
            PageLimit::All => total,
        }
    }
}

/// Configuration for a [`crate::analyze::DocumentAnalyzer`].
///
/// Built via [`AnalysisConfig::builder()`] or [`AnalysisConfig::default()`].
///
/// # Example
/// ```rust
/// use lexextract::AnalysisConfig;
///
/// let config = AnalysisConfig::builder()
///     .max_chunk_tokens(4000)
///     .overlap_tokens(400)
///     .confidence_threshold(0.9)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Maximum estimated tokens per chunk. Default: 4000.
    ///
    /// Sized so a chunk plus the schema prompt fits comfortably inside an
    /// 8K-context completion with room for the structured response.
    pub max_chunk_tokens: usize,

    /// Trailing tokens of each chunk re-included at the start of the next.
    /// Default: 400.
    ///
    /// Facts that straddle a chunk boundary appear whole in at least one
    /// chunk as long as they fit inside the overlap window.
    pub overlap_tokens: usize,

    /// Synthesized fields below this confidence are flagged for human
    /// review. Default: 0.9.
    pub confidence_threshold: f64,

    /// Average non-whitespace characters per page below which the document
    /// is classified as image-based and routed through OCR. Default: 100.
    ///
    /// Machine-readable text produces orders of magnitude more characters
    /// per page than a blank scan, so the exact value is not sensitive.
    pub text_density_threshold: f64,

    /// Default page-limit policy when the caller does not override it.
    pub page_limit: PageLimit,

    /// Number of concurrent LLM extraction calls across chunks. Default: 4.
    ///
    /// Chunks are independent, so extraction is network-bound fan-out.
    pub concurrency: usize,

    /// Sampling temperature for extraction calls. Default: 0.1.
    ///
    /// Deterministic-leaning generation keeps confidence scores stable
    /// across repeated runs on the same input.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per extraction response.
    /// Default: 2000.
    pub max_response_tokens: usize,

    /// Per-LLM-call timeout in seconds. Default: 30.
    ///
    /// A timeout degrades the affected chunk to null records, exactly like
    /// a malformed response. It never aborts the run.
    pub llm_timeout_secs: u64,

    /// LLM model identifier, e.g. "gpt-4.1-mini". If None, uses the
    /// provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None, the provider is auto-detected from the environment.
    pub provider_name: Option<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_chunk_tokens: 4000,
            overlap_tokens: 400,
            confidence_threshold: 0.9,
            text_density_threshold: 100.0,
            page_limit: PageLimit::default(),
            concurrency: 4,
            temperature: 0.1,
            max_response_tokens: 2000,
            llm_timeout_secs: 30,
            model: None,
            provider_name: None,
        }
    }
}

impl AnalysisConfig {
    /// Create a new builder for `AnalysisConfig`.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`AnalysisConfig`].
#[derive(Debug)]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    pub fn max_chunk_tokens(mut self, n: usize) -> Self {
        self.config.max_chunk_tokens = n;
        self
    }

    pub fn overlap_tokens(mut self, n: usize) -> Self {
        self.config.overlap_tokens = n;
        self
    }

    pub fn confidence_threshold(mut self, t: f64) -> Self {
        self.config.confidence_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn text_density_threshold(mut self, t: f64) -> Self {
        self.config.text_density_threshold = t.max(0.0);
        self
    }

    pub fn page_limit(mut self, limit: PageLimit) -> Self {
        self.config.page_limit = limit;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_response_tokens(mut self, n: usize) -> Self {
        self.config.max_response_tokens = n;
        self
    }

    pub fn llm_timeout_secs(mut self, secs: u64) -> Self {
        self.config.llm_timeout_secs = secs;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, LexError> {
        let c = &self.config;
        if c.max_chunk_tokens == 0 {
            return Err(LexError::InvalidConfig(
                "max_chunk_tokens must be ≥ 1".into(),
            ));
        }
        if c.overlap_tokens >= c.max_chunk_tokens {
            return Err(LexError::InvalidConfig(format!(
                "overlap_tokens ({}) must be smaller than max_chunk_tokens ({})",
                c.overlap_tokens, c.max_chunk_tokens
            )));
        }
        if !(0.0..=1.0).contains(&c.confidence_threshold) {
            return Err(LexError::InvalidConfig(format!(
                "confidence_threshold must be 0.0–1.0, got {}",
                c.confidence_threshold
            )));
        }
        if let PageLimit::FirstN(0) = c.page_limit {
            return Err(LexError::InvalidConfig(
                "page limit must be ≥ 1 page".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let c = AnalysisConfig::builder().build().unwrap();
        assert_eq!(c.max_chunk_tokens, 4000);
        assert_eq!(c.overlap_tokens, 400);
        assert_eq!(c.confidence_threshold, 0.9);
        assert_eq!(c.page_limit, PageLimit::FirstN(10));
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk() {
        let err = AnalysisConfig::builder()
            .max_chunk_tokens(100)
            .overlap_tokens(100)
            .build();
        assert!(matches!(err, Err(LexError::InvalidConfig(_))));
    }

    #[test]
    fn zero_page_limit_rejected() {
        let err = AnalysisConfig::builder()
            .page_limit(PageLimit::FirstN(0))
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn threshold_is_clamped() {
        let c = AnalysisConfig::builder()
            .confidence_threshold(1.5)
            .build()
            .unwrap();
        assert_eq!(c.confidence_threshold, 1.0);
    }

    #[test]
    fn page_limit_policy() {
        assert_eq!(PageLimit::FirstN(10).pages_to_process(3), 3);
        assert_eq!(PageLimit::FirstN(10).pages_to_process(25), 10);
        assert_eq!(PageLimit::All.pages_to_process(25), 25);
    }
}
