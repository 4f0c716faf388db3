//! CLI binary for lexextract.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `AnalysisConfig`, runs one analysis, and prints the result.

use anyhow::{bail, Context, Result};
use clap::Parser;
use lexextract::{
    AnalysisConfig, AnalyzeOptions, DocumentAnalyzer, EdgequakeClient, FieldSchema, PageLimit,
    PdfiumTextSource, RunStatus, TextSourceAdapter, VisionOcrEngine,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Analyze a complaint against a schema (first 10 pages by default)
  lexextract complaint.pdf --schema complaint_schema.json

  # Full-document mode
  lexextract complaint.pdf --schema schema.json --full-document

  # Recompute even if a cached result exists for these bytes + schema
  lexextract complaint.pdf --schema schema.json --force

  # Machine-readable output
  lexextract complaint.pdf --schema schema.json --json > run.json

  # Pick a provider and model explicitly
  lexextract scan.pdf --schema schema.json --provider openai --model gpt-4.1

SCHEMA FILE FORMAT (JSON):
  {
    "name": "personal_injury_complaint",
    "fields": [
      {
        "name": "case_number",
        "field_type": "string",
        "description": "Court case number",
        "required": true
      },
      {
        "name": "defendants",
        "field_type": "array",
        "description": "All named defendants",
        "required": false
      }
    ]
  }

  field_type: string | number | array | object | date
  Array fields are unioned across document chunks; all others keep the
  single highest-confidence extraction.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  LEXTRACT_LLM_PROVIDER   Override provider (openai, anthropic, gemini, ollama)
  LEXTRACT_MODEL          Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium — skips auto-download
  PDFIUM_AUTO_CACHE_DIR   Override the default pdfium cache directory

SETUP:
  1. Set API key:   export OPENAI_API_KEY=sk-...
  2. Analyze:       lexextract complaint.pdf --schema schema.json

  PDFium (~30 MB) is downloaded automatically on first run and cached.
  To use an existing copy: PDFIUM_LIB_PATH=/path/to/libpdfium lexextract ...
"#;

/// Extract structured fields from legal PDF documents using LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "lexextract",
    version,
    about = "Extract structured fields from legal PDF documents using LLMs",
    long_about = "Analyze a legal PDF against a caller-defined field schema. Machine-readable \
text is extracted directly; scanned documents fall back to vision-LLM OCR. Each field comes \
back with the supporting quote, a confidence score, and a review flag when confidence is low.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path.
    input: PathBuf,

    /// Path to the JSON extraction schema.
    #[arg(short, long, env = "LEXTRACT_SCHEMA")]
    schema: PathBuf,

    /// Process every page instead of the first N.
    #[arg(long, env = "LEXTRACT_FULL_DOCUMENT")]
    full_document: bool,

    /// Process at most N pages (ignored with --full-document).
    #[arg(long, env = "LEXTRACT_MAX_PAGES", default_value_t = 10)]
    max_pages: usize,

    /// Bypass the result cache and recompute.
    #[arg(long)]
    force: bool,

    /// Maximum estimated tokens per chunk.
    #[arg(long, env = "LEXTRACT_CHUNK_TOKENS", default_value_t = 4000)]
    chunk_tokens: usize,

    /// Tokens of overlap between consecutive chunks.
    #[arg(long, env = "LEXTRACT_OVERLAP_TOKENS", default_value_t = 400)]
    overlap_tokens: usize,

    /// Confidence below this flags a field for human review (0.0–1.0).
    #[arg(long, env = "LEXTRACT_REVIEW_THRESHOLD", default_value_t = 0.9)]
    review_threshold: f64,

    /// Avg chars/page below this routes the document through OCR.
    #[arg(long, env = "LEXTRACT_DENSITY_THRESHOLD", default_value_t = 100.0)]
    density_threshold: f64,

    /// Number of concurrent LLM extraction calls.
    #[arg(short, long, env = "LEXTRACT_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// LLM model ID (e.g. gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "LEXTRACT_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "LEXTRACT_LLM_PROVIDER")]
    provider: Option<String>,

    /// Per-LLM-call timeout in seconds.
    #[arg(long, env = "LEXTRACT_API_TIMEOUT", default_value_t = 30)]
    api_timeout: u64,

    /// Output the full run as JSON instead of the human-readable table.
    #[arg(long, env = "LEXTRACT_JSON")]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "LEXTRACT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and results.
    #[arg(short, long, env = "LEXTRACT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || cli.json {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Ensure PDFium engine is available ────────────────────────────────
    #[cfg(feature = "bundled")]
    {
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_bundled())
            .context("Failed to extract bundled PDFium engine")?;
    }

    #[cfg(not(feature = "bundled"))]
    {
        if !pdfium_auto::is_pdfium_cached() && !cli.quiet {
            eprintln!("{}", dim("Downloading PDFium engine (~30 MB, first run only)…"));
        }
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
            .context("Failed to download PDFium engine")?;
    }

    // ── Load inputs ──────────────────────────────────────────────────────
    let schema_text = std::fs::read_to_string(&cli.schema)
        .with_context(|| format!("Failed to read schema file '{}'", cli.schema.display()))?;
    let schema: FieldSchema = serde_json::from_str(&schema_text)
        .with_context(|| format!("Schema file '{}' is not valid JSON", cli.schema.display()))?;
    schema.validate().context("Invalid extraction schema")?;

    let bytes = std::fs::read(&cli.input)
        .with_context(|| format!("Failed to read document '{}'", cli.input.display()))?;

    // ── Build the analyzer ───────────────────────────────────────────────
    let mut builder = AnalysisConfig::builder()
        .max_chunk_tokens(cli.chunk_tokens)
        .overlap_tokens(cli.overlap_tokens)
        .confidence_threshold(cli.review_threshold)
        .text_density_threshold(cli.density_threshold)
        .concurrency(cli.concurrency)
        .llm_timeout_secs(cli.api_timeout)
        .page_limit(if cli.full_document {
            PageLimit::All
        } else {
            PageLimit::FirstN(cli.max_pages)
        });
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    let config = builder.build().context("Invalid configuration")?;

    let client = Arc::new(EdgequakeClient::from_config(&config)?);
    let ocr = Arc::new(VisionOcrEngine::new(
        client.provider(),
        config.llm_timeout_secs,
        config.max_response_tokens,
    ));
    let adapter = TextSourceAdapter::new(
        Arc::new(PdfiumTextSource),
        ocr,
        config.text_density_threshold,
    );
    let analyzer = DocumentAnalyzer::new(adapter, client, config);

    // ── Run ──────────────────────────────────────────────────────────────
    let run = analyzer
        .analyze(
            &bytes,
            &schema,
            AnalyzeOptions {
                force_reprocess: cli.force,
                page_limit: None,
            },
        )
        .await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&run)?);
        if run.status == RunStatus::Failed {
            std::process::exit(1);
        }
        return Ok(());
    }

    // ── Human-readable report ────────────────────────────────────────────
    if run.status == RunStatus::Failed {
        eprintln!("{} analysis failed", red("✘"));
        for err in &run.processing_errors {
            eprintln!("  {}", red(err));
        }
        bail!("run {} failed", run.run_id);
    }

    println!("{}", bold(&format!("Run {}", run.run_id)));
    if let Some(ref source) = run.source {
        println!(
            "{}",
            dim(&format!(
                "{} of {} pages via {:?}, {} chunks ({} failed)",
                source.pages_processed,
                source.total_pages,
                source.processing_method,
                run.stats.chunk_count,
                run.stats.failed_chunks,
            ))
        );
    }
    if let Some(kind) = run.document_kind {
        println!("{}", dim(&format!("document kind: {kind:?}")));
    }
    println!();

    for (name, field) in &run.extracted_data {
        let marker = if field.value.is_none() {
            dim("∅")
        } else if field.requires_review {
            yellow("⚠")
        } else {
            green("✓")
        };
        let value = field
            .value
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "null".into());
        let mut line = format!(
            "{marker} {:<24} {value}  {}",
            bold(name),
            dim(&format!("{:.2}", field.confidence_score)),
        );
        if let Some(page) = field.page_number {
            line.push_str(&dim(&format!("  p.{page}")));
        }
        println!("{line}");
        if let Some(ref src) = field.source_text {
            println!("    {}", dim(&format!("\u{201c}{src}\u{201d}")));
        }
    }

    println!();
    let flagged = run.stats.review_required_count;
    if flagged > 0 {
        println!(
            "{} {} field(s) need human review (confidence < threshold)",
            yellow("⚠"),
            bold(&flagged.to_string())
        );
    } else {
        println!("{} all fields above the review threshold", green("✔"));
    }
    println!(
        "{}",
        dim(&format!(
            "overall confidence {:.2} — {} ms total ({} ms source, {} ms extraction)",
            run.stats.overall_confidence,
            run.stats.total_duration_ms,
            run.stats.source_duration_ms,
            run.stats.extraction_duration_ms,
        ))
    );
    if !run.processing_errors.is_empty() {
        println!();
        println!("{}", yellow("recoverable errors during processing:"));
        for err in &run.processing_errors {
            println!("  {}", dim(err));
        }
    }

    Ok(())
}
