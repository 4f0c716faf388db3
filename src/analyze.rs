//! The document analyzer: owns runs, the cache, and the pipeline wiring.
//!
//! `DocumentAnalyzer` is the single entry point callers use. It validates
//! the schema, keys work by (content hash, schema id), and guarantees
//! at-most-one pipeline execution per key: concurrent requests for the same
//! document and schema serialise on a per-key lock, and whichever arrives
//! second finds the first's result in the cache.
//!
//! Runs are immutable once terminal. A force-reprocess creates a fresh run
//! whose result supersedes the cached one; the old run object is untouched.

use crate::cache::{MemoryRunCache, RunCache, RunKey};
use crate::config::{AnalysisConfig, PageLimit};
use crate::error::LexError;
use crate::llm::CompletionClient;
use crate::output::{detect_document_kind, AnalysisRun, FieldResult, RunStats, RunStatus};
use crate::pipeline::chunk::Chunker;
use crate::pipeline::extract::FieldExtractor;
use crate::pipeline::source::TextSourceAdapter;
use crate::pipeline::synthesize::synthesize;
use crate::schema::FieldSchema;
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// SHA-256 digest of the raw document bytes, lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Per-call options for an analysis request.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    /// Bypass the cache and recompute; the new result supersedes the old
    /// cache entry.
    pub force_reprocess: bool,
    /// Override the configured page-limit policy for this call.
    pub page_limit: Option<PageLimit>,
}

struct RunEntry {
    run: AnalysisRun,
    cancel: Arc<AtomicBool>,
}

/// Orchestrates the extraction pipeline over documents.
pub struct DocumentAnalyzer {
    adapter: TextSourceAdapter,
    client: Arc<dyn CompletionClient>,
    cache: Arc<dyn RunCache>,
    config: AnalysisConfig,
    /// Per-key locks serialising concurrent requests for the same
    /// (content hash, schema id); this is what makes computation
    /// at-most-once. Entries are never evicted; the map is bounded by the
    /// number of distinct keys seen, which the cache holds anyway.
    inflight: Mutex<HashMap<RunKey, Arc<Mutex<()>>>>,
    runs: RwLock<HashMap<String, RunEntry>>,
    next_run_id: AtomicU64,
}

impl DocumentAnalyzer {
    /// Build an analyzer with the default in-memory cache.
    pub fn new(
        adapter: TextSourceAdapter,
        client: Arc<dyn CompletionClient>,
        config: AnalysisConfig,
    ) -> Self {
        Self::with_cache(adapter, client, Arc::new(MemoryRunCache::new()), config)
    }

    pub fn with_cache(
        adapter: TextSourceAdapter,
        client: Arc<dyn CompletionClient>,
        cache: Arc<dyn RunCache>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            adapter,
            client,
            cache,
            config,
            inflight: Mutex::new(HashMap::new()),
            runs: RwLock::new(HashMap::new()),
            next_run_id: AtomicU64::new(1),
        }
    }

    /// Analyze a document against a schema, waiting for the result.
    ///
    /// Schema validation failures and misconfiguration return `Err` before
    /// any run exists. Everything after that point is reported on the run:
    /// an unreadable document yields `Ok` with a `Failed` run, and chunk
    /// failures yield a `Completed` run with `processing_errors`.
    pub async fn analyze(
        &self,
        bytes: &[u8],
        schema: &FieldSchema,
        options: AnalyzeOptions,
    ) -> Result<AnalysisRun, LexError> {
        schema.validate()?;

        let key = RunKey::new(content_hash(bytes), schema.identifier());

        // Serialise on the key so a concurrent identical request waits here
        // and then hits the cache instead of recomputing.
        let lock = {
            let mut map = self.inflight.lock().await;
            Arc::clone(map.entry(key.clone()).or_default())
        };
        let _guard = lock.lock().await;

        if !options.force_reprocess {
            if let Some(cached) = self.cache.get(&key).await {
                info!(
                    "cache hit for {}… / schema '{}'",
                    &key.content_hash[..12],
                    key.schema_id
                );
                return Ok(cached);
            }
        }

        let run_id = self.allocate_run_id();
        let cancel = Arc::new(AtomicBool::new(false));
        self.register(&run_id, &key, Arc::clone(&cancel)).await;

        let run = self
            .run_pipeline(bytes, schema, &run_id, &key, options.page_limit, &cancel)
            .await;

        self.update_run(&run_id, run.clone()).await;
        if run.status.is_terminal() && !cancel.load(Ordering::SeqCst) {
            self.cache.put(key, run.clone()).await;
        }
        Ok(run)
    }

    /// Submit a document for background analysis, returning a run id to
    /// poll with [`get_status`](Self::get_status) and fetch with
    /// [`get_result`](Self::get_result).
    pub async fn submit(
        self: &Arc<Self>,
        bytes: Vec<u8>,
        schema: FieldSchema,
        options: AnalyzeOptions,
    ) -> Result<String, LexError> {
        schema.validate()?;

        let key = RunKey::new(content_hash(&bytes), schema.identifier());
        let run_id = self.allocate_run_id();
        let cancel = Arc::new(AtomicBool::new(false));
        self.register(&run_id, &key, Arc::clone(&cancel)).await;

        let analyzer = Arc::clone(self);
        let id = run_id.clone();
        tokio::spawn(async move {
            let lock = {
                let mut map = analyzer.inflight.lock().await;
                Arc::clone(map.entry(key.clone()).or_default())
            };
            let _guard = lock.lock().await;

            let cached = if options.force_reprocess {
                None
            } else {
                analyzer.cache.get(&key).await
            };
            let run = match cached {
                Some(mut hit) => {
                    // Surface the cached result under this run's id without
                    // touching the cache entry itself.
                    hit.run_id = id.clone();
                    hit
                }
                None => {
                    let run = analyzer
                        .run_pipeline(&bytes, &schema, &id, &key, options.page_limit, &cancel)
                        .await;
                    if run.status.is_terminal() && !cancel.load(Ordering::SeqCst) {
                        analyzer.cache.put(key, run.clone()).await;
                    }
                    run
                }
            };
            analyzer.update_run(&id, run).await;
        });

        Ok(run_id)
    }

    /// Current status of a run.
    pub async fn get_status(&self, run_id: &str) -> Result<RunStatus, LexError> {
        let runs = self.runs.read().await;
        runs.get(run_id)
            .map(|e| e.run.status)
            .ok_or_else(|| LexError::UnknownRun(run_id.to_string()))
    }

    /// Fetch a terminal run's result.
    pub async fn get_result(&self, run_id: &str) -> Result<AnalysisRun, LexError> {
        let runs = self.runs.read().await;
        let entry = runs
            .get(run_id)
            .ok_or_else(|| LexError::UnknownRun(run_id.to_string()))?;
        if !entry.run.status.is_terminal() {
            return Err(LexError::RunNotFinished {
                id: run_id.to_string(),
                status: entry.run.status.as_str().to_string(),
            });
        }
        Ok(entry.run.clone())
    }

    /// Request cancellation of a running analysis. Chunks already dispatched
    /// finish; undispatched chunks are skipped and the run ends `Failed`
    /// without being cached.
    pub async fn cancel(&self, run_id: &str) -> Result<(), LexError> {
        let runs = self.runs.read().await;
        let entry = runs
            .get(run_id)
            .ok_or_else(|| LexError::UnknownRun(run_id.to_string()))?;
        entry.cancel.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Drop every cached result. In-flight runs are unaffected.
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    fn allocate_run_id(&self) -> String {
        format!("run-{:06}", self.next_run_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn register(&self, run_id: &str, key: &RunKey, cancel: Arc<AtomicBool>) {
        let run = AnalysisRun {
            run_id: run_id.to_string(),
            content_hash: key.content_hash.clone(),
            schema_id: key.schema_id.clone(),
            status: RunStatus::Pending,
            extracted_data: BTreeMap::new(),
            processing_errors: vec![],
            source: None,
            document_kind: None,
            stats: RunStats::default(),
        };
        self.runs
            .write()
            .await
            .insert(run_id.to_string(), RunEntry { run, cancel });
    }

    async fn update_run(&self, run_id: &str, run: AnalysisRun) {
        if let Some(entry) = self.runs.write().await.get_mut(run_id) {
            entry.run = run;
        }
    }

    async fn set_status(&self, run_id: &str, status: RunStatus) {
        if let Some(entry) = self.runs.write().await.get_mut(run_id) {
            entry.run.status = status;
        }
    }

    async fn run_pipeline(
        &self,
        bytes: &[u8],
        schema: &FieldSchema,
        run_id: &str,
        key: &RunKey,
        page_limit: Option<PageLimit>,
        cancel: &Arc<AtomicBool>,
    ) -> AnalysisRun {
        let started = Instant::now();
        self.set_status(run_id, RunStatus::Processing).await;

        let mut run = AnalysisRun {
            run_id: run_id.to_string(),
            content_hash: key.content_hash.clone(),
            schema_id: key.schema_id.clone(),
            status: RunStatus::Processing,
            extracted_data: BTreeMap::new(),
            processing_errors: vec![],
            source: None,
            document_kind: None,
            stats: RunStats::default(),
        };

        // ── Stage 1: page text (direct or OCR) ───────────────────────────
        let limit = page_limit.unwrap_or(self.config.page_limit);
        let source_started = Instant::now();
        let source = match self.adapter.extract(bytes, limit).await {
            Ok(s) => s,
            Err(e) => {
                warn!("run {run_id}: source stage failed: {e}");
                run.status = RunStatus::Failed;
                run.processing_errors.push(e.to_string());
                run.stats.total_duration_ms = started.elapsed().as_millis() as u64;
                return run;
            }
        };
        run.stats.source_duration_ms = source_started.elapsed().as_millis() as u64;
        run.processing_errors
            .extend(source.errors.iter().map(|e| e.to_string()));

        let combined: String = source
            .pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        run.document_kind = Some(detect_document_kind(&combined));
        run.source = Some(source.metadata.clone());

        // ── Stage 2: chunk ───────────────────────────────────────────────
        let chunker = Chunker::from_config(&self.config);
        let chunks = chunker.chunk_pages(&source.pages);
        run.stats.chunk_count = chunks.len();

        // ── Stage 3: extract, fanned out across chunks ───────────────────
        let extraction_started = Instant::now();
        let extractor = FieldExtractor::new(Arc::clone(&self.client));
        // The closure takes an index instead of `&Chunk` to sidestep a
        // higher-ranked lifetime inference limitation that otherwise fails
        // the spawned future's Send check (rust-lang/rust#89976).
        let extractions: Vec<_> = stream::iter(0..chunks.len())
            .map(|idx| {
                let extractor = &extractor;
                let chunks = &chunks;
                let cancel = Arc::clone(cancel);
                async move {
                    if cancel.load(Ordering::SeqCst) {
                        return None;
                    }
                    Some(extractor.extract(schema, &chunks[idx]).await)
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .filter_map(|r| async move { r })
            .collect()
            .await;
        run.stats.extraction_duration_ms = extraction_started.elapsed().as_millis() as u64;

        if cancel.load(Ordering::SeqCst) {
            info!("run {run_id}: cancelled after {} chunk(s)", extractions.len());
            run.status = RunStatus::Failed;
            run.processing_errors.push("cancelled by caller".into());
            run.stats.total_duration_ms = started.elapsed().as_millis() as u64;
            return run;
        }

        run.stats.failed_chunks = extractions.iter().filter(|e| e.error.is_some()).count();
        run.processing_errors.extend(
            extractions
                .iter()
                .filter_map(|e| e.error.as_ref().map(|err| err.to_string())),
        );

        // ── Stage 4: synthesize ──────────────────────────────────────────
        run.extracted_data = if extractions.is_empty() {
            // No chunks at all (e.g. OCR produced only empty pages): every
            // field synthesizes to not-found.
            synthesize_empty(schema)
        } else {
            synthesize(schema, &extractions, self.config.confidence_threshold)
        };

        run.status = RunStatus::Completed;
        run.finalize_stats();
        run.stats.total_duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "run {run_id}: completed — {} chunks ({} failed), {} fields, {} flagged, overall {:.2}",
            run.stats.chunk_count,
            run.stats.failed_chunks,
            run.extracted_data.len(),
            run.stats.review_required_count,
            run.stats.overall_confidence,
        );
        run
    }
}

fn synthesize_empty(schema: &FieldSchema) -> BTreeMap<String, FieldResult> {
    schema
        .fields
        .iter()
        .map(|f| {
            (
                f.name.clone(),
                FieldResult {
                    value: None,
                    source_text: None,
                    confidence_score: 0.0,
                    requires_review: f.required,
                    page_number: None,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable_hex() {
        let a = content_hash(b"same bytes");
        let b = content_hash(b"same bytes");
        let c = content_hash(b"other bytes");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
