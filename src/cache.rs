//! Run cache: keyed get/put of terminal analysis runs.
//!
//! The cache is an explicit key-value abstraction so a durable or
//! distributed store can replace the in-memory default without touching
//! pipeline logic. The orchestrator only requires atomic-enough semantics
//! to honour the at-most-one-computation guarantee; it serialises the
//! lookup-then-populate sequence itself with a per-key lock.

use crate::output::AnalysisRun;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Composite cache key: one entry per (document content hash, schema id).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunKey {
    /// SHA-256 digest of the raw document bytes.
    pub content_hash: String,
    /// Deterministic schema identifier.
    pub schema_id: String,
}

impl RunKey {
    pub fn new(content_hash: impl Into<String>, schema_id: impl Into<String>) -> Self {
        Self {
            content_hash: content_hash.into(),
            schema_id: schema_id.into(),
        }
    }
}

/// Keyed store of terminal runs.
///
/// `put` overwrites: under force-reprocess the new run supersedes the old
/// entry (last writer wins).
#[async_trait]
pub trait RunCache: Send + Sync {
    async fn get(&self, key: &RunKey) -> Option<AnalysisRun>;
    async fn put(&self, key: RunKey, run: AnalysisRun);
    async fn contains(&self, key: &RunKey) -> bool;
    /// Drop every cached run.
    async fn clear(&self);
}

/// Default in-process cache.
#[derive(Default)]
pub struct MemoryRunCache {
    entries: RwLock<HashMap<RunKey, AnalysisRun>>,
}

impl MemoryRunCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunCache for MemoryRunCache {
    async fn get(&self, key: &RunKey) -> Option<AnalysisRun> {
        self.entries.read().await.get(key).cloned()
    }

    async fn put(&self, key: RunKey, run: AnalysisRun) {
        self.entries.write().await.insert(key, run);
    }

    async fn contains(&self, key: &RunKey) -> bool {
        self.entries.read().await.contains_key(key)
    }

    async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{RunStats, RunStatus};
    use std::collections::BTreeMap;

    fn dummy_run(id: &str) -> AnalysisRun {
        AnalysisRun {
            run_id: id.into(),
            content_hash: "hash".into(),
            schema_id: "schema".into(),
            status: RunStatus::Completed,
            extracted_data: BTreeMap::new(),
            processing_errors: vec![],
            source: None,
            document_kind: None,
            stats: RunStats::default(),
        }
    }

    #[tokio::test]
    async fn get_put_contains() {
        let cache = MemoryRunCache::new();
        let key = RunKey::new("hash", "schema");
        assert!(!cache.contains(&key).await);
        assert!(cache.get(&key).await.is_none());

        cache.put(key.clone(), dummy_run("run-1")).await;
        assert!(cache.contains(&key).await);
        assert_eq!(cache.get(&key).await.unwrap().run_id, "run-1");
    }

    #[tokio::test]
    async fn put_overwrites_previous_entry() {
        let cache = MemoryRunCache::new();
        let key = RunKey::new("hash", "schema");
        cache.put(key.clone(), dummy_run("run-1")).await;
        cache.put(key.clone(), dummy_run("run-2")).await;
        assert_eq!(cache.get(&key).await.unwrap().run_id, "run-2");
    }

    #[tokio::test]
    async fn different_schema_ids_do_not_collide() {
        let cache = MemoryRunCache::new();
        cache
            .put(RunKey::new("hash", "schema-a"), dummy_run("run-a"))
            .await;
        assert!(!cache.contains(&RunKey::new("hash", "schema-b")).await);
    }

    #[tokio::test]
    async fn clear_empties_the_cache() {
        let cache = MemoryRunCache::new();
        let key = RunKey::new("hash", "schema");
        cache.put(key.clone(), dummy_run("run-1")).await;
        cache.clear().await;
        assert!(!cache.contains(&key).await);
    }
}
