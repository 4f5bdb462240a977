//! Reference helpers for exercising this crate without a real backend:
//! an in-process cache and a generic `SourceId`-keyed lookup table for a
//! caller's own test fixtures. Useful for a caller's own tests;
//! production deployments bring their own cache backend.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::cache::{canonical_key, Cache};
use crate::model::{FetchResult, Path, ResolvedSource, SourceId};

/// A simple in-process cache keyed by the canonical `(id, cache_params)`
/// key.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<Value, FetchResult>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an entry as if a prior run had already persisted it.
    pub fn seed(&self, id: &SourceId, cache_params: &Map<String, Value>, result: FetchResult) {
        let key = canonical_key(id, cache_params);
        self.entries.lock().unwrap().insert(key, result);
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, _path: &Path, source: &ResolvedSource) -> Option<FetchResult> {
        let key = canonical_key(&source.id, &source.params);
        self.entries.lock().unwrap().get(&key).cloned()
    }

    async fn put(&self, _path: &Path, source: &ResolvedSource, result: &FetchResult) {
        let key = canonical_key(&source.id, &source.params);
        self.entries.lock().unwrap().insert(key, result.clone().stamp_cached_at());
    }
}

/// A generic keyed lookup table, indexed by [`SourceId`] instead of a
/// plain string. Not wired into the orchestrator; callers' own tests
/// use it to stash per-source fixtures (expected params, call counters,
/// seeded responses) without hand-rolling a `HashMap<SourceId, _>`.
pub struct Registry<T> {
    entries: HashMap<SourceId, T>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Registry { entries: HashMap::new() }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: SourceId, value: T) -> Option<T> {
        self.entries.insert(id, value)
    }

    pub fn get(&self, id: &SourceId) -> Option<&T> {
        self.entries.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_cache_round_trips_a_seeded_entry() {
        let cache = MemoryCache::new();
        let id = SourceId::named("Playlists");
        let mut params = Map::new();
        params.insert("id".to_string(), serde_json::json!(1));
        cache.seed(&id, &params, FetchResult::success(serde_json::json!({"id": 1})));

        let resolved = ResolvedSource {
            id: id.clone(),
            path: Path::new("Playlists"),
            params,
        };
        let hit = cache.get(&Path::new("Playlists"), &resolved).await;
        assert!(hit.is_some());
    }

    #[test]
    fn registry_looks_up_by_source_id() {
        let mut registry: Registry<&'static str> = Registry::new();
        registry.register(SourceId::named("A"), "custom-key-fn");
        assert_eq!(registry.get(&SourceId::named("A")).copied(), Some("custom-key-fn"));
        assert!(registry.get(&SourceId::named("B")).is_none());
    }
}
