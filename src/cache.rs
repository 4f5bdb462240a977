//! The cache adapter contract.
//!
//! The engine sees only a `get`/`put` pair; this module defines that
//! contract plus the canonical cache-key derivation used by default
//! implementations and tests. Concrete storage backends are out of
//! scope — see [`crate::testing::MemoryCache`] for a reference
//! implementation used only by this crate's own tests.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::model::{FetchResult, ResolvedSource, SourceId};

/// Canonical cache key: `(id, { p -> get_in(params, p) for p in
/// cache_params })`.
pub fn canonical_key(id: &SourceId, cache_params: &Map<String, Value>) -> Value {
    serde_json::json!({
        "id": id.to_string(),
        "params": cache_params,
    })
}

/// The two callables the orchestrator consumes for caching.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Looks up a previously persisted result for `path`/`source`.
    ///
    /// `source` has all deps substituted under cache-params scope. A
    /// returned result is stamped with `attempts = 0, cached? = true` by
    /// the orchestrator; implementations don't need to set those fields.
    async fn get(&self, path: &crate::model::Path, source: &ResolvedSource) -> Option<FetchResult>;

    /// Persists a terminal success result. Called at most once per
    /// terminal success (partial collection/begets parents are cached
    /// only after every child terminalizes, by the orchestrator).
    async fn put(&self, path: &crate::model::Path, source: &ResolvedSource, result: &FetchResult);
}

/// A cache that never hits and never stores — the default when no
/// caching is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

#[async_trait]
impl Cache for NoCache {
    async fn get(&self, _path: &crate::model::Path, _source: &ResolvedSource) -> Option<FetchResult> {
        None
    }

    async fn put(&self, _path: &crate::model::Path, _source: &ResolvedSource, _result: &FetchResult) {}
}

/// Returns the parameter keys used to build a source's cache key:
/// `cache_params` if set; otherwise `cache_deps` (the same keys already
/// gating readiness, reused as the key); otherwise every key in the
/// (materialized) params map.
pub fn cache_param_keys(
    descriptor: &crate::model::SourceDescriptor,
    materialized: &Map<String, Value>,
) -> Vec<String> {
    if let Some(keys) = &descriptor.cache_params {
        return keys.clone();
    }
    if let Some(keys) = &descriptor.cache_deps {
        return keys.iter().cloned().collect();
    }
    materialized.keys().cloned().collect()
}

/// Narrows a fully materialized params map down to the keys
/// [`cache_param_keys`] selects, producing the map actually hashed into
/// the cache key.
pub fn narrow_to_cache_params(
    descriptor: &crate::model::SourceDescriptor,
    materialized: &Map<String, Value>,
) -> Map<String, Value> {
    cache_param_keys(descriptor, materialized)
        .into_iter()
        .filter_map(|key| materialized.get(&key).cloned().map(|v| (key, v)))
        .collect()
}
