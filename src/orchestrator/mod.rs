//! The scheduler: `fill`/`select`/`pull` and the `Handle` they share.

mod config;
mod loaded;

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;

pub use config::{FillOptions, FillOptionsBuilder};

use crate::collect::{self, Summary};
use crate::error::Result;
use crate::model::{Event, Path, Prescription};
use loaded::EngineState;

/// A stream of [`Event`]s produced by a `select` call.
pub type EventStream = ReceiverStream<Event>;

/// A running engine over one prescription. Cheaply `Clone`; every clone
/// shares the same `loaded` map, so sources realize at most once across
/// any number of `select` calls on the same (or a cloned) handle.
#[derive(Clone)]
pub struct Handle {
    state: Arc<Mutex<EngineState>>,
}

/// Starts an engine over `prescription` with the given `options`. Does not
/// dispatch anything by itself — nothing runs until a `select`.
pub fn fill(prescription: Prescription, options: FillOptions) -> Handle {
    Handle {
        state: Arc::new(Mutex::new(EngineState::new(prescription, &options))),
    }
}

/// Realizes `paths` against `handle`, returning a fresh stream of events.
/// Already-realized paths (from a prior `select` or from `initial_params`)
/// are echoed once from `loaded` without re-dispatching anything.
pub fn select(handle: &Handle, paths: Vec<Path>) -> EventStream {
    let (tx, rx) = mpsc::channel(32);
    let state = handle.state.clone();
    tokio::spawn(async move {
        let mut state = state.lock().await;
        loaded::run_loop(&mut state, paths, tx).await;
    });
    ReceiverStream::new(rx)
}

/// Convenience: fills, selects, and drains to a [`Summary`] in one call.
pub async fn pull(prescription: Prescription, paths: Vec<Path>, options: FillOptions) -> Result<Summary> {
    let handle = fill(prescription, options);
    let stream = select(&handle, paths);
    Ok(collect::collect(stream).await)
}

/// End-to-end coverage of the scheduler's core scenarios, run through
/// `fill`/`select`/`collect`: a linear dependency chain, retry on a
/// transient failure, dependency refresh on an auth-style failure,
/// collection expansion, a cache hit that skips a dependency fetch, and
/// an unreachable source.
#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Map};

    use super::*;
    use crate::model::{
        DepRef, Fetch, ParamValue, Params, Refresh, ResolvedSource, SourceDescriptor, SourceId,
    };
    use crate::testing::MemoryCache;

    fn path_param(source: &ResolvedSource, key: &str) -> serde_json::Value {
        source.params.get(key).cloned().unwrap_or(serde_json::Value::Null)
    }

    struct FnFetch<F>(F);

    #[async_trait]
    impl<F> Fetch for FnFetch<F>
    where
        F: Fn(&ResolvedSource) -> crate::model::FetchResult + Send + Sync,
    {
        async fn fetch(&self, source: &ResolvedSource) -> crate::model::FetchResult {
            (self.0)(source)
        }
    }

    fn fetch(f: impl Fn(&ResolvedSource) -> crate::model::FetchResult + Send + Sync + 'static) -> Arc<dyn Fetch> {
        Arc::new(FnFetch(f)) as Arc<dyn Fetch>
    }

    #[tokio::test]
    async fn linear_chain() {
        let mut prescription = Prescription::new();
        prescription.insert(
            Path::new("A"),
            SourceDescriptor::builder()
                .fetch(fetch(|_| crate::model::FetchResult::success(json!({"id": 1}))))
                .build()
                .unwrap(),
        );
        let mut b_params = HashMap::new();
        b_params.insert(
            "id".to_string(),
            ParamValue::DepRef(DepRef::into_field(Path::new("A"), vec!["id".to_string()])),
        );
        prescription.insert(
            Path::new("B"),
            SourceDescriptor::builder()
                .fetch(fetch(|source| crate::model::FetchResult::success(json!({"id": path_param(source, "id")}))))
                .params(Params::Map(b_params))
                .build()
                .unwrap(),
        );

        let handle = fill(prescription, FillOptions::default());
        let stream = select(&handle, vec![Path::new("B")]);
        let summary = collect::collect(stream).await;

        assert!(summary.success);
        assert_eq!(summary.data.get("A"), Some(&json!({"id": 1})));
        assert_eq!(summary.data.get("B"), Some(&json!({"id": 1})));

        let a_index = summary.sources.iter().position(|e| e.path == Path::new("A"));
        let b_index = summary.sources.iter().position(|e| e.path == Path::new("B"));
        assert!(a_index.is_some() && b_index.is_some(), "both A and B must produce an event");
        assert!(a_index < b_index, "A (a dependency of B) must be emitted before B");
    }

    #[tokio::test]
    async fn retry_on_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_for_fetch = calls.clone();

        let mut prescription = Prescription::new();
        let mut descriptor = SourceDescriptor::builder()
            .fetch(fetch(move |_| {
                let n = calls_for_fetch.fetch_add(1, AtomicOrdering::SeqCst);
                if n == 0 {
                    crate::model::FetchResult::failure()
                } else {
                    crate::model::FetchResult::success(json!({"id": 13}))
                }
            }))
            .build()
            .unwrap();
        descriptor.retries = 1;
        prescription.insert(Path::new("A"), descriptor);

        let handle = fill(prescription, FillOptions::default());
        let stream = select(&handle, vec![Path::new("A")]);
        let summary = collect::collect(stream).await;

        assert!(summary.success);
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);

        let a_events: Vec<_> = summary.sources.iter().filter(|e| e.path == Path::new("A")).collect();
        assert_eq!(a_events.len(), 2);
        assert!(!a_events[0].result.success);
        assert_eq!(a_events[0].result.attempts, 1);
        assert!(a_events[0].result.retrying);
        assert_eq!(a_events[0].result.retry_delay_ms, Some(0));
        assert!(a_events[1].result.success);
        assert_eq!(a_events[1].result.attempts, 2);
    }

    #[tokio::test]
    async fn refresh_dependency_on_failure() {
        let auth_calls = Arc::new(AtomicU32::new(0));
        let auth_calls_for_fetch = auth_calls.clone();
        let playlists_calls = Arc::new(AtomicU32::new(0));
        let playlists_calls_for_fetch = playlists_calls.clone();

        let mut prescription = Prescription::new();
        prescription.insert(
            Path::new("Auth"),
            SourceDescriptor::builder()
                .fetch(fetch(move |_| {
                    let n = auth_calls_for_fetch.fetch_add(1, AtomicOrdering::SeqCst);
                    crate::model::FetchResult::success(json!({"access_token": n + 1}))
                }))
                .build()
                .unwrap(),
        );

        let mut params = HashMap::new();
        params.insert(
            "token".to_string(),
            ParamValue::DepRef(DepRef::into_field(Path::new("Auth"), vec!["access_token".to_string()])),
        );
        let mut playlists = SourceDescriptor::builder()
            .fetch(fetch(move |source| {
                let n = playlists_calls_for_fetch.fetch_add(1, AtomicOrdering::SeqCst);
                if n == 0 {
                    crate::model::FetchResult::failure().with_refresh(Refresh::Keys(std::collections::HashSet::from([
                        "token".to_string(),
                    ])))
                } else {
                    crate::model::FetchResult::success(json!({"token": path_param(source, "token")}))
                }
            }))
            .params(Params::Map(params))
            .build()
            .unwrap();
        playlists.retries = 1;
        prescription.insert(Path::new("Playlists"), playlists);

        let handle = fill(prescription, FillOptions::default());
        let stream = select(&handle, vec![Path::new("Playlists")]);
        let summary = collect::collect(stream).await;

        assert!(summary.success);
        assert_eq!(auth_calls.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(playlists_calls.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(summary.data.get("Playlists"), Some(&json!({"token": 2})));
    }

    #[tokio::test]
    async fn collection_expansion() {
        let mut prescription = Prescription::new();

        let mut people_params = HashMap::new();
        people_params.insert("ids".to_string(), ParamValue::literal(json!([{"id": 1}, {"id": 2}])));
        let mut people = SourceDescriptor::builder()
            .fetch(fetch(|source| crate::model::FetchResult::success(path_param(source, "ids"))))
            .params(Params::Map(people_params))
            .build()
            .unwrap();
        people.coll_of = Some(Path::new("Person"));
        prescription.insert(Path::new("People"), people);

        prescription.insert(
            Path::new("Person"),
            SourceDescriptor::builder()
                .fetch(fetch(|source| {
                    let mut item = source.params.clone();
                    item.insert("extra".to_string(), json!(true));
                    crate::model::FetchResult::success(serde_json::Value::Object(item))
                }))
                .params(Params::Whole(DepRef::to(Path::new("People"))))
                .build()
                .unwrap(),
        );

        let handle = fill(prescription, FillOptions::default());
        let stream = select(&handle, vec![Path::new("People")]);
        let summary = collect::collect(stream).await;

        assert!(summary.success);
        assert_eq!(
            summary.data.get("People"),
            Some(&json!([{"id": 1, "extra": true}, {"id": 2, "extra": true}]))
        );

        let partial_events =
            summary.sources.iter().filter(|e| e.path == Path::new("People") && e.result.partial).count();
        assert_eq!(partial_events, 1);
    }

    #[tokio::test]
    async fn cache_skip_of_dependency() {
        let auth_calls = Arc::new(AtomicU32::new(0));
        let auth_calls_for_fetch = auth_calls.clone();

        let mut prescription = Prescription::new();
        prescription.insert(
            Path::new("Auth"),
            SourceDescriptor::builder()
                .fetch(fetch(move |_| {
                    auth_calls_for_fetch.fetch_add(1, AtomicOrdering::SeqCst);
                    crate::model::FetchResult::success(json!({"access_token": 1}))
                }))
                .build()
                .unwrap(),
        );

        let mut params = HashMap::new();
        params.insert(
            "token".to_string(),
            ParamValue::DepRef(DepRef::into_field(Path::new("Auth"), vec!["access_token".to_string()])),
        );
        params.insert("id".to_string(), ParamValue::literal(json!(1)));
        let mut playlists = SourceDescriptor::builder()
            .fetch(fetch(|_| panic!("Playlists must not be fetched on a cache hit")))
            .params(Params::Map(params))
            .build()
            .unwrap();
        playlists.cache_deps = Some(std::collections::HashSet::from(["id".to_string()]));
        prescription.insert(Path::new("Playlists"), playlists);

        let cache = Arc::new(MemoryCache::new());
        let mut cache_params = Map::new();
        cache_params.insert("id".to_string(), json!(1));
        cache.seed(
            &SourceId::named("Playlists"),
            &cache_params,
            crate::model::FetchResult::success(json!({"cached": true})),
        );

        let options = FillOptions::builder().cache(cache as Arc<dyn crate::cache::Cache>).build().unwrap();
        let handle = fill(prescription, options);
        let stream = select(&handle, vec![Path::new("Playlists")]);
        let summary = collect::collect(stream).await;

        assert!(summary.success);
        assert_eq!(auth_calls.load(AtomicOrdering::SeqCst), 0);
        let playlists_events: Vec<_> = summary.sources.iter().filter(|e| e.path == Path::new("Playlists")).collect();
        assert_eq!(playlists_events.len(), 1);
        assert!(playlists_events[0].result.cached);
        assert_eq!(playlists_events[0].result.attempts, 0);
    }

    #[tokio::test]
    async fn unreachable_source() {
        let mut params = HashMap::new();
        params.insert(
            "x".to_string(),
            ParamValue::DepRef(DepRef::into_field(Path::new("Missing"), vec!["x".to_string()])),
        );
        let mut prescription = Prescription::new();
        prescription.insert(
            Path::new("A"),
            SourceDescriptor::builder()
                .fetch(fetch(|_| panic!("A is unreachable and must never be fetched")))
                .params(Params::Map(params))
                .build()
                .unwrap(),
        );

        let handle = fill(prescription, FillOptions::default());
        let stream = select(&handle, vec![Path::new("A")]);
        let summary = collect::collect(stream).await;

        assert!(!summary.success);
        assert_eq!(summary.sources.len(), 1);
        assert!(!summary.sources[0].result.success);
        assert_eq!(summary.sources[0].result.attempts, 0);
    }
}
