//! Shared engine state and the fixed-point loop.
//!
//! One [`EngineState`] backs every `select` on a given `Handle`; `loaded`
//! and `prescription` are mutated only by [`run_loop`], which a `select`
//! call runs to completion while holding the state's lock — a
//! single-writer cooperative coordinator, not a lock-free scheduler.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::cache::Cache;
use crate::executor::FetchExecutor;
use crate::expand;
use crate::materializer::{self, Materialized};
use crate::model::{Event, FetchResult, Loaded, Path, PathSegment, Prescription, ResolvedSource, SourceDescriptor};
use crate::resolver;
use crate::retry::{self, RetryOutcome};

use super::config::FillOptions;

/// The mutable state a `Handle` shares across every `select` call.
pub(crate) struct EngineState {
    pub(crate) prescription: Prescription,
    pub(crate) loaded: Loaded,
    cache: Arc<dyn Cache>,
    executor: FetchExecutor,
    /// Attempts so far per in-flight path, surviving across loop ticks
    /// (and across a refresh cycle) so retry budgets are honored.
    attempts: HashMap<Path, u32>,
    /// Backoff delay queued for a path's next attempt.
    pending_delay: HashMap<Path, u64>,
    /// Paths whose cache lookup already missed this generation, so
    /// `try_cache` doesn't re-poll a cache on every tick.
    cache_missed: HashSet<Path>,
}

impl EngineState {
    pub(crate) fn new(prescription: Prescription, options: &FillOptions) -> Self {
        EngineState {
            prescription,
            loaded: options.initial_params.clone(),
            cache: options.cache.clone(),
            executor: FetchExecutor::new(options.timeout_ms),
            attempts: HashMap::new(),
            pending_delay: HashMap::new(),
            cache_missed: HashSet::new(),
        }
    }

    fn source_id_for(&self, path: &Path) -> crate::model::SourceId {
        self.prescription
            .get(path)
            .map(|d| d.id.clone())
            .unwrap_or_else(|| crate::model::SourceId::named(path.to_string()))
    }
}

/// Drives the fixed-point loop for one `select(handle, paths)` call.
/// `state` is exclusively owned by the caller for the duration (held
/// behind the handle's mutex), so this never races another loop.
pub(crate) async fn run_loop(state: &mut EngineState, target_paths: Vec<Path>, tx: mpsc::Sender<Event>) {
    let mut pending: HashSet<Path> = HashSet::new();

    for path in &target_paths {
        if let Some(result) = state.loaded.get(path).cloned() {
            let source_id = state.source_id_for(path);
            trace!(target: crate::TRACING_TARGET, %path, "re-select of already-realized path");
            let _ = tx.send(Event::new(path.clone(), source_id, result)).await;
        } else {
            pending.insert(path.clone());
        }
    }

    if pending.is_empty() {
        return;
    }

    let focus: Vec<Path> = pending.iter().cloned().collect();
    let _ = resolver::resolve_deps(&mut state.prescription, Some(&focus));
    let _ = resolver::resolve_cache_deps(&mut state.prescription, Some(&focus));

    loop {
        if complete_collections(state, &mut pending, &tx).await {
            continue;
        }
        if try_cache(state, &mut pending, &tx).await {
            continue;
        }
        if fetch_ready(state, &mut pending, &tx).await {
            continue;
        }
        if !expand_selection(state, &mut pending) {
            break;
        }
    }

    for path in pending.drain() {
        if state.loaded.get(&path).is_some_and(|r| r.success) {
            continue;
        }
        debug!(target: crate::TRACING_TARGET, %path, "emitting stub unreachable failure");
        let result = FetchResult::unreachable(&path);
        state.loaded.insert(path.clone(), result.clone());
        let source_id = state.source_id_for(&path);
        let _ = tx.send(Event::new(path, source_id, result)).await;
    }
}

/// Step 1: finalize any collection/begets parent whose children have all
/// terminalized.
async fn complete_collections(state: &mut EngineState, pending: &mut HashSet<Path>, tx: &mpsc::Sender<Event>) -> bool {
    let partial_parents: Vec<Path> = state
        .loaded
        .iter()
        .filter(|(_, result)| result.partial)
        .map(|(path, _)| path.clone())
        .collect();

    let mut progressed = false;
    for parent in partial_parents {
        let children = children_of(&state.prescription, &parent);
        if children.is_empty() || !children.iter().all(|c| state.loaded.contains_key(c)) {
            continue;
        }
        let Some(descriptor) = state.prescription.get(&parent).cloned() else {
            continue;
        };

        let composed = compose_children_data(&descriptor, &children, &state.loaded);
        let mut result = state.loaded.get(&parent).cloned().unwrap_or_default();
        result.partial = false;
        result.data = Some(composed);
        state.loaded.insert(parent.clone(), result.clone());

        let resolved = ResolvedSource {
            id: descriptor.id.clone(),
            path: parent.clone(),
            params: Map::new(),
        };
        state.cache.put(&parent, &resolved, &result).await;

        pending.remove(&parent);
        debug!(target: crate::TRACING_TARGET, path = %parent, "collection/begets parent complete");
        let _ = tx.send(Event::new(parent, descriptor.id.clone(), result)).await;
        progressed = true;
    }
    progressed
}

fn children_of(prescription: &Prescription, parent: &Path) -> Vec<Path> {
    prescription
        .iter()
        .filter(|(_, d)| d.member_of.as_ref() == Some(parent))
        .map(|(path, _)| path.clone())
        .collect()
}

fn compose_children_data(descriptor: &SourceDescriptor, children: &[Path], loaded: &Loaded) -> Value {
    if descriptor.is_collection() {
        let mut items: Vec<(usize, Value)> = children
            .iter()
            .filter_map(|child| match child.segments().last() {
                Some(PathSegment::Index(i)) => loaded.get(child).and_then(|r| r.data.clone()).map(|v| (*i, v)),
                _ => None,
            })
            .collect();
        items.sort_by_key(|(i, _)| *i);
        Value::Array(items.into_iter().map(|(_, v)| v).collect())
    } else {
        let mut map = Map::new();
        for child in children {
            if let Some(PathSegment::Key(k)) = child.segments().last()
                && let Some(v) = loaded.get(child).and_then(|r| r.data.clone())
            {
                map.insert(k.clone(), v);
            }
        }
        Value::Object(map)
    }
}

/// Step 2: resolve every pending path whose `cache_deps` (or, absent
/// those, its full `deps`) are satisfied against the cache adapter.
async fn try_cache(state: &mut EngineState, pending: &mut HashSet<Path>, tx: &mpsc::Sender<Event>) -> bool {
    let candidates: Vec<Path> = pending.iter().cloned().collect();
    for path in candidates {
        if state.cache_missed.contains(&path) {
            continue;
        }
        let Some(descriptor) = state.prescription.get(&path).cloned() else {
            continue;
        };
        if descriptor.refreshing {
            continue;
        }

        let materialized = if let Some(keys) = &descriptor.cache_deps {
            if !materializer::deps_satisfied(&descriptor.resolved_cache_deps, &state.loaded) {
                continue;
            }
            materializer::materialize_subset(&descriptor.params, keys, &state.loaded)
        } else {
            if !materializer::deps_satisfied(&descriptor.deps, &state.loaded) {
                continue;
            }
            materializer::materialize(&descriptor.params, &state.loaded)
        };
        let Materialized::Ready(params) = materialized else {
            continue;
        };

        let key_params = crate::cache::narrow_to_cache_params(&descriptor, &params);
        let resolved = ResolvedSource {
            id: descriptor.id.clone(),
            path: path.clone(),
            params: key_params,
        };
        match state.cache.get(&path, &resolved).await {
            Some(mut result) => {
                result.attempts = 0;
                result.cached = true;
                state.loaded.insert(path.clone(), result.clone());
                pending.remove(&path);
                trace!(target: crate::TRACING_TARGET, %path, "cache hit");
                let _ = tx.send(Event::new(path, descriptor.id.clone(), result)).await;
                return true;
            }
            None => {
                state.cache_missed.insert(path);
            }
        }
    }
    false
}

/// Step 3: dispatch every pending path whose `deps` are already satisfied,
/// as one concurrent batch, and apply the retry/refresh decision to each
/// outcome.
async fn fetch_ready(state: &mut EngineState, pending: &mut HashSet<Path>, tx: &mpsc::Sender<Event>) -> bool {
    let mut ready = Vec::new();
    for path in pending.iter() {
        let Some(descriptor) = state.prescription.get(path) else {
            continue;
        };
        if !materializer::deps_satisfied(&descriptor.deps, &state.loaded) {
            continue;
        }
        let Materialized::Ready(params) = materializer::materialize(&descriptor.params, &state.loaded) else {
            continue;
        };
        ready.push((path.clone(), descriptor.clone(), params));
    }

    if ready.is_empty() {
        return false;
    }

    let attempts: Vec<_> = ready
        .into_iter()
        .map(|(path, descriptor, params)| {
            let resolved = ResolvedSource {
                id: descriptor.id.clone(),
                path: path.clone(),
                params,
            };
            let prior_attempts = state.attempts.get(&path).copied().unwrap_or(0);
            let delay_ms = state.pending_delay.remove(&path);
            let executor = state.executor;
            async move {
                let result = executor.attempt(&descriptor, &resolved, prior_attempts, delay_ms).await;
                (path, descriptor, resolved, result)
            }
        })
        .collect();

    let outcomes = join_all(attempts).await;

    for (path, descriptor, resolved, result) in outcomes {
        state.attempts.insert(path.clone(), result.attempts);

        if result.success {
            handle_success(state, pending, tx, path, descriptor, resolved, result).await;
            continue;
        }

        match retry::decide(&descriptor, &result) {
            RetryOutcome::Exhausted => {
                debug!(target: crate::TRACING_TARGET, %path, "terminal failure");
                state.loaded.insert(path.clone(), result.clone());
                pending.remove(&path);
                let _ = tx.send(Event::new(path, descriptor.id.clone(), result)).await;
            }
            RetryOutcome::Retry { delay_ms } => {
                debug!(target: crate::TRACING_TARGET, %path, delay_ms, "retrying");
                state.pending_delay.insert(path.clone(), delay_ms);
                let mut event_result = result.clone();
                event_result.retrying = true;
                event_result.retry_delay_ms = Some(delay_ms);
                let _ = tx.send(Event::new(path, descriptor.id.clone(), event_result)).await;
            }
            RetryOutcome::Refresh { refresh_paths } => {
                debug!(target: crate::TRACING_TARGET, %path, ?refresh_paths, "refreshing dependencies before retry");
                for refresh_path in &refresh_paths {
                    if let Some(d) = state.prescription.get_mut(refresh_path) {
                        d.refreshing = true;
                        if let Some(original) = d.original_params.clone() {
                            d.params = original;
                        }
                        d.deps.clear();
                        d.resolved_cache_deps.clear();
                    }
                    state.loaded.remove(refresh_path);
                    state.attempts.remove(refresh_path);
                    state.cache_missed.remove(refresh_path);
                    pending.insert(refresh_path.clone());
                }
                let refresh_focus: Vec<Path> = refresh_paths.into_iter().collect();
                let _ = resolver::resolve_deps(&mut state.prescription, Some(&refresh_focus));
                let _ = resolver::resolve_cache_deps(&mut state.prescription, Some(&refresh_focus));

                let mut event_result = result.clone();
                event_result.retrying = true;
                let _ = tx.send(Event::new(path, descriptor.id.clone(), event_result)).await;
            }
        }
    }

    true
}

async fn handle_success(
    state: &mut EngineState,
    pending: &mut HashSet<Path>,
    tx: &mpsc::Sender<Event>,
    path: Path,
    descriptor: SourceDescriptor,
    resolved: ResolvedSource,
    mut result: FetchResult,
) {
    if let Some(d) = state.prescription.get_mut(&path) {
        d.refreshing = false;
    }

    let mut spliced = Vec::new();
    if let Some(coll_of) = &descriptor.coll_of {
        let data = result.data.clone().unwrap_or(Value::Null);
        spliced.extend(expand::expand_collection(&path, coll_of, &data, &state.prescription));
    }
    if let Some(begets) = &descriptor.begets
        && !begets.is_empty()
    {
        let data = result.data.clone().unwrap_or(Value::Null);
        spliced.extend(expand::expand_begets(&path, begets, &data, &state.prescription));
    }
    spliced.extend(expand::splice_prescriptions(&path, &result));

    if !spliced.is_empty() {
        result.partial = true;
        let child_focus: Vec<Path> = spliced.iter().map(|(p, _)| p.clone()).collect();
        for (child_path, child) in spliced {
            state.prescription.insert(child_path.clone(), child);
            pending.insert(child_path);
        }
        let _ = resolver::resolve_deps(&mut state.prescription, Some(&child_focus));
        let _ = resolver::resolve_cache_deps(&mut state.prescription, Some(&child_focus));

        state.loaded.insert(path.clone(), result.clone());
        pending.remove(&path);
        debug!(target: crate::TRACING_TARGET, %path, "partial event: children expanded");
        let _ = tx.send(Event::new(path, descriptor.id.clone(), result)).await;
        return;
    }

    state.loaded.insert(path.clone(), result.clone());
    pending.remove(&path);
    let key_params = crate::cache::narrow_to_cache_params(&descriptor, &resolved.params);
    let cache_key_source = ResolvedSource { params: key_params, ..resolved };
    state.cache.put(&path, &cache_key_source, &result).await;
    trace!(target: crate::TRACING_TARGET, %path, "terminal success");
    let _ = tx.send(Event::new(path, descriptor.id.clone(), result)).await;
}

/// Step 4: broaden the planning horizon when no other action fired.
fn expand_selection(state: &mut EngineState, pending: &mut HashSet<Path>) -> bool {
    let before = pending.len();
    let focus: Vec<Path> = pending.iter().cloned().collect();

    let _ = resolver::resolve_cache_deps(&mut state.prescription, Some(&focus));
    for path in &focus {
        if let Some(descriptor) = state.prescription.get(path) {
            for dep in descriptor.resolved_cache_deps.clone() {
                if state.prescription.contains_key(&dep) && !state.loaded.contains_key(&dep) {
                    pending.insert(dep);
                }
            }
        }
    }

    let _ = resolver::resolve_deps(&mut state.prescription, Some(&focus));
    let mut queue: Vec<Path> = pending.iter().cloned().collect();
    while let Some(path) = queue.pop() {
        let Some(descriptor) = state.prescription.get(&path) else {
            continue;
        };
        for dep in descriptor.deps.clone() {
            if state.prescription.contains_key(&dep) && !state.loaded.contains_key(&dep) && pending.insert(dep.clone()) {
                queue.push(dep);
            }
        }
    }

    pending.len() > before
}
