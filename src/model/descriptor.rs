//! Source descriptors: the units a prescription maps paths to.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use derive_builder::Builder;
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::path::Path;
use super::result::FetchResult;

/// Opaque tag used to dispatch fetches, conform hooks, and registry
/// lookups (custom cache keys / cache params / cache deps).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, From)]
pub enum SourceId {
    /// An author-supplied name.
    Named(String),
    /// Generated when a descriptor doesn't name one explicitly.
    Generated(Uuid),
}

impl SourceId {
    /// Generates a fresh, unnamed source id.
    pub fn generate() -> Self {
        SourceId::Generated(Uuid::now_v7())
    }

    /// Creates a named source id.
    pub fn named(name: impl Into<String>) -> Self {
        SourceId::Named(name.into())
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        SourceId::Named(s.to_string())
    }
}

/// A non-empty reference `[sourcePath, ...subPath]` into another source's
/// result.
///
/// When `sub_path` is empty and this `DepRef` is the *entire* `params`
/// value of a descriptor (see [`Params::Whole`]), it means "take the
/// parent's entire result as the params map".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepRef {
    /// Path of the referenced source.
    pub source: Path,
    /// Navigation into that source's realized data.
    pub sub_path: Vec<String>,
}

impl DepRef {
    /// Creates a reference to another source's entire result.
    pub fn to(source: impl Into<Path>) -> Self {
        DepRef {
            source: source.into(),
            sub_path: Vec::new(),
        }
    }

    /// Creates a reference into a nested field of another source's result.
    pub fn into_field(source: impl Into<Path>, sub_path: Vec<String>) -> Self {
        DepRef {
            source: source.into(),
            sub_path,
        }
    }

    /// Navigates `data` by this reference's `sub_path`.
    pub fn navigate<'a>(&self, data: &'a Value) -> Option<&'a Value> {
        let mut current = data;
        for key in &self.sub_path {
            current = current.get(key)?;
        }
        Some(current)
    }
}

/// A parameter value: either a literal or a dependency reference.
///
/// This is the explicit, typed stand-in for the "this value is a
/// dependency" runtime metadata tag described in the design notes —
/// Rust has no ambient metadata to attach to a plain `Value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// A literal, already-concrete value.
    Literal(Value),
    /// A reference to another source's (sub)result.
    DepRef(DepRef),
}

impl ParamValue {
    pub fn literal(v: impl Into<Value>) -> Self {
        ParamValue::Literal(v.into())
    }

    pub fn dep(source: impl Into<Path>) -> Self {
        ParamValue::DepRef(DepRef::to(source))
    }

    pub fn as_dep_ref(&self) -> Option<&DepRef> {
        match self {
            ParamValue::DepRef(r) => Some(r),
            ParamValue::Literal(_) => None,
        }
    }
}

/// A descriptor's `params`: either a whole-result reference, or a mapping
/// from parameter key to value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Params {
    /// `params` is itself a [`DepRef`]: the parent's entire result becomes
    /// the params map.
    Whole(DepRef),
    /// A mapping of parameter key to literal or dependency value.
    Map(HashMap<String, ParamValue>),
}

impl Params {
    pub fn empty() -> Self {
        Params::Map(HashMap::new())
    }

    /// Returns the set of source paths this (unresolved) `params` value
    /// depends on.
    pub fn dep_sources(&self) -> HashSet<Path> {
        match self {
            Params::Whole(r) => HashSet::from([r.source.clone()]),
            Params::Map(m) => m
                .values()
                .filter_map(ParamValue::as_dep_ref)
                .map(|r| r.source.clone())
                .collect(),
        }
    }
}

/// A value that is either supplied up front or resolved from a `conform`
/// callback's output.
#[async_trait]
pub trait Conform: Send + Sync {
    /// Transforms a fetch's raw result into the value stored as `data`.
    /// May panic to signal "not realizable"; the executor catches it.
    async fn conform(&self, source: &ResolvedSource, raw: &Value) -> Value;
}

/// A fully materialized view of a source, as seen by `fetch`/`conform`
/// callbacks and by the cache adapter.
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub id: SourceId,
    pub path: Path,
    pub params: Map<String, Value>,
}

/// An asynchronous fetch implementation.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Performs one fetch attempt. Must not sleep for backoff — the
    /// executor applies `retry_delay_ms` itself.
    async fn fetch(&self, source: &ResolvedSource) -> FetchResult;
}

/// A synchronous fetch implementation, run via `spawn_blocking`.
pub trait SyncFetch: Send + Sync {
    fn fetch(&self, source: &ResolvedSource) -> FetchResult;
}

/// Adapts a [`SyncFetch`] into a [`Fetch`] by running it on the blocking
/// thread pool, so synchronous callers never stall the executor.
pub struct Blocking<F>(pub Arc<F>);

#[async_trait]
impl<F: SyncFetch + 'static> Fetch for Blocking<F> {
    async fn fetch(&self, source: &ResolvedSource) -> FetchResult {
        let f = self.0.clone();
        let source = source.clone();
        match tokio::task::spawn_blocking(move || f.fetch(&source)).await {
            Ok(result) => result,
            Err(join_err) => FetchResult::error(
                super::result::ErrorKind::FetchException,
                format!("sync fetch panicked: {join_err}"),
            ),
        }
    }
}

/// What a failed fetch asks to be re-realized before retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refresh {
    /// Refresh only the named parameter keys.
    Keys(HashSet<String>),
    /// Refresh every dependency the params reference ("whole params").
    Whole,
}

/// A named source in a [`crate::model::Prescription`].
///
/// Fields marked "derived" are populated by [`crate::resolver`], never by
/// the caller.
#[derive(Clone, Builder)]
#[builder(
    name = "SourceDescriptorBuilder",
    pattern = "owned",
    setter(into, strip_option),
    build_fn(validate = "Self::validate")
)]
pub struct SourceDescriptor {
    /// Opaque dispatch identity.
    #[builder(default = "SourceId::generate()")]
    pub id: SourceId,
    /// The fetch implementation (already normalized from sync/async).
    pub fetch: Arc<dyn Fetch>,
    /// The descriptor's parameters, as authored.
    #[builder(default = "Params::empty()")]
    pub params: Params,
    /// Non-negative retry budget.
    #[builder(default = "0")]
    pub retries: u32,
    /// Backoff delays; the last entry repeats past its length.
    #[builder(default)]
    pub retry_delays: Vec<u64>,
    /// `None` inherits the fill-level default; `Some(0)` disables the
    /// timeout entirely.
    #[builder(default)]
    pub timeout_ms: Option<u64>,
    /// Optional post-processing hook.
    #[builder(default)]
    pub conform: Option<Arc<dyn Conform>>,
    /// Parameter keys whose dependencies suffice to compute a cache key.
    #[builder(default)]
    pub cache_deps: Option<HashSet<String>>,
    /// Parameter keys used to build the cache key (default: all params).
    #[builder(default)]
    pub cache_params: Option<Vec<String>>,
    /// Marks this source as a collection template application.
    #[builder(default)]
    pub coll_of: Option<Path>,
    /// Marks this source as spawning named children from its result.
    #[builder(default)]
    pub begets: Option<HashMap<String, Path>>,

    // --- derived by the resolver / expansion; never set by callers ---
    /// Preserved on first materialization so retries/refresh can re-derive
    /// from the pristine reference.
    #[builder(default)]
    pub original_params: Option<Params>,
    /// Computed dependency set.
    #[builder(default)]
    pub deps: HashSet<Path>,
    /// Computed cache-dependency set (subset of `deps`).
    #[builder(default)]
    pub resolved_cache_deps: HashSet<Path>,
    /// Set when this descriptor was spawned from a collection/begets
    /// parent.
    #[builder(default)]
    pub member_of: Option<Path>,
    /// The template source path this descriptor was spawned from.
    #[builder(default)]
    pub template_path: Option<Path>,
    /// True while a refresh-triggered re-fetch of this source is pending;
    /// suppresses cache reads.
    #[builder(default)]
    pub refreshing: bool,
}

impl SourceDescriptorBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.fetch.is_none() {
            return Err("fetch is required".into());
        }
        Ok(())
    }

    /// Convenience for authoring a sync fetch without manual wrapping.
    pub fn with_sync_fetch<F: SyncFetch + 'static>(self, f: F) -> Self {
        self.fetch(Arc::new(Blocking(Arc::new(f))) as Arc<dyn Fetch>)
    }
}

impl SourceDescriptor {
    pub fn builder() -> SourceDescriptorBuilder {
        SourceDescriptorBuilder::default()
    }

    /// Returns whether this descriptor is a collection template
    /// application.
    pub fn is_collection(&self) -> bool {
        self.coll_of.is_some()
    }

    /// Returns whether this descriptor spawns begets children.
    pub fn has_begets(&self) -> bool {
        self.begets.as_ref().is_some_and(|m| !m.is_empty())
    }

    /// Returns whether this descriptor is a join point (collection or
    /// begets parent) that must wait on its children.
    pub fn is_parent(&self) -> bool {
        self.is_collection() || self.has_begets()
    }
}
