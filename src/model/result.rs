//! Fetch results and the error taxonomy.

use std::collections::HashSet;

use jiff::Timestamp;
use serde_json::Value;
use strum::Display;

use super::descriptor::{Refresh, SourceDescriptor};
use super::path::Path;

/// The error taxonomy covering every fetch-contract violation. Each variant
/// manifests as a terminal failure event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// The fetch implementation panicked.
    FetchException,
    /// An async fetch returned a handle that could never resolve.
    FetchNoChan,
    /// The fetch returned a result that carries neither `success?` nor
    /// `data`.
    ResultNil,
    /// The fetch's raw return value could not be interpreted as a result.
    ResultNotMap,
    /// `conform` rejected the raw value.
    NotConformableResult,
    /// A lazily-produced result value threw while being materialized.
    ResultNotRealizable,
    /// The fetch did not complete within its configured window.
    Timeout,
    /// Dependencies were never satisfied; stub failure.
    Unreachable,
}

/// A fetch-contract violation, carried inside a failing [`FetchResult`].
#[derive(Debug, Clone)]
pub struct FetchError {
    pub kind: ErrorKind,
    pub message: String,
    pub upstream: Option<String>,
}

impl FetchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        FetchError {
            kind,
            message: message.into(),
            upstream: None,
        }
    }

    pub fn with_upstream(mut self, upstream: impl Into<String>) -> Self {
        self.upstream = Some(upstream.into());
        self
    }
}

/// The outcome of one fetch attempt (or a cache hit, or a stub failure).
///
/// Field-for-field mirror of the result shape every `Fetch` implementation
/// returns.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub success: bool,
    pub data: Option<Value>,
    pub raw_data: Option<Value>,
    pub attempts: u32,
    pub retrying: bool,
    pub retry_delay_ms: Option<u64>,
    pub retryable: bool,
    pub refresh: Option<Refresh>,
    pub partial: bool,
    pub cached: bool,
    pub timeout_after_ms: Option<u64>,
    pub error: Option<FetchError>,
    pub elapsed_ms: Option<u64>,
    pub cached_at: Option<i64>,
    /// Compatibility shim: free-form sub-prescriptions returned by a
    /// successful fetch. New code should prefer `begets`/`coll_of`; this
    /// is spliced in by [`crate::expand`] exactly like a begets expansion.
    pub prescriptions: Vec<(Path, SourceDescriptor)>,
}

impl Default for FetchResult {
    fn default() -> Self {
        FetchResult {
            success: false,
            data: None,
            raw_data: None,
            attempts: 0,
            retrying: false,
            retry_delay_ms: None,
            retryable: true,
            refresh: None,
            partial: false,
            cached: false,
            timeout_after_ms: None,
            error: None,
            elapsed_ms: None,
            cached_at: None,
            prescriptions: Vec::new(),
        }
    }
}

impl FetchResult {
    /// A successful result carrying `data`.
    pub fn success(data: impl Into<Value>) -> Self {
        FetchResult {
            success: true,
            data: Some(data.into()),
            ..Default::default()
        }
    }

    /// A failure result, retryable by default.
    pub fn failure() -> Self {
        FetchResult {
            success: false,
            ..Default::default()
        }
    }

    /// A failure carrying a fetch-contract error.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        FetchResult {
            success: false,
            error: Some(FetchError::new(kind, message)),
            ..Default::default()
        }
    }

    /// The stub failure emitted for paths that never became reachable.
    pub fn unreachable(path: &Path) -> Self {
        FetchResult {
            success: false,
            attempts: 0,
            retryable: false,
            error: Some(FetchError::new(
                ErrorKind::Unreachable,
                format!("dependencies for {path} were never satisfied"),
            )),
            ..Default::default()
        }
    }

    /// A result read straight from the cache adapter.
    pub fn from_cache(mut self) -> Self {
        self.attempts = 0;
        self.cached = true;
        self
    }

    pub fn with_refresh(mut self, refresh: Refresh) -> Self {
        self.refresh = Some(refresh);
        self
    }

    pub fn with_refresh_keys(mut self, keys: impl IntoIterator<Item = String>) -> Self {
        self.refresh = Some(Refresh::Keys(keys.into_iter().collect::<HashSet<_>>()));
        self
    }

    pub fn not_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }

    pub fn with_retry_delay_ms(mut self, ms: u64) -> Self {
        self.retry_delay_ms = Some(ms);
        self
    }

    pub fn with_timeout_after(mut self, ms: u64) -> Self {
        self.timeout_after_ms = Some(ms);
        self.error = Some(FetchError::new(
            ErrorKind::Timeout,
            format!("fetch did not complete within {ms}ms"),
        ));
        self
    }

    pub fn with_prescriptions(mut self, prescriptions: Vec<(Path, SourceDescriptor)>) -> Self {
        self.prescriptions = prescriptions;
        self
    }

    /// Stamps the wall-clock time this result was persisted to the cache.
    pub fn stamp_cached_at(mut self) -> Self {
        self.cached_at = Some(Timestamp::now().as_millisecond());
        self
    }

    /// Whether this result is retryable: the `retryable` flag is set and
    /// the source still has retry budget remaining.
    pub fn is_retryable(&self, retries_budget: u32) -> bool {
        !self.success && self.retryable && retries_budget >= self.attempts
    }
}
