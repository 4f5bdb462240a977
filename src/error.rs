//! Crate-wide error types.
//!
//! Two error surfaces: the running orchestrator never returns `Err` from
//! its main loop — every fetch failure becomes an
//! [`crate::model::FetchResult`] event instead.
//! [`Error`] is reserved for the *offline* validator and for programming
//! contract violations (a malformed [`crate::model::DepRef`]) that are
//! caught before a selection is ever scheduled.

use thiserror::Error;

use crate::model::Path;

/// Result type for fallible, non-streaming operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised outside the running engine: prescription validation and
/// malformed references.
#[derive(Debug, Error)]
pub enum Error {
    /// The prescription contains a dependency cycle.
    #[error("cyclic dependency detected: {0:?}")]
    CyclicDependency(Vec<Path>),

    /// A source declares a dependency on a path that is not a valid,
    /// non-empty reference.
    #[error("malformed dependency reference at {0:?}")]
    MalformedDepRef(Path),

    /// A source's `params` path would overwrite one of the caller's
    /// `initial_params` entries.
    #[error("source at {0:?} shadows an initial parameter of the same path")]
    SourceShadowing(Path),

    /// A dependency reference resolves to neither a prescription entry
    /// nor an `initial_params` entry, so it could never become ready.
    #[error("dependency {0:?} is neither a prescription entry nor present in initial_params")]
    MissingDep(Path),

    /// The semaphore or channel backing a run was closed unexpectedly.
    #[error("internal coordinator error: {0}")]
    Internal(String),
}
