//! The value model: source descriptors, results, events, and paths.
//!
//! These are deliberately plain data — the engine mutates them only
//! through [`crate::resolver`] (adding derived fields) and
//! [`crate::expand`] (spawning child descriptors).

mod descriptor;
mod event;
mod path;
mod result;

use std::collections::HashMap;

pub use descriptor::{
    Blocking, Conform, DepRef, Fetch, Params, ParamValue, Refresh, ResolvedSource,
    SourceDescriptor, SourceDescriptorBuilder, SourceId, SyncFetch,
};
pub use event::Event;
pub use path::{Path, PathSegment};
pub use result::{ErrorKind, FetchError, FetchResult};

/// A mapping from path to source descriptor — the user's declarative
/// program, progressively decorated by the resolver and expansion.
pub type Prescription = HashMap<Path, SourceDescriptor>;

/// The engine-internal store of terminal results, including those seeded
/// from `initial_params`.
pub type Loaded = HashMap<Path, FetchResult>;
