//! Convenience re-exports for source authors. `use fetchgraph::prelude::*;`
//! pulls in everything needed to describe a prescription and drive it.

pub use crate::cache::{Cache, NoCache};
pub use crate::collect::{collect, merge_results, Summary};
pub use crate::error::{Error, Result};
pub use crate::model::{
    Conform, DepRef, Event, ErrorKind, Fetch, FetchResult, Loaded, ParamValue, Params, Path, PathSegment,
    Prescription, Refresh, ResolvedSource, SourceDescriptor, SourceDescriptorBuilder, SourceId, SyncFetch,
};
pub use crate::orchestrator::{fill, pull, select, EventStream, FillOptions, FillOptionsBuilder, Handle};
