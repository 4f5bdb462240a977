#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod cache;
pub mod collect;
mod error;
pub mod executor;
pub mod expand;
pub mod materializer;
pub mod model;
pub mod orchestrator;
pub mod resolver;
pub mod retry;
pub mod testing;

pub mod prelude;

pub use error::{Error, Result};
pub use orchestrator::{FillOptions, Handle};

/// Tracing target for coordinator operations.
pub const TRACING_TARGET: &str = "fetchgraph";
