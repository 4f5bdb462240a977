//! Options accepted by [`crate::orchestrator::fill`].

use std::sync::Arc;

use derive_builder::Builder;

use crate::cache::{Cache, NoCache};
use crate::model::Loaded;

/// Configuration for a `fill` run: seed results, the engine-wide default
/// timeout, and the cache adapter.
#[derive(Clone, Builder)]
#[builder(name = "FillOptionsBuilder", pattern = "owned", setter(into, strip_option))]
pub struct FillOptions {
    /// Pre-loaded results exposed to the prescription as if already
    /// terminalized — satisfies `params` that reference these paths
    /// without ever dispatching a fetch for them.
    #[builder(default)]
    pub initial_params: Loaded,
    /// `None` leaves fetches unbounded; a per-source `timeout_ms` of
    /// `Some(0)` still disables the timeout for that source specifically.
    #[builder(default)]
    pub timeout_ms: Option<u64>,
    #[builder(default = "Arc::new(NoCache) as Arc<dyn Cache>")]
    pub cache: Arc<dyn Cache>,
}

impl FillOptions {
    pub fn builder() -> FillOptionsBuilder {
        FillOptionsBuilder::default()
    }
}

impl Default for FillOptions {
    fn default() -> Self {
        FillOptions {
            initial_params: Loaded::new(),
            timeout_ms: None,
            cache: Arc::new(NoCache),
        }
    }
}
