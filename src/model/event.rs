//! Event messages emitted on the orchestrator's output stream.

use super::descriptor::SourceId;
use super::path::Path;
use super::result::FetchResult;

/// An `{path, source, result}` event, emitted in whatever order the
/// orchestrator's run loop decides it, not necessarily selection order.
#[derive(Debug, Clone)]
pub struct Event {
    pub path: Path,
    pub source_id: SourceId,
    pub result: FetchResult,
}

impl Event {
    pub fn new(path: Path, source_id: SourceId, result: FetchResult) -> Self {
        Event {
            path,
            source_id,
            result,
        }
    }

    /// Whether this event represents a terminal (non-retrying) outcome.
    pub fn is_terminal(&self) -> bool {
        !self.result.retrying
    }
}
