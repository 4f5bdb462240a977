//! Retry / refresh state machine.
//!
//! Pure decision logic: given a descriptor and the `FetchResult` of its
//! latest attempt, decides whether the orchestrator should retry it
//! directly, refresh some of its dependencies first, or treat the
//! failure as terminal. Carrying out a refresh (marking sources
//! `refreshing?`, clearing their derived fields) is the orchestrator's
//! job — this module only computes *which* paths need it.

use std::collections::HashSet;

use crate::model::{FetchResult, ParamValue, Params, Path, Refresh, SourceDescriptor};

/// What the orchestrator should do next with a non-terminal result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Re-attempt the source itself after `delay_ms`; no refresh needed.
    Retry { delay_ms: u64 },
    /// Re-fetch every source in `refresh_paths` first. Once they all
    /// terminalize, the retrying source is re-planned with freshly
    /// materialized params.
    Refresh { refresh_paths: HashSet<Path> },
    /// Retry budget exhausted, or `retryable? = false`: terminal failure.
    Exhausted,
}

/// Decides the fate of a failed attempt.
pub fn decide(descriptor: &SourceDescriptor, result: &FetchResult) -> RetryOutcome {
    if !result.is_retryable(descriptor.retries) {
        return RetryOutcome::Exhausted;
    }

    match &result.refresh {
        Some(refresh) => {
            let params = descriptor.original_params.as_ref().unwrap_or(&descriptor.params);
            RetryOutcome::Refresh {
                refresh_paths: refresh_paths_of(params, refresh),
            }
        }
        None => RetryOutcome::Retry {
            delay_ms: retry_delay_ms(descriptor, result),
        },
    }
}

/// `result.retry_delay_ms` wins when set; otherwise
/// `retry_delays[min(attempts - 1, len - 1)]`, or `0` with no configured
/// delays.
pub fn retry_delay_ms(descriptor: &SourceDescriptor, result: &FetchResult) -> u64 {
    if let Some(ms) = result.retry_delay_ms {
        return ms;
    }
    let delays = &descriptor.retry_delays;
    if delays.is_empty() {
        return 0;
    }
    let idx = (result.attempts.saturating_sub(1) as usize).min(delays.len() - 1);
    delays[idx]
}

/// Maps a `Refresh` selector back to the source paths that originally
/// supplied those params, via the descriptor's pristine `original_params`.
fn refresh_paths_of(params: &Params, refresh: &Refresh) -> HashSet<Path> {
    match (params, refresh) {
        (Params::Whole(r), _) => HashSet::from([r.source.clone()]),
        (Params::Map(m), Refresh::Whole) => m
            .values()
            .filter_map(ParamValue::as_dep_ref)
            .map(|r| r.source.clone())
            .collect(),
        (Params::Map(m), Refresh::Keys(keys)) => keys
            .iter()
            .filter_map(|k| m.get(k))
            .filter_map(ParamValue::as_dep_ref)
            .map(|r| r.source.clone())
            .collect(),
    }
}
