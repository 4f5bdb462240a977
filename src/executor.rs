//! Single-shot fetch execution.
//!
//! Applies backoff, invokes the fetch, bounds it with a timeout, catches
//! panics and normalizes them to `fetch_exception`, and runs `conform`.
//! Retry-delay bookkeeping and cache persistence are the orchestrator's
//! job; this module only produces the `FetchResult` for one attempt.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;

use crate::model::{ErrorKind, FetchResult, ResolvedSource, SourceDescriptor};

/// Runs single fetch attempts under a configured default timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchExecutor {
    default_timeout_ms: Option<u64>,
}

impl FetchExecutor {
    pub fn new(default_timeout_ms: Option<u64>) -> Self {
        FetchExecutor { default_timeout_ms }
    }

    /// Performs one attempt: applies `delay_ms` (retry backoff — never on
    /// the initial attempt unless the caller explicitly sets it),
    /// dispatches the fetch under a timeout, and applies `conform` on
    /// success.
    pub async fn attempt(
        &self,
        descriptor: &SourceDescriptor,
        resolved: &ResolvedSource,
        prior_attempts: u32,
        delay_ms: Option<u64>,
    ) -> FetchResult {
        if let Some(ms) = delay_ms
            && ms > 0
        {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        let attempts = prior_attempts + 1;
        let started = Instant::now();
        let timeout_ms = effective_timeout_ms(descriptor.timeout_ms, self.default_timeout_ms);

        let fetch_fut = AssertUnwindSafe(descriptor.fetch.fetch(resolved)).catch_unwind();

        let outcome = match timeout_ms {
            Some(ms) if ms > 0 => match tokio::time::timeout(Duration::from_millis(ms), fetch_fut).await {
                Ok(outcome) => outcome,
                Err(_elapsed) => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    let mut result = FetchResult::failure().with_timeout_after(ms);
                    result.attempts = attempts;
                    result.elapsed_ms = Some(elapsed_ms);
                    return result;
                }
            },
            _ => fetch_fut.await,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut result = match outcome {
            Ok(result) => result,
            Err(panic) => FetchResult::error(ErrorKind::FetchException, panic_message(&panic)),
        };
        result.attempts = attempts;
        result.elapsed_ms = Some(elapsed_ms);

        if result.success
            && let Some(conform) = &descriptor.conform
        {
            let raw = result.data.clone().unwrap_or(serde_json::Value::Null);
            let conform_fut = AssertUnwindSafe(conform.conform(resolved, &raw)).catch_unwind();
            match conform_fut.await {
                Ok(conformed) => {
                    result.raw_data = Some(raw);
                    result.data = Some(conformed);
                }
                Err(panic) => {
                    let mut failure =
                        FetchResult::error(ErrorKind::ResultNotRealizable, panic_message(&panic));
                    failure.attempts = attempts;
                    failure.elapsed_ms = Some(elapsed_ms);
                    return failure;
                }
            }
        }

        result
    }
}

/// `None` inherits `default_timeout_ms`; `Some(0)` disables the timeout
/// regardless of the engine default.
fn effective_timeout_ms(source_timeout: Option<u64>, default_timeout_ms: Option<u64>) -> Option<u64> {
    match source_timeout {
        Some(0) => None,
        Some(ms) => Some(ms),
        None => default_timeout_ms,
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "fetch panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::model::{Path, SourceDescriptor, SourceId};

    struct AlwaysSucceeds;
    #[async_trait]
    impl crate::model::Fetch for AlwaysSucceeds {
        async fn fetch(&self, _source: &ResolvedSource) -> FetchResult {
            FetchResult::success(serde_json::json!({"ok": true}))
        }
    }

    struct AlwaysPanics;
    #[async_trait]
    impl crate::model::Fetch for AlwaysPanics {
        async fn fetch(&self, _source: &ResolvedSource) -> FetchResult {
            panic!("boom");
        }
    }

    struct NeverCompletes;
    #[async_trait]
    impl crate::model::Fetch for NeverCompletes {
        async fn fetch(&self, _source: &ResolvedSource) -> FetchResult {
            std::future::pending().await
        }
    }

    struct CountingFetch(Arc<AtomicU32>);
    #[async_trait]
    impl crate::model::Fetch for CountingFetch {
        async fn fetch(&self, _source: &ResolvedSource) -> FetchResult {
            self.0.fetch_add(1, Ordering::SeqCst);
            FetchResult::success(serde_json::json!(1))
        }
    }

    fn resolved(id: &str) -> ResolvedSource {
        ResolvedSource {
            id: SourceId::named(id),
            path: Path::new(id),
            params: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn success_sets_attempts_and_elapsed() {
        let descriptor = SourceDescriptor::builder()
            .fetch(Arc::new(AlwaysSucceeds) as Arc<dyn crate::model::Fetch>)
            .build()
            .unwrap();
        let executor = FetchExecutor::new(None);
        let result = executor.attempt(&descriptor, &resolved("A"), 0, None).await;

        assert!(result.success);
        assert_eq!(result.attempts, 1);
        assert!(result.elapsed_ms.is_some());
    }

    #[tokio::test]
    async fn panic_becomes_fetch_exception() {
        let descriptor = SourceDescriptor::builder()
            .fetch(Arc::new(AlwaysPanics) as Arc<dyn crate::model::Fetch>)
            .build()
            .unwrap();
        let executor = FetchExecutor::new(None);
        let result = executor.attempt(&descriptor, &resolved("A"), 0, None).await;

        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind, ErrorKind::FetchException);
    }

    #[tokio::test]
    async fn timeout_produces_timeout_error() {
        let descriptor = SourceDescriptor::builder()
            .fetch(Arc::new(NeverCompletes) as Arc<dyn crate::model::Fetch>)
            .timeout_ms(5u64)
            .build()
            .unwrap();
        let executor = FetchExecutor::new(None);
        let result = executor.attempt(&descriptor, &resolved("A"), 0, None).await;

        assert!(!result.success);
        assert_eq!(result.timeout_after_ms, Some(5));
        assert_eq!(result.error.unwrap().kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn zero_timeout_disables_default() {
        let descriptor = SourceDescriptor::builder()
            .fetch(Arc::new(NeverCompletes) as Arc<dyn crate::model::Fetch>)
            .timeout_ms(0u64)
            .build()
            .unwrap();
        // Default timeout would fire at 5ms; a source timeout of 0 disables it.
        let executor = FetchExecutor::new(Some(5));
        let result = tokio::time::timeout(
            Duration::from_millis(50),
            executor.attempt(&descriptor, &resolved("A"), 0, None),
        )
        .await;
        assert!(result.is_err(), "fetch should still be pending past 50ms");
    }

    #[tokio::test]
    async fn delay_is_applied_before_dispatch() {
        let counter = Arc::new(AtomicU32::new(0));
        let descriptor = SourceDescriptor::builder()
            .fetch(Arc::new(CountingFetch(counter.clone())) as Arc<dyn crate::model::Fetch>)
            .build()
            .unwrap();
        let executor = FetchExecutor::new(None);
        let before = Instant::now();
        executor.attempt(&descriptor, &resolved("A"), 0, Some(20)).await;
        assert!(before.elapsed() >= Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
