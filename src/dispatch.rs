//! Fetch dispatch with bounded retry and backoff.
//!
//! The dispatcher wraps a [`FetchCapability`] in the retry envelope a
//! source declares: transient failures (network, timeout, render) are
//! retried up to `retry_on_fail` additional times with exponential backoff
//! and jitter; fatal failures (malformed configuration detected at dispatch
//! time) short-circuit immediately. Exhausting the budget produces a typed
//! [`FetchFailure`] outcome, never a panic or an error crossing source
//! boundaries.
//!
//! # Retry Strategy
//!
//! - `retry_on_fail` additional attempts after the first
//! - Exponential backoff starting at 1 second
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd
//! - Cancellation checked after every attempt, before the next backoff

use crate::errors::{FetchError, FetchFailure};
use crate::fetch::FetchCapability;
use crate::models::{RawRecord, SourceConfig};
use crate::runner::RunContext;
use rand::Rng;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{info, instrument, warn};

/// Backoff shape for transient retries. Tests shrink the base delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Successful dispatch outcome: the raw records and how many attempts it
/// took to get them.
#[derive(Debug)]
pub struct FetchSuccess {
    pub records: Vec<RawRecord>,
    pub attempts: u32,
}

/// Retry envelope around a fetch capability.
#[derive(Debug)]
pub struct FetchDispatcher {
    capability: FetchCapability,
    policy: RetryPolicy,
    default_timeout: Duration,
}

impl FetchDispatcher {
    pub fn new(capability: FetchCapability, default_timeout: Duration) -> Self {
        Self {
            capability,
            policy: RetryPolicy::default(),
            default_timeout,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run the fetch/extract collaborator for one source under its retry
    /// budget. Anti-scraping parameters travel inside `source` verbatim;
    /// the dispatcher only enforces the envelope.
    #[instrument(level = "info", skip_all, fields(source = %source.source_name))]
    pub async fn execute(
        &self,
        source: &SourceConfig,
        ctx: &RunContext,
    ) -> Result<FetchSuccess, FetchFailure> {
        let max_attempts = source.anti_scraping_strategies.retry_on_fail + 1;
        let per_attempt = attempt_timeout(source, self.default_timeout);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let reason = match timeout(per_attempt, self.capability.fetch(source, ctx)).await {
                Ok(Ok(records)) => {
                    info!(attempt, count = records.len(), "fetch succeeded");
                    return Ok(FetchSuccess { records, attempts: attempt });
                }
                Ok(Err(FetchError::Fatal(reason))) => {
                    warn!(attempt, %reason, "fatal fetch error; not retrying");
                    return Err(FetchFailure { reason, attempts: attempt, fatal: true });
                }
                Ok(Err(FetchError::Cancelled)) => {
                    return Err(FetchFailure {
                        reason: "cancelled".to_string(),
                        attempts: attempt,
                        fatal: false,
                    });
                }
                Ok(Err(FetchError::Transient(reason))) => reason,
                Err(_elapsed) => format!("attempt timed out after {:.0?}", per_attempt),
            };

            if attempt >= max_attempts {
                warn!(attempt, max = max_attempts, %reason, "fetch exhausted retries");
                return Err(FetchFailure { reason, attempts: attempt, fatal: false });
            }
            if ctx.cancel.is_cancelled() {
                return Err(FetchFailure {
                    reason: format!("cancelled before retry ({reason})"),
                    attempts: attempt,
                    fatal: false,
                });
            }

            // backoff calc
            let mut delay = self.policy.base_delay.saturating_mul(1 << (attempt - 1).min(16));
            if delay > self.policy.max_delay {
                delay = self.policy.max_delay;
            }
            let jitter_ms: u64 = rand::rng().random_range(0..=250);
            let delay = delay + Duration::from_millis(jitter_ms);

            warn!(attempt, max = max_attempts, ?delay, %reason, "fetch attempt failed; backing off");
            tokio::select! {
                _ = sleep(delay) => {}
                _ = ctx.cancel.cancelled() => {
                    return Err(FetchFailure {
                        reason: format!("cancelled during backoff ({reason})"),
                        attempts: attempt,
                        fatal: false,
                    });
                }
            }
        }
    }
}

fn attempt_timeout(source: &SourceConfig, default_timeout: Duration) -> Duration {
    let ms = source.anti_scraping_strategies.page_timeout_ms;
    if ms > 0 {
        Duration::from_millis(ms)
    } else {
        default_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::fixture::FixtureFetcher;
    use crate::models::SiteType;
    use crate::runner::RunContext;
    use crate::window::TimeWindow;
    use chrono::Utc;
    use tokio_util::sync::CancellationToken;

    fn source(retry_on_fail: u32) -> SourceConfig {
        SourceConfig {
            source_name: "test".to_string(),
            site_type: SiteType::News,
            target_url: "https://example.com/".to_string(),
            entry_pattern: "a".to_string(),
            detail_pattern: Default::default(),
            keywords_filter: Vec::new(),
            output_format: Default::default(),
            schedule: Default::default(),
            time_range: None,
            anti_scraping_strategies: crate::models::AntiScrapingStrategies {
                retry_on_fail,
                ..Default::default()
            },
            enable_incremental: true,
            use_entry_content: false,
            entry_interactions: Default::default(),
        }
    }

    fn ctx() -> RunContext {
        RunContext {
            window: TimeWindow::Unbounded,
            run_tag: "test".to_string(),
            cancel: CancellationToken::new(),
        }
    }

    fn record(title: &str) -> RawRecord {
        RawRecord {
            url: format!("https://example.com/{title}"),
            title: title.to_string(),
            published_at: None,
            content: String::new(),
            extra: Default::default(),
            fetched_at: Utc::now(),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_two_failures_then_success_reports_three_attempts() {
        let fixture = FixtureFetcher::new(vec![
            Err(FetchError::Transient("refused".to_string())),
            Err(FetchError::Transient("reset".to_string())),
            Ok(vec![record("a")]),
        ]);
        let dispatcher =
            FetchDispatcher::new(FetchCapability::Fixture(fixture), Duration::from_secs(5))
                .with_policy(fast_policy());

        let success = dispatcher.execute(&source(2), &ctx()).await.unwrap();
        assert_eq!(success.attempts, 3);
        assert_eq!(success.records.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_budget_is_typed_failure() {
        let fixture = FixtureFetcher::new(vec![
            Err(FetchError::Transient("down".to_string())),
            Err(FetchError::Transient("down".to_string())),
        ]);
        let dispatcher =
            FetchDispatcher::new(FetchCapability::Fixture(fixture), Duration::from_secs(5))
                .with_policy(fast_policy());

        let failure = dispatcher.execute(&source(1), &ctx()).await.unwrap_err();
        assert_eq!(failure.attempts, 2);
        assert!(!failure.fatal);
        assert!(failure.reason.contains("down"));
    }

    #[tokio::test]
    async fn test_fatal_error_short_circuits() {
        let fixture = FixtureFetcher::new(vec![
            Err(FetchError::Fatal("bad selector".to_string())),
            Ok(vec![record("never")]),
        ]);
        let dispatcher =
            FetchDispatcher::new(FetchCapability::Fixture(fixture), Duration::from_secs(5))
                .with_policy(fast_policy());

        let failure = dispatcher.execute(&source(5), &ctx()).await.unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert!(failure.fatal);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let fixture = FixtureFetcher::new(vec![
            Ok(vec![record("slow")]),
            Ok(vec![record("fast")]),
        ])
        .with_delay(Duration::from_millis(50));
        let mut src = source(1);
        src.anti_scraping_strategies.page_timeout_ms = 10;
        let dispatcher =
            FetchDispatcher::new(FetchCapability::Fixture(fixture), Duration::from_secs(5))
                .with_policy(fast_policy());

        // Both attempts exceed the 10ms budget, so the run fails with the
        // timeout recorded as an ordinary transient reason.
        let failure = dispatcher.execute(&src, &ctx()).await.unwrap_err();
        assert_eq!(failure.attempts, 2);
        assert!(!failure.fatal);
        assert!(failure.reason.contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_retrying() {
        let fixture = FixtureFetcher::new(vec![
            Err(FetchError::Transient("down".to_string())),
            Ok(vec![record("never")]),
        ]);
        let dispatcher =
            FetchDispatcher::new(FetchCapability::Fixture(fixture), Duration::from_secs(5))
                .with_policy(fast_policy());
        let ctx = ctx();
        ctx.cancel.cancel();

        let failure = dispatcher.execute(&source(3), &ctx).await.unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert!(failure.reason.contains("cancelled"));
    }
}
