//! Run scheduling: due-set computation, per-source pipelines, bounded
//! concurrency and batch reporting.
//!
//! Every source run walks the same pipeline:
//!
//! ```text
//! resolve window -> dispatch fetch -> classify -> persist -> report
//! ```
//!
//! `run-all` evaluates which sources are due, then drives their pipelines
//! through a bounded pool (`buffer_unordered`), so a slow source delays its
//! queue slot, never the whole batch, and anti-scraping rate limits are not
//! trampled by unbounded fan-out. Each source contributes its own
//! [`RunReport`]; one pipeline failing never aborts a sibling.
//!
//! Two scheduling invariants are enforced here:
//! - at most one pipeline per source name at a time, even across
//!   overlapping invocations (second request is rejected as `Skipped`);
//! - after cancellation no *new* pipeline starts, while in-flight ones
//!   stop at the dispatcher's next checkpoint.

use crate::dispatch::FetchDispatcher;
use crate::errors::Error;
use crate::filter;
use crate::history::HistoryStore;
use crate::models::{BatchReport, RunReport, RunStatus, SourceConfig};
use crate::outputs::SinkCapability;
use crate::registry::SourceRegistry;
use crate::schedule;
use crate::window::{self, TimeWindow, WindowSpec};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Explicit per-pipeline state handed through every stage instead of
/// ambient globals: the resolved window, a tag naming this run's output
/// files, and the cooperative cancellation token.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub window: TimeWindow,
    pub run_tag: String,
    pub cancel: CancellationToken,
}

/// Options for a batch (`run-all`) invocation.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Run every valid source regardless of schedule due-ness.
    pub force: bool,
    /// Override the configured pool capacity.
    pub concurrency: Option<usize>,
    pub quiet: bool,
}

/// Orchestrates source pipelines against the shared registry, history
/// store and fetch dispatcher.
pub struct Runner {
    registry: Arc<SourceRegistry>,
    history: Arc<HistoryStore>,
    dispatcher: Arc<FetchDispatcher>,
    outputs_dir: PathBuf,
    in_flight: Mutex<HashSet<String>>,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(
        registry: Arc<SourceRegistry>,
        history: Arc<HistoryStore>,
        dispatcher: Arc<FetchDispatcher>,
    ) -> Self {
        let outputs_dir = registry.outputs_dir();
        Self {
            registry,
            history,
            dispatcher,
            outputs_dir,
            in_flight: Mutex::new(HashSet::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Token external triggers (Ctrl-C, timeouts) cancel to wind the run
    /// down.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run a single source by name.
    pub async fn run_source(
        &self,
        name: &str,
        spec: &WindowSpec,
        quiet: bool,
    ) -> Result<RunReport, Error> {
        let source = self.registry.resolve(name)?.clone();
        Ok(self.run_guarded(&source, spec, quiet).await)
    }

    /// Run the due set (or, when forced, every valid source) under the
    /// bounded worker pool. Always returns a complete batch report, one
    /// entry per attempted or diagnosed source.
    pub async fn run_all(&self, spec: &WindowSpec, options: &BatchOptions) -> BatchReport {
        let mut batch = BatchReport::default();

        // Structurally invalid sources surface as per-name diagnostics
        // without touching their siblings.
        for (name, reason) in self.registry.invalid() {
            let diagnostic = Error::ConfigInvalid {
                name: name.clone(),
                reason: reason.clone(),
            };
            batch.insert(RunReport::failed(name, diagnostic.to_string()));
        }

        let now = Utc::now();
        let due: Vec<SourceConfig> = self
            .registry
            .sources()
            .iter()
            .filter(|source| {
                if options.force {
                    return true;
                }
                let last_run = self
                    .history
                    .last_run(&source.source_name)
                    .unwrap_or_default();
                schedule::due(&source.schedule, last_run, now)
            })
            .cloned()
            .collect();

        let capacity = options
            .concurrency
            .unwrap_or(self.registry.global.max_concurrency)
            .max(1);
        info!(
            due = due.len(),
            capacity,
            forced = options.force,
            "starting batch run"
        );

        let reports: Vec<RunReport> = stream::iter(due)
            .map(|source| async move {
                if self.cancel.is_cancelled() {
                    return RunReport::skipped(&source.source_name, "cancelled before start");
                }
                self.run_guarded(&source, spec, options.quiet).await
            })
            .buffer_unordered(capacity)
            .collect()
            .await;

        for report in reports {
            batch.insert(report);
        }
        batch
    }

    /// Run one pipeline under the at-most-one-per-source guard.
    async fn run_guarded(
        &self,
        source: &SourceConfig,
        spec: &WindowSpec,
        quiet: bool,
    ) -> RunReport {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, &source.source_name) else {
            warn!(source = %source.source_name, "pipeline already in flight; rejecting overlap");
            return RunReport::skipped(&source.source_name, "a pipeline is already in flight");
        };
        self.run_pipeline(source, spec, quiet).await
    }

    async fn run_pipeline(&self, source: &SourceConfig, spec: &WindowSpec, quiet: bool) -> RunReport {
        let name = source.source_name.as_str();
        let started = Instant::now();
        let mut report = RunReport::new(name);

        // Resolving: pure function of configuration and the clock, so a
        // retried invocation recomputes the identical window.
        let window = match window::resolve(spec, source, Utc::now()) {
            Ok(window) => window,
            Err(e) => {
                report.status = RunStatus::Failed;
                report.error = Some(e.to_string());
                report.elapsed = started.elapsed();
                return report;
            }
        };
        if let TimeWindow::Bounded { start, end } = window {
            if !quiet {
                info!(source = name, start = %start.to_rfc3339(), end = %end.to_rfc3339(), "using crawl window");
            }
        }
        let ctx = RunContext {
            window,
            run_tag: Utc::now().format("%Y%m%d-%H%M%S").to_string(),
            cancel: self.cancel.clone(),
        };

        // Fetching.
        let success = match self.dispatcher.execute(source, &ctx).await {
            Ok(success) => success,
            Err(failure) => {
                report.attempts = failure.attempts;
                report.status = RunStatus::Failed;
                report.error = Some(Error::from(failure).to_string());
                report.elapsed = started.elapsed();
                return report;
            }
        };
        report.attempts = success.attempts;
        report.fetched = success.records.len();

        // Filtering: synchronous, order-preserving; ledger appends for the
        // emit set happen inside.
        let classified = match filter::classify(
            success.records,
            &ctx.window,
            &self.history,
            name,
            source.enable_incremental,
        ) {
            Ok(classified) => classified,
            Err(e) => {
                report.status = RunStatus::Failed;
                report.error = Some(Error::Store(e).to_string());
                report.elapsed = started.elapsed();
                return report;
            }
        };
        report.window_filtered = classified.window_filtered.len();
        report.duplicate = classified.duplicate.len();

        // Persisting: exactly the emit set, once.
        let sink = SinkCapability::for_format(source.output_format);
        match sink
            .write(&self.outputs_dir, source, &ctx.run_tag, &classified.emit)
            .await
        {
            Ok(_) => {
                report.emitted = classified.emit.len();
                report.status = RunStatus::Success;
            }
            Err(e) => {
                // History already covers these records; they are lost to
                // the sink, not re-emitted later, and the report says so.
                report.failed = classified.emit.len();
                report.status = RunStatus::Partial;
                report.error = Some(Error::from(e).to_string());
            }
        }

        if let Err(e) = self.history.set_last_run(name, Utc::now()) {
            warn!(source = name, error = %e, "failed to record last run time");
        }

        report.elapsed = started.elapsed();
        if !quiet {
            info!(
                source = name,
                status = %report.status,
                fetched = report.fetched,
                emitted = report.emitted,
                duplicate = report.duplicate,
                window_filtered = report.window_filtered,
                failed = report.failed,
                attempts = report.attempts,
                "pipeline finished"
            );
        }
        report
    }
}

/// RAII membership in the in-flight set; dropping releases the source.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    name: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, name: &str) -> Option<Self> {
        let mut in_flight = set.lock().expect("in-flight set mutex poisoned");
        if !in_flight.insert(name.to_string()) {
            return None;
        }
        Some(Self {
            set,
            name: name.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .expect("in-flight set mutex poisoned")
            .remove(&self.name);
    }
}
