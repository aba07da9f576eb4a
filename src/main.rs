//! # News Harvester
//!
//! A schedule-driven harvester for independently configured news and
//! social sources. Each source declares its own cadence (cron, interval or
//! one-shot), extraction rules, output format and retention window; the
//! harvester decides when each source runs, how many run at once, which
//! previously seen records to suppress, and which time window an
//! invocation honors.
//!
//! ## Usage
//!
//! ```sh
//! news_harvester run-all                       # run whatever is due
//! news_harvester run odaily --since 2025-10-15T00:00Z
//! news_harvester reset odaily                  # forget dedup history
//! ```
//!
//! ## Architecture
//!
//! Each source run is one pipeline:
//! 1. **Resolve**: compute the effective `[start, end)` window
//! 2. **Fetch**: dispatch the fetch/extract capability under the retry envelope
//! 3. **Filter**: classify records as emit / window-filtered / duplicate
//! 4. **Persist**: hand exactly the emit set to the configured sink
//!
//! `run-all` drives due pipelines through a bounded worker pool and
//! aggregates per-source reports into a batch report keyed by name.

use clap::Parser;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod dispatch;
mod errors;
mod fetch;
mod filter;
mod history;
mod models;
mod outputs;
mod registry;
mod runner;
mod schedule;
mod utils;
mod window;

use cli::{Cli, Command, WindowArgs};
use dispatch::FetchDispatcher;
use fetch::{FetchCapability, http::HttpFetcher};
use history::HistoryStore;
use models::{BatchReport, RunReport, RunStatus};
use registry::SourceRegistry;
use runner::{BatchOptions, Runner};
use window::WindowSpec;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();

    // --- Tracing init ---
    let default_level = if args.verbose {
        "debug"
    } else if args.quiet() {
        "warn"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    debug!(?args.data_dir, "parsed CLI arguments");

    // --- Shared state: registry, history store, dispatcher ---
    let data_dir = Path::new(&args.data_dir);
    let registry = Arc::new(SourceRegistry::load(data_dir)?);
    let history = Arc::new(HistoryStore::open(&registry.history_dir())?);
    utils::ensure_writable_dir(&registry.outputs_dir()).await?;

    let fetcher = HttpFetcher::new(&registry.global);
    let dispatcher = Arc::new(FetchDispatcher::new(
        FetchCapability::Http(fetcher),
        Duration::from_secs(registry.global.fetch_timeout_secs),
    ));
    let runner = Runner::new(Arc::clone(&registry), Arc::clone(&history), dispatcher);

    // Ctrl-C stops dispatching new sources; in-flight pipelines stop at
    // their next checkpoint.
    let cancel = runner.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; winding the run down");
            cancel.cancel();
        }
    });

    let failed = match args.command {
        Command::Run { ref name, ref window, quiet } => {
            let spec = window_spec(window)?;
            let report = runner.run_source(name, &spec, quiet).await?;
            print_report(&report);
            matches!(report.status, RunStatus::Failed | RunStatus::Partial)
        }
        Command::RunAll {
            force,
            concurrency,
            ref window,
            quiet,
        } => {
            let spec = window_spec(window)?;
            let batch = runner
                .run_all(&spec, &BatchOptions { force, concurrency, quiet })
                .await;
            print_batch(&batch);
            batch.has_failures()
        }
        Command::List => {
            list_sources(&registry, &history);
            false
        }
        Command::History { ref name, limit } => {
            registry.resolve(name)?;
            let entries = history.recent(name, limit)?;
            if entries.is_empty() {
                println!("no history recorded for `{name}`");
            } else {
                println!("{name}: last {} entries", entries.len());
                for entry in entries {
                    println!(
                        "  {}  {}",
                        entry.observed_at.to_rfc3339(),
                        entry.fingerprint
                    );
                }
            }
            false
        }
        Command::Reset { ref name } => {
            registry.resolve(name)?;
            history.reset(name)?;
            println!("history cleared for `{name}`");
            false
        }
        Command::ResetAll => {
            history.reset_all()?;
            let removed = outputs::clear_outputs(&registry.outputs_dir()).await?;
            println!(
                "cleared history for all sources and removed {removed} output item(s)"
            );
            false
        }
    };

    let elapsed = start_time.elapsed();
    info!(?elapsed, "execution complete");

    if failed {
        error!("one or more sources did not complete cleanly");
        std::process::exit(1);
    }
    Ok(())
}

fn window_spec(args: &WindowArgs) -> Result<WindowSpec, errors::Error> {
    WindowSpec::from_cli(
        args.since.as_deref(),
        args.until.as_deref(),
        args.window_start.as_deref(),
        args.window_duration.as_deref(),
    )
}

fn print_report(report: &RunReport) {
    let mut line = format!(
        "{} -> {}: fetched {}, emitted {}, duplicates {}, window-filtered {}, failed {} ({} attempt(s), {:.1?})",
        report.source_name,
        report.status,
        report.fetched,
        report.emitted,
        report.duplicate,
        report.window_filtered,
        report.failed,
        report.attempts,
        report.elapsed,
    );
    if let Some(error) = &report.error {
        line.push_str(&format!(": {error}"));
    }
    println!("{line}");
}

fn print_batch(batch: &BatchReport) {
    for report in batch.reports.values() {
        print_report(report);
    }
    let totals = batch.totals();
    println!(
        "total ({} source(s)): fetched {}, emitted {}, duplicates {}, window-filtered {}, failed {}",
        batch.reports.len(),
        totals.fetched,
        totals.emitted,
        totals.duplicate,
        totals.window_filtered,
        totals.failed,
    );
}

fn list_sources(registry: &SourceRegistry, history: &HistoryStore) {
    if registry.all_names().is_empty() && registry.invalid().is_empty() {
        println!("no sources configured; add YAML files under the sources directory");
        return;
    }
    for source in registry.sources() {
        let schedule = match (&source.schedule.kind, &source.schedule.value) {
            (kind, Some(models::ScheduleValue::Text(text))) => format!("{kind} ({text})"),
            (kind, Some(models::ScheduleValue::Seconds(secs))) => format!("{kind} ({secs}s)"),
            (kind, None) => kind.to_string(),
        };
        let last_run = history
            .last_run(&source.source_name)
            .ok()
            .flatten()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        let entries = history.len(&source.source_name).unwrap_or(0);
        println!(
            "{}  [{schedule}]  format={:?}  incremental={}  history={entries}  last-run={last_run}",
            source.source_name,
            source.output_format,
            source.enable_incremental,
        );
    }
    for (name, reason) in registry.invalid() {
        println!("{name}  [excluded: {reason}]");
    }
}
