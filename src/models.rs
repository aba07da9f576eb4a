//! Data models for source definitions, harvested records and run reports.
//!
//! This module defines the core data structures used throughout the
//! application:
//! - [`SourceConfig`]: one configured source (schedule, extraction rules,
//!   anti-scraping parameters, incremental flag)
//! - [`GlobalConfig`]: shared controls (worker pool capacity, directories)
//! - [`RawRecord`]: one extracted record, alive for a single pipeline run
//! - [`HistoryEntry`]: one emitted fingerprint in the per-source ledger
//! - [`RunReport`] / [`BatchReport`]: per-source and aggregate run outcomes
//!
//! Source and global configuration are YAML files; records and history
//! entries are serialized as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Supported site categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteType {
    News,
    Social,
}

/// Recognized output sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
    Txt,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Json => "jsonl",
            OutputFormat::Csv => "csv",
            OutputFormat::Txt => "txt",
        }
    }
}

/// Scheduler modes a source may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Cron,
    Interval,
    #[default]
    Once,
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleKind::Cron => write!(f, "cron"),
            ScheduleKind::Interval => write!(f, "interval"),
            ScheduleKind::Once => write!(f, "once"),
        }
    }
}

/// Schedule payload: a cron expression, interval seconds, or an ISO-8601
/// instant for `once` schedules. Shape is validated at registry load time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleValue {
    Seconds(u64),
    Text(String),
}

/// Configuration describing when a source should run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleSpec {
    #[serde(rename = "type", default)]
    pub kind: ScheduleKind,
    #[serde(default)]
    pub value: Option<ScheduleValue>,
}

/// Relative time-range policy a source may declare for itself; used when no
/// explicit window is given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelativeRange {
    #[serde(rename = "last_24_hours")]
    Last24Hours,
    #[serde(rename = "last_7_days")]
    Last7Days,
    #[serde(rename = "last_30_days")]
    Last30Days,
}

impl RelativeRange {
    pub fn duration(self) -> chrono::Duration {
        match self {
            RelativeRange::Last24Hours => chrono::Duration::hours(24),
            RelativeRange::Last7Days => chrono::Duration::days(7),
            RelativeRange::Last30Days => chrono::Duration::days(30),
        }
    }
}

/// Per-source time-range policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeRangePolicy {
    pub relative: RelativeRange,
}

/// Feature flags and parameters governing the anti-scraping envelope.
///
/// `retry_on_fail` is the number of *additional* attempts after the first;
/// `use_headless_browser` and `entry_interactions` are passed through to the
/// fetch capability verbatim and not interpreted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiScrapingStrategies {
    pub user_agent_rotation: bool,
    pub retry_on_fail: u32,
    pub use_headless_browser: bool,
    pub page_timeout_ms: u64,
}

impl Default for AntiScrapingStrategies {
    fn default() -> Self {
        Self {
            user_agent_rotation: false,
            retry_on_fail: 0,
            use_headless_browser: false,
            page_timeout_ms: 30_000,
        }
    }
}

/// Scripted pre-extraction actions for dynamic entry pages. Opaque to the
/// scheduler; a rendering-capable fetch capability interprets them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryInteractions {
    pub wait_selector: Option<String>,
    pub scroll_rounds: u32,
    pub scroll_pause_ms: u64,
    pub click_more_selector: Option<String>,
    pub click_more_times: u32,
}

impl EntryInteractions {
    pub fn is_empty(&self) -> bool {
        self.wait_selector.is_none()
            && self.scroll_rounds == 0
            && self.click_more_selector.is_none()
            && self.click_more_times == 0
    }
}

/// Full definition of a harvest source.
///
/// `source_name` is the sole external identifier and must be unique across
/// the registry. Extraction rules (`entry_pattern`, `detail_pattern`) are
/// opaque selector strings handed to the fetch capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source_name: String,
    pub site_type: SiteType,
    pub target_url: String,
    pub entry_pattern: String,
    #[serde(default)]
    pub detail_pattern: BTreeMap<String, String>,
    #[serde(default)]
    pub keywords_filter: Vec<String>,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub schedule: ScheduleSpec,
    #[serde(default)]
    pub time_range: Option<TimeRangePolicy>,
    #[serde(default)]
    pub anti_scraping_strategies: AntiScrapingStrategies,
    #[serde(default = "default_true")]
    pub enable_incremental: bool,
    #[serde(default)]
    pub use_entry_content: bool,
    #[serde(default)]
    pub entry_interactions: EntryInteractions,
}

fn default_true() -> bool {
    true
}

/// Global controls shared across sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Capacity of the worker pool for `run-all`.
    pub max_concurrency: usize,
    /// Default per-attempt fetch timeout when a source does not set
    /// `page_timeout_ms`.
    pub fetch_timeout_secs: u64,
    /// Pool of User-Agent strings for sources with rotation enabled.
    pub user_agent_list: Vec<String>,
    pub sources_dir: String,
    pub history_dir: String,
    pub outputs_dir: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            fetch_timeout_secs: 20,
            user_agent_list: Vec::new(),
            sources_dir: "sources".to_string(),
            history_dir: "history".to_string(),
            outputs_dir: "outputs".to_string(),
        }
    }
}

/// One record extracted from a page. Transient: it is either promoted to an
/// emitted record or discarded within a single pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub content: String,
    /// Extraction-rule-defined fields beyond the known ones.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
    pub fetched_at: DateTime<Utc>,
}

/// One emitted fingerprint in a source's append-only history ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub fingerprint: String,
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

/// Terminal status of one source's pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// The sink failed after history entries were appended; the emitted
    /// records were not written and must be reconciled by the operator.
    Partial,
    Failed,
    /// Never started: cancelled before dispatch, or the source already had
    /// a pipeline in flight.
    Skipped,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Partial => write!(f, "partial"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Per-source run outcome: the five classification counters, attempt count,
/// elapsed time and terminal status.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub source_name: String,
    pub fetched: usize,
    pub emitted: usize,
    pub window_filtered: usize,
    pub duplicate: usize,
    pub failed: usize,
    pub attempts: u32,
    pub elapsed: Duration,
    pub status: RunStatus,
    pub error: Option<String>,
}

impl RunReport {
    pub fn new(source_name: &str) -> Self {
        Self {
            source_name: source_name.to_string(),
            fetched: 0,
            emitted: 0,
            window_filtered: 0,
            duplicate: 0,
            failed: 0,
            attempts: 0,
            elapsed: Duration::ZERO,
            status: RunStatus::Success,
            error: None,
        }
    }

    pub fn skipped(source_name: &str, reason: &str) -> Self {
        let mut report = Self::new(source_name);
        report.status = RunStatus::Skipped;
        report.error = Some(reason.to_string());
        report
    }

    pub fn failed(source_name: &str, reason: String) -> Self {
        let mut report = Self::new(source_name);
        report.status = RunStatus::Failed;
        report.error = Some(reason);
        report
    }
}

/// Summed counters across a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchTotals {
    pub fetched: usize,
    pub emitted: usize,
    pub window_filtered: usize,
    pub duplicate: usize,
    pub failed: usize,
}

/// Aggregate outcome of a `run-all` invocation, keyed by source name so the
/// report order is deterministic regardless of completion order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub reports: BTreeMap<String, RunReport>,
}

impl BatchReport {
    pub fn insert(&mut self, report: RunReport) {
        self.reports.insert(report.source_name.clone(), report);
    }

    pub fn totals(&self) -> BatchTotals {
        let mut totals = BatchTotals::default();
        for report in self.reports.values() {
            totals.fetched += report.fetched;
            totals.emitted += report.emitted;
            totals.window_filtered += report.window_filtered;
            totals.duplicate += report.duplicate;
            totals.failed += report.failed;
        }
        totals
    }

    pub fn has_failures(&self) -> bool {
        self.reports
            .values()
            .any(|r| matches!(r.status, RunStatus::Failed | RunStatus::Partial))
    }
}
