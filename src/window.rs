//! Time window resolution.
//!
//! Converts the command-line window options and a source's own time-range
//! policy into a concrete half-open `[start, end)` UTC interval, or an
//! unbounded window when nothing applies. Resolution is a pure function of
//! the inputs and `now`; it never consults harvest history, so recomputing
//! the window on a retry always yields the same interval.
//!
//! Precedence, highest first:
//! 1. explicit `--since` / `--until` instants
//! 2. `--window-start HH:MM` + `--window-duration`, resolved to the most
//!    recent occurrence that does not start in the future
//! 3. the source's own `time_range.relative` policy
//! 4. unbounded

use crate::errors::Error;
use crate::models::SourceConfig;
use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;

/// Resolved `[start, end)` interval, or no filtering at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    Unbounded,
    Bounded {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl TimeWindow {
    pub fn is_bounded(&self) -> bool {
        matches!(self, TimeWindow::Bounded { .. })
    }

    /// Half-open containment: `start <= t < end`. Unbounded contains
    /// everything.
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        match self {
            TimeWindow::Unbounded => true,
            TimeWindow::Bounded { start, end } => *start <= t && t < *end,
        }
    }
}

/// Window options as they arrive from the command line, parsed and
/// validated but not yet resolved against a source or a clock.
#[derive(Debug, Clone, Default)]
pub struct WindowSpec {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub window_start: Option<NaiveTime>,
    pub window_duration: Option<Duration>,
}

impl WindowSpec {
    /// Parse and cross-validate the raw option strings.
    pub fn from_cli(
        since: Option<&str>,
        until: Option<&str>,
        window_start: Option<&str>,
        window_duration: Option<&str>,
    ) -> Result<Self, Error> {
        let spec = WindowSpec {
            since: since.map(|s| parse_instant(s, "--since")).transpose()?,
            until: until.map(|s| parse_instant(s, "--until")).transpose()?,
            window_start: window_start
                .map(|s| parse_time_of_day(s, "--window-start"))
                .transpose()?,
            window_duration: window_duration
                .map(|s| parse_duration_spec(s, "--window-duration"))
                .transpose()?,
        };
        if spec.window_start.is_some() && (spec.since.is_some() || spec.until.is_some()) {
            return Err(Error::InvalidWindow(
                "--window-start cannot be combined with --since/--until".to_string(),
            ));
        }
        if spec.window_duration.is_some()
            && spec.window_start.is_none()
            && spec.since.is_none()
            && spec.until.is_none()
        {
            return Err(Error::InvalidWindow(
                "--window-duration needs --since/--until or --window-start".to_string(),
            ));
        }
        Ok(spec)
    }
}

/// Resolve the effective window for one source at `now`.
pub fn resolve(
    spec: &WindowSpec,
    source: &SourceConfig,
    now: DateTime<Utc>,
) -> Result<TimeWindow, Error> {
    // Recurring daily window: anchor today's occurrence and step back one
    // day if it has not started yet. A duration over 24h simply spans
    // multiple calendar days from the anchor.
    if let Some(start_time) = spec.window_start {
        let duration = spec.window_duration.unwrap_or(Duration::hours(24));
        let mut anchor = Utc
            .from_utc_datetime(&NaiveDateTime::new(now.date_naive(), start_time));
        if anchor > now {
            anchor -= Duration::days(1);
        }
        return bounded(anchor, anchor + duration);
    }

    if spec.since.is_some() || spec.until.is_some() {
        let until = spec.until.unwrap_or(now);
        let since = match spec.since {
            Some(since) => since,
            None => until - spec.window_duration.unwrap_or(Duration::hours(24)),
        };
        let until = match (spec.until, spec.window_duration) {
            (None, Some(duration)) => since + duration,
            _ => until,
        };
        return bounded(since, until);
    }

    if let Some(policy) = &source.time_range {
        let duration = policy.relative.duration();
        return bounded(now - duration, now);
    }

    Ok(TimeWindow::Unbounded)
}

fn bounded(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<TimeWindow, Error> {
    if end <= start {
        return Err(Error::InvalidWindow(format!(
            "window end {} must be later than start {}",
            end.to_rfc3339(),
            start.to_rfc3339()
        )));
    }
    Ok(TimeWindow::Bounded { start, end })
}

/// Parse an ISO-8601 instant. A trailing `Z`, an explicit offset, or a naive
/// timestamp (taken as UTC) are all accepted.
pub fn parse_instant(text: &str, option_name: &str) -> Result<DateTime<Utc>, Error> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::InvalidWindow(format!("{option_name} is empty")));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(Error::InvalidWindow(format!(
        "{option_name} expects an ISO-8601 timestamp such as 2025-10-15T02:00+08:00, got `{text}`"
    )))
}

fn parse_time_of_day(text: &str, option_name: &str) -> Result<NaiveTime, Error> {
    let text = text.trim();
    for fmt in ["%H:%M", "%H:%M:%S"] {
        if let Ok(t) = NaiveTime::parse_from_str(text, fmt) {
            return Ok(t);
        }
    }
    Err(Error::InvalidWindow(format!(
        "{option_name} expects HH:MM or HH:MM:SS, got `{text}`"
    )))
}

static DURATION_TERM: OnceCell<Regex> = OnceCell::new();

/// Parse a window span: a bare integer means hours, otherwise concatenated
/// `<n>[smhd]` terms such as `90m`, `36h` or `1d6h`.
pub fn parse_duration_spec(text: &str, option_name: &str) -> Result<Duration, Error> {
    let spec = text.trim().to_ascii_lowercase();
    if spec.is_empty() {
        return Err(Error::InvalidWindow(format!("{option_name} is empty")));
    }
    if spec.chars().all(|c| c.is_ascii_digit()) {
        let hours: i64 = spec
            .parse()
            .map_err(|_| Error::InvalidWindow(format!("{option_name}: `{text}` out of range")))?;
        if hours <= 0 {
            return Err(Error::InvalidWindow(format!(
                "{option_name} must be greater than zero"
            )));
        }
        return Ok(Duration::hours(hours));
    }

    let re = DURATION_TERM.get_or_init(|| Regex::new(r"(\d+)([smhd])").unwrap());
    let mut total = Duration::zero();
    let mut consumed = 0;
    for caps in re.captures_iter(&spec) {
        let whole = caps.get(0).unwrap();
        if whole.start() != consumed {
            return Err(Error::InvalidWindow(format!(
                "{option_name}: unsupported span `{text}`"
            )));
        }
        consumed = whole.end();
        let magnitude: i64 = caps[1]
            .parse()
            .map_err(|_| Error::InvalidWindow(format!("{option_name}: `{text}` out of range")))?;
        total = total
            + match &caps[2] {
                "s" => Duration::seconds(magnitude),
                "m" => Duration::minutes(magnitude),
                "h" => Duration::hours(magnitude),
                _ => Duration::days(magnitude),
            };
    }
    if consumed != spec.len() || total <= Duration::zero() {
        return Err(Error::InvalidWindow(format!(
            "{option_name}: unsupported span `{text}`"
        )));
    }
    Ok(total)
}
