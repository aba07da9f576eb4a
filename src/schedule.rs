//! Due-ness evaluation for source schedules.
//!
//! A schedule is *due* purely as a function of (schedule spec, last-run
//! timestamp, current time). The last-run timestamp lives in the history
//! store's per-source metadata, which keeps the evaluation idempotent across
//! process restarts: re-running the evaluator with the same inputs always
//! yields the same answer.
//!
//! Cron expressions use the common 5-field crontab subset
//! (`minute hour day-of-month month day-of-week`) with `*`, `*/step`,
//! ranges and comma lists. Day-of-month and day-of-week combine with the
//! usual crontab OR rule when both are restricted.

use crate::models::{ScheduleKind, ScheduleSpec, ScheduleValue};
use chrono::{DateTime, Datelike, Duration, SecondsFormat, Timelike, Utc};

/// Upper bound on the cron scan, in minutes. An expression that has not
/// fired for four years (e.g. `0 0 31 2 *`) is treated as never due.
const CRON_SCAN_LIMIT_MINUTES: i64 = 4 * 366 * 24 * 60;

/// Validate a schedule spec at registry load time.
///
/// Returns a human-readable reason when the value does not fit the declared
/// kind, so a broken source is excluded from `run-all` with a diagnostic
/// instead of failing mid-batch.
pub fn validate(spec: &ScheduleSpec) -> Result<(), String> {
    match (spec.kind, &spec.value) {
        (ScheduleKind::Cron, Some(ScheduleValue::Text(expr))) => {
            CronExpr::parse(expr).map(|_| ())
        }
        (ScheduleKind::Cron, _) => Err("cron schedule requires a string expression".to_string()),
        (ScheduleKind::Interval, Some(ScheduleValue::Seconds(secs))) => {
            if *secs == 0 {
                Err("interval schedule requires a positive number of seconds".to_string())
            } else {
                Ok(())
            }
        }
        (ScheduleKind::Interval, _) => {
            Err("interval schedule requires a number of seconds".to_string())
        }
        (ScheduleKind::Once, None) => Ok(()),
        (ScheduleKind::Once, Some(ScheduleValue::Text(at))) => parse_instant(at).map(|_| ()),
        (ScheduleKind::Once, Some(_)) => {
            Err("once schedule expects an ISO-8601 instant or nothing".to_string())
        }
    }
}

/// Whether a source should run at `now`, given when it last ran.
///
/// Invalid specs evaluate to not-due; the registry rejects them before
/// they reach this point.
pub fn due(spec: &ScheduleSpec, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match (spec.kind, &spec.value) {
        (ScheduleKind::Once, value) => {
            if last_run.is_some() {
                return false;
            }
            match value {
                Some(ScheduleValue::Text(at)) => match parse_instant(at) {
                    Ok(at) => at <= now,
                    Err(_) => false,
                },
                _ => true,
            }
        }
        (ScheduleKind::Interval, Some(ScheduleValue::Seconds(secs))) => match last_run {
            None => true,
            Some(last) => now - last >= Duration::seconds(*secs as i64),
        },
        (ScheduleKind::Cron, Some(ScheduleValue::Text(expr))) => match CronExpr::parse(expr) {
            Ok(cron) => cron.fired_between(last_run, now),
            Err(_) => false,
        },
        _ => false,
    }
}

fn parse_instant(text: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            format!(
                "expected an ISO-8601 instant like {}: {e}",
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
            )
        })
}

/// Parsed 5-field cron expression, one membership set per field.
#[derive(Debug, Clone)]
pub struct CronExpr {
    minutes: Vec<bool>,
    hours: Vec<bool>,
    days_of_month: Vec<bool>,
    months: Vec<bool>,
    days_of_week: Vec<bool>,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self, String> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format!(
                "cron expression needs 5 fields (minute hour dom month dow), got {}",
                fields.len()
            ));
        }
        let minutes = parse_field(fields[0], 0, 59)?;
        let hours = parse_field(fields[1], 0, 23)?;
        let days_of_month = parse_field(fields[2], 1, 31)?;
        let months = parse_field(fields[3], 1, 12)?;
        let days_of_week = parse_field(fields[4], 0, 7)?;
        Ok(Self {
            minutes,
            hours,
            dom_restricted: fields[2] != "*",
            dow_restricted: fields[4] != "*",
            days_of_month,
            months,
            days_of_week,
        })
    }

    /// Whether the expression matches the given instant at minute
    /// resolution.
    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        if !self.minutes[t.minute() as usize]
            || !self.hours[t.hour() as usize]
            || !self.months[t.month() as usize - 1]
        {
            return false;
        }
        let dom_ok = self.days_of_month[t.day() as usize - 1];
        // Sunday is 0, with 7 accepted as an alias.
        let dow = t.weekday().num_days_from_sunday() as usize;
        let dow_ok = self.days_of_week[dow] || (dow == 0 && self.days_of_week[7]);
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom_ok || dow_ok,
            (true, false) => dom_ok,
            (false, true) => dow_ok,
            (false, false) => true,
        }
    }

    /// Whether some fire instant lies in `(last_run, now]`. A never-run
    /// source is due when the current minute matches.
    fn fired_between(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(last) = last_run else {
            return self.matches(now);
        };
        let mut probe = truncate_to_minute(last) + Duration::minutes(1);
        let mut scanned = 0i64;
        while probe <= now && scanned < CRON_SCAN_LIMIT_MINUTES {
            if self.matches(probe) {
                return true;
            }
            probe = probe + Duration::minutes(1);
            scanned += 1;
        }
        false
    }
}

fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t - Duration::seconds(t.second() as i64)
        - Duration::nanoseconds(t.timestamp_subsec_nanos() as i64)
}

fn parse_field(field: &str, min: u32, max: u32) -> Result<Vec<bool>, String> {
    let mut set = vec![false; (max - min + 1) as usize];
    for term in field.split(',') {
        let (range, step) = match term.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("bad cron step in `{term}`"))?;
                if step == 0 {
                    return Err(format!("zero cron step in `{term}`"));
                }
                (range, step)
            }
            None => (term, 1),
        };
        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let a: u32 = a.parse().map_err(|_| format!("bad cron range `{term}`"))?;
            let b: u32 = b.parse().map_err(|_| format!("bad cron range `{term}`"))?;
            (a, b)
        } else {
            let v: u32 = range
                .parse()
                .map_err(|_| format!("bad cron value `{term}`"))?;
            (v, v)
        };
        if lo < min || hi > max || lo > hi {
            return Err(format!(
                "cron value `{term}` out of range {min}-{max}"
            ));
        }
        let mut v = lo;
        while v <= hi {
            set[(v - min) as usize] = true;
            v += step;
        }
    }
    Ok(set)
}
