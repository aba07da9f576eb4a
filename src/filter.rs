//! Record classification: time-window filtering and incremental dedup.
//!
//! Given the raw records of one fetch, the resolved window and the
//! source's history ledger, every record lands in exactly one of three
//! buckets, in input order:
//!
//! 1. `window_filtered`: the record's own timestamp falls outside a
//!    bounded window (checked first, regardless of dedup state);
//! 2. `duplicate`: incremental dedup is on and the fingerprint is
//!    already in the ledger;
//! 3. `emit`: everything else. The fingerprint is appended to the ledger
//!    *before* the record is handed to the output sink, so a crash between
//!    append and sink-write can suppress a record on retry but can never
//!    double-enter it in history.
//!
//! A record with no timestamp at all is never excluded by a window:
//! absence of evidence is not evidence of being out of range.

use crate::models::{HistoryEntry, RawRecord};
use crate::window::TimeWindow;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::io;

/// Stable hash over a record's identity fields (URL and title).
///
/// Deliberately excludes observation time and content so the same record
/// re-extracted verbatim always maps to the same fingerprint.
pub fn fingerprint(record: &RawRecord) -> String {
    let mut hasher = Sha256::new();
    hasher.update(record.url.as_bytes());
    hasher.update(b"\n");
    hasher.update(record.title.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// The record's own timestamp: `published_at`, falling back to an
/// extraction-provided timestamp field if the extractor stashed one.
pub fn record_timestamp(record: &RawRecord) -> Option<DateTime<Utc>> {
    if let Some(at) = record.published_at {
        return Some(at);
    }
    for key in ["published_at", "timestamp", "time"] {
        if let Some(raw) = record.extra.get(key) {
            if let Some(at) = parse_loose_timestamp(raw) {
                return Some(at);
            }
        }
    }
    None
}

/// Parse the timestamp formats seen in the wild on list/detail pages.
pub fn parse_loose_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(epoch) = text.parse::<i64>() {
        // Large values are epoch milliseconds.
        let secs = if epoch > 1_000_000_000_000 { epoch / 1000 } else { epoch };
        return Utc.timestamp_opt(secs, 0).single();
    }
    for fmt in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
        "%Y/%m/%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

/// Three-way partition of one fetch's records, input order preserved
/// within each bucket.
#[derive(Debug, Default)]
pub struct Classification {
    pub emit: Vec<RawRecord>,
    pub window_filtered: Vec<RawRecord>,
    pub duplicate: Vec<RawRecord>,
}

/// Classify records against the window and the source's history ledger.
///
/// `history` is the per-source view: the scheduler guarantees no other
/// pipeline is writing this source's ledger concurrently. Appends for the
/// `emit` bucket happen here, inside classification, so by the time the
/// caller sees the result the ledger already covers every emitted record.
pub fn classify(
    records: Vec<RawRecord>,
    window: &TimeWindow,
    history: &crate::history::HistoryStore,
    source_name: &str,
    enable_incremental: bool,
) -> io::Result<Classification> {
    let mut out = Classification::default();
    for record in records {
        if window.is_bounded() {
            if let Some(at) = record_timestamp(&record) {
                if !window.contains(at) {
                    out.window_filtered.push(record);
                    continue;
                }
            }
        }
        let fp = fingerprint(&record);
        if enable_incremental && history.contains(source_name, &fp)? {
            out.duplicate.push(record);
            continue;
        }
        history.append(
            source_name,
            HistoryEntry {
                fingerprint: fp,
                observed_at: Utc::now(),
                published_at: record.published_at,
            },
        )?;
        out.emit.push(record);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryStore;
    use chrono::TimeZone;

    fn at(h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 15, h, mi, 0).unwrap()
    }

    fn record(url: &str, title: &str, published_at: Option<DateTime<Utc>>) -> RawRecord {
        RawRecord {
            url: url.to_string(),
            title: title.to_string(),
            published_at,
            content: "body".to_string(),
            extra: Default::default(),
            fetched_at: at(12, 0),
        }
    }

    fn names(records: &[RawRecord]) -> Vec<&str> {
        records.iter().map(|r| r.title.as_str()).collect()
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let r = record("https://example.com/1", "Title", None);
        assert_eq!(fingerprint(&r), fingerprint(&r));
        assert_eq!(fingerprint(&r).len(), 64);
    }

    #[test]
    fn test_fingerprint_ignores_observation_details() {
        let mut a = record("https://example.com/1", "Title", Some(at(1, 0)));
        let mut b = record("https://example.com/1", "Title", Some(at(9, 0)));
        a.content = "first extraction".to_string();
        b.content = "second extraction".to_string();
        b.fetched_at = at(23, 59);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_differs_on_identity_fields() {
        let a = record("https://example.com/1", "Title", None);
        let by_url = record("https://example.com/2", "Title", None);
        let by_title = record("https://example.com/1", "Other", None);
        assert_ne!(fingerprint(&a), fingerprint(&by_url));
        assert_ne!(fingerprint(&a), fingerprint(&by_title));
    }

    #[test]
    fn test_classify_partitions_against_history_and_window() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path()).unwrap();
        // Seed history with fingerprints for a, b and c.
        for title in ["a", "b", "c"] {
            let seed = record(&format!("https://example.com/{title}"), title, None);
            store
                .append(
                    "src",
                    HistoryEntry {
                        fingerprint: fingerprint(&seed),
                        observed_at: at(0, 0),
                        published_at: None,
                    },
                )
                .unwrap();
        }

        let window = TimeWindow::Bounded {
            start: at(2, 0),
            end: at(5, 0),
        };
        let batch = vec![
            record("https://example.com/a", "a", Some(at(3, 0))),
            record("https://example.com/b", "b", Some(at(3, 30))),
            record("https://example.com/d", "d", Some(at(4, 0))),
            record("https://example.com/e", "e", Some(at(6, 0))),
        ];
        let result = classify(batch, &window, &store, "src", true).unwrap();

        assert_eq!(names(&result.duplicate), vec!["a", "b"]);
        assert_eq!(names(&result.window_filtered), vec!["e"]);
        assert_eq!(names(&result.emit), vec!["d"]);
        assert_eq!(store.len("src").unwrap(), 4);
        let d = record("https://example.com/d", "d", None);
        assert!(store.contains("src", &fingerprint(&d)).unwrap());
    }

    #[test]
    fn test_out_of_window_beats_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path()).unwrap();
        let seen = record("https://example.com/x", "x", Some(at(6, 0)));
        store
            .append(
                "src",
                HistoryEntry {
                    fingerprint: fingerprint(&seen),
                    observed_at: at(0, 0),
                    published_at: None,
                },
            )
            .unwrap();

        let window = TimeWindow::Bounded {
            start: at(2, 0),
            end: at(5, 0),
        };
        let result = classify(vec![seen], &window, &store, "src", true).unwrap();
        assert_eq!(result.window_filtered.len(), 1);
        assert!(result.duplicate.is_empty());
    }

    #[test]
    fn test_rerun_of_identical_batch_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path()).unwrap();
        let batch = || {
            vec![
                record("https://example.com/1", "one", Some(at(3, 0))),
                record("https://example.com/2", "two", Some(at(3, 30))),
            ]
        };
        let first = classify(batch(), &TimeWindow::Unbounded, &store, "src", true).unwrap();
        assert_eq!(first.emit.len(), 2);
        let second = classify(batch(), &TimeWindow::Unbounded, &store, "src", true).unwrap();
        assert!(second.emit.is_empty());
        assert_eq!(second.duplicate.len(), 2);
        assert_eq!(store.len("src").unwrap(), 2);
    }

    #[test]
    fn test_reset_makes_records_emit_again() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path()).unwrap();
        let batch = || vec![record("https://example.com/1", "one", None)];
        classify(batch(), &TimeWindow::Unbounded, &store, "src", true).unwrap();
        store.reset("src").unwrap();
        let again = classify(batch(), &TimeWindow::Unbounded, &store, "src", true).unwrap();
        assert_eq!(again.emit.len(), 1);
    }

    #[test]
    fn test_missing_timestamp_is_conservatively_emitted() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path()).unwrap();
        let window = TimeWindow::Bounded {
            start: at(2, 0),
            end: at(5, 0),
        };
        let result = classify(
            vec![record("https://example.com/1", "no-time", None)],
            &window,
            &store,
            "src",
            true,
        )
        .unwrap();
        assert_eq!(result.emit.len(), 1);
        assert!(result.window_filtered.is_empty());
    }

    #[test]
    fn test_incremental_off_still_keeps_ledger_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path()).unwrap();
        let batch = || vec![record("https://example.com/1", "one", None)];
        classify(batch(), &TimeWindow::Unbounded, &store, "src", false).unwrap();
        let second = classify(batch(), &TimeWindow::Unbounded, &store, "src", false).unwrap();
        // No dedup: the record is emitted again, but the ledger never
        // grows a duplicate fingerprint.
        assert_eq!(second.emit.len(), 1);
        assert_eq!(store.len("src").unwrap(), 1);
    }

    #[test]
    fn test_offset_window_filters_late_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path()).unwrap();
        let src = crate::models::SourceConfig {
            source_name: "src".to_string(),
            site_type: crate::models::SiteType::News,
            target_url: "https://example.com/".to_string(),
            entry_pattern: "a".to_string(),
            detail_pattern: Default::default(),
            keywords_filter: Vec::new(),
            output_format: Default::default(),
            schedule: Default::default(),
            time_range: None,
            anti_scraping_strategies: Default::default(),
            enable_incremental: true,
            use_entry_content: false,
            entry_interactions: Default::default(),
        };
        let spec = crate::window::WindowSpec::from_cli(
            Some("2025-10-15T02:00+08:00"),
            Some("2025-10-15T05:00+08:00"),
            None,
            None,
        )
        .unwrap();
        let window = crate::window::resolve(&spec, &src, Utc::now()).unwrap();

        let late_published = DateTime::parse_from_rfc3339("2025-10-15T06:00:00+08:00")
            .unwrap()
            .with_timezone(&Utc);
        let late = record("https://example.com/late", "late", Some(late_published));
        let result = classify(vec![late], &window, &store, "src", true).unwrap();
        assert_eq!(result.window_filtered.len(), 1);
        assert!(result.emit.is_empty());
    }

    #[test]
    fn test_extra_field_timestamp_is_honored() {
        let mut r = record("https://example.com/1", "one", None);
        r.extra
            .insert("timestamp".to_string(), "2025-10-15 06:00:00".to_string());
        assert_eq!(record_timestamp(&r), Some(at(6, 0)));

        let mut millis = record("https://example.com/2", "two", None);
        millis
            .extra
            .insert("timestamp".to_string(), "1760508000000".to_string());
        assert_eq!(
            record_timestamp(&millis),
            Some(Utc.timestamp_opt(1_760_508_000, 0).single().unwrap())
        );
    }
}
