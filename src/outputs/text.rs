//! Human-readable text rendering: numbered blocks separated by blank
//! lines, with timestamps and the source link when present.

use crate::models::RawRecord;

pub fn render(records: &[RawRecord]) -> String {
    let mut body = String::new();
    for (index, record) in records.iter().enumerate() {
        let mut lines = vec![format!("{}. {}", index + 1, record.title)];
        if let Some(published) = record.published_at {
            lines.push(format!("published: {}", published.to_rfc3339()));
        }
        lines.push(format!("fetched: {}", record.fetched_at.to_rfc3339()));
        if !record.content.is_empty() {
            lines.push(record.content.clone());
        }
        lines.push(format!("link: {}", record.url));
        body.push_str(&lines.join("\n"));
        body.push_str("\n\n");
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_blocks_are_numbered_and_separated() {
        let record = |title: &str| RawRecord {
            url: format!("https://example.com/{title}"),
            title: title.to_string(),
            published_at: Some(Utc.with_ymd_and_hms(2025, 10, 15, 6, 0, 0).unwrap()),
            content: "body".to_string(),
            extra: Default::default(),
            fetched_at: Utc.with_ymd_and_hms(2025, 10, 15, 8, 0, 0).unwrap(),
        };
        let body = render(&[record("first"), record("second")]);
        assert!(body.starts_with("1. first\n"));
        assert!(body.contains("\n\n2. second\n"));
        assert!(body.contains("link: https://example.com/first"));
        assert!(body.contains("published: 2025-10-15T06:00:00+00:00"));
    }

    #[test]
    fn test_missing_published_line_is_omitted() {
        let record = RawRecord {
            url: "https://example.com/x".to_string(),
            title: "x".to_string(),
            published_at: None,
            content: String::new(),
            extra: Default::default(),
            fetched_at: Utc.with_ymd_and_hms(2025, 10, 15, 8, 0, 0).unwrap(),
        };
        let body = render(&[record]);
        assert!(!body.contains("published:"));
        assert!(body.contains("fetched:"));
    }
}
