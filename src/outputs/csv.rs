//! CSV rendering with the fixed record columns.
//!
//! Extraction extras vary per source, so they are folded into one JSON
//! column instead of exploding the header.

use crate::models::RawRecord;

const COLUMNS: [&str; 6] = ["url", "title", "published_at", "fetched_at", "content", "extra"];

pub fn render(records: &[RawRecord]) -> String {
    let mut body = String::new();
    body.push_str(&COLUMNS.join(","));
    body.push('\n');
    for record in records {
        let extra = if record.extra.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&record.extra).unwrap_or_default()
        };
        let published = record
            .published_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        let fetched = record.fetched_at.to_rfc3339();
        let row = [
            record.url.as_str(),
            record.title.as_str(),
            published.as_str(),
            fetched.as_str(),
            record.content.as_str(),
            extra.as_str(),
        ]
        .map(escape)
        .join(",");
        body.push_str(&row);
        body.push('\n');
    }
    body
}

fn escape(field: &str) -> String {
    if field.contains(['"', ',', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_header_once_and_fields_escaped() {
        let record = RawRecord {
            url: "https://example.com/1".to_string(),
            title: "Hello, \"World\"".to_string(),
            published_at: None,
            content: "multi\nline".to_string(),
            extra: Default::default(),
            fetched_at: Utc.with_ymd_and_hms(2025, 10, 15, 8, 0, 0).unwrap(),
        };
        let body = render(&[record.clone(), record]);
        let lines: Vec<&str> = body.split('\n').collect();
        assert_eq!(lines[0], "url,title,published_at,fetched_at,content,extra");
        assert!(lines[1].contains("\"Hello, \"\"World\"\"\""));
        assert!(lines[1].contains("\"multi\nline\"") || body.matches("multi\nline").count() == 2);
    }

    #[test]
    fn test_plain_fields_unquoted() {
        let record = RawRecord {
            url: "https://example.com/1".to_string(),
            title: "plain".to_string(),
            published_at: None,
            content: "simple".to_string(),
            extra: Default::default(),
            fetched_at: Utc.with_ymd_and_hms(2025, 10, 15, 8, 0, 0).unwrap(),
        };
        let body = render(&[record]);
        assert!(body.contains("https://example.com/1,plain,,"));
    }
}
