//! JSON-lines rendering: one serialized record per line, append-friendly
//! and greppable.

use crate::errors::SinkError;
use crate::models::RawRecord;

pub fn render(records: &[RawRecord]) -> Result<String, SinkError> {
    let mut body = String::new();
    for record in records {
        body.push_str(&serde_json::to_string(record)?);
        body.push('\n');
    }
    Ok(body)
}
