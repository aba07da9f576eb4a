//! Output sinks for emitted records.
//!
//! A sink is selected by the source's `output_format` and invoked once per
//! completed pipeline with exactly the emit-classified records. Each run
//! writes its own file next to previous runs:
//!
//! ```text
//! outputs_dir/
//! ├── odaily-news-20251015-080312.jsonl
//! ├── odaily-news-20251016-080258.jsonl
//! └── xueqiu-20251015-080312.csv
//! ```

pub mod csv;
pub mod json;
pub mod text;

use crate::errors::SinkError;
use crate::models::{OutputFormat, RawRecord, SourceConfig};
use crate::utils::slugify;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

/// Available sink implementations, selected by configuration.
#[derive(Debug)]
pub enum SinkCapability {
    Json,
    Csv,
    Text,
}

impl SinkCapability {
    pub fn for_format(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => SinkCapability::Json,
            OutputFormat::Csv => SinkCapability::Csv,
            OutputFormat::Txt => SinkCapability::Text,
        }
    }

    /// Persist one pipeline's emitted records. Returns the file written,
    /// or `None` when there was nothing to write.
    pub async fn write(
        &self,
        outputs_dir: &Path,
        source: &SourceConfig,
        run_tag: &str,
        records: &[RawRecord],
    ) -> Result<Option<PathBuf>, SinkError> {
        if records.is_empty() {
            return Ok(None);
        }
        let body = match self {
            SinkCapability::Json => json::render(records)?,
            SinkCapability::Csv => csv::render(records),
            SinkCapability::Text => text::render(records),
        };
        let path = outputs_dir.join(format!(
            "{}-{}.{}",
            slugify(&source.source_name),
            run_tag,
            source.output_format.extension()
        ));
        fs::create_dir_all(outputs_dir)
            .await
            .map_err(|e| SinkError::Io {
                path: outputs_dir.display().to_string(),
                source: e,
            })?;
        fs::write(&path, body).await.map_err(|e| SinkError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        info!(path = %path.display(), count = records.len(), "wrote sink file");
        Ok(Some(path))
    }
}

/// Remove everything under the outputs directory. Used by `reset-all` so a
/// fresh crawl starts with clean history *and* clean outputs.
pub async fn clear_outputs(outputs_dir: &Path) -> Result<usize, std::io::Error> {
    if !outputs_dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    let mut entries = fs::read_dir(outputs_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_dir() {
            fs::remove_dir_all(&path).await?;
        } else {
            fs::remove_file(&path).await?;
        }
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SiteType;
    use chrono::{TimeZone, Utc};

    fn source(format: OutputFormat) -> SourceConfig {
        SourceConfig {
            source_name: "Odaily News".to_string(),
            site_type: SiteType::News,
            target_url: "https://example.com/".to_string(),
            entry_pattern: "a".to_string(),
            detail_pattern: Default::default(),
            keywords_filter: Vec::new(),
            output_format: format,
            schedule: Default::default(),
            time_range: None,
            anti_scraping_strategies: Default::default(),
            enable_incremental: true,
            use_entry_content: false,
            entry_interactions: Default::default(),
        }
    }

    fn record(title: &str) -> RawRecord {
        RawRecord {
            url: format!("https://example.com/{title}"),
            title: title.to_string(),
            published_at: Some(Utc.with_ymd_and_hms(2025, 10, 15, 6, 0, 0).unwrap()),
            content: "body text".to_string(),
            extra: Default::default(),
            fetched_at: Utc.with_ymd_and_hms(2025, 10, 15, 8, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_jsonl_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SinkCapability::for_format(OutputFormat::Json);
        let path = sink
            .write(dir.path(), &source(OutputFormat::Json), "20251015-080000", &[
                record("one"),
                record("two"),
            ])
            .await
            .unwrap()
            .unwrap();
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("odaily-news-"));
        let body = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: RawRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.title, "one");
    }

    #[tokio::test]
    async fn test_empty_batch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SinkCapability::for_format(OutputFormat::Json);
        let path = sink
            .write(dir.path(), &source(OutputFormat::Json), "t", &[])
            .await
            .unwrap();
        assert!(path.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_clear_outputs_counts_items() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jsonl"), "x").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        let removed = clear_outputs(dir.path()).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
