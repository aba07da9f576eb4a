//! Source registry: loads and validates source definitions.
//!
//! Sources live as one YAML file each under the sources directory; the
//! global configuration is a single `global.yaml` created with defaults on
//! first run. Files that fail to parse or validate are *excluded* from the
//! registry but remembered with their reason, so `run-all` can report them
//! by name while every healthy source still runs.

use crate::errors::Error;
use crate::models::{GlobalConfig, SourceConfig};
use crate::schedule;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const GLOBAL_CONFIG_FILENAME: &str = "global.yaml";

/// In-memory registry of validated sources plus diagnostics for the
/// invalid ones. Read-only during a run.
#[derive(Debug)]
pub struct SourceRegistry {
    pub global: GlobalConfig,
    data_dir: PathBuf,
    sources: Vec<SourceConfig>,
    index: HashMap<String, usize>,
    invalid: BTreeMap<String, String>,
}

impl SourceRegistry {
    /// Load the registry from a data directory, creating the directory
    /// skeleton and a default `global.yaml` when absent.
    ///
    /// I/O failures here are process-fatal; individual bad source files
    /// are not.
    pub fn load(data_dir: &Path) -> Result<Self, Error> {
        fs::create_dir_all(data_dir)?;
        let global = load_or_init_global(data_dir)?;
        let sources_dir = data_dir.join(&global.sources_dir);
        fs::create_dir_all(&sources_dir)?;

        let mut paths: Vec<PathBuf> = fs::read_dir(&sources_dir)?
            .filter_map(|d| d.ok().map(|d| d.path()))
            .filter(|p| {
                p.is_file()
                    && matches!(
                        p.extension().and_then(|e| e.to_str()),
                        Some("yaml") | Some("yml")
                    )
            })
            .collect();
        paths.sort();

        let mut registry = Self {
            global,
            data_dir: data_dir.to_path_buf(),
            sources: Vec::new(),
            index: HashMap::new(),
            invalid: BTreeMap::new(),
        };

        for path in paths {
            let label = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("source")
                .to_string();
            match load_source_file(&path) {
                Ok(cfg) => {
                    if registry.index.contains_key(&cfg.source_name) {
                        registry.invalid.insert(
                            label,
                            format!("duplicate source_name `{}`", cfg.source_name),
                        );
                        continue;
                    }
                    registry
                        .index
                        .insert(cfg.source_name.clone(), registry.sources.len());
                    registry.sources.push(cfg);
                }
                Err(reason) => {
                    warn!(file = %path.display(), %reason, "excluding invalid source definition");
                    registry.invalid.insert(label, reason);
                }
            }
        }

        info!(
            sources = registry.sources.len(),
            invalid = registry.invalid.len(),
            "source registry loaded"
        );
        Ok(registry)
    }

    /// Look a source up by its name.
    pub fn resolve(&self, name: &str) -> Result<&SourceConfig, Error> {
        self.index
            .get(name)
            .map(|&i| &self.sources[i])
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Every valid source name, in definition (file) order.
    pub fn all_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.source_name.clone()).collect()
    }

    /// Every valid source, in definition order.
    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }

    /// Diagnostics for files that failed load-time validation, keyed by
    /// file stem.
    pub fn invalid(&self) -> &BTreeMap<String, String> {
        &self.invalid
    }

    pub fn history_dir(&self) -> PathBuf {
        self.data_dir.join(&self.global.history_dir)
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.data_dir.join(&self.global.outputs_dir)
    }
}

fn load_or_init_global(data_dir: &Path) -> Result<GlobalConfig, io::Error> {
    let path = data_dir.join(GLOBAL_CONFIG_FILENAME);
    if path.exists() {
        let raw = fs::read_to_string(&path)?;
        serde_yaml::from_str(&raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{}: {e}", path.display())))
    } else {
        let global = GlobalConfig::default();
        let raw = serde_yaml::to_string(&global)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&path, raw)?;
        info!(path = %path.display(), "wrote default global configuration");
        Ok(global)
    }
}

fn load_source_file(path: &Path) -> Result<SourceConfig, String> {
    let raw = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let cfg: SourceConfig = serde_yaml::from_str(&raw).map_err(|e| e.to_string())?;
    validate_source(&cfg)?;
    Ok(cfg)
}

fn validate_source(cfg: &SourceConfig) -> Result<(), String> {
    if cfg.source_name.trim().is_empty() {
        return Err("source_name cannot be empty".to_string());
    }
    if cfg.target_url.trim().is_empty() {
        return Err("target_url cannot be empty".to_string());
    }
    url::Url::parse(&cfg.target_url).map_err(|e| format!("target_url: {e}"))?;
    if cfg.entry_pattern.trim().is_empty() {
        return Err("entry_pattern cannot be empty".to_string());
    }
    schedule::validate(&cfg.schedule).map_err(|reason| format!("schedule: {reason}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScheduleKind;
    use std::fs;

    fn write_source(dir: &Path, file: &str, yaml: &str) {
        fs::create_dir_all(dir.join("sources")).unwrap();
        fs::write(dir.join("sources").join(file), yaml).unwrap();
    }

    const GOOD: &str = r#"
source_name: Odaily News
site_type: news
target_url: https://www.odaily.news/
entry_pattern: "ul.list li a"
schedule:
  type: interval
  value: 900
"#;

    #[test]
    fn test_load_creates_default_global() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SourceRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.global.max_concurrency, 8);
        assert!(dir.path().join("global.yaml").is_file());
        assert!(registry.all_names().is_empty());
    }

    #[test]
    fn test_resolve_and_all_names() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), "odaily.yaml", GOOD);
        let registry = SourceRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.all_names(), vec!["Odaily News".to_string()]);
        let cfg = registry.resolve("Odaily News").unwrap();
        assert_eq!(cfg.schedule.kind, ScheduleKind::Interval);
    }

    #[test]
    fn test_unknown_name_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SourceRegistry::load(dir.path()).unwrap();
        assert!(matches!(
            registry.resolve("nope"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_invalid_file_is_excluded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), "good.yaml", GOOD);
        write_source(
            dir.path(),
            "broken.yaml",
            "source_name: Broken\nsite_type: news\ntarget_url: not a url\nentry_pattern: a\n",
        );
        let registry = SourceRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.all_names(), vec!["Odaily News".to_string()]);
        assert!(registry.invalid().contains_key("broken"));
    }

    #[test]
    fn test_bad_cron_expression_is_excluded() {
        let dir = tempfile::tempdir().unwrap();
        write_source(
            dir.path(),
            "cronbad.yaml",
            r#"
source_name: Cron Bad
site_type: news
target_url: https://example.com/
entry_pattern: a
schedule:
  type: cron
  value: "not cron"
"#,
        );
        let registry = SourceRegistry::load(dir.path()).unwrap();
        assert!(registry.all_names().is_empty());
        let reason = registry.invalid().get("cronbad").unwrap();
        assert!(reason.contains("schedule"));
    }

    #[test]
    fn test_duplicate_source_name_keeps_first() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), "a.yaml", GOOD);
        write_source(dir.path(), "b.yaml", GOOD);
        let registry = SourceRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.all_names().len(), 1);
        assert!(registry.invalid().contains_key("b"));
    }
}
