//! Per-source harvest history: the incremental dedup ledger.
//!
//! Each source owns an append-only JSON-lines file of [`HistoryEntry`]
//! values plus a small metadata file carrying the last successful run
//! timestamp (used by schedule evaluation across process restarts):
//!
//! ```text
//! history_dir/
//! ├── odaily-news.jsonl       # one HistoryEntry per line, append-only
//! └── odaily-news.meta.json   # { "last_run": "..." }
//! ```
//!
//! The store is shared across concurrent pipelines but partitioned by
//! source name; the scheduler guarantees at most one pipeline per source,
//! so a single store-level mutex around the in-memory index is all the
//! locking required. Entries are never mutated; they are removed only by
//! `reset` / `reset-all`.

use crate::models::HistoryEntry;
use crate::utils::slugify;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
struct SourceMeta {
    last_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct SourceHistory {
    fingerprints: HashSet<String>,
    entries: Vec<HistoryEntry>,
    meta: SourceMeta,
}

/// Append-only fingerprint ledger, keyed by source name.
#[derive(Debug)]
pub struct HistoryStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, SourceHistory>>,
}

impl HistoryStore {
    /// Open (and create if needed) the history directory. Failing here is
    /// process-fatal for the caller: without history there is no dedup.
    pub fn open(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn ledger_path(&self, source_name: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", slugify(source_name)))
    }

    fn meta_path(&self, source_name: &str) -> PathBuf {
        self.dir.join(format!("{}.meta.json", slugify(source_name)))
    }

    /// Whether this source's ledger already holds the fingerprint.
    pub fn contains(&self, source_name: &str, fingerprint: &str) -> io::Result<bool> {
        let mut cache = self.lock();
        let state = self.loaded(&mut cache, source_name)?;
        Ok(state.fingerprints.contains(fingerprint))
    }

    /// Append an entry unless its fingerprint is already present.
    ///
    /// Returns `true` when the entry was written. The line is flushed
    /// before returning so the ledger is ahead of (never behind) whatever
    /// the output sink subsequently does with the record.
    pub fn append(&self, source_name: &str, entry: HistoryEntry) -> io::Result<bool> {
        let mut cache = self.lock();
        let state = self.loaded(&mut cache, source_name)?;
        if state.fingerprints.contains(&entry.fingerprint) {
            return Ok(false);
        }
        let line = serde_json::to_string(&entry)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let path = self.ledger_path(source_name);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{line}")?;
        file.flush()?;
        state.fingerprints.insert(entry.fingerprint.clone());
        state.entries.push(entry);
        Ok(true)
    }

    /// The most recent `limit` entries, newest first.
    pub fn recent(&self, source_name: &str, limit: usize) -> io::Result<Vec<HistoryEntry>> {
        let mut cache = self.lock();
        let state = self.loaded(&mut cache, source_name)?;
        Ok(state.entries.iter().rev().take(limit).cloned().collect())
    }

    /// Number of ledger entries for a source.
    pub fn len(&self, source_name: &str) -> io::Result<usize> {
        let mut cache = self.lock();
        let state = self.loaded(&mut cache, source_name)?;
        Ok(state.entries.len())
    }

    pub fn last_run(&self, source_name: &str) -> io::Result<Option<DateTime<Utc>>> {
        let mut cache = self.lock();
        let state = self.loaded(&mut cache, source_name)?;
        Ok(state.meta.last_run)
    }

    pub fn set_last_run(&self, source_name: &str, at: DateTime<Utc>) -> io::Result<()> {
        let mut cache = self.lock();
        let state = self.loaded(&mut cache, source_name)?;
        state.meta.last_run = Some(at);
        let json = serde_json::to_string(&state.meta)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(self.meta_path(source_name), json)
    }

    /// Clear one source's ledger and metadata. Other sources are untouched.
    pub fn reset(&self, source_name: &str) -> io::Result<()> {
        let mut cache = self.lock();
        cache.remove(source_name);
        for path in [self.ledger_path(source_name), self.meta_path(source_name)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        debug!(source = source_name, "history reset");
        Ok(())
    }

    /// Clear every ledger and metadata file in the history directory.
    pub fn reset_all(&self) -> io::Result<()> {
        let mut cache = self.lock();
        cache.clear();
        for dirent in fs::read_dir(&self.dir)? {
            let path = dirent?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.ends_with(".jsonl") || name.ends_with(".meta.json") {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SourceHistory>> {
        self.cache.lock().expect("history cache mutex poisoned")
    }

    /// Load a source's ledger and metadata into the cache on first touch.
    fn loaded<'a>(
        &self,
        cache: &'a mut HashMap<String, SourceHistory>,
        source_name: &str,
    ) -> io::Result<&'a mut SourceHistory> {
        if !cache.contains_key(source_name) {
            let mut state = SourceHistory::default();
            let ledger = self.ledger_path(source_name);
            if ledger.exists() {
                let reader = BufReader::new(fs::File::open(&ledger)?);
                for line in reader.lines() {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<HistoryEntry>(&line) {
                        Ok(entry) => {
                            state.fingerprints.insert(entry.fingerprint.clone());
                            state.entries.push(entry);
                        }
                        Err(e) => {
                            // A torn tail line from a crash mid-append is
                            // tolerated; anything else is worth a warning.
                            warn!(
                                source = source_name,
                                error = %e,
                                "skipping unreadable history line"
                            );
                        }
                    }
                }
            }
            let meta_path = self.meta_path(source_name);
            if meta_path.exists() {
                let raw = fs::read_to_string(&meta_path)?;
                state.meta = serde_json::from_str(&raw).unwrap_or_default();
            }
            cache.insert(source_name.to_string(), state);
        }
        Ok(cache.get_mut(source_name).expect("just inserted"))
    }
}
