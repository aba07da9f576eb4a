//! Error taxonomy shared across the pipeline.
//!
//! Every per-source failure mode has a typed variant so the scheduler can
//! capture it into that source's run report instead of letting it cross
//! source boundaries. Only [`Error::Store`] at startup is treated as fatal
//! for the whole process.

use thiserror::Error;

/// Top-level error type for registry, window and pipeline operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A source definition failed load-time validation. Skips that source
    /// only; `run-all` proceeds with its siblings.
    #[error("invalid source configuration `{name}`: {reason}")]
    ConfigInvalid { name: String, reason: String },

    /// No source with the given name exists in the registry.
    #[error("unknown source `{0}`")]
    NotFound(String),

    /// Nonsensical time bounds; fails the invocation before any fetch.
    #[error("invalid time window: {0}")]
    InvalidWindow(String),

    /// Fetch dispatch exhausted its retry budget or hit a fatal condition.
    #[error(transparent)]
    Fetch(#[from] FetchFailure),

    /// The output sink rejected the emitted records. History entries
    /// appended for the run are intentionally not rolled back.
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// History store I/O failure.
    #[error("history store: {0}")]
    Store(#[from] std::io::Error),
}

/// Terminal fetch outcome recorded in a source's run report.
///
/// `attempts` counts every attempt made, including the first; `fatal`
/// distinguishes a short-circuited non-transient failure from an exhausted
/// retry budget.
#[derive(Debug, Error)]
#[error("fetch failed after {attempts} attempt(s): {reason}")]
pub struct FetchFailure {
    pub reason: String,
    pub attempts: u32,
    pub fatal: bool,
}

/// Error raised by a fetch capability for a single attempt.
///
/// The dispatcher retries `Transient` errors under the source's retry
/// budget and short-circuits on `Fatal` ones (e.g. a malformed target URL
/// or an unparseable extraction selector).
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Fatal(String),
    #[error("cancelled")]
    Cancelled,
}

/// Error raised by an output sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}
