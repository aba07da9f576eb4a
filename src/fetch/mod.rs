//! Fetch/extract capabilities.
//!
//! A capability turns one source configuration into a sequence of raw
//! records for a single attempt. The dispatcher owns retries, backoff and
//! timeouts; a capability only reports each attempt as `Ok`, transient, or
//! fatal. Capabilities are tagged variants selected by configuration
//! rather than a trait object, so the scheduler stays oblivious to
//! transport details.

pub mod http;

use crate::errors::FetchError;
use crate::models::{RawRecord, SourceConfig};
use crate::runner::RunContext;

/// Available fetch/extract implementations.
#[derive(Debug)]
pub enum FetchCapability {
    /// Plain HTTP + CSS-selector extraction.
    Http(http::HttpFetcher),
    /// Scripted outcomes for tests.
    #[cfg(test)]
    Fixture(fixture::FixtureFetcher),
}

impl FetchCapability {
    /// Execute one fetch attempt for a source. The run context carries the
    /// effective window and the cancellation token; interaction and
    /// headless flags travel inside `source` untouched.
    pub async fn fetch(
        &self,
        source: &SourceConfig,
        ctx: &RunContext,
    ) -> Result<Vec<RawRecord>, FetchError> {
        match self {
            FetchCapability::Http(fetcher) => fetcher.fetch(source, ctx).await,
            #[cfg(test)]
            FetchCapability::Fixture(fetcher) => fetcher.fetch(source, ctx).await,
        }
    }
}
