//! Source adapter contract + the RemoteOK, LinkedIn, We Work Remotely and fixture adapters.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::Selector;
use sigforge_core::{RawRecord, SourceErrorKind};
use sigforge_storage::{FetchError, HttpFetcher};
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

mod fixture;
mod linkedin;
mod registry;
mod remoteok;
mod weworkremotely;

pub use fixture::FixtureAdapter;
pub use linkedin::{parse_search_cards, LinkedInAdapter, LINKEDIN_GUEST_SEARCH_URL};
pub use registry::{
    build_adapters, default_sources, load_sources, RegistryError, SourceConfig, SourceKind,
    SourcesFile,
};
pub use remoteok::{parse_api_payload, RemoteOkAdapter, REMOTEOK_API_URL};
pub use weworkremotely::{parse_feed, WeWorkRemotelyAdapter, WEWORKREMOTELY_FEED_URL};

pub const CRATE_NAME: &str = "sigforge-adapters";

/// Per-run inputs handed to every adapter.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// The orchestrator drops the fetch at this instant.
    pub deadline: Instant,
    pub http: Arc<HttpFetcher>,
}

impl AdapterContext {
    pub fn new(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        deadline: Instant,
        http: Arc<HttpFetcher>,
    ) -> Self {
        Self {
            run_id,
            started_at,
            deadline,
            http,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("adapter {adapter} failed ({kind}): {message}")]
pub struct SourceError {
    pub adapter: String,
    pub kind: SourceErrorKind,
    pub message: String,
}

impl SourceError {
    pub fn new(adapter: impl Into<String>, kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            adapter: adapter.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn parse(adapter: &str, message: impl Into<String>) -> Self {
        Self::new(adapter, SourceErrorKind::Parse, message)
    }

    /// Maps a transport failure onto the adapter error taxonomy.
    pub fn from_fetch(adapter: &str, err: &FetchError) -> Self {
        let kind = match err {
            _ if err.is_timeout() => SourceErrorKind::Timeout,
            FetchError::HttpStatus { .. } => SourceErrorKind::Upstream,
            FetchError::Request(_) | FetchError::Closed => SourceErrorKind::Http,
        };
        Self::new(adapter, kind, err.to_string())
    }
}

/// One upstream job source. Adapters retrieve and map field names; they never score,
/// store or alert.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, ctx: &AdapterContext) -> Result<Vec<RawRecord>, SourceError>;
}

pub(crate) fn selector(adapter: &str, css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|e| SourceError::parse(adapter, format!("selector {css}: {e}")))
}

pub(crate) fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
