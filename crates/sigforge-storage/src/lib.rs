//! Deduplicating posting storage + HTTP fetch utilities for SigForge.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sigforge_core::Posting;
use thiserror::Error;

mod http;
mod memory;
mod postgres;

pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, FetchedResponse,
    HttpClientConfig, HttpFetcher, RetryDisposition,
};
pub use memory::MemoryPostingStore;
pub use postgres::PgPostingStore;

pub const CRATE_NAME: &str = "sigforge-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("posting {0} not found")]
    NotFound(String),
    #[error("corrupt row for posting {id}: {message}")]
    Corrupt { id: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertResult {
    pub is_new: bool,
    pub previously_alerted: bool,
}

/// A posting as persisted, with first/last observation times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPosting {
    #[serde(flatten)]
    pub posting: Posting,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Listing filter for the read path; results are ordered by score, then recency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostingFilter {
    pub min_score: Option<u8>,
    pub location: Option<String>,
    pub company: Option<String>,
    pub source: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for PostingFilter {
    fn default() -> Self {
        Self {
            min_score: None,
            location: None,
            company: None,
            source: None,
            limit: 50,
            offset: 0,
        }
    }
}

impl PostingFilter {
    /// Case-insensitive substring filters, matching the Postgres `ILIKE` behaviour.
    pub fn matches(&self, posting: &Posting) -> bool {
        fn contains(hay: &str, needle: &Option<String>) -> bool {
            needle
                .as_deref()
                .map(|n| hay.to_lowercase().contains(&n.to_lowercase()))
                .unwrap_or(true)
        }
        self.min_score.map_or(true, |min| posting.score >= min)
            && contains(&posting.location, &self.location)
            && contains(&posting.company, &self.company)
            && self.source.as_deref().map_or(true, |s| posting.source == s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total: usize,
    pub high_score: usize,
    pub alerted: usize,
}

/// Durable home of postings, keyed by `Posting::id`.
///
/// Upserts of the same id are atomic with respect to each other: fields are
/// last-writer-wins, `alerted` is OR-merged and never cleared. Different ids do not
/// contend.
#[async_trait]
pub trait PostingStore: Send + Sync {
    async fn upsert(&self, posting: &Posting) -> Result<UpsertResult, StoreError>;

    /// Sets `alerted = true`. Idempotent.
    async fn mark_alerted(&self, id: &str) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<StoredPosting>, StoreError>;

    async fn list(&self, filter: &PostingFilter) -> Result<Vec<StoredPosting>, StoreError>;

    async fn stats(&self, alert_threshold: u8) -> Result<StoreStats, StoreError>;
}

fn merge_into(existing: &mut StoredPosting, incoming: &Posting, now: DateTime<Utc>) -> UpsertResult {
    let previously_alerted = existing.posting.alerted;
    existing.posting = Posting {
        alerted: previously_alerted || incoming.alerted,
        ..incoming.clone()
    };
    existing.last_seen_at = now;
    UpsertResult {
        is_new: false,
        previously_alerted,
    }
}
