use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sigforge_core::{RawRecord, SourceErrorKind};
use tracing::{debug, info};

use crate::{AdapterContext, SourceAdapter, SourceError};

/// Reads a JSON array of already-canonical raw records from disk. Offline runs and tests.
#[derive(Debug, Clone)]
pub struct FixtureAdapter {
    name: String,
    path: PathBuf,
}

impl FixtureAdapter {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn parse(&self, text: &str) -> Result<Vec<RawRecord>, SourceError> {
        let value: JsonValue = serde_json::from_str(text).map_err(|e| {
            SourceError::parse(&self.name, format!("{}: {e}", self.path.display()))
        })?;
        let JsonValue::Array(items) = value else {
            return Err(SourceError::parse(
                &self.name,
                format!("{}: expected a JSON array", self.path.display()),
            ));
        };
        let total = items.len();
        let records: Vec<RawRecord> = items.into_iter().filter_map(RawRecord::from_json).collect();
        if records.len() < total {
            debug!(adapter = %self.name, skipped = total - records.len(), "non-object fixture entries");
        }
        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for FixtureAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, _ctx: &AdapterContext) -> Result<Vec<RawRecord>, SourceError> {
        let text = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            SourceError::new(
                &self.name,
                SourceErrorKind::Io,
                format!("reading {}: {e}", self.path.display()),
            )
        })?;
        let records = self.parse(&text)?;
        info!(adapter = %self.name, records = records.len(), path = %self.path.display(), "fixture loaded");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigforge_storage::{HttpClientConfig, HttpFetcher};
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn ctx() -> AdapterContext {
        let http = Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap());
        AdapterContext::new(
            Uuid::new_v4(),
            chrono::Utc::now(),
            tokio::time::Instant::now() + Duration::from_secs(5),
            http,
        )
    }

    #[tokio::test]
    async fn reads_golden_fixture_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("fixtures/fixture/sample/postings.json");
        let adapter = FixtureAdapter::new("fixture", path);
        let records = adapter.fetch(&ctx()).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].str("title"), Some("Senior Python Backend Engineer"));
        assert_eq!(records[2].str("url"), None);
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FixtureAdapter::new("offline", dir.path().join("absent.json"));
        let err = adapter.fetch(&ctx()).await.unwrap_err();
        assert_eq!(err.kind, SourceErrorKind::Io);
        assert_eq!(err.adapter, "offline");
    }

    #[tokio::test]
    async fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{\"title\": \"not an array\"}").unwrap();
        let err = FixtureAdapter::new("offline", &path)
            .fetch(&ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind, SourceErrorKind::Parse);
    }
}
