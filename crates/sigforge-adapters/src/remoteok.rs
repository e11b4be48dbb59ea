use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sigforge_core::RawRecord;
use tracing::{debug, info};

use crate::{AdapterContext, SourceAdapter, SourceError};

pub const REMOTEOK_API_URL: &str = "https://remoteok.com/api";

/// RemoteOK public JSON API. The response is a single array whose first element is a
/// legal/metadata notice.
#[derive(Debug, Clone)]
pub struct RemoteOkAdapter {
    name: String,
    url: String,
}

impl RemoteOkAdapter {
    pub fn new(name: impl Into<String>, url: Option<String>) -> Self {
        Self {
            name: name.into(),
            url: url.unwrap_or_else(|| REMOTEOK_API_URL.to_string()),
        }
    }
}

impl Default for RemoteOkAdapter {
    fn default() -> Self {
        Self::new("remoteok", None)
    }
}

#[async_trait]
impl SourceAdapter for RemoteOkAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<Vec<RawRecord>, SourceError> {
        let response = ctx
            .http
            .get(&self.name, &self.url, &[])
            .await
            .map_err(|e| SourceError::from_fetch(&self.name, &e))?;
        let records = parse_api_payload(&self.name, &response.body)?;
        info!(adapter = %self.name, records = records.len(), "remoteok listing fetched");
        Ok(records)
    }
}

/// Maps the API array onto raw records; entries that are not objects are skipped.
pub fn parse_api_payload(adapter: &str, body: &[u8]) -> Result<Vec<RawRecord>, SourceError> {
    let value: JsonValue = serde_json::from_slice(body)
        .map_err(|e| SourceError::parse(adapter, format!("invalid JSON: {e}")))?;
    let JsonValue::Array(items) = value else {
        return Err(SourceError::parse(adapter, "expected a JSON array"));
    };

    let mut records = Vec::with_capacity(items.len().saturating_sub(1));
    for item in items.into_iter().skip(1) {
        match item {
            JsonValue::Object(job) => records.push(map_job(&job)),
            other => debug!(adapter, kind = json_kind(&other), "skipping non-object entry"),
        }
    }
    Ok(records)
}

fn map_job(job: &serde_json::Map<String, JsonValue>) -> RawRecord {
    let field = |key: &str| job.get(key).cloned().unwrap_or(JsonValue::Null);
    let location = job
        .get("location")
        .and_then(JsonValue::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("Remote")
        .to_string();
    let url = job
        .get("url")
        .filter(|v| v.as_str().is_some_and(|s| !s.trim().is_empty()))
        .or_else(|| job.get("apply_url"))
        .cloned()
        .unwrap_or(JsonValue::Null);
    // `epoch` is unambiguous; `date` is the ISO fallback.
    let posted_at = job
        .get("epoch")
        .filter(|v| !v.is_null())
        .or_else(|| job.get("date"))
        .cloned()
        .unwrap_or(JsonValue::Null);

    RawRecord::new()
        .with("id", field("id"))
        .with("title", field("position"))
        .with("company", field("company"))
        .with("location", location)
        .with("url", url)
        .with("posted_at", posted_at)
        .with("stack", field("tags"))
        .with("description", field("description"))
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
