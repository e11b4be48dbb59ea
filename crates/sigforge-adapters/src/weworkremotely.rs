use async_trait::async_trait;
use rss::{Channel, Item};
use scraper::Html;
use sha2::{Digest, Sha256};
use sigforge_core::RawRecord;
use tracing::{debug, info};

use crate::{text_or_none, AdapterContext, SourceAdapter, SourceError};

pub const WEWORKREMOTELY_FEED_URL: &str = "https://weworkremotely.com/remote-jobs.rss";

/// We Work Remotely RSS feed. Item titles read `Company: Position`; every listing on the
/// board is remote.
#[derive(Debug, Clone)]
pub struct WeWorkRemotelyAdapter {
    name: String,
    url: String,
}

impl WeWorkRemotelyAdapter {
    pub fn new(name: impl Into<String>, url: Option<String>) -> Self {
        Self {
            name: name.into(),
            url: url.unwrap_or_else(|| WEWORKREMOTELY_FEED_URL.to_string()),
        }
    }
}

impl Default for WeWorkRemotelyAdapter {
    fn default() -> Self {
        Self::new("weworkremotely", None)
    }
}

#[async_trait]
impl SourceAdapter for WeWorkRemotelyAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<Vec<RawRecord>, SourceError> {
        let response = ctx
            .http
            .get(&self.name, &self.url, &[])
            .await
            .map_err(|e| SourceError::from_fetch(&self.name, &e))?;
        let records = parse_feed(&self.name, &response.body)?;
        info!(adapter = %self.name, records = records.len(), "weworkremotely feed fetched");
        Ok(records)
    }
}

/// Maps feed items onto raw records. Items without a link are skipped.
pub fn parse_feed(adapter: &str, body: &[u8]) -> Result<Vec<RawRecord>, SourceError> {
    let channel = Channel::read_from(body)
        .map_err(|e| SourceError::parse(adapter, format!("invalid RSS: {e}")))?;

    let mut records = Vec::with_capacity(channel.items().len());
    for item in channel.items() {
        match map_item(item) {
            Some(record) => records.push(record),
            None => debug!(adapter, title = item.title().unwrap_or_default(), "skipping item without link"),
        }
    }
    Ok(records)
}

fn map_item(item: &Item) -> Option<RawRecord> {
    let link = item.link().map(str::trim).filter(|l| !l.is_empty())?;
    let heading = item.title().unwrap_or_default();
    let (company, title) = match heading.split_once(':') {
        Some((company, title)) => (company.trim(), title.trim()),
        None => ("", heading.trim()),
    };
    let description = item.description().and_then(|html| {
        let fragment = Html::parse_fragment(html);
        text_or_none(fragment.root_element().text().collect::<Vec<_>>().join(" "))
    });

    let mut record = RawRecord::new()
        .with("id", link_id(link))
        .with("title", title)
        .with("location", "Remote")
        .with("url", link);
    if !company.is_empty() {
        record.insert("company", company);
    }
    if let Some(published) = item.pub_date() {
        record.insert("posted_at", published);
    }
    if let Some(description) = description {
        record.insert("description", description);
    }
    Some(record)
}

// The feed has no numeric id; the listing URL is stable.
fn link_id(link: &str) -> String {
    let digest = hex::encode(Sha256::digest(link.as_bytes()));
    digest[..16].to_string()
}
