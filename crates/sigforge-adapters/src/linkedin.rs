use std::collections::BTreeMap;

use async_trait::async_trait;
use scraper::{ElementRef, Html};
use sigforge_core::RawRecord;
use tracing::{info, warn};

use crate::{selector, text_or_none, AdapterContext, SourceAdapter, SourceError};

pub const LINKEDIN_GUEST_SEARCH_URL: &str =
    "https://www.linkedin.com/jobs-guest/jobs/api/seeMoreJobPostings/search";

const CARD: &str = "li";
const TITLE: &str = ".base-search-card__title";
const COMPANY: &str = ".base-search-card__subtitle";
const LOCATION: &str = ".job-search-card__location";
const LINK: &str = "a.base-card__full-link";
const POSTED: &str = "time[datetime]";
const URN: &str = "[data-entity-urn]";

/// LinkedIn guest job search. Returns an HTML fragment of `<li>` cards; no login.
#[derive(Debug, Clone)]
pub struct LinkedInAdapter {
    name: String,
    url: String,
    query: Vec<(String, String)>,
}

impl LinkedInAdapter {
    pub fn new(name: impl Into<String>, url: Option<String>, query: BTreeMap<String, String>) -> Self {
        let query = if query.is_empty() {
            default_query()
        } else {
            query.into_iter().collect()
        };
        Self {
            name: name.into(),
            url: url.unwrap_or_else(|| LINKEDIN_GUEST_SEARCH_URL.to_string()),
            query,
        }
    }
}

impl Default for LinkedInAdapter {
    fn default() -> Self {
        Self::new("linkedin", None, BTreeMap::new())
    }
}

// Remote roles from the past week.
fn default_query() -> Vec<(String, String)> {
    [
        ("keywords", "software engineer python"),
        ("location", "Worldwide"),
        ("f_TPR", "r604800"),
        ("f_WT", "2"),
        ("start", "0"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[async_trait]
impl SourceAdapter for LinkedInAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<Vec<RawRecord>, SourceError> {
        let response = ctx
            .http
            .get(&self.name, &self.url, &self.query)
            .await
            .map_err(|e| SourceError::from_fetch(&self.name, &e))?;
        let records = parse_search_cards(&self.name, &response.text())?;
        if records.is_empty() {
            warn!(adapter = %self.name, "guest search returned no job cards");
        } else {
            info!(adapter = %self.name, records = records.len(), "linkedin cards parsed");
        }
        Ok(records)
    }
}

/// Extracts one raw record per job card. Cards without a title or link are dropped.
pub fn parse_search_cards(adapter: &str, html: &str) -> Result<Vec<RawRecord>, SourceError> {
    let card_sel = selector(adapter, CARD)?;
    let title_sel = selector(adapter, TITLE)?;
    let company_sel = selector(adapter, COMPANY)?;
    let location_sel = selector(adapter, LOCATION)?;
    let link_sel = selector(adapter, LINK)?;
    let posted_sel = selector(adapter, POSTED)?;
    let urn_sel = selector(adapter, URN)?;

    let document = Html::parse_fragment(html);
    let mut records = Vec::new();
    for card in document.select(&card_sel) {
        let Some(title) = first_text(card, &title_sel) else {
            continue;
        };
        let Some(href) = first_attr(card, &link_sel, "href") else {
            continue;
        };

        let native_id = first_attr(card, &urn_sel, "data-entity-urn")
            .and_then(|urn| urn.rsplit(':').next().map(ToString::to_string))
            .filter(|id| !id.is_empty());

        let mut record = RawRecord::new()
            .with("title", title)
            .with("url", strip_tracking(&href));
        if let Some(id) = native_id {
            record.insert("id", id);
        }
        if let Some(company) = first_text(card, &company_sel) {
            record.insert("company", company);
        }
        if let Some(location) = first_text(card, &location_sel) {
            record.insert("location", location);
        }
        if let Some(posted) = first_attr(card, &posted_sel, "datetime") {
            record.insert("posted_at", posted);
        }
        records.push(record);
    }
    Ok(records)
}

fn first_text(card: ElementRef<'_>, sel: &scraper::Selector) -> Option<String> {
    card.select(sel)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>()))
}

fn first_attr(card: ElementRef<'_>, sel: &scraper::Selector, attr: &str) -> Option<String> {
    card.select(sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string()))
}

// Tracking parameters change per request and would break content identity.
fn strip_tracking(href: &str) -> String {
    href.split(['?', '#']).next().unwrap_or(href).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sigforge_core::normalize;
    use std::path::Path;

    fn golden_html() -> String {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("fixtures/linkedin/sample/listing.html");
        std::fs::read_to_string(path).expect("fixture present")
    }

    #[test]
    fn golden_cards_map_to_raw_records() {
        let records = parse_search_cards("linkedin", &golden_html()).unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.scalar_text("id").as_deref(), Some("3812345678"));
        assert_eq!(first.str("title"), Some("Python Backend Engineer"));
        assert_eq!(first.str("company"), Some("Northwind Data"));
        assert_eq!(first.str("location"), Some("Remote"));
        assert_eq!(
            first.str("url"),
            Some("https://www.linkedin.com/jobs/view/python-backend-engineer-at-northwind-data-3812345678")
        );
        assert_eq!(first.str("posted_at"), Some("2026-02-26"));

        let second = &records[1];
        assert_eq!(second.scalar_text("id"), None);
        assert_eq!(second.str("location"), None);

        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).single().unwrap();
        let posting = normalize(first, "linkedin", now).unwrap();
        assert_eq!(posting.id, "linkedin:3812345678");
        let anonymous = normalize(second, "linkedin", now).unwrap();
        assert!(anonymous.id.starts_with("content-"));
    }

    #[test]
    fn login_wall_yields_no_records() {
        let html = "<html><body><div class=\"authwall\">Sign in</div></body></html>";
        assert!(parse_search_cards("linkedin", html).unwrap().is_empty());
    }

    #[test]
    fn tracking_suffixes_are_removed() {
        assert_eq!(
            strip_tracking("https://www.linkedin.com/jobs/view/1?refId=abc&trackingId=x#top"),
            "https://www.linkedin.com/jobs/view/1"
        );
        assert_eq!(strip_tracking("https://a.test/b"), "https://a.test/b");
    }

    #[test]
    fn empty_query_uses_remote_week_defaults() {
        let adapter = LinkedInAdapter::default();
        assert!(adapter.query.iter().any(|(k, v)| k == "f_WT" && v == "2"));
        let custom = LinkedInAdapter::new(
            "li-rust",
            None,
            [("keywords".to_string(), "rust".to_string())].into_iter().collect(),
        );
        assert_eq!(custom.query, vec![("keywords".to_string(), "rust".to_string())]);
        assert_eq!(custom.name(), "li-rust");
    }
}
