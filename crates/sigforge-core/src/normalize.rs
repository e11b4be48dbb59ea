use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{Posting, RawRecord};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("required field `{0}` is missing or blank")]
    MissingField(&'static str),
}

const REMOTE_SYNONYMS: &[&str] = &["wfh", "work from home", "anywhere", "worldwide", "global"];

/// Maps one raw record onto the canonical [`Posting`] shape.
///
/// `now` stands in for a missing or unreadable `posted_at`; callers pass the run start so
/// every record in a run defaults to the same instant.
pub fn normalize(
    raw: &RawRecord,
    source: &str,
    now: DateTime<Utc>,
) -> Result<Posting, NormalizationError> {
    let title = raw
        .str("title")
        .map(collapse_whitespace)
        .ok_or(NormalizationError::MissingField("title"))?;
    let url = raw
        .str("url")
        .map(normalize_url)
        .ok_or(NormalizationError::MissingField("url"))?;
    let company = raw.str("company").map(collapse_whitespace).unwrap_or_default();
    let location = raw.str("location").map(normalize_location).unwrap_or_default();
    let description = raw.str("description").map(collapse_whitespace).unwrap_or_default();
    let stack = raw
        .string_list("stack")
        .into_iter()
        .map(|tag| tag.to_lowercase())
        .collect();
    let posted_at = raw.get("posted_at").and_then(parse_timestamp).unwrap_or(now);

    let id = match raw.scalar_text("id") {
        Some(native) => format!("{source}:{native}"),
        None => content_id(&title, &company, &url),
    };

    Ok(Posting {
        id,
        source: source.to_string(),
        title,
        company,
        location,
        description,
        stack,
        url,
        posted_at,
        score: 0,
        alerted: false,
    })
}

/// Identity for listings without an upstream id: a digest of the normalized
/// title, company and url.
pub fn content_id(title: &str, company: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update([0x1f]);
    hasher.update(company.as_bytes());
    hasher.update([0x1f]);
    hasher.update(url.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("content-{}", &digest[..16])
}

/// Accepts RFC 3339, RFC 2822, a few plain date layouts and Unix epochs (seconds or
/// milliseconds, as number or numeric string). Naive values are taken as UTC.
pub fn parse_timestamp(value: &JsonValue) -> Option<DateTime<Utc>> {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(from_epoch),
        JsonValue::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(epoch) = s.parse::<i64>() {
        return from_epoch(epoch);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_rfc2822(s) {
        return Some(ts.with_timezone(&Utc));
    }
    for layout in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn from_epoch(epoch: i64) -> Option<DateTime<Utc>> {
    if epoch <= 0 {
        return None;
    }
    if epoch >= 100_000_000_000 {
        DateTime::from_timestamp_millis(epoch)
    } else {
        DateTime::from_timestamp(epoch, 0)
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// Any location mentioning a remote synonym collapses to "Remote".
fn normalize_location(text: &str) -> String {
    let location = collapse_whitespace(text);
    let lower = location.to_lowercase();
    if REMOTE_SYNONYMS.iter().any(|s| lower.contains(s)) {
        return "Remote".to_string();
    }
    location
}

fn normalize_url(text: &str) -> String {
    let url = text.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else if let Some(rest) = url.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        format!("https://{url}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn run_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap()
    }

    fn full_record() -> RawRecord {
        RawRecord::from_json(json!({
            "id": 981,
            "title": "  Senior   Python Backend Engineer ",
            "company": "TechCorp",
            "location": "work from home",
            "url": "example.com/jobs/981",
            "posted_at": "2026-02-27T09:30:00Z",
            "stack": ["Python", "Django", "PostgreSQL"],
            "description": "Build APIs."
        }))
        .unwrap()
    }

    #[test]
    fn normalizes_every_field() {
        let posting = normalize(&full_record(), "remoteok", run_start()).unwrap();
        assert_eq!(posting.id, "remoteok:981");
        assert_eq!(posting.title, "Senior Python Backend Engineer");
        assert_eq!(posting.company, "TechCorp");
        assert_eq!(posting.location, "Remote");
        assert_eq!(posting.url, "https://example.com/jobs/981");
        assert_eq!(
            posting.posted_at,
            Utc.with_ymd_and_hms(2026, 2, 27, 9, 30, 0).single().unwrap()
        );
        assert_eq!(
            posting.stack.iter().cloned().collect::<Vec<_>>(),
            vec!["django", "postgresql", "python"]
        );
        assert_eq!(posting.description, "Build APIs.");
        assert_eq!(posting.source, "remoteok");
        assert!(!posting.alerted);
    }

    #[test]
    fn same_record_yields_same_posting() {
        let a = normalize(&full_record(), "remoteok", run_start()).unwrap();
        let b = normalize(&full_record(), "remoteok", run_start()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_title_or_url_fails() {
        let no_title = RawRecord::new().with("url", "https://x.test/1");
        assert_eq!(
            normalize(&no_title, "s", run_start()).unwrap_err(),
            NormalizationError::MissingField("title")
        );
        let blank_url = RawRecord::new().with("title", "Engineer").with("url", "  ");
        assert_eq!(
            normalize(&blank_url, "s", run_start()).unwrap_err(),
            NormalizationError::MissingField("url")
        );
        let wrong_type = RawRecord::new().with("title", 42).with("url", "https://x.test");
        assert!(normalize(&wrong_type, "s", run_start()).is_err());
    }

    #[test]
    fn optional_fields_degrade_to_empty() {
        let record = RawRecord::new()
            .with("title", "Engineer")
            .with("url", "https://x.test/2")
            .with("stack", json!({"not": "a list"}))
            .with("posted_at", "next tuesday");
        let posting = normalize(&record, "fixture", run_start()).unwrap();
        assert_eq!(posting.company, "");
        assert_eq!(posting.location, "");
        assert!(posting.stack.is_empty());
        assert_eq!(posting.posted_at, run_start());
    }

    #[test]
    fn remote_synonyms_match_inside_longer_locations() {
        let at = |location: &str| {
            let record = RawRecord::new()
                .with("title", "Engineer")
                .with("url", "https://x.test/4")
                .with("location", location);
            normalize(&record, "fixture", run_start()).unwrap().location
        };
        assert_eq!(at("Anywhere in the world"), "Remote");
        assert_eq!(at("  Worldwide (UTC-3 to UTC+3) "), "Remote");
        assert_eq!(at("Nairobi,   Kenya"), "Nairobi, Kenya");
    }

    #[test]
    fn content_id_is_used_without_native_id() {
        let record = RawRecord::new()
            .with("title", "Engineer")
            .with("company", "Acme")
            .with("url", "https://x.test/3");
        let a = normalize(&record, "linkedin", run_start()).unwrap();
        let b = normalize(&record, "fixture", run_start()).unwrap();
        assert!(a.id.starts_with("content-"));
        assert_eq!(a.id.len(), "content-".len() + 16);
        assert_eq!(a.id, b.id);
        assert_eq!(a.id, content_id("Engineer", "Acme", "https://x.test/3"));
    }

    #[test]
    fn timestamp_layouts() {
        let expected = Utc.with_ymd_and_hms(2026, 2, 2, 7, 0, 28).single().unwrap();
        assert_eq!(parse_timestamp(&json!("2026-02-02T07:00:28+00:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!("Mon, 02 Feb 2026 07:00:28 +0000")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2026-02-02 07:00:28")), Some(expected));
        assert_eq!(parse_timestamp(&json!(expected.timestamp())), Some(expected));
        assert_eq!(
            parse_timestamp(&json!(expected.timestamp().to_string())),
            Some(expected)
        );
        assert_eq!(parse_timestamp(&json!(expected.timestamp_millis())), Some(expected));
        assert_eq!(
            parse_timestamp(&json!("2026-02-02")),
            Utc.with_ymd_and_hms(2026, 2, 2, 0, 0, 0).single()
        );
        assert_eq!(parse_timestamp(&json!(true)), None);
        assert_eq!(parse_timestamp(&json!("")), None);
    }
}
