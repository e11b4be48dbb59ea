//! Core domain model for SigForge: postings, raw records, rule sets and run summaries.
//!
//! Everything in this crate is pure. Adapters produce [`RawRecord`]s, [`normalize`] turns
//! them into [`Posting`]s, and [`score`] rates a posting against a [`RuleSet`] snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

mod normalize;
mod rules;
mod scoring;

pub use normalize::{content_id, normalize, parse_timestamp, NormalizationError};
pub use rules::{
    RuleSet, RuleSetError, ScoreWeights, DEFAULT_ALERT_THRESHOLD, DEFAULT_MAX_AGE_DAYS, MAX_WEIGHT,
};
pub use scoring::{score, score_breakdown, ScoreBreakdown};

pub const CRATE_NAME: &str = "sigforge-core";

/// Canonical, normalized job posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub id: String,
    pub source: String,
    pub title: String,
    pub company: String,
    pub location: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub stack: BTreeSet<String>,
    pub url: String,
    pub posted_at: DateTime<Utc>,
    #[serde(default)]
    pub score: u8,
    #[serde(default)]
    pub alerted: bool,
}

/// Untyped key/value bag handed over by adapters.
///
/// Accessors fail closed: a missing key and a key holding the wrong JSON type both read
/// as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    fields: BTreeMap<String, JsonValue>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a record from a JSON object; any other JSON shape yields `None`.
    pub fn from_json(value: JsonValue) -> Option<Self> {
        match value {
            JsonValue::Object(map) => Some(Self {
                fields: map.into_iter().collect(),
            }),
            _ => None,
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) {
        let value = value.into();
        if !value.is_null() {
            self.fields.insert(key.into(), value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.fields.get(key)
    }

    /// Trimmed, non-empty string value.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// String or number rendered as text; used for upstream identifiers.
    pub fn scalar_text(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            JsonValue::String(s) => {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            }
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn i64(&self, key: &str) -> Option<i64> {
        match self.fields.get(key)? {
            JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Array of strings, or a single comma-separated string.
    pub fn string_list(&self, key: &str) -> Vec<String> {
        match self.fields.get(key) {
            Some(JsonValue::Array(items)) => items
                .iter()
                .filter_map(JsonValue::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect(),
            Some(JsonValue::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Why an adapter failed a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    Timeout,
    Http,
    Upstream,
    Parse,
    Io,
    /// The adapter task panicked or was aborted.
    Crashed,
}

impl fmt::Display for SourceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceErrorKind::Timeout => "timeout",
            SourceErrorKind::Http => "http",
            SourceErrorKind::Upstream => "upstream",
            SourceErrorKind::Parse => "parse",
            SourceErrorKind::Io => "io",
            SourceErrorKind::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a collection run. Ordered: a run only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RunState {
    Pending = 0,
    Collecting = 1,
    Scoring = 2,
    Persisting = 3,
    Alerting = 4,
    Completed = 5,
    Failed = 6,
}

impl RunState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => RunState::Collecting,
            2 => RunState::Scoring,
            3 => RunState::Persisting,
            4 => RunState::Alerting,
            5 => RunState::Completed,
            6 => RunState::Failed,
            _ => RunState::Pending,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Pending => "pending",
            RunState::Collecting => "collecting",
            RunState::Scoring => "scoring",
            RunState::Persisting => "persisting",
            RunState::Alerting => "alerting",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdapterStatus {
    Ok,
    Failed { kind: SourceErrorKind, reason: String },
}

impl AdapterStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, AdapterStatus::Ok)
    }
}

/// Record-level counters; summed across adapters for run totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub fetched: usize,
    pub normalized: usize,
    pub normalization_failures: usize,
    pub store_failures: usize,
    pub new: usize,
    pub updated: usize,
    pub alerted: usize,
    pub dispatch_failures: usize,
}

impl RunCounts {
    pub fn merge(&mut self, other: &RunCounts) {
        self.fetched += other.fetched;
        self.normalized += other.normalized;
        self.normalization_failures += other.normalization_failures;
        self.store_failures += other.store_failures;
        self.new += other.new;
        self.updated += other.updated;
        self.alerted += other.alerted;
        self.dispatch_failures += other.dispatch_failures;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterReport {
    pub adapter: String,
    #[serde(flatten)]
    pub status: AdapterStatus,
    pub counts: RunCounts,
    pub elapsed_ms: u64,
}

/// Outcome of one run, returned to the trigger caller and kept as "last summary".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub state: RunState,
    pub adapters: Vec<AdapterReport>,
    pub totals: RunCounts,
}

impl RunSummary {
    /// Builds a summary; totals are derived from the reports, in whatever order they
    /// completed.
    pub fn from_reports(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        state: RunState,
        mut adapters: Vec<AdapterReport>,
    ) -> Self {
        adapters.sort_by(|a, b| a.adapter.cmp(&b.adapter));
        let mut totals = RunCounts::default();
        for report in &adapters {
            totals.merge(&report.counts);
        }
        Self {
            run_id,
            started_at,
            finished_at,
            state,
            adapters,
            totals,
        }
    }

    pub fn succeeded_adapters(&self) -> usize {
        self.adapters.iter().filter(|a| a.status.is_ok()).count()
    }

    pub fn failed_adapters(&self) -> usize {
        self.adapters.len() - self.succeeded_adapters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn raw_record_accessors_fail_closed() {
        let record = RawRecord::from_json(json!({
            "title": "  Rust Engineer ",
            "blank": "   ",
            "id": 4242,
            "tags": ["rust", 7, " tokio "],
            "stack": "python, django,,",
            "epoch": "1700000000",
            "nested": {"a": 1}
        }))
        .unwrap();

        assert_eq!(record.str("title"), Some("Rust Engineer"));
        assert_eq!(record.str("blank"), None);
        assert_eq!(record.str("id"), None);
        assert_eq!(record.str("missing"), None);
        assert_eq!(record.scalar_text("id").as_deref(), Some("4242"));
        assert_eq!(record.scalar_text("nested"), None);
        assert_eq!(record.string_list("tags"), vec!["rust", "tokio"]);
        assert_eq!(record.string_list("stack"), vec!["python", "django"]);
        assert!(record.string_list("nested").is_empty());
        assert_eq!(record.i64("epoch"), Some(1_700_000_000));
        assert_eq!(record.i64("title"), None);
    }

    #[test]
    fn raw_record_rejects_non_objects_and_skips_nulls() {
        assert!(RawRecord::from_json(json!(["a"])).is_none());
        let record = RawRecord::new().with("title", "x").with("company", JsonValue::Null);
        assert_eq!(record.len(), 1);
        assert!(record.get("company").is_none());
    }

    #[test]
    fn summary_totals_commute_over_completion_order() {
        let now = Utc::now();
        let report = |name: &str, new: usize, fetched: usize| AdapterReport {
            adapter: name.to_string(),
            status: AdapterStatus::Ok,
            counts: RunCounts {
                fetched,
                new,
                ..Default::default()
            },
            elapsed_ms: 1,
        };
        let run_id = Uuid::new_v4();
        let a = RunSummary::from_reports(
            run_id,
            now,
            now,
            RunState::Completed,
            vec![report("a", 1, 3), report("b", 2, 5)],
        );
        let b = RunSummary::from_reports(
            run_id,
            now,
            now,
            RunState::Completed,
            vec![report("b", 2, 5), report("a", 1, 3)],
        );
        assert_eq!(a, b);
        assert_eq!(a.totals.new, 3);
        assert_eq!(a.totals.fetched, 8);
    }

    #[test]
    fn adapter_status_serializes_flat() {
        let report = AdapterReport {
            adapter: "remoteok".into(),
            status: AdapterStatus::Failed {
                kind: SourceErrorKind::Timeout,
                reason: "deadline elapsed".into(),
            },
            counts: RunCounts::default(),
            elapsed_ms: 10,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["kind"], "timeout");
        assert_eq!(value["reason"], "deadline elapsed");
    }

    #[test]
    fn run_state_round_trips_through_u8() {
        for state in [
            RunState::Pending,
            RunState::Collecting,
            RunState::Scoring,
            RunState::Persisting,
            RunState::Alerting,
            RunState::Completed,
            RunState::Failed,
        ] {
            assert_eq!(RunState::from_u8(state as u8), state);
        }
        assert!(RunState::Collecting < RunState::Alerting);
    }
}
