use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_ALERT_THRESHOLD: u8 = 70;
pub const DEFAULT_MAX_AGE_DAYS: u32 = 7;
/// Upper bound for a single scoring dimension.
pub const MAX_WEIGHT: u32 = 100;

#[derive(Debug, Error)]
pub enum RuleSetError {
    #[error("reading rules file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing rules file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid rule set: {0}")]
    Invalid(String),
}

/// Maximum points each scoring dimension can contribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub freshness: u32,
    pub keyword: u32,
    pub stack: u32,
    pub location: u32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            freshness: 30,
            keyword: 40,
            stack: 20,
            location: 10,
        }
    }
}

/// Declarative scoring configuration. One snapshot is shared read-only by a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
    #[serde(default = "default_stack")]
    pub stack: Vec<String>,
    #[serde(default = "default_locations")]
    pub locations: Vec<String>,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
    #[serde(default = "default_alert_threshold", alias = "min_score")]
    pub alert_threshold: u8,
    #[serde(default)]
    pub weights: ScoreWeights,
}

fn terms(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_keywords() -> Vec<String> {
    terms(&["python", "backend", "rust", "data", "engineer"])
}

fn default_stack() -> Vec<String> {
    terms(&["python", "rust", "postgresql"])
}

fn default_locations() -> Vec<String> {
    terms(&["remote"])
}

fn default_max_age_days() -> u32 {
    DEFAULT_MAX_AGE_DAYS
}

fn default_alert_threshold() -> u8 {
    DEFAULT_ALERT_THRESHOLD
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            keywords: default_keywords(),
            stack: default_stack(),
            locations: default_locations(),
            max_age_days: DEFAULT_MAX_AGE_DAYS,
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            weights: ScoreWeights::default(),
        }
    }
}

impl RuleSet {
    pub fn from_yaml_str(text: &str, origin: &str) -> Result<Self, RuleSetError> {
        let rules: RuleSet = serde_yaml::from_str(text).map_err(|source| RuleSetError::Parse {
            path: origin.to_string(),
            source,
        })?;
        rules.validate()?;
        Ok(rules)
    }

    /// Reads and validates a rules file. Called once per run so edits take effect on the
    /// next run, never in the middle of one.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RuleSetError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RuleSetError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text, &path.display().to_string())
    }

    pub fn validate(&self) -> Result<(), RuleSetError> {
        let w = self.weights;
        for (name, weight) in [
            ("freshness", w.freshness),
            ("keyword", w.keyword),
            ("stack", w.stack),
            ("location", w.location),
        ] {
            if weight > MAX_WEIGHT {
                return Err(RuleSetError::Invalid(format!(
                    "weights.{name} must be within 0..={MAX_WEIGHT}, got {weight}"
                )));
            }
        }
        if self.alert_threshold > 100 {
            return Err(RuleSetError::Invalid(format!(
                "alert_threshold must be within 0..=100, got {}",
                self.alert_threshold
            )));
        }
        Ok(())
    }

    pub fn is_alert_worthy(&self, score: u8) -> bool {
        score >= self.alert_threshold
    }
}
