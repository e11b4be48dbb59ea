use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Posting, RuleSet};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Per-dimension points; each already rounded and clamped to its weight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub freshness: u32,
    pub keyword: u32,
    pub stack: u32,
    pub location: u32,
}

impl ScoreBreakdown {
    pub fn total(&self) -> u8 {
        let sum = self
            .freshness
            .saturating_add(self.keyword)
            .saturating_add(self.stack)
            .saturating_add(self.location);
        sum.min(100) as u8
    }
}

/// Relevance score in `0..=100`. Pure: same posting, rules and `as_of` give the same score.
pub fn score(posting: &Posting, rules: &RuleSet, as_of: DateTime<Utc>) -> u8 {
    score_breakdown(posting, rules, as_of).total()
}

pub fn score_breakdown(posting: &Posting, rules: &RuleSet, as_of: DateTime<Utc>) -> ScoreBreakdown {
    let weights = rules.weights;
    ScoreBreakdown {
        freshness: freshness_points(posting.posted_at, as_of, rules.max_age_days, weights.freshness),
        keyword: keyword_points(posting, &rules.keywords, weights.keyword),
        stack: stack_points(&posting.stack, &rules.stack, weights.stack),
        location: location_points(&posting.location, &rules.locations, weights.location),
    }
}

fn round_half_up(value: f64) -> u32 {
    if value <= 0.0 {
        0
    } else {
        (value + 0.5).floor() as u32
    }
}

fn lowered_terms(terms: &[String]) -> BTreeSet<String> {
    terms
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

// Full weight up to max_age_days, linear decay to zero at twice that age.
fn freshness_points(
    posted_at: DateTime<Utc>,
    as_of: DateTime<Utc>,
    max_age_days: u32,
    weight: u32,
) -> u32 {
    let age_days = (as_of - posted_at).num_seconds().max(0) as f64 / SECONDS_PER_DAY;
    let max_age = f64::from(max_age_days);
    if age_days <= max_age {
        return weight;
    }
    let cutoff = 2.0 * max_age;
    if age_days >= cutoff {
        return 0;
    }
    let fraction = (cutoff - age_days) / max_age;
    round_half_up(f64::from(weight) * fraction).min(weight)
}

// One hit is enough for the full weight.
fn keyword_points(posting: &Posting, keywords: &[String], weight: u32) -> u32 {
    let haystack = format!("{} {}", posting.title, posting.description).to_lowercase();
    if lowered_terms(keywords)
        .iter()
        .any(|kw| haystack.contains(kw.as_str()))
    {
        weight
    } else {
        0
    }
}

// Coverage of the rule list, not of the posting's own tags.
fn stack_points(posting_stack: &BTreeSet<String>, rule_stack: &[String], weight: u32) -> u32 {
    let wanted = lowered_terms(rule_stack);
    if wanted.is_empty() {
        return 0;
    }
    let have: BTreeSet<String> = posting_stack.iter().map(|t| t.to_lowercase()).collect();
    let matched = wanted.intersection(&have).count();
    let fraction = matched as f64 / wanted.len() as f64;
    round_half_up(f64::from(weight) * fraction).min(weight)
}

fn location_points(location: &str, rule_locations: &[String], weight: u32) -> u32 {
    let location = location.trim().to_lowercase();
    let wanted = lowered_terms(rule_locations);
    let literal_remote = location == "remote" && wanted.contains("remote");
    if literal_remote || wanted.iter().any(|w| location.contains(w.as_str())) {
        weight
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).single().unwrap()
    }

    fn python_rules() -> RuleSet {
        RuleSet {
            keywords: vec!["python".into()],
            stack: vec!["python".into()],
            locations: vec!["remote".into()],
            max_age_days: 7,
            ..RuleSet::default()
        }
    }

    fn python_posting(age_days: i64) -> Posting {
        Posting {
            id: "fixture:1".into(),
            source: "fixture".into(),
            title: "Python Backend Engineer".into(),
            company: "Acme".into(),
            location: "Remote".into(),
            description: String::new(),
            stack: ["python", "django"].into_iter().map(String::from).collect(),
            url: "https://acme.test/jobs/1".into(),
            posted_at: as_of() - Duration::days(age_days),
            score: 0,
            alerted: false,
        }
    }

    #[test]
    fn fresh_full_match_scores_hundred() {
        let breakdown = score_breakdown(&python_posting(2), &python_rules(), as_of());
        assert_eq!(
            breakdown,
            ScoreBreakdown {
                freshness: 30,
                keyword: 40,
                stack: 20,
                location: 10
            }
        );
        assert_eq!(breakdown.total(), 100);
    }

    #[test]
    fn stale_posting_loses_freshness_only() {
        let rules = python_rules();
        let scored = score(&python_posting(20), &rules, as_of());
        assert_eq!(scored, 70);
        assert!(rules.is_alert_worthy(scored));
    }

    #[test]
    fn unrelated_fresh_posting_scores_freshness_only() {
        let mut posting = python_posting(0);
        posting.title = "Office Manager".into();
        posting.stack = ["excel".to_string()].into_iter().collect();
        posting.location = "Berlin".into();
        let rules = python_rules();
        let scored = score(&posting, &rules, as_of());
        assert_eq!(scored, 30);
        assert!(!rules.is_alert_worthy(scored));
    }

    #[test]
    fn freshness_decays_linearly_between_max_and_twice_max() {
        let rules = python_rules();
        let at = |hours: i64| {
            let mut p = python_posting(0);
            p.posted_at = as_of() - Duration::hours(hours);
            score_breakdown(&p, &rules, as_of()).freshness
        };
        assert_eq!(at(7 * 24), 30);
        assert_eq!(at(21 * 12), 15);
        assert_eq!(at(14 * 24), 0);
        assert_eq!(at(30 * 24), 0);
        // A date in the future counts as brand new.
        assert_eq!(at(-48), 30);
    }

    #[test]
    fn keyword_hits_are_case_insensitive_and_not_over_counted() {
        let mut rules = python_rules();
        rules.keywords = vec!["PYTHON".into(), "backend".into(), "engineer".into()];
        let breakdown = score_breakdown(&python_posting(0), &rules, as_of());
        assert_eq!(breakdown.keyword, 40);

        let mut posting = python_posting(0);
        posting.title = "Designer".into();
        posting.description = "You will pair with our python team".into();
        assert_eq!(score_breakdown(&posting, &rules, as_of()).keyword, 40);
    }

    #[test]
    fn stack_coverage_is_measured_against_rule_terms() {
        let mut rules = python_rules();
        rules.stack = vec!["python".into(), "rust".into()];
        assert_eq!(score_breakdown(&python_posting(0), &rules, as_of()).stack, 10);

        rules.stack = (0..8).map(|i| format!("tag{i}")).collect();
        let mut posting = python_posting(0);
        posting.stack = ["tag0".to_string()].into_iter().collect();
        // 20 * 1/8 = 2.5 rounds half up.
        assert_eq!(score_breakdown(&posting, &rules, as_of()).stack, 3);

        rules.stack.clear();
        assert_eq!(score_breakdown(&posting, &rules, as_of()).stack, 0);
    }

    #[test]
    fn location_matches_substrings_and_ignores_blank_rules() {
        let mut rules = python_rules();
        rules.locations = vec!["kenya".into(), "".into()];
        let mut posting = python_posting(0);
        posting.location = "Nairobi, Kenya".into();
        assert_eq!(score_breakdown(&posting, &rules, as_of()).location, 10);

        posting.location = "Lisbon".into();
        assert_eq!(score_breakdown(&posting, &rules, as_of()).location, 0);
    }

    #[test]
    fn oversized_weights_are_capped_at_hundred() {
        let mut rules = python_rules();
        rules.weights.keyword = 90;
        assert_eq!(score(&python_posting(0), &rules, as_of()), 100);
    }

    #[test]
    fn huge_breakdowns_saturate_instead_of_overflowing() {
        let breakdown = ScoreBreakdown {
            freshness: u32::MAX,
            keyword: u32::MAX,
            stack: 1,
            location: 1,
        };
        assert_eq!(breakdown.total(), 100);
    }

    #[test]
    fn scoring_is_reproducible() {
        let rules = python_rules();
        let posting = python_posting(9);
        let first = score(&posting, &rules, as_of());
        for _ in 0..10 {
            assert_eq!(score(&posting, &rules, as_of()), first);
        }
    }
}
