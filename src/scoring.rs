//! Credibility scoring.
//!
//! A linear, severity-weighted deduction from a base score, clamped to
//! `[0, base]`. The base never exceeds [`MAX_SCORE`]. Every lost point
//! traces back to one violation.

use crate::collector::types::{Severity, ViolationEvent};
use crate::config::{Config, SeverityWeights};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Upper bound of every credibility score.
pub const MAX_SCORE: u32 = 100;

/// Score for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredibilityScore {
    pub score: u32,
    pub base_score: u32,
    pub total_violations: usize,
    /// Summed deduction per severity. Only severities that occurred appear.
    pub breakdown: BTreeMap<Severity, i32>,
}

impl CredibilityScore {
    pub fn rating(&self) -> CredibilityRating {
        CredibilityRating::from_score(self.score)
    }
}

/// Reviewer-facing band for a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredibilityRating {
    Good,
    Fair,
    Poor,
}

impl CredibilityRating {
    pub fn from_score(score: u32) -> Self {
        match score {
            80.. => CredibilityRating::Good,
            50..=79 => CredibilityRating::Fair,
            _ => CredibilityRating::Poor,
        }
    }
}

impl std::fmt::Display for CredibilityRating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CredibilityRating::Good => "Good",
            CredibilityRating::Fair => "Fair",
            CredibilityRating::Poor => "Poor",
        };
        f.write_str(label)
    }
}

/// Score a violation list. Pure: depends only on the list's contents.
pub fn score(violations: &[ViolationEvent], weights: &SeverityWeights, base_score: u32) -> CredibilityScore {
    let base_score = base_score.min(MAX_SCORE);
    let mut breakdown: BTreeMap<Severity, i32> = BTreeMap::new();
    let mut total: i64 = 0;

    for violation in violations {
        let delta = weights.delta(violation.severity);
        *breakdown.entry(violation.severity).or_insert(0) += delta;
        total += i64::from(delta);
    }

    let score = (i64::from(base_score) + total).clamp(0, i64::from(base_score));

    CredibilityScore {
        score: score as u32,
        base_score,
        total_violations: violations.len(),
        breakdown,
    }
}

/// Scoring with the configured weights and base.
#[derive(Debug, Clone, Copy)]
pub struct ScoringEngine {
    weights: SeverityWeights,
    base_score: u32,
}

impl ScoringEngine {
    pub fn new(weights: SeverityWeights, base_score: u32) -> Self {
        Self {
            weights,
            base_score,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.severity_weights, config.base_score)
    }

    pub fn score(&self, violations: &[ViolationEvent]) -> CredibilityScore {
        score(violations, &self.weights, self.base_score)
    }
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new(SeverityWeights::default(), 100)
    }
}

/// Count of violations per severity. Always carries all four keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityHistogram {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityHistogram {
    pub fn from_events(violations: &[ViolationEvent]) -> Self {
        let mut histogram = Self::default();
        for violation in violations {
            match violation.severity {
                Severity::Critical => histogram.critical += 1,
                Severity::High => histogram.high += 1,
                Severity::Medium => histogram.medium += 1,
                Severity::Low => histogram.low += 1,
            }
        }
        histogram
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }
}
