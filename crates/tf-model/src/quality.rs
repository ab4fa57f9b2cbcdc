//! Validation results and aggregate quality reports

use serde::{Deserialize, Serialize};

/// One criterion's verdict for one scoring pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub criterion: String,
    pub passed: bool,
    /// In `[0, 1]`
    pub score: f64,
    /// Strictly positive
    pub weight: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
    pub message: String,
}

impl ValidationResult {
    #[must_use]
    pub fn new(criterion: impl Into<String>, score: f64, weight: f64) -> Self {
        let score = score.clamp(0.0, 1.0);
        Self {
            criterion: criterion.into(),
            passed: true,
            score,
            weight,
            issues: Vec::new(),
            blockers: Vec::new(),
            message: String::new(),
        }
    }

    #[must_use]
    pub fn with_issue(mut self, issue: impl Into<String>) -> Self {
        self.issues.push(issue.into());
        self
    }

    /// Add a blocker; a blocked result never passes
    #[must_use]
    pub fn with_blocker(mut self, blocker: impl Into<String>) -> Self {
        self.blockers.push(blocker.into());
        self.passed = false;
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    #[must_use]
    pub fn with_passed(mut self, passed: bool) -> Self {
        self.passed = passed && self.blockers.is_empty();
        self
    }

    #[inline]
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        !self.blockers.is_empty()
    }
}

/// Creation gate derived from the overall score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityGate {
    /// Creation is blocked
    Blocked,
    /// Creation allowed, issues surfaced
    AllowedWithIssues,
    HighConfidence,
}

impl QualityGate {
    #[inline]
    #[must_use]
    pub fn allows_creation(self) -> bool {
        !matches!(self, QualityGate::Blocked)
    }
}

/// Aggregate of one scoring pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    pub results: Vec<ValidationResult>,
    /// Weight-normalized score on a 0-100 scale
    pub overall: f64,
    pub passed: bool,
    pub gate: QualityGate,
    pub duration_ms: u64,
}

impl QualityReport {
    /// Blockers prefixed with their criterion
    #[must_use]
    pub fn blockers(&self) -> Vec<String> {
        self.results
            .iter()
            .flat_map(|r| r.blockers.iter().map(move |b| format!("{}: {}", r.criterion, b)))
            .collect()
    }

    /// Issues prefixed with their criterion
    #[must_use]
    pub fn issues(&self) -> Vec<String> {
        self.results
            .iter()
            .flat_map(|r| r.issues.iter().map(move |i| format!("{}: {}", r.criterion, i)))
            .collect()
    }

    #[must_use]
    pub fn result(&self, criterion: &str) -> Option<&ValidationResult> {
        self.results.iter().find(|r| r.criterion == criterion)
    }
}
