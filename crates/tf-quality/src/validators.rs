//! Built-in validators
//!
//! Validators are independent: none reads another's result and the order
//! they run in does not matter.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tf_model::{TicketSpec, ValidationResult};

/// One quality criterion
pub trait Validator: Send + Sync + std::fmt::Debug {
    /// Stable key, also used to look up the weight
    fn criterion(&self) -> &str;

    /// Validators that do not apply are left out of the aggregate entirely
    fn applies_to(&self, _spec: &TicketSpec) -> bool {
        true
    }

    fn validate(&self, spec: &TicketSpec, weight: f64) -> ValidationResult;
}

/// The standard validator set
#[must_use]
pub fn default_validators() -> Vec<Arc<dyn Validator>> {
    vec![
        Arc::new(CompletenessValidator::default()),
        Arc::new(AcceptanceCriteriaValidator::default()),
        Arc::new(ClarityValidator),
        Arc::new(ApiChangesValidator),
        Arc::new(TestPlanValidator::default()),
        Arc::new(ScopeValidator),
    ]
}

/// Title and description present and substantive
#[derive(Debug, Clone, Copy)]
pub struct CompletenessValidator {
    pub min_title_len: usize,
    pub min_description_len: usize,
}

impl Default for CompletenessValidator {
    fn default() -> Self {
        Self {
            min_title_len: 8,
            min_description_len: 40,
        }
    }
}

impl Validator for CompletenessValidator {
    fn criterion(&self) -> &str {
        "completeness"
    }

    fn validate(&self, spec: &TicketSpec, weight: f64) -> ValidationResult {
        let title = spec.title.trim();
        let description = spec.description.trim();

        if title.is_empty() {
            return ValidationResult::new(self.criterion(), 0.0, weight)
                .with_blocker("ticket has no title")
                .with_message("title missing");
        }

        let mut score = 0.0;
        let mut result_issues = Vec::new();
        if title.chars().count() >= self.min_title_len {
            score += 0.4;
        } else {
            result_issues.push(format!(
                "title shorter than {} characters",
                self.min_title_len
            ));
        }
        if description.chars().count() >= self.min_description_len {
            score += 0.6;
        } else if description.is_empty() {
            result_issues.push("description is empty".to_string());
        } else {
            score += 0.3;
            result_issues.push(format!(
                "description shorter than {} characters",
                self.min_description_len
            ));
        }

        let passed = result_issues.is_empty();
        let mut result = ValidationResult::new(self.criterion(), score, weight)
            .with_passed(passed)
            .with_message(if passed {
                "title and description complete"
            } else {
                "title or description incomplete"
            });
        result.issues = result_issues;
        result
    }
}

const TESTABLE_MARKERS: &[&str] = &[
    "should", "must", "given", "when", "then", "returns", "displays", "shows", "responds",
    "rejects", "accepts", "creates", "persists", "emits", "fails",
];

/// Enough acceptance criteria, phrased so they can be tested
#[derive(Debug, Clone, Copy)]
pub struct AcceptanceCriteriaValidator {
    pub min_criteria: usize,
}

impl Default for AcceptanceCriteriaValidator {
    fn default() -> Self {
        Self { min_criteria: 3 }
    }
}

impl AcceptanceCriteriaValidator {
    fn is_testable(criterion: &str) -> bool {
        let lower = criterion.to_lowercase();
        lower.len() >= 10
            && lower
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| TESTABLE_MARKERS.contains(&word))
    }
}

impl Validator for AcceptanceCriteriaValidator {
    fn criterion(&self) -> &str {
        "acceptance_criteria"
    }

    fn validate(&self, spec: &TicketSpec, weight: f64) -> ValidationResult {
        let criteria: Vec<&str> = spec
            .acceptance_criteria
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();

        if criteria.is_empty() {
            return ValidationResult::new(self.criterion(), 0.0, weight)
                .with_blocker("no acceptance criteria defined")
                .with_message("acceptance criteria missing");
        }

        let untestable: Vec<&str> = criteria
            .iter()
            .copied()
            .filter(|c| !Self::is_testable(c))
            .collect();
        let coverage = (criteria.len() as f64 / self.min_criteria.max(1) as f64).min(1.0);
        let testable_ratio = 1.0 - untestable.len() as f64 / criteria.len() as f64;
        let score = 0.5 * coverage + 0.5 * testable_ratio;

        let mut result = ValidationResult::new(self.criterion(), score, weight).with_message(
            format!(
                "{} criteria, {} testable",
                criteria.len(),
                criteria.len() - untestable.len()
            ),
        );
        if criteria.len() < self.min_criteria {
            result = result.with_issue(format!(
                "only {} acceptance criteria, expected at least {}",
                criteria.len(),
                self.min_criteria
            ));
        }
        for c in untestable {
            result = result.with_issue(format!("not testable as written: \"{c}\""));
        }
        result.with_passed(score >= 0.7)
    }
}

static VAGUE_TERMS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(etc\.?|tbd|somehow|something|maybe|probably|as needed|and so on|various|stuff|if possible)(\W|$)",
    )
    .expect("vague-term pattern is valid")
});

/// Flags vague wording in description and criteria
#[derive(Debug, Clone, Copy, Default)]
pub struct ClarityValidator;

impl Validator for ClarityValidator {
    fn criterion(&self) -> &str {
        "clarity"
    }

    fn validate(&self, spec: &TicketSpec, weight: f64) -> ValidationResult {
        let texts = std::iter::once(spec.description.as_str())
            .chain(spec.acceptance_criteria.iter().map(String::as_str));

        let mut hits: Vec<String> = Vec::new();
        for text in texts {
            for cap in VAGUE_TERMS.captures_iter(text) {
                hits.push(cap[1].to_lowercase());
            }
        }

        let score = (1.0 - 0.2 * hits.len() as f64).max(0.0);
        let mut result = ValidationResult::new(self.criterion(), score, weight);
        let mut seen = HashSet::new();
        for term in &hits {
            if seen.insert(term.as_str()) {
                result = result.with_issue(format!("vague wording: \"{term}\""));
            }
        }
        let message = if hits.is_empty() {
            "no vague wording".to_string()
        } else {
            format!("{} vague phrases", hits.len())
        };
        result.with_message(message).with_passed(score >= 0.6)
    }
}

const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// Endpoint changes are fully specified; only applies when there are any
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiChangesValidator;

impl Validator for ApiChangesValidator {
    fn criterion(&self) -> &str {
        "api_changes"
    }

    fn applies_to(&self, spec: &TicketSpec) -> bool {
        spec.has_api_changes()
    }

    fn validate(&self, spec: &TicketSpec, weight: f64) -> ValidationResult {
        let mut result = ValidationResult::new(self.criterion(), 1.0, weight);
        let mut complete = 0usize;
        for change in &spec.api_changes {
            let method = change.method.trim().to_uppercase();
            let mut ok = true;
            if !HTTP_METHODS.contains(&method.as_str()) {
                result = result.with_issue(format!("unknown HTTP method '{}'", change.method));
                ok = false;
            }
            if !change.path.starts_with('/') {
                result = result.with_issue(format!("endpoint path '{}' is not absolute", change.path));
                ok = false;
            }
            if change.description.trim().is_empty() {
                result = result.with_issue(format!("{method} {} has no description", change.path));
                ok = false;
            }
            if ok {
                complete += 1;
            }
        }
        let total = spec.api_changes.len().max(1);
        result.score = complete as f64 / total as f64;
        let passed = complete == spec.api_changes.len();
        result
            .with_message(format!("{complete}/{} endpoint changes complete", spec.api_changes.len()))
            .with_passed(passed)
    }
}

/// A test plan exists
#[derive(Debug, Clone, Copy)]
pub struct TestPlanValidator {
    pub min_entries: usize,
}

impl Default for TestPlanValidator {
    fn default() -> Self {
        Self { min_entries: 2 }
    }
}

impl Validator for TestPlanValidator {
    fn criterion(&self) -> &str {
        "test_plan"
    }

    fn validate(&self, spec: &TicketSpec, weight: f64) -> ValidationResult {
        let entries = spec
            .test_plan
            .iter()
            .filter(|t| !t.trim().is_empty())
            .count();
        let score = (entries as f64 / self.min_entries.max(1) as f64).min(1.0);
        let mut result = ValidationResult::new(self.criterion(), score, weight)
            .with_message(format!("{entries} test plan entries"));
        if entries == 0 {
            result = result.with_issue("no test plan");
        } else if entries < self.min_entries {
            result = result.with_issue(format!(
                "test plan has {entries} entries, expected at least {}",
                self.min_entries
            ));
        }
        result.with_passed(entries >= self.min_entries)
    }
}

/// File-level change list is present and well formed
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeValidator;

impl Validator for ScopeValidator {
    fn criterion(&self) -> &str {
        "scope"
    }

    fn validate(&self, spec: &TicketSpec, weight: f64) -> ValidationResult {
        if spec.file_changes.is_empty() {
            return ValidationResult::new(self.criterion(), 0.5, weight)
                .with_issue("no file-level changes listed")
                .with_message("scope unspecified")
                .with_passed(false);
        }

        let mut result = ValidationResult::new(self.criterion(), 1.0, weight);
        let mut seen = HashSet::new();
        let mut problems = 0usize;
        for change in &spec.file_changes {
            let path = change.path.trim();
            if path.is_empty() || path.starts_with('/') || path.split('/').any(|p| p == "..") {
                result = result.with_issue(format!("suspicious path '{}'", change.path));
                problems += 1;
            } else if !seen.insert(path) {
                result = result.with_issue(format!("'{path}' listed more than once"));
                problems += 1;
            }
        }
        result.score = 1.0 - problems as f64 / spec.file_changes.len() as f64;
        result
            .with_message(format!("{} files in scope", seen.len()))
            .with_passed(problems == 0)
    }
}
