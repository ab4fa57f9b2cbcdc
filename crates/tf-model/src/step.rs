//! Pipeline steps and the step state machine

use crate::error::ModelError;
use serde::{Deserialize, Serialize};

/// Status of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
    Suspended,
}

/// Statuses reachable from `from`.
///
/// `InProgress -> Pending` covers a cancelled attempt whose result was
/// discarded. `Failed -> Pending` is the explicit retry path.
#[must_use]
pub fn allowed_transitions(from: StepStatus) -> &'static [StepStatus] {
    use StepStatus::*;
    match from {
        Pending => &[InProgress],
        InProgress => &[Complete, Failed, Suspended, Pending],
        Suspended => &[InProgress, Complete, Pending],
        Failed => &[Pending],
        Complete => &[],
    }
}

/// Validates a step status transition.
pub fn validate_transition(from: StepStatus, to: StepStatus) -> Result<(), ModelError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(ModelError::IllegalTransition { from, to })
    }
}

/// What a step does when executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Repository context gathering
    Context,
    /// Deep analysis of the intent against gathered context
    Analysis,
    /// Clarification question rounds (the only suspension point)
    Questions,
    /// Specification synthesis
    Specification,
    /// Quality scoring and gating
    Finalization,
}

impl StepKind {
    /// Standard pipeline, in execution order
    pub const PIPELINE: [StepKind; 5] = [
        StepKind::Context,
        StepKind::Analysis,
        StepKind::Questions,
        StepKind::Specification,
        StepKind::Finalization,
    ];

    #[inline]
    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            StepKind::Context => "Gathering repository context",
            StepKind::Analysis => "Analyzing requirements",
            StepKind::Questions => "Clarifying questions",
            StepKind::Specification => "Writing specification",
            StepKind::Finalization => "Validating quality",
        }
    }

    #[inline]
    #[must_use]
    pub fn is_question_step(self) -> bool {
        matches!(self, StepKind::Questions)
    }

    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Context => "context",
            StepKind::Analysis => "analysis",
            StepKind::Questions => "questions",
            StepKind::Specification => "specification",
            StepKind::Finalization => "finalization",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of pipeline work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// 1-based position in the pipeline
    pub id: u32,
    pub kind: StepKind,
    pub title: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Retained verbatim from the failing action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Step {
    #[inline]
    #[must_use]
    pub fn new(id: u32, kind: StepKind) -> Self {
        Self {
            id,
            kind,
            title: kind.title().to_string(),
            status: StepStatus::Pending,
            details: None,
            error: None,
        }
    }

    /// Move to `to`, rejecting transitions outside the table
    pub fn transition(&mut self, to: StepStatus) -> Result<(), ModelError> {
        validate_transition(self.status, to)?;
        self.status = to;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), ModelError> {
        self.transition(StepStatus::InProgress)?;
        self.error = None;
        Ok(())
    }

    pub fn complete(&mut self, details: Option<String>) -> Result<(), ModelError> {
        self.transition(StepStatus::Complete)?;
        if details.is_some() {
            self.details = details;
        }
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), ModelError> {
        self.transition(StepStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    pub fn suspend(&mut self, details: Option<String>) -> Result<(), ModelError> {
        self.transition(StepStatus::Suspended)?;
        if details.is_some() {
            self.details = details;
        }
        Ok(())
    }

    /// Back to `Pending`; clears the retained error
    pub fn reset(&mut self) -> Result<(), ModelError> {
        self.transition(StepStatus::Pending)?;
        self.error = None;
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == StepStatus::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [StepStatus; 5] = [
        StepStatus::Pending,
        StepStatus::InProgress,
        StepStatus::Complete,
        StepStatus::Failed,
        StepStatus::Suspended,
    ];

    #[test]
    fn pending_only_starts() {
        assert!(validate_transition(StepStatus::Pending, StepStatus::InProgress).is_ok());
        assert!(validate_transition(StepStatus::Pending, StepStatus::Complete).is_err());
        assert!(validate_transition(StepStatus::Pending, StepStatus::Failed).is_err());
    }

    #[test]
    fn complete_is_terminal() {
        for to in ALL {
            assert!(validate_transition(StepStatus::Complete, to).is_err());
        }
    }

    #[test]
    fn failed_only_resets() {
        assert!(validate_transition(StepStatus::Failed, StepStatus::Pending).is_ok());
        assert!(validate_transition(StepStatus::Failed, StepStatus::InProgress).is_err());
    }

    #[test]
    fn fail_retains_error_verbatim() {
        let mut step = Step::new(1, StepKind::Analysis);
        step.start().unwrap();
        step.fail("provider error: rate limited (429)").unwrap();
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.error.as_deref(), Some("provider error: rate limited (429)"));

        step.reset().unwrap();
        assert_eq!(step.status, StepStatus::Pending);
        assert!(step.error.is_none());
    }

    #[test]
    fn step_title_follows_kind() {
        let step = Step::new(3, StepKind::Questions);
        assert_eq!(step.title, "Clarifying questions");
        assert!(step.kind.is_question_step());
    }

    #[test]
    fn transition_table_matches_validation() {
        for from in ALL {
            for to in ALL {
                let allowed = allowed_transitions(from).contains(&to);
                assert_eq!(validate_transition(from, to).is_ok(), allowed);
            }
        }
    }
}
