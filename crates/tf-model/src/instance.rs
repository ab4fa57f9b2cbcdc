//! Workflow instance: one ticket generation attempt
//!
//! The instance owns its ordered steps, the clarification rounds produced
//! along the way and the outputs of completed steps. Status is derived from
//! step statuses, never stored.

use crate::artifact::{Analysis, ContextBundle, TicketSpec};
use crate::error::ModelError;
use crate::ids::{InstanceId, OwnerScope, TicketId};
use crate::quality::QualityReport;
use crate::question::QuestionRound;
use crate::step::{Step, StepKind, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source-control location used for context gathering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

impl RepositoryRef {
    #[must_use]
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: branch.into(),
        }
    }
}

/// The short user intent a generation attempt starts from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketBrief {
    pub id: TicketId,
    pub title: String,
    pub intent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositoryRef>,
}

impl TicketBrief {
    #[must_use]
    pub fn new(id: impl Into<TicketId>, title: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            intent: intent.into(),
            repository: None,
        }
    }

    #[must_use]
    pub fn with_repository(mut self, repository: RepositoryRef) -> Self {
        self.repository = Some(repository);
        self
    }
}

/// Derived instance status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Idle between advances, nothing in flight
    Pending,
    Running,
    Suspended,
    Complete,
    Failed,
    Cancelled,
}

impl InstanceStatus {
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InstanceStatus::Complete | InstanceStatus::Failed | InstanceStatus::Cancelled
        )
    }
}

/// Outputs of completed steps, fed into later prompts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutputs {
    #[serde(default)]
    pub context: Option<ContextBundle>,
    #[serde(default)]
    pub analysis: Option<Analysis>,
    #[serde(default)]
    pub specification: Option<TicketSpec>,
    #[serde(default)]
    pub quality: Option<QualityReport>,
}

/// Persisted state of one generation attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    pub id: InstanceId,
    pub ticket: TicketBrief,
    pub owner: OwnerScope,
    pub steps: Vec<Step>,
    /// `0 <= current_step_index <= steps.len()`
    pub current_step_index: usize,
    #[serde(default)]
    pub rounds: Vec<QuestionRound>,
    #[serde(default)]
    pub outputs: StepOutputs,
    #[serde(default)]
    pub cancelled: bool,
    /// Store version this copy was read at
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// New instance with the standard five-step pipeline
    #[must_use]
    pub fn new(ticket: TicketBrief, owner: OwnerScope) -> Self {
        Self::with_pipeline(ticket, owner, &StepKind::PIPELINE)
    }

    #[must_use]
    pub fn with_pipeline(ticket: TicketBrief, owner: OwnerScope, kinds: &[StepKind]) -> Self {
        let now = Utc::now();
        let steps = kinds
            .iter()
            .zip(1u32..)
            .map(|(kind, id)| Step::new(id, *kind))
            .collect();
        Self {
            id: InstanceId::new(),
            ticket,
            owner,
            steps,
            current_step_index: 0,
            rounds: Vec::new(),
            outputs: StepOutputs::default(),
            cancelled: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Derived status
    #[must_use]
    pub fn status(&self) -> InstanceStatus {
        if self.cancelled {
            return InstanceStatus::Cancelled;
        }
        if self.steps.iter().all(Step::is_complete) {
            return InstanceStatus::Complete;
        }
        if self.steps.iter().any(|s| s.status == StepStatus::InProgress) {
            return InstanceStatus::Running;
        }
        let failed = self.steps.iter().enumerate().any(|(i, s)| {
            s.status == StepStatus::Failed && !self.steps[i + 1..].iter().any(Step::is_complete)
        });
        if failed {
            return InstanceStatus::Failed;
        }
        if self
            .active_step()
            .is_some_and(|s| s.status == StepStatus::Suspended)
        {
            return InstanceStatus::Suspended;
        }
        InstanceStatus::Pending
    }

    #[inline]
    #[must_use]
    pub fn active_step(&self) -> Option<&Step> {
        self.steps.get(self.current_step_index)
    }

    fn active_mut(&mut self) -> Result<&mut Step, ModelError> {
        self.steps
            .get_mut(self.current_step_index)
            .ok_or(ModelError::NoActiveStep)
    }

    #[must_use]
    pub fn step(&self, id: u32) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.is_complete()).count()
    }

    /// Mark the active step `InProgress`
    pub fn begin_active(&mut self) -> Result<StepKind, ModelError> {
        let step = self.active_mut()?;
        step.start()?;
        let kind = step.kind;
        self.touch();
        Ok(kind)
    }

    /// Complete the active step and move the cursor forward
    pub fn complete_active(&mut self, details: Option<String>) -> Result<(), ModelError> {
        self.active_mut()?.complete(details)?;
        self.current_step_index += 1;
        self.touch();
        Ok(())
    }

    /// Fail the active step; the cursor stays put so retry re-runs it
    pub fn fail_active(&mut self, error: impl Into<String>) -> Result<(), ModelError> {
        self.active_mut()?.fail(error)?;
        self.touch();
        Ok(())
    }

    pub fn suspend_active(&mut self, details: Option<String>) -> Result<(), ModelError> {
        self.active_mut()?.suspend(details)?;
        self.touch();
        Ok(())
    }

    /// Return an in-flight or suspended active step to `Pending`
    pub fn release_active(&mut self) -> Result<(), ModelError> {
        self.active_mut()?.reset()?;
        self.touch();
        Ok(())
    }

    /// Reset exactly the failing step for retry
    pub fn reset_failed(&mut self, step_id: u32) -> Result<(), ModelError> {
        let index = self
            .steps
            .iter()
            .position(|s| s.id == step_id)
            .ok_or(ModelError::UnknownStep(step_id))?;
        if index != self.current_step_index {
            return Err(ModelError::Invariant(format!(
                "step {step_id} is not the active step"
            )));
        }
        self.steps[index].reset()?;
        self.touch();
        Ok(())
    }

    #[must_use]
    pub fn latest_round(&self) -> Option<&QuestionRound> {
        self.rounds.last()
    }

    #[must_use]
    pub fn open_round(&self) -> Option<&QuestionRound> {
        self.rounds.last().filter(|r| r.is_open())
    }

    #[must_use]
    pub fn next_round_number(&self) -> u32 {
        self.rounds.last().map_or(1, |r| r.round_number + 1)
    }

    #[inline]
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Check the step-cursor invariant: every step before the cursor is
    /// `Complete`, every step after it is `Pending`.
    pub fn check_invariants(&self) -> Result<(), ModelError> {
        if self.current_step_index > self.steps.len() {
            return Err(ModelError::Invariant(format!(
                "cursor {} past {} steps",
                self.current_step_index,
                self.steps.len()
            )));
        }
        let (done, rest) = self.steps.split_at(self.current_step_index);
        if let Some(step) = done.iter().find(|s| !s.is_complete()) {
            return Err(ModelError::Invariant(format!(
                "step {} before cursor is {:?}",
                step.id, step.status
            )));
        }
        if let Some(step) = rest
            .iter()
            .skip(1)
            .find(|s| s.status != StepStatus::Pending)
        {
            return Err(ModelError::Invariant(format!(
                "step {} after cursor is {:?}",
                step.id, step.status
            )));
        }
        if rest.first().is_some_and(Step::is_complete) {
            return Err(ModelError::Invariant(
                "active step complete without cursor advance".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            id: self.id,
            ticket_id: self.ticket.id.clone(),
            status: self.status(),
            current_step_index: self.current_step_index,
            steps: self.steps.clone(),
            open_round: self.open_round().cloned(),
            rounds_completed: self.rounds.iter().filter(|r| !r.is_open()).count(),
            specification: self.outputs.specification.clone(),
            quality: self.outputs.quality.clone(),
            version: self.version,
            updated_at: self.updated_at,
        }
    }
}

/// Immutable view published to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSnapshot {
    pub id: InstanceId,
    pub ticket_id: TicketId,
    pub status: InstanceStatus,
    pub current_step_index: usize,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub open_round: Option<QuestionRound>,
    pub rounds_completed: usize,
    #[serde(default)]
    pub specification: Option<TicketSpec>,
    #[serde(default)]
    pub quality: Option<QualityReport>,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl InstanceSnapshot {
    /// The step the cursor points at
    #[must_use]
    pub fn active_step(&self) -> Option<&Step> {
        self.steps.get(self.current_step_index)
    }

    /// Error retained on the failing step, if any
    #[must_use]
    pub fn failure(&self) -> Option<(&Step, &str)> {
        self.steps
            .iter()
            .find(|s| s.status == StepStatus::Failed)
            .and_then(|s| s.error.as_deref().map(|e| (s, e)))
    }
}
