//! Ticketflow Model - workflow instance, steps and clarification rounds
//!
//! Plain data shared by every other ticketflow crate:
//! - Workflow instances and their ordered step pipeline
//! - Step state machine
//! - Question rounds and answers
//! - Generated ticket specifications and quality results
//! - Breakdown drafts for large requirement documents
//!
//! Nothing in this crate performs I/O. Mutation rules (single writer,
//! persist-before-continue) are enforced by `tf-engine`.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod artifact;
pub mod draft;
pub mod error;
pub mod ids;
pub mod instance;
pub mod quality;
pub mod question;
pub mod step;

pub use artifact::{
    Analysis, ApiChange, ChangeAction, Complexity, ContextBundle, ContextFile, FileChange,
    TicketSpec,
};
pub use draft::{Breakdown, BreakdownDraft, Epic, Priority, StoryDraft};
pub use error::ModelError;
pub use ids::{DraftId, InstanceId, OwnerScope, TaskId, TicketId};
pub use instance::{
    InstanceSnapshot, InstanceStatus, RepositoryRef, StepOutputs, TicketBrief, WorkflowInstance,
};
pub use quality::{QualityGate, QualityReport, ValidationResult};
pub use question::{
    AnswerValue, Answers, InputType, Question, QuestionDraft, QuestionInput, QuestionRound,
};
pub use step::{allowed_transitions, validate_transition, Step, StepKind, StepStatus};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
