//! Error types for the model layer

use crate::step::StepStatus;

/// Model-level errors: illegal transitions and malformed shapes
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    /// Step status transition not in the allowed table
    #[error("illegal step transition: {from:?} -> {to:?}")]
    IllegalTransition { from: StepStatus, to: StepStatus },

    /// Question failed shape validation
    #[error("invalid question '{id}': {reason}")]
    InvalidQuestion { id: String, reason: String },

    /// Answer does not fit the question it targets
    #[error("invalid answer for question '{id}': {reason}")]
    InvalidAnswer { id: String, reason: String },

    /// Breakdown structure is inconsistent
    #[error("invalid breakdown: {0}")]
    InvalidBreakdown(String),

    /// Step id not present on the instance
    #[error("unknown step: {0}")]
    UnknownStep(u32),

    /// Every step already ran
    #[error("no active step")]
    NoActiveStep,

    /// Instance invariant broken
    #[error("invariant violated: {0}")]
    Invariant(String),
}
