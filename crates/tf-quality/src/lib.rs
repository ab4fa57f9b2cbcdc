//! Ticketflow Quality - weighted validation of generated specifications
//!
//! Each validator is a pure function over a [`TicketSpec`](tf_model::TicketSpec)
//! producing one [`ValidationResult`](tf_model::ValidationResult). The engine
//! weight-normalizes over the validators that apply, derives a creation gate
//! and records every pass in a bounded metrics buffer.
//!
//! # Example
//!
//! ```rust,ignore
//! use tf_quality::{QualityConfig, QualityEngine};
//!
//! let engine = QualityEngine::new(QualityConfig::default())?;
//! let report = engine.score(&spec);
//! if !report.gate.allows_creation() {
//!     println!("blocked: {:?}", report.blockers());
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod validators;

pub use config::{
    QualityConfig, BLOCK_THRESHOLD, DEFAULT_METRICS_CAPACITY, HIGH_CONFIDENCE_THRESHOLD,
};
pub use engine::{aggregate_score, QualityEngine};
pub use error::QualityError;
pub use metrics::{MetricsBuffer, ScoringMetric};
pub use validators::{
    default_validators, AcceptanceCriteriaValidator, ApiChangesValidator, ClarityValidator,
    CompletenessValidator, ScopeValidator, TestPlanValidator, Validator,
};
