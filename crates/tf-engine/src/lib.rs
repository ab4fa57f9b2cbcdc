//! Ticketflow Engine - resumable ticket generation workflows
//!
//! Turns a short ticket intent into an implementation-ready specification:
//! - Gathers bounded repository context
//! - Analyses the intent through a reasoning capability
//! - Asks clarification rounds and suspends until they are answered or skipped
//! - Synthesizes the specification and gates it on quality
//! - Fans batches of tickets out over a bounded worker pool
//!
//! Every step transition is persisted before the next step starts, so an
//! instance can be resumed by any engine over the same store.
//!
//! # Example
//!
//! ```rust,ignore
//! use tf_engine::{EngineConfig, NoRepository, WorkflowEngine};
//! use tf_model::{OwnerScope, TicketBrief};
//!
//! # async fn example(reasoning: std::sync::Arc<dyn tf_engine::ReasoningProvider>) -> Result<(), tf_engine::EngineError> {
//! let store = std::sync::Arc::new(tf_store::MemoryStore::new());
//! let engine = WorkflowEngine::new(EngineConfig::default(), store, reasoning, std::sync::Arc::new(NoRepository))?;
//!
//! let scope = OwnerScope::new("workspace", "user");
//! let id = engine.start(&scope, TicketBrief::new("T-1", "CSV export", "Export reports as CSV")).await?;
//! let snapshot = engine.drive(&scope, id, None).await?;
//! println!("{:?}", snapshot.status);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod bulk;
pub mod capability;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod prompt;
pub mod questions;
pub mod response;
pub mod simulation;

pub use bulk::{
    BulkEnrichmentCoordinator, BulkJobId, BulkJobStatus, BulkJobs, BulkPhase, BulkProgressEvent,
    BulkReport, Outcome, TaskCursor, TaskStage,
};
pub use capability::{
    NoRepository, Prompt, PromptTask, ProviderError, ReasoningProvider, RepositoryContext,
};
pub use config::{DefaultAnswerPolicy, EngineConfig};
pub use context::ContextSelector;
pub use engine::WorkflowEngine;
pub use error::EngineError;
pub use questions::{QuestionRoundManager, NO_PREFERENCE};
pub use simulation::{run_simulation, SimulationConfig, SimulationReport, SimulatedReasoning};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving workflows
    pub use crate::{
        BulkEnrichmentCoordinator, BulkPhase, BulkReport, EngineConfig, EngineError, Outcome,
        ReasoningProvider, RepositoryContext, WorkflowEngine,
    };
    pub use tf_model::{
        Answers, InstanceId, InstanceSnapshot, InstanceStatus, OwnerScope, TicketBrief, TicketId,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
