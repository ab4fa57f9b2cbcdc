//! External capabilities consumed by the engine
//!
//! The reasoning capability turns a prompt into structured text; the
//! repository capability lists and reads source files. Both are opaque:
//! the engine validates everything they return.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tf_model::{RepositoryRef, TicketId};

/// Failure reported by an external capability
///
/// Displays as the bare message so it can be surfaced verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
}

impl ProviderError {
    #[inline]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// What a prompt asks the reasoning capability to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptTask {
    Analysis,
    Questions,
    Specification,
}

impl PromptTask {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PromptTask::Analysis => "analysis",
            PromptTask::Questions => "questions",
            PromptTask::Specification => "specification",
        }
    }
}

/// Prompt plus structured context for one reasoning call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub task: PromptTask,
    pub ticket_id: TicketId,
    /// Instructions, including the required response shape
    pub body: String,
    pub context: serde_json::Value,
}

/// Language-model reasoning
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    /// Returns raw text expected to contain one JSON object
    async fn invoke(&self, prompt: &Prompt) -> Result<String, ProviderError>;
}

/// Source-control file access
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RepositoryContext: Send + Sync {
    /// Every file path in the tree
    async fn file_tree(&self, repository: &RepositoryRef) -> Result<Vec<String>, ProviderError>;

    /// Contents of the requested paths; missing paths are simply absent
    async fn read_files(
        &self,
        repository: &RepositoryRef,
        paths: &[String],
    ) -> Result<BTreeMap<String, String>, ProviderError>;
}

/// Repository capability for deployments without source-control access
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRepository;

#[async_trait]
impl RepositoryContext for NoRepository {
    async fn file_tree(&self, _repository: &RepositoryRef) -> Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }

    async fn read_files(
        &self,
        _repository: &RepositoryRef,
        _paths: &[String],
    ) -> Result<BTreeMap<String, String>, ProviderError> {
        Ok(BTreeMap::new())
    }
}
