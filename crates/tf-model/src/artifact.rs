//! Step outputs: repository context, analysis and the generated ticket specification

use serde::{Deserialize, Serialize};

/// One repository file selected as context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFile {
    pub path: String,
    pub content: String,
}

/// Output of the context step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextBundle {
    /// Number of entries in the full tree before selection
    pub tree_size: usize,
    pub files: Vec<ContextFile>,
    /// Files dropped by the byte cap after selection
    #[serde(default)]
    pub truncated: usize,
}

impl ContextBundle {
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.files.iter().map(|f| f.content.len()).sum()
    }

    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.path.as_str()).collect()
    }
}

/// Rough implementation size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

/// Output of the analysis step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub summary: String,
    #[serde(default)]
    pub affected_areas: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub complexity: Complexity,
}

/// Endpoint change declared by a specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiChange {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Modify,
    Delete,
}

/// File-level change declared by a specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub action: ChangeAction,
    #[serde(default)]
    pub summary: String,
}

/// The implementation-ready ticket produced by synthesis
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketSpec {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub api_changes: Vec<ApiChange>,
    #[serde(default)]
    pub file_changes: Vec<FileChange>,
    #[serde(default)]
    pub test_plan: Vec<String>,
    /// Defaults assumed for questions left unanswered
    #[serde(default)]
    pub assumptions: Vec<String>,
}

impl TicketSpec {
    #[inline]
    #[must_use]
    pub fn has_api_changes(&self) -> bool {
        !self.api_changes.is_empty()
    }
}
