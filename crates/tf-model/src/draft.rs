//! Breakdown drafts: resumable analysis of a large requirements document

use crate::error::ModelError;
use crate::ids::{DraftId, OwnerScope};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

/// A story shaped like a ticket draft
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    /// Indices into the breakdown's flattened story list
    #[serde(default)]
    pub blocked_by: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epic {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub stories: Vec<StoryDraft>,
}

/// Epics and their stories
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakdown {
    pub epics: Vec<Epic>,
}

impl Breakdown {
    /// Stories in epic order; `blocked_by` indexes into this sequence
    pub fn stories(&self) -> impl Iterator<Item = &StoryDraft> {
        self.epics.iter().flat_map(|e| e.stories.iter())
    }

    #[must_use]
    pub fn story_count(&self) -> usize {
        self.epics.iter().map(|e| e.stories.len()).sum()
    }

    /// Blocking references must point at another existing story
    pub fn validate(&self) -> Result<(), ModelError> {
        let total = self.story_count();
        for (index, story) in self.stories().enumerate() {
            if story.title.trim().is_empty() {
                return Err(ModelError::InvalidBreakdown(format!(
                    "story {index} has no title"
                )));
            }
            for &blocker in &story.blocked_by {
                if blocker >= total {
                    return Err(ModelError::InvalidBreakdown(format!(
                        "story {index} blocked by unknown story {blocker}"
                    )));
                }
                if blocker == index {
                    return Err(ModelError::InvalidBreakdown(format!(
                        "story {index} blocks itself"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Cached analysis of a requirements document for one (workspace, user)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakdownDraft {
    pub id: DraftId,
    pub workspace_id: String,
    pub user_id: String,
    pub prd_text: String,
    pub breakdown: Breakdown,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl BreakdownDraft {
    #[must_use]
    pub fn new(scope: &OwnerScope, prd_text: impl Into<String>, breakdown: Breakdown) -> Self {
        let now = Utc::now();
        Self {
            id: DraftId::new(),
            workspace_id: scope.workspace_id.clone(),
            user_id: scope.user_id.clone(),
            prd_text: prd_text.into(),
            breakdown,
            created_at: now,
            updated_at: now,
            expires_at: None,
        }
    }

    #[must_use]
    pub fn scope(&self) -> OwnerScope {
        OwnerScope::new(&self.workspace_id, &self.user_id)
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = Some(self.updated_at + ttl);
        self
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
