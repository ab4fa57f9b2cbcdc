//! Breakdown draft persistence
//!
//! `DraftStore` is the contract; `DocumentDraftStore` implements it over the
//! document store. `DraftCache` is what callers use: drafts only save
//! recomputation, so every store failure there is logged and becomes a miss.

use crate::document::{DocumentStore, WriteCondition};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tf_model::{Breakdown, BreakdownDraft, DraftId, OwnerScope};

/// Draft persistence contract
#[async_trait]
pub trait DraftStore: Send + Sync + std::fmt::Debug {
    /// Insert or replace, keeping the draft's own timestamps
    async fn save_draft(&self, draft: &BreakdownDraft) -> Result<(), StoreError>;

    /// Most recently updated live draft for the scope
    async fn get_latest(&self, scope: &OwnerScope) -> Result<Option<BreakdownDraft>, StoreError>;

    async fn get_by_id(
        &self,
        scope: &OwnerScope,
        id: DraftId,
    ) -> Result<Option<BreakdownDraft>, StoreError>;

    async fn delete(&self, scope: &OwnerScope, id: DraftId) -> Result<bool, StoreError>;
}

/// Draft store over a document store with optional TTL
#[derive(Debug, Clone)]
pub struct DocumentDraftStore {
    store: Arc<dyn DocumentStore>,
    ttl: Option<Duration>,
}

impl DocumentDraftStore {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store, ttl: None }
    }

    /// Drafts saved without an explicit expiry get `updated_at + ttl`
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    fn prefix(scope: &OwnerScope) -> String {
        format!(
            "drafts/{}/{}/",
            escape_segment(&scope.workspace_id),
            escape_segment(&scope.user_id)
        )
    }

    fn key(scope: &OwnerScope, id: DraftId) -> String {
        format!("{}{}", Self::prefix(scope), id)
    }

    /// Expired drafts are treated as absent and removed
    async fn live(&self, draft: BreakdownDraft) -> Option<BreakdownDraft> {
        if !draft.is_expired(Utc::now()) {
            return Some(draft);
        }
        let key = Self::key(&draft.scope(), draft.id);
        tracing::debug!(draft_id = %draft.id, "dropping expired draft");
        if let Err(err) = self.store.delete(&key).await {
            tracing::warn!(draft_id = %draft.id, "expired draft delete failed: {}", err);
        }
        None
    }
}

/// Key segment with `%` and `/` percent-encoded
fn escape_segment(raw: &str) -> String {
    raw.replace('%', "%25").replace('/', "%2F")
}

#[async_trait]
impl DraftStore for DocumentDraftStore {
    async fn save_draft(&self, draft: &BreakdownDraft) -> Result<(), StoreError> {
        let mut draft = draft.clone();
        if draft.expires_at.is_none() {
            if let Some(ttl) = self.ttl {
                draft.expires_at = Some(draft.updated_at + ttl);
            }
        }
        let body = serde_json::to_value(&draft)?;
        self.store
            .put(&Self::key(&draft.scope(), draft.id), body, WriteCondition::Any)
            .await?;
        Ok(())
    }

    async fn get_latest(&self, scope: &OwnerScope) -> Result<Option<BreakdownDraft>, StoreError> {
        let mut latest: Option<BreakdownDraft> = None;
        for doc in self.store.list(&Self::prefix(scope)).await? {
            let draft: BreakdownDraft = match serde_json::from_value(doc.body) {
                Ok(draft) => draft,
                Err(err) => {
                    tracing::warn!(key = %doc.key, "skipping undecodable draft: {}", err);
                    continue;
                }
            };
            if draft.scope() != *scope {
                tracing::warn!(key = %doc.key, "skipping draft filed under another scope");
                continue;
            }
            let Some(draft) = self.live(draft).await else {
                continue;
            };
            let newer = latest
                .as_ref()
                .map_or(true, |l| (draft.updated_at, draft.id) > (l.updated_at, l.id));
            if newer {
                latest = Some(draft);
            }
        }
        Ok(latest)
    }

    async fn get_by_id(
        &self,
        scope: &OwnerScope,
        id: DraftId,
    ) -> Result<Option<BreakdownDraft>, StoreError> {
        let Some(doc) = self.store.get(&Self::key(scope, id)).await? else {
            return Ok(None);
        };
        let draft: BreakdownDraft = serde_json::from_value(doc.body)?;
        if draft.scope() != *scope || draft.id != id {
            return Ok(None);
        }
        Ok(self.live(draft).await)
    }

    async fn delete(&self, scope: &OwnerScope, id: DraftId) -> Result<bool, StoreError> {
        self.store.delete(&Self::key(scope, id)).await
    }
}

/// Failure-tolerant draft access
#[derive(Debug, Clone)]
pub struct DraftCache {
    store: Arc<dyn DraftStore>,
}

impl DraftCache {
    #[must_use]
    pub fn new(store: Arc<dyn DraftStore>) -> Self {
        Self { store }
    }

    /// Save a fresh draft after a successful analysis
    pub async fn save(
        &self,
        scope: &OwnerScope,
        prd_text: impl Into<String>,
        breakdown: Breakdown,
    ) -> Option<BreakdownDraft> {
        if let Err(err) = breakdown.validate() {
            tracing::warn!(scope = %scope, "not caching invalid breakdown: {}", err);
            return None;
        }
        let draft = BreakdownDraft::new(scope, prd_text, breakdown);
        match self.store.save_draft(&draft).await {
            Ok(()) => Some(draft),
            Err(err) => {
                tracing::warn!(scope = %scope, "draft save failed: {}", err);
                None
            }
        }
    }

    /// Replace an existing draft's breakdown (user edit)
    pub async fn update(
        &self,
        scope: &OwnerScope,
        id: DraftId,
        breakdown: Breakdown,
    ) -> Option<BreakdownDraft> {
        if let Err(err) = breakdown.validate() {
            tracing::warn!(draft_id = %id, "not caching invalid breakdown: {}", err);
            return None;
        }
        let mut draft = self.get(scope, id).await?;
        draft.breakdown = breakdown;
        draft.updated_at = Utc::now();
        draft.expires_at = None;
        match self.store.save_draft(&draft).await {
            Ok(()) => Some(draft),
            Err(err) => {
                tracing::warn!(draft_id = %id, "draft update failed: {}", err);
                None
            }
        }
    }

    pub async fn latest(&self, scope: &OwnerScope) -> Option<BreakdownDraft> {
        self.store.get_latest(scope).await.unwrap_or_else(|err| {
            tracing::warn!(scope = %scope, "draft lookup failed: {}", err);
            None
        })
    }

    pub async fn get(&self, scope: &OwnerScope, id: DraftId) -> Option<BreakdownDraft> {
        self.store.get_by_id(scope, id).await.unwrap_or_else(|err| {
            tracing::warn!(draft_id = %id, "draft lookup failed: {}", err);
            None
        })
    }

    /// Explicit dismissal or successful bulk ticket creation
    pub async fn discard(&self, scope: &OwnerScope, id: DraftId) -> bool {
        self.store.delete(scope, id).await.unwrap_or_else(|err| {
            tracing::warn!(draft_id = %id, "draft delete failed: {}", err);
            false
        })
    }
}
