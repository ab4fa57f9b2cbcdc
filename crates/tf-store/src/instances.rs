//! Typed persistence for workflow instances

use crate::document::{DocumentStore, WriteCondition};
use crate::error::StoreError;
use std::sync::Arc;
use tf_model::{InstanceId, WorkflowInstance};

const PREFIX: &str = "instances/";

/// Instance repository over a document store
///
/// Writes are compare-and-set on `WorkflowInstance::version`; a stale copy
/// fails with `StoreError::VersionConflict` and must be reloaded.
#[derive(Debug, Clone)]
pub struct InstanceRepository {
    store: Arc<dyn DocumentStore>,
}

impl InstanceRepository {
    #[inline]
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn key(id: InstanceId) -> String {
        format!("{PREFIX}{id}")
    }

    /// Insert a new instance; sets its version
    pub async fn create(&self, instance: &mut WorkflowInstance) -> Result<(), StoreError> {
        let body = serde_json::to_value(&*instance)?;
        instance.version = self
            .store
            .put(&Self::key(instance.id), body, WriteCondition::Absent)
            .await?;
        Ok(())
    }

    pub async fn load(&self, id: InstanceId) -> Result<WorkflowInstance, StoreError> {
        let key = Self::key(id);
        let doc = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        let mut instance: WorkflowInstance = serde_json::from_value(doc.body)?;
        instance.version = doc.version;
        Ok(instance)
    }

    /// Conditional write at the version the instance was loaded at
    pub async fn save(&self, instance: &mut WorkflowInstance) -> Result<(), StoreError> {
        let body = serde_json::to_value(&*instance)?;
        instance.version = self
            .store
            .put(
                &Self::key(instance.id),
                body,
                WriteCondition::Version(instance.version),
            )
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: InstanceId) -> Result<bool, StoreError> {
        self.store.delete(&Self::key(id)).await
    }

    /// Every stored instance, oldest id first
    pub async fn list(&self) -> Result<Vec<WorkflowInstance>, StoreError> {
        self.store
            .list(PREFIX)
            .await?
            .into_iter()
            .map(|doc| {
                let mut instance: WorkflowInstance = serde_json::from_value(doc.body)?;
                instance.version = doc.version;
                Ok(instance)
            })
            .collect()
    }
}
