//! In-process document store backed by `DashMap`

use crate::document::{Document, DocumentStore, WriteCondition};
use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// One key's document plus its change feed. A slot that was ever written
/// outlives deletion so versions never restart and existing watchers keep
/// their channel.
#[derive(Debug)]
struct Slot {
    doc: Option<Document>,
    last_version: u64,
    tx: watch::Sender<Option<Document>>,
}

impl Slot {
    fn empty() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            doc: None,
            last_version: 0,
            tx,
        }
    }

    /// Never written and nobody watching
    fn is_idle(&self) -> bool {
        self.doc.is_none() && self.last_version == 0 && self.tx.receiver_count() == 0
    }
}

/// Versioned in-memory store
///
/// Conditional writes are checked and applied under the key's shard lock,
/// and the change feed is notified before the lock is released, so
/// watchers observe versions in write order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: DashMap<String, Slot>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with a backend error (outage simulation)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of live documents
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.doc.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Backend("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Document>, StoreError> {
        self.check_available()?;
        Ok(self.slots.get(key).and_then(|slot| slot.doc.clone()))
    }

    async fn put(
        &self,
        key: &str,
        body: Value,
        condition: WriteCondition,
    ) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut slot = self.slots.entry(key.to_string()).or_insert_with(Slot::empty);

        let actual = slot.doc.as_ref().map(|d| d.version);
        let holds = match condition {
            WriteCondition::Any => true,
            WriteCondition::Absent => actual.is_none(),
            WriteCondition::Version(expected) => actual == Some(expected),
        };
        if !holds {
            return Err(StoreError::VersionConflict {
                key: key.to_string(),
                expected: match condition {
                    WriteCondition::Version(v) => Some(v),
                    _ => None,
                },
                actual,
            });
        }

        let version = slot.last_version + 1;
        let doc = Document {
            key: key.to_string(),
            version,
            body,
        };
        slot.last_version = version;
        slot.doc = Some(doc.clone());
        slot.tx.send_replace(Some(doc));
        Ok(version)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        let Some(mut slot) = self.slots.get_mut(key) else {
            return Ok(false);
        };
        if slot.doc.take().is_some() {
            slot.tx.send_replace(None);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Document>, StoreError> {
        self.check_available()?;
        let mut docs: Vec<Document> = self
            .slots
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .filter_map(|entry| entry.doc.clone())
            .collect();
        docs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(docs)
    }

    fn watch(&self, key: &str) -> watch::Receiver<Option<Document>> {
        self.slots.retain(|_, slot| !slot.is_idle());
        self.slots
            .entry(key.to_string())
            .or_insert_with(Slot::empty)
            .tx
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_get_roundtrip_bumps_version() {
        let store = MemoryStore::new();
        let v1 = store.put("a", json!({"n": 1}), WriteCondition::Any).await.unwrap();
        let v2 = store.put("a", json!({"n": 2}), WriteCondition::Any).await.unwrap();
        assert_eq!((v1, v2), (1, 2));

        let doc = store.get("a").await.unwrap().unwrap();
        assert_eq!(doc.version, 2);
        assert_eq!(doc.body["n"], 2);
    }

    #[tokio::test]
    async fn conditional_writes() {
        let store = MemoryStore::new();
        store.put("a", json!(1), WriteCondition::Absent).await.unwrap();

        let err = store.put("a", json!(2), WriteCondition::Absent).await.unwrap_err();
        assert!(err.is_conflict());

        let err = store
            .put("a", json!(2), WriteCondition::Version(7))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::VersionConflict {
                key: "a".into(),
                expected: Some(7),
                actual: Some(1)
            }
        );

        assert_eq!(
            store.put("a", json!(2), WriteCondition::Version(1)).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn versions_survive_delete() {
        let store = MemoryStore::new();
        store.put("a", json!(1), WriteCondition::Any).await.unwrap();
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(store.get("a").await.unwrap().is_none());

        let v = store.put("a", json!(1), WriteCondition::Absent).await.unwrap();
        assert_eq!(v, 2);
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let store = MemoryStore::new();
        store.put("drafts/w/u/2", json!(2), WriteCondition::Any).await.unwrap();
        store.put("drafts/w/u/1", json!(1), WriteCondition::Any).await.unwrap();
        store.put("instances/1", json!(0), WriteCondition::Any).await.unwrap();

        let docs = store.list("drafts/w/u/").await.unwrap();
        let keys: Vec<_> = docs.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["drafts/w/u/1", "drafts/w/u/2"]);
    }

    #[tokio::test]
    async fn watch_sees_writes_made_before_and_after_subscribe() {
        let store = MemoryStore::new();
        let mut early = store.watch("k");
        assert!(early.borrow().is_none());

        store.put("k", json!("x"), WriteCondition::Any).await.unwrap();
        early.changed().await.unwrap();
        assert_eq!(early.borrow().as_ref().unwrap().version, 1);

        let late = store.watch("k");
        assert_eq!(late.borrow().as_ref().unwrap().body, json!("x"));
    }

    #[tokio::test]
    async fn abandoned_watches_on_unknown_keys_are_pruned() {
        let store = MemoryStore::new();
        for i in 0..50 {
            drop(store.watch(&format!("missing/{i}")));
        }
        store.put("kept", json!(1), WriteCondition::Any).await.unwrap();
        store.delete("kept").await.unwrap();
        let _live = store.watch("watched");
        assert_eq!(store.slots.len(), 2);
        assert!(store.slots.contains_key("kept"));
        assert!(store.slots.contains_key("watched"));
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.get("a").await,
            Err(StoreError::Backend(_))
        ));
        store.set_unavailable(false);
        assert!(store.get("a").await.unwrap().is_none());
    }
}
