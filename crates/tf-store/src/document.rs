//! Keyed document store contract

use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

/// A stored document and the version it was written at
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub key: String,
    /// Starts at 1, bumped on every write
    pub version: u64,
    pub body: Value,
}

/// Precondition for a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCondition {
    /// Last write wins
    Any,
    /// Key must not exist
    Absent,
    /// Current version must equal the given one
    Version(u64),
}

/// Keyed document get/set/delete with optimistic concurrency and a
/// subscribe-for-changes primitive.
#[async_trait]
pub trait DocumentStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<Document>, StoreError>;

    /// Write `body` under `key` if `condition` holds; returns the new version
    async fn put(&self, key: &str, body: Value, condition: WriteCondition)
        -> Result<u64, StoreError>;

    /// Returns whether a document was removed
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// All documents whose key starts with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<Document>, StoreError>;

    /// Change feed for one key. The receiver holds `None` until the key
    /// is first written and again after deletion.
    fn watch(&self, key: &str) -> watch::Receiver<Option<Document>>;
}
