//! Progress publisher and subscriptions
//!
//! Snapshots are written to a per-instance progress document (last write
//! wins) and observed through the store's change feed. Publishing is
//! fire-and-forget: a failed write is logged and otherwise ignored.

use crate::document::{Document, DocumentStore, WriteCondition};
use futures::stream::{self, Stream};
use std::sync::Arc;
use std::time::Duration;
use tf_model::{InstanceId, InstanceSnapshot};
use tokio::sync::watch;
use tokio::time::Instant;

/// What an observer sees next
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    /// No snapshot yet; the instance may still be starting
    Initializing,
    Snapshot(Box<InstanceSnapshot>),
    /// Nothing appeared within the grace period
    TimedOut,
    /// The publisher side went away
    Closed,
}

impl ProgressUpdate {
    #[inline]
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, ProgressUpdate::TimedOut | ProgressUpdate::Closed)
    }
}

/// Publishes immutable instance snapshots to per-instance topics
#[derive(Debug, Clone)]
pub struct ProgressPublisher {
    store: Arc<dyn DocumentStore>,
    grace_period: Duration,
}

impl ProgressPublisher {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, grace_period: Duration) -> Self {
        Self {
            store,
            grace_period,
        }
    }

    #[must_use]
    pub fn topic(id: InstanceId) -> String {
        format!("progress/{id}")
    }

    /// Fire-and-forget publish
    pub async fn publish(&self, snapshot: &InstanceSnapshot) {
        let body = match serde_json::to_value(snapshot) {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(instance_id = %snapshot.id, "progress snapshot not serializable: {}", err);
                return;
            }
        };
        if let Err(err) = self
            .store
            .put(&Self::topic(snapshot.id), body, WriteCondition::Any)
            .await
        {
            tracing::warn!(instance_id = %snapshot.id, "progress publish dropped: {}", err);
        }
    }

    /// Subscribe to an instance's progress; the instance need not exist yet
    #[must_use]
    pub fn subscribe(&self, id: InstanceId) -> ProgressSubscription {
        ProgressSubscription {
            rx: self.store.watch(&Self::topic(id)),
            grace_deadline: Instant::now() + self.grace_period,
            primed: false,
            seen_snapshot: false,
        }
    }

    /// Latest published snapshot, if any
    pub async fn latest(&self, id: InstanceId) -> Option<InstanceSnapshot> {
        match self.store.get(&Self::topic(id)).await {
            Ok(doc) => doc.and_then(|d| serde_json::from_value(d.body).ok()),
            Err(err) => {
                tracing::warn!(instance_id = %id, "progress read failed: {}", err);
                None
            }
        }
    }
}

/// One observer's view of an instance topic
#[derive(Debug)]
pub struct ProgressSubscription {
    rx: watch::Receiver<Option<Document>>,
    grace_deadline: Instant,
    primed: bool,
    seen_snapshot: bool,
}

impl ProgressSubscription {
    /// Wait for the next update.
    ///
    /// The first call returns the current state immediately. While no
    /// snapshot has ever been seen, waiting is bounded by the grace period.
    pub async fn next_update(&mut self) -> ProgressUpdate {
        if !self.primed {
            self.primed = true;
            let current = self.rx.borrow_and_update().clone();
            return self.decode(current);
        }

        let changed = if self.seen_snapshot {
            self.rx.changed().await
        } else {
            match tokio::time::timeout_at(self.grace_deadline, self.rx.changed()).await {
                Ok(changed) => changed,
                Err(_) => return ProgressUpdate::TimedOut,
            }
        };

        match changed {
            Ok(()) => {
                let current = self.rx.borrow_and_update().clone();
                self.decode(current)
            }
            Err(_) => ProgressUpdate::Closed,
        }
    }

    fn decode(&mut self, doc: Option<Document>) -> ProgressUpdate {
        match doc.map(|d| serde_json::from_value::<InstanceSnapshot>(d.body)) {
            Some(Ok(snapshot)) => {
                self.seen_snapshot = true;
                ProgressUpdate::Snapshot(Box::new(snapshot))
            }
            Some(Err(err)) => {
                tracing::warn!("undecodable progress snapshot: {}", err);
                ProgressUpdate::Initializing
            }
            None => ProgressUpdate::Initializing,
        }
    }

    /// Stream of updates, ending after a final one
    pub fn into_stream(self) -> impl Stream<Item = ProgressUpdate> {
        stream::unfold(Some(self), |state| async move {
            let mut sub = state?;
            let update = sub.next_update().await;
            let next = if update.is_final() { None } else { Some(sub) };
            Some((update, next))
        })
    }
}
