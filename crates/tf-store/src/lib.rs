//! Ticketflow Store - persistence seams for the workflow engine
//!
//! - A keyed document store with optimistic versions and a change feed
//! - Typed repository for workflow instances
//! - Progress publisher / subscriber over instance snapshots
//! - Breakdown draft store (advisory cache, failures become misses)
//!
//! The store is the only shared mutable resource in the system. No
//! cross-document transactions are needed: each writer serializes per key.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod document;
pub mod drafts;
pub mod error;
pub mod instances;
pub mod memory;
pub mod progress;

pub use document::{Document, DocumentStore, WriteCondition};
pub use drafts::{DocumentDraftStore, DraftCache, DraftStore};
pub use error::StoreError;
pub use instances::InstanceRepository;
pub use memory::MemoryStore;
pub use progress::{ProgressPublisher, ProgressSubscription, ProgressUpdate};
