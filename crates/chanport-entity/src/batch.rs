//! Batched store operation entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a batched write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchOpKind {
    /// Create or replace a document.
    Set,
    /// Shallow-merge fields into an existing document.
    Update,
    /// Delete a document.
    Delete,
}

impl BatchOpKind {
    /// Return the kind as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Flush ordering priority for a batched operation.
///
/// Checkpoint writes ride at `Critical` so a partially successful flush
/// confirms progress records before bulk metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritePriority {
    /// Bulk metadata writes.
    Normal,
    /// Operator-visible state (job documents).
    High,
    /// Progress records that gate preemption and resume.
    Critical,
}

impl Default for WritePriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// One logical store operation, owned by the adapter from enqueue until
/// flush success (discarded) or attempt exhaustion (dead-letter list).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOperation {
    /// Operation kind.
    pub kind: BatchOpKind,
    /// Target collection.
    pub collection: String,
    /// Document key within the collection.
    pub key: String,
    /// Payload for set/update; `None` for delete.
    pub payload: Option<serde_json::Value>,
    /// Flush ordering priority.
    pub priority: WritePriority,
    /// When the operation was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// Flush attempts made so far.
    pub attempt_count: u32,
}

impl BatchOperation {
    /// Build a set operation.
    pub fn set(
        collection: impl Into<String>,
        key: impl Into<String>,
        payload: serde_json::Value,
        priority: WritePriority,
    ) -> Self {
        Self {
            kind: BatchOpKind::Set,
            collection: collection.into(),
            key: key.into(),
            payload: Some(payload),
            priority,
            enqueued_at: Utc::now(),
            attempt_count: 0,
        }
    }

    /// Build an update operation.
    pub fn update(
        collection: impl Into<String>,
        key: impl Into<String>,
        payload: serde_json::Value,
        priority: WritePriority,
    ) -> Self {
        Self {
            kind: BatchOpKind::Update,
            collection: collection.into(),
            key: key.into(),
            payload: Some(payload),
            priority,
            enqueued_at: Utc::now(),
            attempt_count: 0,
        }
    }

    /// Build a delete operation.
    pub fn delete(
        collection: impl Into<String>,
        key: impl Into<String>,
        priority: WritePriority,
    ) -> Self {
        Self {
            kind: BatchOpKind::Delete,
            collection: collection.into(),
            key: key.into(),
            payload: None,
            priority,
            enqueued_at: Utc::now(),
            attempt_count: 0,
        }
    }
}
