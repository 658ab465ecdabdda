//! In-process document store.
//!
//! Backs local mode and the test suite. Semantics mirror the remote
//! collaborator: `set` replaces, `update` shallow-merges into an existing
//! object (upserting when absent), `delete` removes, and `batched_write`
//! reports a result per operation.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use chanport_core::AppError;
use chanport_core::result::AppResult;
use chanport_core::traits::DocumentStore;
use chanport_entity::{BatchOpKind, BatchOperation};

/// In-memory [`DocumentStore`] over a concurrent map.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    /// Documents keyed by `collection` then `key`.
    docs: Arc<DashMap<String, Value>>,
}

impl MemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn doc_key(collection: &str, key: &str) -> String {
        format!("{collection}/{key}")
    }

    /// Number of documents currently held, across all collections.
    pub fn document_count(&self) -> usize {
        self.docs.len()
    }

    fn apply(&self, op: &BatchOperation) -> AppResult<()> {
        let doc_key = Self::doc_key(&op.collection, &op.key);
        match op.kind {
            BatchOpKind::Set => {
                let payload = op
                    .payload
                    .clone()
                    .ok_or_else(|| AppError::validation("set operation requires a payload"))?;
                self.docs.insert(doc_key, payload);
                Ok(())
            }
            BatchOpKind::Update => {
                let payload = op
                    .payload
                    .clone()
                    .ok_or_else(|| AppError::validation("update operation requires a payload"))?;
                match self.docs.get_mut(&doc_key) {
                    Some(mut existing) => {
                        merge_shallow(existing.value_mut(), payload);
                        Ok(())
                    }
                    None => {
                        self.docs.insert(doc_key, payload);
                        Ok(())
                    }
                }
            }
            BatchOpKind::Delete => {
                self.docs.remove(&doc_key);
                Ok(())
            }
        }
    }
}

/// Shallow-merge `incoming` object fields into `target`; non-object values
/// replace the target outright.
fn merge_shallow(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(fields)) => {
            for (k, v) in fields {
                existing.insert(k, v);
            }
        }
        (target, incoming) => *target = incoming,
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, key: &str) -> AppResult<Option<Value>> {
        Ok(self
            .docs
            .get(&Self::doc_key(collection, key))
            .map(|entry| entry.value().clone()))
    }

    async fn batched_write(&self, ops: &[BatchOperation]) -> AppResult<Vec<AppResult<()>>> {
        Ok(ops.iter().map(|op| self.apply(op)).collect())
    }
}
