//! Remote document store trait.

use async_trait::async_trait;

use chanport_entity::BatchOperation;

use crate::result::AppResult;

/// Trait for the remote document store collaborator.
///
/// The store publishes per-day/per-minute quotas for reads, writes, and
/// deletes; the engine's quota guard is configured from those limits and
/// every call here counts against them.
#[async_trait]
pub trait DocumentStore: Send + Sync + std::fmt::Debug + 'static {
    /// Read one document. Returns `None` when the document does not exist.
    async fn get(&self, collection: &str, key: &str) -> AppResult<Option<serde_json::Value>>;

    /// Apply a batch of operations in one backend request.
    ///
    /// The result is aligned with `ops`: `result[i]` is the outcome of
    /// `ops[i]`. A store may fail the whole call (transport error) or fail
    /// individual operations while others succeed.
    async fn batched_write(&self, ops: &[BatchOperation]) -> AppResult<Vec<AppResult<()>>>;
}
