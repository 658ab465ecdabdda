//! # chanport-store
//!
//! Write-side plumbing for Chanport: the batched remote store adapter with
//! its background flusher and dead-letter list, the quota guard that keeps
//! outgoing call counts under the backend's published limits, checkpoint
//! persistence with a read-through cache, and an in-process document store
//! for local mode and tests.

pub mod adapter;
pub mod checkpoint;
pub mod keys;
pub mod memory;
pub mod quota;

pub use adapter::{AdapterStats, BatchedStoreAdapter};
pub use checkpoint::CheckpointStore;
pub use memory::MemoryDocumentStore;
pub use quota::{OpClass, QuotaGuard, QuotaStats, QuotaVerdict};
