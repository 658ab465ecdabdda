//! Checkpoint and job-record persistence.
//!
//! Writes go through the batched adapter as confirmed operations — a
//! returned `Ok` means the document landed in the remote store, which is
//! what makes preemption and resume safe. Reads go through a TTL cache so
//! hot restarts and status polling do not spend read quota.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

use chanport_core::AppError;
use chanport_core::config::store::StoreConfig;
use chanport_core::result::AppResult;
use chanport_core::traits::DocumentStore;
use chanport_entity::{BatchOperation, Checkpoint, Job, JobId, WritePriority};

use crate::adapter::BatchedStoreAdapter;
use crate::keys;
use crate::quota::{OpClass, QuotaGuard};

/// Durable, resumable per-job progress records.
#[derive(Debug)]
pub struct CheckpointStore {
    store: Arc<dyn DocumentStore>,
    adapter: Arc<BatchedStoreAdapter>,
    quota: Arc<QuotaGuard>,
    cache: Cache<String, Checkpoint>,
}

impl CheckpointStore {
    /// Create a checkpoint store in front of the adapter.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        adapter: Arc<BatchedStoreAdapter>,
        quota: Arc<QuotaGuard>,
        config: &StoreConfig,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(Duration::from_secs(config.cache_ttl_seconds.max(1)))
            .build();
        Self {
            store,
            adapter,
            quota,
            cache,
        }
    }

    /// Load a job's checkpoint, or `None` when the job has never persisted
    /// one.
    pub async fn load(&self, job_id: JobId) -> AppResult<Option<Checkpoint>> {
        let key = keys::checkpoint_key(job_id);
        if let Some(cached) = self.cache.get(&key).await {
            debug!("Checkpoint cache hit for job {}", job_id);
            return Ok(Some(cached));
        }

        self.quota.record(OpClass::Read, 1);
        match self.store.get(keys::CHECKPOINTS, &key).await? {
            Some(doc) => {
                let checkpoint: Checkpoint = serde_json::from_value(doc)?;
                self.cache.insert(key, checkpoint.clone()).await;
                Ok(Some(checkpoint))
            }
            None => Ok(None),
        }
    }

    /// Persist a checkpoint and wait for write confirmation.
    ///
    /// The adapter retries internally; any remaining failure surfaces as a
    /// persistence error, the one kind (besides the consecutive-failure
    /// limit) allowed to fail a job.
    pub async fn persist(&self, checkpoint: &Checkpoint) -> AppResult<()> {
        let key = keys::checkpoint_key(checkpoint.job_id);
        let payload = serde_json::to_value(checkpoint)?;
        let op = BatchOperation::set(keys::CHECKPOINTS, &key, payload, WritePriority::Critical);

        self.adapter.enqueue_confirmed(op).await.map_err(|e| {
            AppError::persistence(format!(
                "checkpoint write for job {} failed: {}",
                checkpoint.job_id, e
            ))
        })?;

        self.cache.insert(key, checkpoint.clone()).await;
        Ok(())
    }

    /// Record a job's control document and wait for write confirmation.
    ///
    /// The scheduler calls this before returning from any lifecycle
    /// transition it performed.
    pub async fn record_job(&self, job: &Job) -> AppResult<()> {
        let key = keys::job_key(job.id);
        let payload = serde_json::to_value(job)?;
        let op = BatchOperation::set(keys::JOBS, &key, payload, WritePriority::High);

        self.adapter.enqueue_confirmed(op).await.map_err(|e| {
            AppError::persistence(format!("job record write for {} failed: {}", job.id, e))
        })
    }

    /// Drop every cached checkpoint. Invoked on the monitor's cleanup hint.
    pub fn release_cache(&self) {
        self.cache.invalidate_all();
    }
}
