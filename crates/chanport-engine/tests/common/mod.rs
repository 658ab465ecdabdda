//! Shared harness for engine integration tests.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use chanport_core::config::migration::MigrationConfig;
use chanport_core::config::quota::QuotaConfig;
use chanport_core::config::store::StoreConfig;
use chanport_core::traits::{DocumentStore, PassthroughPipeline, TransformPipeline};
use chanport_engine::{
    MemorySource, MigrationWorker, PressureLevel, WorkerCommand, WorkerContext, WorkerEvent,
};
use chanport_entity::{IdRange, Job, JobPriority, SubmitJob};
use chanport_store::{BatchedStoreAdapter, CheckpointStore, MemoryDocumentStore, QuotaGuard};

pub struct Harness {
    pub source: Arc<MemorySource>,
    pub store: Arc<MemoryDocumentStore>,
    pub quota: Arc<QuotaGuard>,
    pub adapter: Arc<BatchedStoreAdapter>,
    pub checkpoints: Arc<CheckpointStore>,
    pub pressure_tx: watch::Sender<PressureLevel>,
    pub pressure_rx: watch::Receiver<PressureLevel>,
}

pub fn fast_store_config() -> StoreConfig {
    StoreConfig {
        flush_interval_seconds: 1,
        max_batch_size: 25,
        queue_capacity: 1024,
        max_attempts: 3,
        retry_base_ms: 1,
        retry_cap_ms: 4,
        cache_ttl_seconds: 300,
        cache_capacity: 1000,
    }
}

pub fn fast_migration_config() -> MigrationConfig {
    MigrationConfig {
        discovery_batch_size: 100,
        transfer_batch_size: 250,
        min_transfer_batch_size: 50,
        consecutive_failure_limit: 3,
        group_lookahead: 10,
        group_timeout_seconds: 1,
        emit_delay_ms: 0,
        fetch_retry_attempts: 3,
        fetch_retry_base_ms: 1,
        fetch_retry_cap_ms: 4,
        ..Default::default()
    }
}

pub fn harness() -> Harness {
    let source = Arc::new(MemorySource::new());
    let store = Arc::new(MemoryDocumentStore::new());
    let quota = Arc::new(QuotaGuard::new(QuotaConfig::default()));
    let adapter = BatchedStoreAdapter::start(
        Arc::clone(&store) as Arc<dyn DocumentStore>,
        Arc::clone(&quota),
        fast_store_config(),
    );
    let checkpoints = Arc::new(CheckpointStore::new(
        Arc::clone(&store) as Arc<dyn DocumentStore>,
        Arc::clone(&adapter),
        Arc::clone(&quota),
        &fast_store_config(),
    ));
    let (pressure_tx, pressure_rx) = watch::channel(PressureLevel::Normal);
    Harness {
        source,
        store,
        quota,
        adapter,
        checkpoints,
        pressure_tx,
        pressure_rx,
    }
}

pub fn job(range: IdRange, priority: JobPriority) -> Job {
    Job::from_submit(SubmitJob {
        source: "src".to_string(),
        destination: "dst".to_string(),
        range,
        filter: serde_json::Value::Null,
        priority,
        submitted_by: None,
    })
}

impl Harness {
    pub fn worker_ctx(
        &self,
        config: MigrationConfig,
        pipeline: Arc<dyn TransformPipeline>,
    ) -> WorkerContext {
        WorkerContext {
            source: Arc::clone(&self.source) as Arc<dyn chanport_core::traits::ContentSource>,
            pipeline,
            checkpoints: Arc::clone(&self.checkpoints),
            config,
            pressure: self.pressure_rx.clone(),
        }
    }

    pub fn worker(
        &self,
        job: Job,
        config: MigrationConfig,
    ) -> (
        MigrationWorker,
        watch::Sender<WorkerCommand>,
        mpsc::Receiver<WorkerEvent>,
    ) {
        self.worker_with_pipeline(job, config, Arc::new(PassthroughPipeline))
    }

    pub fn worker_with_pipeline(
        &self,
        job: Job,
        config: MigrationConfig,
        pipeline: Arc<dyn TransformPipeline>,
    ) -> (
        MigrationWorker,
        watch::Sender<WorkerCommand>,
        mpsc::Receiver<WorkerEvent>,
    ) {
        let (commands_tx, commands_rx) = watch::channel(WorkerCommand::Run);
        let (events_tx, events_rx) = mpsc::channel(1024);
        let worker = MigrationWorker::new(job, self.worker_ctx(config, pipeline), commands_rx, events_tx);
        (worker, commands_tx, events_rx)
    }
}

/// Collect every snapshot a finished worker emitted.
pub async fn drain_snapshots(mut events: mpsc::Receiver<WorkerEvent>) -> Vec<Job> {
    let mut snapshots = Vec::new();
    while let Some(WorkerEvent::Snapshot(job)) = events.recv().await {
        snapshots.push(job);
    }
    snapshots
}
