//! Streaming migration worker.
//!
//! One worker task drives one job: discover a sub-batch of ids, fetch and
//! transform the items, emit them to the destination, persist the
//! checkpoint, then discover the next sub-batch. Discovery and transfer
//! are interleaved — never two full passes — so memory stays bounded and
//! the corrected total grows incrementally. Pause and cancel are
//! cooperative and only take effect at sub-batch boundaries, always after
//! a confirmed checkpoint write.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use chanport_core::AppError;
use chanport_core::config::migration::{GroupPolicy, MigrationConfig};
use chanport_core::retry::{RetryPolicy, retry_with_backoff};
use chanport_core::traits::{ContentSource, TransformOutcome, TransformPipeline};
use chanport_entity::{Checkpoint, ContentItem, IdRange, Job, JobStatus};
use chanport_store::CheckpointStore;

use crate::discovery::{Discoverer, Probe};
use crate::monitor::PressureLevel;

/// Cooperative control command for a worker, checked at sub-batch
/// boundaries only — never mid-item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCommand {
    /// Run (or resume from pause).
    Run,
    /// Suspend at the next boundary after checkpointing.
    Pause,
    /// Finalize at the next boundary after checkpointing.
    Cancel,
}

/// Notification from a worker to the scheduler.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Progress or state-change snapshot of the worker's job.
    Snapshot(Job),
}

/// Dependencies injected into a worker at spawn time.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    /// Content platform client.
    pub source: Arc<dyn ContentSource>,
    /// Transform/filter pipeline.
    pub pipeline: Arc<dyn TransformPipeline>,
    /// Checkpoint persistence.
    pub checkpoints: Arc<CheckpointStore>,
    /// Migration knobs, resolved once at spawn.
    pub config: MigrationConfig,
    /// Process-wide memory pressure level.
    pub pressure: watch::Receiver<PressureLevel>,
}

/// Per-job migration state machine.
pub struct MigrationWorker {
    job: Job,
    ctx: WorkerContext,
    commands: watch::Receiver<WorkerCommand>,
    events: mpsc::Sender<WorkerEvent>,
    discoverer: Discoverer,
    fetch_retry: RetryPolicy,
    transfer_batch: usize,
    consecutive_failures: u32,
}

impl MigrationWorker {
    /// Build a worker for a job.
    pub fn new(
        job: Job,
        ctx: WorkerContext,
        commands: watch::Receiver<WorkerCommand>,
        events: mpsc::Sender<WorkerEvent>,
    ) -> Self {
        let fetch_retry = ctx.config.fetch_retry_policy();
        let discoverer = Discoverer::new(
            Arc::clone(&ctx.source),
            ctx.config.discovery_batch_size,
            fetch_retry.clone(),
        );
        let transfer_batch = ctx.config.transfer_batch_size.max(1);
        Self {
            job,
            ctx,
            commands,
            events,
            discoverer,
            fetch_retry,
            transfer_batch,
            consecutive_failures: 0,
        }
    }

    /// Execute the job to a terminal state (or park on pause).
    pub async fn run(mut self) {
        info!(
            "Worker starting for job {}: {} -> {} over {}",
            self.job.id, self.job.source, self.job.destination, self.job.range
        );

        let mut checkpoint = match self.ctx.checkpoints.load(self.job.id).await {
            Ok(Some(existing)) => {
                info!(
                    "Job {} resuming from id {} ({} processed)",
                    self.job.id, existing.last_processed_id, existing.processed_count
                );
                existing
            }
            Ok(None) => Checkpoint::new(self.job.id, self.job.range.start),
            Err(e) => {
                error!("Job {} cannot load its checkpoint: {}", self.job.id, e);
                self.job.status = JobStatus::Failed;
                self.job.error_message = Some(e.to_string());
                self.job.completed_at = Some(Utc::now());
                self.emit_snapshot().await;
                return;
            }
        };

        // Restore persisted progress into the reported snapshot.
        self.job.processed_count = checkpoint.processed_count;
        self.job.failed_count = checkpoint.failed_count;
        self.job.gap_count = checkpoint.gap_count;
        self.job.total_count = checkpoint.total_discovered;

        checkpoint.status = JobStatus::Running;
        self.job.status = JobStatus::Running;
        if self.job.started_at.is_none() {
            self.job.started_at = Some(Utc::now());
        }
        self.emit_snapshot().await;

        let mut cursor = checkpoint.resume_cursor(self.job.range.start);

        loop {
            if !self.boundary(&mut checkpoint).await {
                return;
            }

            let Some(window) = self.discoverer.next_window(self.job.range, cursor) else {
                break;
            };

            match self.discoverer.probe(&self.job.source, window).await {
                Probe::Gap { window } => {
                    self.record_gap(&mut checkpoint, window);
                    checkpoint.advance(window.end);
                    cursor = window.end + 1;
                }
                Probe::Found { window, ids } => {
                    checkpoint.total_discovered += ids.len() as u64;
                    self.job.total_count = checkpoint.total_discovered;
                    self.resize_transfer_batch();

                    // Group look-ahead in one chunk can run into ids that
                    // belong to a later chunk of the same window; those are
                    // already emitted and must not be transferred again.
                    let mut covered = window.start - 1;
                    for chunk in ids.chunks(self.transfer_batch.max(1)) {
                        let remaining: Vec<i64> =
                            chunk.iter().copied().filter(|id| *id > covered).collect();
                        if remaining.is_empty() {
                            continue;
                        }
                        match self
                            .transfer_chunk(&remaining, window.end, &mut checkpoint)
                            .await
                        {
                            Ok(chunk_high) => covered = covered.max(chunk_high),
                            Err(()) => return,
                        }
                    }
                    let high_water = covered.max(window.end);
                    checkpoint.advance(high_water);
                    cursor = high_water + 1;
                }
            }

            if !self.persist(&mut checkpoint).await {
                return;
            }
            self.emit_snapshot().await;
        }

        self.job.status = JobStatus::Completed;
        self.job.total_count = checkpoint.total_discovered;
        self.job.completed_at = Some(Utc::now());
        checkpoint.status = JobStatus::Completed;
        if !self.persist(&mut checkpoint).await {
            return;
        }
        info!(
            "Job {} completed: {} processed, {} failed, {} gap(s)",
            self.job.id, self.job.processed_count, self.job.failed_count, self.job.gap_count
        );
        self.emit_snapshot().await;
    }

    /// Sub-batch boundary: act on the latest control command. Returns
    /// false when the worker reached a terminal state.
    async fn boundary(&mut self, checkpoint: &mut Checkpoint) -> bool {
        loop {
            let command = *self.commands.borrow();
            match command {
                WorkerCommand::Run => {
                    if self.job.status == JobStatus::Paused {
                        info!("Job {} resumed", self.job.id);
                        self.job.status = JobStatus::Running;
                        checkpoint.status = JobStatus::Running;
                        self.emit_snapshot().await;
                    }
                    return true;
                }
                WorkerCommand::Cancel => {
                    self.job.status = JobStatus::Cancelled;
                    self.job.completed_at = Some(Utc::now());
                    checkpoint.status = JobStatus::Cancelled;
                    if let Err(e) = self.ctx.checkpoints.persist(checkpoint).await {
                        warn!(
                            "Final checkpoint write for cancelled job {} failed: {}",
                            self.job.id, e
                        );
                    }
                    info!(
                        "Job {} cancelled at id {}",
                        self.job.id, checkpoint.last_processed_id
                    );
                    self.emit_snapshot().await;
                    return false;
                }
                WorkerCommand::Pause => {
                    if self.job.status != JobStatus::Paused {
                        self.job.status = JobStatus::Paused;
                        checkpoint.status = JobStatus::Paused;
                        if !self.persist(checkpoint).await {
                            return false;
                        }
                        info!(
                            "Job {} paused at id {}",
                            self.job.id, checkpoint.last_processed_id
                        );
                        self.emit_snapshot().await;
                    }
                    if self.commands.changed().await.is_err() {
                        warn!(
                            "Control channel closed while job {} was paused; cancelling",
                            self.job.id
                        );
                        self.job.status = JobStatus::Cancelled;
                        self.job.completed_at = Some(Utc::now());
                        checkpoint.status = JobStatus::Cancelled;
                        let _ = self.ctx.checkpoints.persist(checkpoint).await;
                        self.emit_snapshot().await;
                        return false;
                    }
                }
            }
        }
    }

    /// Fetch, assemble, transform, and emit one transfer chunk. Returns
    /// the highest id covered (which can exceed the chunk when a group
    /// look-ahead extended it), or `Err` after a terminal failure.
    ///
    /// `window_end` is the end of the discovery window the chunk came
    /// from: look-ahead items past it are new discoveries, while items
    /// inside it were already counted by the probe.
    async fn transfer_chunk(
        &mut self,
        ids: &[i64],
        window_end: i64,
        checkpoint: &mut Checkpoint,
    ) -> Result<i64, ()> {
        let first = ids[0];
        let last = *ids.last().expect("chunks are non-empty");

        let fetched = retry_with_backoff(&self.fetch_retry, "batch fetch", |_| async {
            self.ctx.source.get_items_by_id(&self.job.source, ids).await
        })
        .await;

        let mut items: Vec<ContentItem> = match fetched {
            Ok(results) => results.into_iter().flatten().collect(),
            Err(e) => {
                warn!(
                    "Batch fetch {}..={} exhausted retries, recording gap: {}",
                    first, last, e
                );
                checkpoint.total_discovered =
                    checkpoint.total_discovered.saturating_sub(ids.len() as u64);
                self.job.total_count = checkpoint.total_discovered;
                self.record_gap(checkpoint, IdRange::new(first, last));
                return Ok(last);
            }
        };

        let mut high_water = last;

        // A group must be fully assembled before any member is emitted.
        if let Some(group_id) = items.last().and_then(|item| item.group_id.clone()) {
            let (extension, group_high, timed_out) = self.complete_group(&group_id, last).await;
            let beyond_window = extension.iter().filter(|i| i.id > window_end).count() as u64;
            if !timed_out {
                if !extension.is_empty() {
                    debug!(
                        "Completed group '{}' with {} look-ahead item(s)",
                        group_id,
                        extension.len()
                    );
                    checkpoint.total_discovered += beyond_window;
                    self.job.total_count = checkpoint.total_discovered;
                    items.extend(extension);
                    high_water = group_high;
                }
            } else {
                match self.ctx.config.group_policy {
                    GroupPolicy::EmitPartial => {
                        warn!(
                            "Group '{}' incomplete after {}s; emitting partial group",
                            group_id, self.ctx.config.group_timeout_seconds
                        );
                        checkpoint.total_discovered += beyond_window;
                        self.job.total_count = checkpoint.total_discovered;
                        items.extend(extension);
                        high_water = group_high;
                    }
                    GroupPolicy::Skip => {
                        let members_start = items
                            .iter()
                            .find(|i| i.group_id.as_deref() == Some(group_id.as_str()))
                            .map(|i| i.id)
                            .unwrap_or(last);
                        let removed = items
                            .iter()
                            .filter(|i| i.group_id.as_deref() == Some(group_id.as_str()))
                            .count() as u64
                            + extension.iter().filter(|i| i.id <= window_end).count() as u64;
                        warn!(
                            "Group '{}' incomplete after {}s; skipping {} member(s) as a gap",
                            group_id, self.ctx.config.group_timeout_seconds, removed
                        );
                        items.retain(|i| i.group_id.as_deref() != Some(group_id.as_str()));
                        checkpoint.total_discovered =
                            checkpoint.total_discovered.saturating_sub(removed);
                        self.job.total_count = checkpoint.total_discovered;
                        self.record_gap(checkpoint, IdRange::new(members_start, group_high));
                        high_water = group_high;
                    }
                }
            }
        }

        let emit_delay = Duration::from_millis(self.ctx.config.emit_delay_ms);
        for item in items {
            let item_id = item.id;
            match self.ctx.pipeline.apply(item, &self.job.filter).await {
                Ok(TransformOutcome::Keep(out)) => {
                    let sent = retry_with_backoff(&self.fetch_retry, "send item", |_| async {
                        self.ctx.source.send_item(&self.job.destination, &out).await
                    })
                    .await;
                    match sent {
                        Ok(remote_id) => {
                            debug!("Item {} emitted as remote id {}", item_id, remote_id);
                            self.note_processed(checkpoint);
                        }
                        Err(e) => {
                            if self.note_failure(checkpoint, item_id, e).await.is_err() {
                                return Err(());
                            }
                        }
                    }
                }
                Ok(TransformOutcome::Drop(reason)) => {
                    debug!("Item {} dropped by filter: {}", item_id, reason);
                    self.note_processed(checkpoint);
                }
                Err(e) => {
                    if self.note_failure(checkpoint, item_id, e).await.is_err() {
                        return Err(());
                    }
                }
            }
            if !emit_delay.is_zero() {
                tokio::time::sleep(emit_delay).await;
            }
        }

        Ok(high_water)
    }

    /// Fetch the remainder of a group, one id at a time, under the
    /// configured timeout and look-ahead bound. Returns what was fetched,
    /// the highest id covered, and whether the timeout fired.
    async fn complete_group(&self, group_id: &str, from: i64) -> (Vec<ContentItem>, i64, bool) {
        let mut extension = Vec::new();
        let timeout = Duration::from_secs(self.ctx.config.group_timeout_seconds.max(1));
        match tokio::time::timeout(timeout, self.extend_group(group_id, from, &mut extension))
            .await
        {
            Ok(high) => (extension, high, false),
            Err(_) => {
                let high = extension.last().map(|i| i.id).unwrap_or(from);
                (extension, high, true)
            }
        }
    }

    async fn extend_group(
        &self,
        group_id: &str,
        from: i64,
        extension: &mut Vec<ContentItem>,
    ) -> i64 {
        let mut cursor = from;
        let mut looked = 0usize;

        while looked < self.ctx.config.group_lookahead {
            let next = cursor + 1;
            if next > self.job.range.end {
                break;
            }
            let fetched = retry_with_backoff(&self.fetch_retry, "group look-ahead", |_| async {
                self.ctx
                    .source
                    .get_items_by_id(&self.job.source, &[next])
                    .await
            })
            .await;

            match fetched {
                Ok(mut results) => match results.pop().flatten() {
                    Some(item) if item.group_id.as_deref() == Some(group_id) => {
                        extension.push(item);
                        cursor = next;
                        looked += 1;
                    }
                    // A different group, a standalone item, or a hole all
                    // end the group.
                    _ => break,
                },
                Err(e) => {
                    warn!(
                        "Group look-ahead at id {} failed, ending assembly: {}",
                        next, e
                    );
                    break;
                }
            }
        }
        cursor
    }

    /// Persist the checkpoint, retrying once before failing the job. An
    /// unconfirmed checkpoint is never outrun by more than one sub-batch.
    async fn persist(&mut self, checkpoint: &mut Checkpoint) -> bool {
        match self.ctx.checkpoints.persist(checkpoint).await {
            Ok(()) => true,
            Err(first) => {
                warn!(
                    "Checkpoint write for job {} failed, retrying: {}",
                    self.job.id, first
                );
                match self.ctx.checkpoints.persist(checkpoint).await {
                    Ok(()) => true,
                    Err(e) => {
                        self.fail(checkpoint, e).await;
                        false
                    }
                }
            }
        }
    }

    async fn fail(&mut self, checkpoint: &mut Checkpoint, err: AppError) {
        error!("Job {} failed: {}", self.job.id, err);
        self.job.status = JobStatus::Failed;
        self.job.error_message = Some(err.to_string());
        self.job.completed_at = Some(Utc::now());
        checkpoint.status = JobStatus::Failed;
        // Preserve the checkpoint for manual resume; best effort by now.
        if let Err(e) = self.ctx.checkpoints.persist(checkpoint).await {
            error!(
                "Final checkpoint write for failed job {} also failed: {}",
                self.job.id, e
            );
        }
        self.emit_snapshot().await;
    }

    fn note_processed(&mut self, checkpoint: &mut Checkpoint) {
        checkpoint.processed_count += 1;
        self.job.processed_count = checkpoint.processed_count;
        self.consecutive_failures = 0;
    }

    async fn note_failure(
        &mut self,
        checkpoint: &mut Checkpoint,
        item_id: i64,
        err: AppError,
    ) -> Result<(), ()> {
        checkpoint.failed_count += 1;
        self.job.failed_count = checkpoint.failed_count;
        self.consecutive_failures += 1;
        warn!(
            "Item {} of job {} failed ({} consecutive): {}",
            item_id, self.job.id, self.consecutive_failures, err
        );
        if self.consecutive_failures >= self.ctx.config.consecutive_failure_limit.max(1) {
            let limit = self.ctx.config.consecutive_failure_limit;
            self.fail(
                checkpoint,
                AppError::failure_limit(format!(
                    "{} consecutive item failures (limit {})",
                    self.consecutive_failures, limit
                )),
            )
            .await;
            return Err(());
        }
        Ok(())
    }

    fn record_gap(&mut self, checkpoint: &mut Checkpoint, window: IdRange) {
        checkpoint.gaps.push(window);
        checkpoint.gap_count += 1;
        self.job.gap_count = checkpoint.gap_count;
    }

    fn resize_transfer_batch(&mut self) {
        let level = *self.ctx.pressure.borrow();
        if level >= PressureLevel::Warning {
            let floor = self.ctx.config.min_transfer_batch_size.max(1);
            let shrunk = (self.transfer_batch / 2).max(floor);
            if shrunk < self.transfer_batch {
                debug!(
                    "Job {}: memory {}, transfer batch {} -> {}",
                    self.job.id,
                    level.as_str(),
                    self.transfer_batch,
                    shrunk
                );
                self.transfer_batch = shrunk;
            }
        } else if self.transfer_batch != self.ctx.config.transfer_batch_size.max(1) {
            self.transfer_batch = self.ctx.config.transfer_batch_size.max(1);
            debug!(
                "Job {}: memory pressure cleared, transfer batch restored to {}",
                self.job.id, self.transfer_batch
            );
        }
    }

    async fn emit_snapshot(&mut self) {
        self.job.updated_at = Utc::now();
        let _ = self
            .events
            .send(WorkerEvent::Snapshot(self.job.clone()))
            .await;
    }
}
