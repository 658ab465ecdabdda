//! Batched write-through adapter for the remote document store.
//!
//! Callers enqueue `{set, update, delete}` operations without blocking on
//! the backend; a dedicated flusher task drains the queue on whichever
//! fires first — a timed interval or a max-queue-size trigger — grouping
//! operations by collection into one batched write per group. Failed
//! operations retry with backoff until their attempt budget is spent, then
//! move to a dead-letter list. The quota guard moderates flush timing:
//! past the soft ratio the interval stretches, at the hard limit flushing
//! stops until the window resets while enqueues keep accumulating.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use chanport_core::AppError;
use chanport_core::config::store::StoreConfig;
use chanport_core::result::AppResult;
use chanport_core::retry::RetryPolicy;
use chanport_core::traits::DocumentStore;
use chanport_entity::{BatchOpKind, BatchOperation, WritePriority};

use crate::quota::{OpClass, QuotaGuard, QuotaVerdict};

/// Adapter statistics, including the dead-letter count.
#[derive(Debug, Clone, Serialize)]
pub struct AdapterStats {
    /// Operations accepted since startup.
    pub enqueued_total: u64,
    /// Operations confirmed written.
    pub flushed_total: u64,
    /// Operations requeued after a failed attempt.
    pub retried_total: u64,
    /// Operations that exhausted their attempts.
    pub dead_letter_count: u64,
    /// Operations currently waiting in the flusher.
    pub pending: usize,
    /// Flush passes executed.
    pub flush_count: u64,
    /// When the last flush pass ran.
    pub last_flush_at: Option<DateTime<Utc>>,
}

struct QueuedOp {
    op: BatchOperation,
    ack: Option<oneshot::Sender<AppResult<()>>>,
}

enum Command {
    Op(QueuedOp),
    Flush(Option<oneshot::Sender<AppResult<()>>>),
}

#[derive(Debug, Default)]
struct StatsInner {
    enqueued_total: u64,
    flushed_total: u64,
    retried_total: u64,
    flush_count: u64,
    pending: usize,
    last_flush_at: Option<DateTime<Utc>>,
    dead_letter: Vec<BatchOperation>,
}

/// Handle to the batched store adapter.
///
/// Cheap to clone behind an `Arc`; the background flusher exits once every
/// handle is dropped and the queue has drained.
#[derive(Debug)]
pub struct BatchedStoreAdapter {
    tx: mpsc::Sender<Command>,
    stats: Arc<Mutex<StatsInner>>,
}

impl BatchedStoreAdapter {
    /// Start the adapter and its background flusher.
    pub fn start(
        store: Arc<dyn DocumentStore>,
        quota: Arc<QuotaGuard>,
        config: StoreConfig,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let stats = Arc::new(Mutex::new(StatsInner::default()));

        let flusher = Flusher {
            store,
            quota,
            retry: RetryPolicy::from_millis(
                config.max_attempts.saturating_sub(1),
                config.retry_base_ms,
                config.retry_cap_ms,
            ),
            config,
            stats: Arc::clone(&stats),
            stretched: false,
            quota_hold: None,
        };
        tokio::spawn(flusher.run(rx));

        Arc::new(Self { tx, stats })
    }

    /// Enqueue a set operation.
    pub async fn set(
        &self,
        collection: &str,
        key: &str,
        payload: serde_json::Value,
        priority: WritePriority,
    ) -> AppResult<()> {
        self.enqueue(BatchOperation::set(collection, key, payload, priority))
            .await
    }

    /// Enqueue an update operation.
    pub async fn update(
        &self,
        collection: &str,
        key: &str,
        payload: serde_json::Value,
        priority: WritePriority,
    ) -> AppResult<()> {
        self.enqueue(BatchOperation::update(collection, key, payload, priority))
            .await
    }

    /// Enqueue a delete operation.
    pub async fn delete(
        &self,
        collection: &str,
        key: &str,
        priority: WritePriority,
    ) -> AppResult<()> {
        self.enqueue(BatchOperation::delete(collection, key, priority))
            .await
    }

    /// Enqueue an operation without waiting for the write to land.
    ///
    /// A full queue applies brief backpressure to the caller rather than
    /// growing without bound or dropping the operation.
    pub async fn enqueue(&self, op: BatchOperation) -> AppResult<()> {
        self.note_enqueued();
        self.tx
            .send(Command::Op(QueuedOp { op, ack: None }))
            .await
            .map_err(|_| AppError::internal("store adapter flusher has stopped"))
    }

    /// Enqueue an operation and wait until a flush confirms it.
    ///
    /// Used for checkpoint and job-control writes, which gate preemption
    /// and resume. Triggers a timely flush instead of waiting out the
    /// interval.
    pub async fn enqueue_confirmed(&self, op: BatchOperation) -> AppResult<()> {
        self.note_enqueued();
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Command::Op(QueuedOp {
                op,
                ack: Some(ack_tx),
            }))
            .await
            .map_err(|_| AppError::internal("store adapter flusher has stopped"))?;
        self.tx
            .send(Command::Flush(None))
            .await
            .map_err(|_| AppError::internal("store adapter flusher has stopped"))?;
        ack_rx
            .await
            .map_err(|_| AppError::internal("store adapter dropped a confirmation"))?
    }

    /// Synchronously drain the queue.
    ///
    /// Used on graceful shutdown and under emergency memory pressure; the
    /// quota hold is overridden, though a hard-exhausted window still
    /// defers operations rather than losing them.
    pub async fn force_flush(&self) -> AppResult<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(Some(tx)))
            .await
            .map_err(|_| AppError::internal("store adapter flusher has stopped"))?;
        rx.await
            .map_err(|_| AppError::internal("store adapter dropped a flush result"))?
    }

    /// Adapter statistics snapshot.
    pub fn stats(&self) -> AdapterStats {
        let inner = self.stats.lock().expect("adapter stats poisoned");
        AdapterStats {
            enqueued_total: inner.enqueued_total,
            flushed_total: inner.flushed_total,
            retried_total: inner.retried_total,
            dead_letter_count: inner.dead_letter.len() as u64,
            pending: inner.pending,
            flush_count: inner.flush_count,
            last_flush_at: inner.last_flush_at,
        }
    }

    /// Operations that exhausted their attempts.
    pub fn dead_letter(&self) -> Vec<BatchOperation> {
        self.stats
            .lock()
            .expect("adapter stats poisoned")
            .dead_letter
            .clone()
    }

    fn note_enqueued(&self) {
        self.stats
            .lock()
            .expect("adapter stats poisoned")
            .enqueued_total += 1;
    }
}

struct Flusher {
    store: Arc<dyn DocumentStore>,
    quota: Arc<QuotaGuard>,
    retry: RetryPolicy,
    config: StoreConfig,
    stats: Arc<Mutex<StatsInner>>,
    /// Past the quota soft ratio: flush half as often.
    stretched: bool,
    /// Hard quota stop: no flushing before this instant.
    quota_hold: Option<Instant>,
}

impl Flusher {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        let mut pending: Vec<QueuedOp> = Vec::new();
        let mut deadline = self.next_deadline();

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(Command::Op(op)) => {
                        pending.push(op);
                        self.note_pending(pending.len());
                        if pending.len() >= self.config.max_batch_size && self.hold_expired() {
                            let _ = self.flush(&mut pending, false).await;
                            deadline = self.next_deadline();
                        }
                    }
                    Some(Command::Flush(ack)) => {
                        let result = self.flush(&mut pending, true).await;
                        if let Some(ack) = ack {
                            let _ = ack.send(result);
                        }
                        deadline = self.next_deadline();
                    }
                    None => {
                        let result = self.flush(&mut pending, true).await;
                        if let Err(e) = result {
                            error!("Final flush left operations behind: {}", e);
                        }
                        info!("Store adapter flusher stopped");
                        break;
                    }
                },
                _ = tokio::time::sleep_until(deadline) => {
                    if self.hold_expired() {
                        let _ = self.flush(&mut pending, false).await;
                    }
                    deadline = self.next_deadline();
                }
            }
        }
    }

    fn interval(&self) -> Duration {
        let base = Duration::from_secs(self.config.flush_interval_seconds.max(1));
        if self.stretched { base * 2 } else { base }
    }

    /// Next timed wake-up: the flush interval, shortened to the quota-hold
    /// expiry when one is active so deferred operations retry promptly.
    fn next_deadline(&self) -> Instant {
        let deadline = Instant::now() + self.interval();
        match self.quota_hold {
            Some(hold) => deadline.min(hold.max(Instant::now())),
            None => deadline,
        }
    }

    fn hold_expired(&self) -> bool {
        self.quota_hold.is_none_or(|t| Instant::now() >= t)
    }

    /// Largest chunk that could ever pass the per-minute write budget.
    fn chunk_size(&self) -> usize {
        let minute_limit = self
            .quota
            .minute_limit(OpClass::Write)
            .min(self.quota.minute_limit(OpClass::Delete));
        self.config
            .max_batch_size
            .min(minute_limit.max(1) as usize)
            .max(1)
    }

    async fn flush(&mut self, pending: &mut Vec<QueuedOp>, forced: bool) -> AppResult<()> {
        if pending.is_empty() {
            self.quota_hold = None;
            self.note_flush(0);
            return Ok(());
        }
        if !forced && !self.hold_expired() {
            return Err(AppError::quota_exceeded(
                "flush deferred until the quota window resets",
            ));
        }
        self.quota_hold = None;

        let batch = std::mem::take(pending);
        let total = batch.len();
        let mut by_collection: BTreeMap<String, Vec<QueuedOp>> = BTreeMap::new();
        for queued in batch {
            by_collection
                .entry(queued.op.collection.clone())
                .or_default()
                .push(queued);
        }

        let mut first_error: Option<AppError> = None;
        let mut any_slow = false;
        let chunk_size = self.chunk_size();

        let mut groups: std::collections::VecDeque<(String, Vec<QueuedOp>)> =
            by_collection.into_iter().collect();

        'collections: while let Some((collection, mut group)) = groups.pop_front() {
            group.sort_by(|a, b| {
                b.op.priority
                    .cmp(&a.op.priority)
                    .then(a.op.enqueued_at.cmp(&b.op.enqueued_at))
            });

            while !group.is_empty() {
                let take = chunk_size.min(group.len());
                let mut chunk: Vec<QueuedOp> = group.drain(..take).collect();

                let writes = chunk
                    .iter()
                    .filter(|q| q.op.kind != BatchOpKind::Delete)
                    .count() as u64;
                let deletes = chunk.len() as u64 - writes;

                match self.quota_verdict(writes, deletes) {
                    QuotaVerdict::Exhausted { retry_after } => {
                        warn!(
                            "Quota exhausted, deferring {} operation(s) for {:?}",
                            chunk.len()
                                + group.len()
                                + groups.iter().map(|(_, g)| g.len()).sum::<usize>(),
                            retry_after
                        );
                        self.quota_hold = Some(Instant::now() + retry_after);
                        first_error.get_or_insert_with(|| {
                            AppError::quota_exceeded("store quota window exhausted")
                        });
                        pending.extend(chunk);
                        pending.extend(group);
                        while let Some((_, rest)) = groups.pop_front() {
                            pending.extend(rest);
                        }
                        break 'collections;
                    }
                    QuotaVerdict::SlowDown => any_slow = true,
                    QuotaVerdict::Proceed => {}
                }

                match self.write_chunk(&collection, &mut chunk, writes, deletes).await {
                    Ok(results) => {
                        self.settle_chunk(chunk, results, pending, &mut first_error);
                    }
                    Err(e) => {
                        warn!(
                            "Batched write to '{}' failed after retries: {}",
                            collection, e
                        );
                        let failed: Vec<AppResult<()>> =
                            (0..chunk.len()).map(|_| Err(e.clone())).collect();
                        self.settle_chunk(chunk, failed, pending, &mut first_error);
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        self.stretched = any_slow;
        self.note_flush(pending.len());
        debug!(
            "Flush pass over {} operation(s) complete, {} still pending",
            total,
            pending.len()
        );

        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    fn quota_verdict(&self, writes: u64, deletes: u64) -> QuotaVerdict {
        let mut verdict = QuotaVerdict::Proceed;
        for (class, count) in [(OpClass::Write, writes), (OpClass::Delete, deletes)] {
            if count == 0 {
                continue;
            }
            match self.quota.check(class, count) {
                QuotaVerdict::Exhausted { retry_after } => {
                    return QuotaVerdict::Exhausted { retry_after };
                }
                QuotaVerdict::SlowDown => verdict = QuotaVerdict::SlowDown,
                QuotaVerdict::Proceed => {}
            }
        }
        verdict
    }

    /// One backend call per attempt; transport-level failures retry with
    /// backoff here so each real call is recorded against quota.
    async fn write_chunk(
        &self,
        collection: &str,
        chunk: &mut [QueuedOp],
        writes: u64,
        deletes: u64,
    ) -> AppResult<Vec<AppResult<()>>> {
        let mut attempt: u32 = 0;
        loop {
            for queued in chunk.iter_mut() {
                queued.op.attempt_count += 1;
            }
            if writes > 0 {
                self.quota.record(OpClass::Write, writes);
            }
            if deletes > 0 {
                self.quota.record(OpClass::Delete, deletes);
            }

            let ops: Vec<BatchOperation> = chunk.iter().map(|q| q.op.clone()).collect();
            match self.store.batched_write(&ops).await {
                Ok(results) => return Ok(results),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        "Batched write to '{}' failed (attempt {}), retrying in {:?}: {}",
                        collection,
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Resolve each operation of a flushed chunk: confirm, requeue, or
    /// dead-letter.
    fn settle_chunk(
        &self,
        chunk: Vec<QueuedOp>,
        results: Vec<AppResult<()>>,
        pending: &mut Vec<QueuedOp>,
        first_error: &mut Option<AppError>,
    ) {
        let mut stats = self.stats.lock().expect("adapter stats poisoned");
        for (mut queued, result) in chunk.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    stats.flushed_total += 1;
                    if let Some(ack) = queued.ack.take() {
                        let _ = ack.send(Ok(()));
                    }
                }
                Err(e) if queued.op.attempt_count < self.config.max_attempts => {
                    stats.retried_total += 1;
                    first_error.get_or_insert_with(|| e.clone());
                    pending.push(queued);
                }
                Err(e) => {
                    error!(
                        "Operation {}/{} exhausted {} attempt(s), dead-lettering: {}",
                        queued.op.collection, queued.op.key, queued.op.attempt_count, e
                    );
                    first_error.get_or_insert_with(|| e.clone());
                    stats.dead_letter.push(queued.op.clone());
                    if let Some(ack) = queued.ack.take() {
                        let _ = ack.send(Err(AppError::persistence(format!(
                            "operation dead-lettered after {} attempts: {}",
                            queued.op.attempt_count, e
                        ))));
                    }
                }
            }
        }
    }

    fn note_pending(&self, pending: usize) {
        self.stats.lock().expect("adapter stats poisoned").pending = pending;
    }

    fn note_flush(&self, pending: usize) {
        let mut stats = self.stats.lock().expect("adapter stats poisoned");
        stats.flush_count += 1;
        stats.pending = pending;
        stats.last_flush_at = Some(Utc::now());
    }
}
