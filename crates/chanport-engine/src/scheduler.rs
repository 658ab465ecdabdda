//! Priority-aware concurrent job scheduler.
//!
//! Admits submitted jobs by priority then FIFO within priority, under a
//! global concurrency limit and a per-submitter limit. Reacts to memory
//! pressure from the resource monitor: critical samples pause the newest
//! lowest-priority running job, emergency keeps only the single
//! highest-priority job and force-flushes the store adapter. Every
//! lifecycle transition an API call performs is recorded to the
//! checkpoint store before that call returns.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use chanport_core::AppError;
use chanport_core::config::migration::MigrationConfig;
use chanport_core::config::scheduler::SchedulerConfig;
use chanport_core::result::AppResult;
use chanport_core::traits::{ContentSource, TransformPipeline};
use chanport_entity::{Job, JobId, JobPriority, JobStatus, JobStatusReport, SubmitJob};
use chanport_store::{BatchedStoreAdapter, CheckpointStore};

use crate::monitor::PressureLevel;
use crate::worker::{MigrationWorker, WorkerCommand, WorkerContext, WorkerEvent};

/// Everything the scheduler needs to run jobs, injected once at
/// construction — process-wide state travels by handle, never as an
/// ambient singleton.
#[derive(Debug, Clone)]
pub struct SchedulerContext {
    /// Content platform client.
    pub source: Arc<dyn ContentSource>,
    /// Transform/filter pipeline.
    pub pipeline: Arc<dyn TransformPipeline>,
    /// Checkpoint persistence.
    pub checkpoints: Arc<CheckpointStore>,
    /// Batched store adapter (for emergency force-flush).
    pub adapter: Arc<BatchedStoreAdapter>,
    /// Migration knobs handed to each worker.
    pub migration: MigrationConfig,
    /// Memory pressure level from the resource monitor.
    pub pressure: watch::Receiver<PressureLevel>,
}

/// Scheduler statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    /// Jobs currently running.
    pub running: usize,
    /// Jobs currently paused.
    pub paused: usize,
    /// Jobs waiting for a slot.
    pub pending: usize,
    /// Jobs completed.
    pub completed: usize,
    /// Jobs failed.
    pub failed: usize,
    /// Jobs cancelled.
    pub cancelled: usize,
}

struct JobEntry {
    job: Job,
    commands: Option<watch::Sender<WorkerCommand>>,
    /// Admission order; higher = admitted later ("newest").
    sequence: u64,
    /// Paused by the scheduler for memory pressure, eligible for
    /// automatic resume.
    auto_paused: bool,
}

struct Inner {
    config: SchedulerConfig,
    ctx: SchedulerContext,
    jobs: DashMap<JobId, JobEntry>,
    /// FIFO queue per priority, most urgent first.
    queues: Mutex<[VecDeque<JobId>; 4]>,
    /// Worker event sender, downgraded so the event loop exits once every
    /// strong handle (scheduler + workers) is gone.
    events: mpsc::WeakSender<WorkerEvent>,
    next_sequence: AtomicU64,
}

/// The job scheduler handle.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
    events_tx: mpsc::Sender<WorkerEvent>,
}

fn queue_index(priority: JobPriority) -> usize {
    match priority {
        JobPriority::Urgent => 0,
        JobPriority::High => 1,
        JobPriority::Normal => 2,
        JobPriority::Low => 3,
    }
}

impl JobScheduler {
    /// Create the scheduler and start its event loop.
    pub fn start(config: SchedulerConfig, ctx: SchedulerContext) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        let inner = Arc::new(Inner {
            config,
            ctx,
            jobs: DashMap::new(),
            queues: Mutex::new(std::array::from_fn(|_| VecDeque::new())),
            events: events_tx.downgrade(),
            next_sequence: AtomicU64::new(1),
        });

        let pressure_rx = inner.ctx.pressure.clone();
        tokio::spawn(Inner::run_events(Arc::clone(&inner), events_rx, pressure_rx));

        Self { inner, events_tx }
    }

    /// Submit a job. Returns its id once the control record is persisted.
    pub async fn submit(&self, params: SubmitJob) -> AppResult<JobId> {
        if !params.range.is_valid() {
            return Err(AppError::validation(format!(
                "invalid source range {}",
                params.range
            )));
        }
        if let Some(submitter) = params.submitted_by.as_deref() {
            let active = self
                .inner
                .jobs
                .iter()
                .filter(|entry| {
                    entry.job.submitted_by.as_deref() == Some(submitter)
                        && !entry.job.status.is_terminal()
                })
                .count();
            if active >= self.inner.config.max_jobs_per_submitter {
                return Err(AppError::conflict(format!(
                    "submitter '{}' already has {} active job(s)",
                    submitter, active
                )));
            }
        }

        let job = Job::from_submit(params);
        let job_id = job.id;
        let priority = job.priority;

        self.inner.ctx.checkpoints.record_job(&job).await?;

        info!(
            "Job {} submitted: {} -> {} over {} (priority {})",
            job_id, job.source, job.destination, job.range, priority
        );
        self.inner.jobs.insert(
            job_id,
            JobEntry {
                job,
                commands: None,
                sequence: 0,
                auto_paused: false,
            },
        );
        {
            let mut queues = self.inner.queues.lock().expect("scheduler queues poisoned");
            queues[queue_index(priority)].push_back(job_id);
        }

        self.inner.try_admit().await;
        Ok(job_id)
    }

    /// Pause a running or pending job.
    pub async fn pause(&self, job_id: JobId) -> AppResult<()> {
        let (recorded, was_pending) = {
            let mut entry = self
                .inner
                .jobs
                .get_mut(&job_id)
                .ok_or_else(|| AppError::not_found(format!("job {job_id} not found")))?;
            match entry.job.status {
                JobStatus::Running => {
                    entry.job.status = JobStatus::Paused;
                    entry.job.updated_at = Utc::now();
                    entry.auto_paused = false;
                    if let Some(commands) = &entry.commands {
                        let _ = commands.send(WorkerCommand::Pause);
                    }
                    (entry.job.clone(), false)
                }
                JobStatus::Pending => {
                    entry.job.status = JobStatus::Paused;
                    entry.job.updated_at = Utc::now();
                    (entry.job.clone(), true)
                }
                other => {
                    return Err(AppError::conflict(format!(
                        "job {job_id} is {other}, cannot pause"
                    )));
                }
            }
        };
        if was_pending {
            self.inner.remove_from_queues(job_id);
        }

        self.inner.ctx.checkpoints.record_job(&recorded).await?;
        info!("Job {} pause requested", job_id);
        Ok(())
    }

    /// Resume a paused job.
    pub async fn resume(&self, job_id: JobId) -> AppResult<()> {
        enum Action {
            Signalled(Job),
            Requeue(Job, JobPriority),
        }

        let action = {
            let mut entry = self
                .inner
                .jobs
                .get_mut(&job_id)
                .ok_or_else(|| AppError::not_found(format!("job {job_id} not found")))?;
            match entry.job.status {
                JobStatus::Paused if entry.commands.is_some() => {
                    entry.job.status = JobStatus::Running;
                    entry.job.updated_at = Utc::now();
                    entry.auto_paused = false;
                    if let Some(commands) = &entry.commands {
                        let _ = commands.send(WorkerCommand::Run);
                    }
                    Action::Signalled(entry.job.clone())
                }
                JobStatus::Paused => {
                    // Paused before ever being admitted; back to the queue.
                    entry.job.status = JobStatus::Pending;
                    entry.job.updated_at = Utc::now();
                    Action::Requeue(entry.job.clone(), entry.job.priority)
                }
                other => {
                    return Err(AppError::conflict(format!(
                        "job {job_id} is {other}, cannot resume"
                    )));
                }
            }
        };

        match action {
            Action::Signalled(job) => {
                self.inner.ctx.checkpoints.record_job(&job).await?;
                info!("Job {} resumed", job_id);
            }
            Action::Requeue(job, priority) => {
                self.inner.ctx.checkpoints.record_job(&job).await?;
                {
                    let mut queues =
                        self.inner.queues.lock().expect("scheduler queues poisoned");
                    queues[queue_index(priority)].push_back(job_id);
                }
                self.inner.try_admit().await;
                info!("Job {} requeued", job_id);
            }
        }
        Ok(())
    }

    /// Cancel a job. Running jobs finalize cooperatively at their next
    /// sub-batch boundary with their checkpoint preserved.
    pub async fn cancel(&self, job_id: JobId) -> AppResult<()> {
        let finalized = {
            let mut entry = self
                .inner
                .jobs
                .get_mut(&job_id)
                .ok_or_else(|| AppError::not_found(format!("job {job_id} not found")))?;
            match entry.job.status {
                JobStatus::Running | JobStatus::Paused if entry.commands.is_some() => {
                    if let Some(commands) = &entry.commands {
                        let _ = commands.send(WorkerCommand::Cancel);
                    }
                    None
                }
                JobStatus::Pending | JobStatus::Paused => {
                    entry.job.status = JobStatus::Cancelled;
                    entry.job.completed_at = Some(Utc::now());
                    entry.job.updated_at = Utc::now();
                    Some(entry.job.clone())
                }
                other => {
                    return Err(AppError::conflict(format!(
                        "job {job_id} is {other}, cannot cancel"
                    )));
                }
            }
        };

        match finalized {
            Some(job) => {
                self.inner.remove_from_queues(job_id);
                self.inner.ctx.checkpoints.record_job(&job).await?;
                info!("Job {} cancelled before admission", job_id);
            }
            None => {
                info!("Job {} cancellation requested", job_id);
            }
        }
        Ok(())
    }

    /// Status report for one job.
    pub fn status(&self, job_id: JobId) -> AppResult<JobStatusReport> {
        self.inner
            .jobs
            .get(&job_id)
            .map(|entry| entry.job.status_report())
            .ok_or_else(|| AppError::not_found(format!("job {job_id} not found")))
    }

    /// Status reports for all jobs, optionally filtered by status, oldest
    /// first.
    pub fn list(&self, filter: Option<JobStatus>) -> Vec<JobStatusReport> {
        let mut jobs: Vec<(chrono::DateTime<Utc>, JobStatusReport)> = self
            .inner
            .jobs
            .iter()
            .filter(|entry| filter.is_none_or(|status| entry.job.status == status))
            .map(|entry| (entry.job.created_at, entry.job.status_report()))
            .collect();
        jobs.sort_by_key(|(created_at, _)| *created_at);
        jobs.into_iter().map(|(_, report)| report).collect()
    }

    /// Aggregate scheduler statistics.
    pub fn stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats {
            running: 0,
            paused: 0,
            pending: 0,
            completed: 0,
            failed: 0,
            cancelled: 0,
        };
        for entry in self.inner.jobs.iter() {
            match entry.job.status {
                JobStatus::Running => stats.running += 1,
                JobStatus::Paused => stats.paused += 1,
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Graceful shutdown: stop admission, pause running workers at their
    /// boundaries, and drain the adapter.
    pub async fn shutdown(&self) -> AppResult<()> {
        info!("Scheduler shutting down: pausing running jobs");
        for entry in self.inner.jobs.iter() {
            if entry.job.status == JobStatus::Running {
                if let Some(commands) = &entry.commands {
                    let _ = commands.send(WorkerCommand::Pause);
                }
            }
        }
        self.inner.ctx.adapter.force_flush().await
    }

    /// The worker event sender; exposed so a worker can be driven outside
    /// the scheduler in tests.
    pub fn events_sender(&self) -> mpsc::Sender<WorkerEvent> {
        self.events_tx.clone()
    }
}

impl Inner {
    fn remove_from_queues(&self, job_id: JobId) {
        let mut queues = self.queues.lock().expect("scheduler queues poisoned");
        for queue in queues.iter_mut() {
            queue.retain(|id| *id != job_id);
        }
    }

    fn running_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|entry| entry.job.status == JobStatus::Running)
            .count()
    }

    /// Admit pending jobs while capacity and memory pressure allow.
    ///
    /// Called concurrently from submitter tasks and the event loop; the
    /// capacity check, queue pop, and status flip happen under the queues
    /// lock as one step so racing admits cannot overshoot the global
    /// limit.
    async fn try_admit(&self) {
        loop {
            if *self.ctx.pressure.borrow() >= PressureLevel::Critical {
                debug!("Admission gated by memory pressure");
                return;
            }
            let Some(events) = self.events.upgrade() else {
                return;
            };

            let admitted = {
                let mut queues = self.queues.lock().expect("scheduler queues poisoned");
                if self.running_count() >= self.config.max_concurrent_jobs {
                    return;
                }
                loop {
                    let Some(job_id) = queues.iter_mut().find_map(|queue| queue.pop_front())
                    else {
                        return;
                    };
                    let Some(mut entry) = self.jobs.get_mut(&job_id) else {
                        continue;
                    };
                    if entry.job.status != JobStatus::Pending {
                        continue;
                    }
                    entry.job.status = JobStatus::Running;
                    entry.job.updated_at = Utc::now();
                    entry.sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
                    let (commands_tx, commands_rx) = watch::channel(WorkerCommand::Run);
                    entry.commands = Some(commands_tx);
                    break (entry.job.clone(), commands_rx);
                }
            };
            let (job, commands_rx) = admitted;

            if let Err(e) = self.ctx.checkpoints.record_job(&job).await {
                error!("Failed to record admission of job {}: {}", job.id, e);
            }

            info!("Admitting job {} (priority {})", job.id, job.priority);
            let worker = MigrationWorker::new(
                job,
                WorkerContext {
                    source: Arc::clone(&self.ctx.source),
                    pipeline: Arc::clone(&self.ctx.pipeline),
                    checkpoints: Arc::clone(&self.ctx.checkpoints),
                    config: self.ctx.migration.clone(),
                    pressure: self.ctx.pressure.clone(),
                },
                commands_rx,
                events,
            );
            tokio::spawn(worker.run());
        }
    }

    async fn run_events(
        inner: Arc<Inner>,
        mut events_rx: mpsc::Receiver<WorkerEvent>,
        mut pressure_rx: watch::Receiver<PressureLevel>,
    ) {
        let mut pressure_alive = true;
        loop {
            tokio::select! {
                event = events_rx.recv() => match event {
                    Some(WorkerEvent::Snapshot(job)) => inner.on_snapshot(job).await,
                    None => {
                        debug!("Scheduler event loop stopped");
                        break;
                    }
                },
                changed = pressure_rx.changed(), if pressure_alive => {
                    if changed.is_err() {
                        pressure_alive = false;
                        continue;
                    }
                    let level = *pressure_rx.borrow();
                    inner.on_pressure(level).await;
                }
            }
        }
    }

    async fn on_snapshot(&self, job: Job) {
        let job_id = job.id;
        let terminal = job.status.is_terminal();
        if let Some(mut entry) = self.jobs.get_mut(&job_id) {
            entry.job = job.clone();
            if terminal {
                entry.commands = None;
                entry.auto_paused = false;
            }
        }
        if terminal {
            if let Err(e) = self.ctx.checkpoints.record_job(&job).await {
                error!("Failed to record terminal state of job {}: {}", job_id, e);
            }
            self.try_admit().await;
        }
    }

    async fn on_pressure(&self, level: PressureLevel) {
        match level {
            PressureLevel::Emergency => {
                self.pause_for_pressure(true).await;
                if let Err(e) = self.ctx.adapter.force_flush().await {
                    warn!("Emergency force-flush incomplete: {}", e);
                }
            }
            PressureLevel::Critical => {
                self.pause_for_pressure(false).await;
            }
            PressureLevel::Cleanup => {
                self.ctx.checkpoints.release_cache();
            }
            PressureLevel::Warning | PressureLevel::Normal => {}
        }
        if level < PressureLevel::Critical {
            self.resume_auto_paused().await;
            self.try_admit().await;
        }
    }

    /// Pick pressure victims among running jobs. Critical pauses the
    /// newest lowest-priority job (one per sample); emergency pauses all
    /// but the single highest-priority, oldest job.
    async fn pause_for_pressure(&self, emergency: bool) {
        let mut running: Vec<(JobId, JobPriority, u64)> = self
            .jobs
            .iter()
            .filter(|entry| entry.job.status == JobStatus::Running)
            .map(|entry| (entry.job.id, entry.job.priority, entry.sequence))
            .collect();
        if running.is_empty() {
            return;
        }

        let victims: Vec<JobId> = if emergency {
            running.sort_by(|a, b| {
                b.1.numeric_priority()
                    .cmp(&a.1.numeric_priority())
                    .then(a.2.cmp(&b.2))
            });
            running.iter().skip(1).map(|(id, _, _)| *id).collect()
        } else {
            running.sort_by(|a, b| {
                a.1.numeric_priority()
                    .cmp(&b.1.numeric_priority())
                    .then(b.2.cmp(&a.2))
            });
            running.iter().take(1).map(|(id, _, _)| *id).collect()
        };

        for job_id in victims {
            if let Some(mut entry) = self.jobs.get_mut(&job_id) {
                warn!(
                    "Memory pressure: pausing job {} (priority {})",
                    job_id, entry.job.priority
                );
                entry.auto_paused = true;
                if let Some(commands) = &entry.commands {
                    let _ = commands.send(WorkerCommand::Pause);
                }
            }
        }
    }

    /// Resume pressure-paused jobs in priority then admission order,
    /// while capacity allows. The capacity check and the status flip
    /// share the queues lock with [`Inner::try_admit`].
    async fn resume_auto_paused(&self) {
        let mut candidates: Vec<(JobId, JobPriority, u64)> = self
            .jobs
            .iter()
            .filter(|entry| entry.auto_paused && entry.job.status == JobStatus::Paused)
            .map(|entry| (entry.job.id, entry.job.priority, entry.sequence))
            .collect();
        if candidates.is_empty() {
            return;
        }
        candidates.sort_by(|a, b| {
            b.1.numeric_priority()
                .cmp(&a.1.numeric_priority())
                .then(a.2.cmp(&b.2))
        });

        for (job_id, _, _) in candidates {
            let _queues = self.queues.lock().expect("scheduler queues poisoned");
            if self.running_count() >= self.config.max_concurrent_jobs {
                return;
            }
            if let Some(mut entry) = self.jobs.get_mut(&job_id) {
                if !entry.auto_paused || entry.job.status != JobStatus::Paused {
                    continue;
                }
                info!("Memory pressure cleared: resuming job {}", job_id);
                entry.auto_paused = false;
                entry.job.status = JobStatus::Running;
                entry.job.updated_at = Utc::now();
                if let Some(commands) = &entry.commands {
                    let _ = commands.send(WorkerCommand::Run);
                }
            }
        }
    }
}
