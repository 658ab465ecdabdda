//! Durable per-job progress record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::JobId;
use crate::job::status::JobStatus;
use crate::range::IdRange;

/// Crash-safe progress marker for a job.
///
/// Exclusively owned and mutated by the worker executing the job. The
/// engine's delivery model is at-least-once: a restart replays at most the
/// sub-batch after `last_processed_id`, never anything before it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Job this checkpoint belongs to.
    pub job_id: JobId,
    /// Highest id confirmed processed. Non-decreasing for the lifetime of
    /// the job, across any number of pause/resume cycles.
    pub last_processed_id: i64,
    /// Items handled so far.
    pub processed_count: u64,
    /// Per-item failures so far.
    pub failed_count: u64,
    /// Unresolved gap windows so far.
    pub gap_count: u64,
    /// Items confirmed to exist by discovery so far.
    pub total_discovered: u64,
    /// Job status at the time of the checkpoint.
    pub status: JobStatus,
    /// Gap windows recorded for later re-scan.
    #[serde(default)]
    pub gaps: Vec<IdRange>,
    /// When the checkpoint was last persisted.
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Create the initial checkpoint for a job starting at `range_start`.
    ///
    /// `last_processed_id` starts just below the range so the first resume
    /// cursor lands exactly on `range_start`.
    pub fn new(job_id: JobId, range_start: i64) -> Self {
        Self {
            job_id,
            last_processed_id: range_start - 1,
            processed_count: 0,
            failed_count: 0,
            gap_count: 0,
            total_discovered: 0,
            status: JobStatus::Pending,
            gaps: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Advance the high-water mark. Ids only ever move forward; a stale or
    /// replayed id leaves the mark untouched.
    pub fn advance(&mut self, id: i64) {
        if id > self.last_processed_id {
            self.last_processed_id = id;
        }
        self.updated_at = Utc::now();
    }

    /// The id the worker should resume from.
    pub fn resume_cursor(&self, range_start: i64) -> i64 {
        (self.last_processed_id + 1).max(range_start)
    }
}
