//! Job entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::JobId;
use crate::range::IdRange;

use super::status::{JobPriority, JobStatus};

/// A migration job: one run scoped to a source id range and a destination.
///
/// Lifecycle transitions are owned by the scheduler; progress fields are
/// owned by the executing worker, which reports snapshots back through the
/// scheduler's event channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub id: JobId,
    /// Source collection identifier.
    pub source: String,
    /// Destination collection identifier.
    pub destination: String,
    /// Source id range to migrate (sparse — span is not an item count).
    pub range: IdRange,
    /// Filter/transform configuration snapshot taken at submission.
    pub filter: serde_json::Value,
    /// Job priority.
    pub priority: JobPriority,
    /// Current job status.
    pub status: JobStatus,
    /// Items handled so far (emitted or deliberately dropped by the filter).
    pub processed_count: u64,
    /// Per-item failures so far.
    pub failed_count: u64,
    /// Probe windows or groups given up on after retries.
    pub gap_count: u64,
    /// Total items in the range, corrected by discovery — never the range span.
    pub total_count: u64,
    /// Submitter identifier, used for per-submitter concurrency limits.
    pub submitted_by: Option<String>,
    /// Error message when the job failed.
    pub error_message: Option<String>,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
    /// When the job first started running.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a pending job from submission parameters.
    pub fn from_submit(params: SubmitJob) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            source: params.source,
            destination: params.destination,
            range: params.range,
            filter: params.filter,
            priority: params.priority,
            status: JobStatus::Pending,
            processed_count: 0,
            failed_count: 0,
            gap_count: 0,
            total_count: 0,
            submitted_by: params.submitted_by,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Percent complete against the discovery-corrected total.
    ///
    /// Returns 0.0 until discovery has confirmed at least one item, so an
    /// unstarted job never reports a bogus percentage from the range span.
    pub fn percent_complete(&self) -> f64 {
        if self.total_count == 0 {
            if self.status == JobStatus::Completed {
                return 100.0;
            }
            return 0.0;
        }
        (self.processed_count as f64 / self.total_count as f64 * 100.0).min(100.0)
    }

    /// Build the user-facing status report.
    pub fn status_report(&self) -> JobStatusReport {
        JobStatusReport {
            id: self.id,
            status: self.status,
            priority: self.priority,
            processed_count: self.processed_count,
            failed_count: self.failed_count,
            gap_count: self.gap_count,
            total_count: self.total_count,
            percent_complete: self.percent_complete(),
            error_message: self.error_message.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// Data required to submit a new migration job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJob {
    /// Source collection identifier.
    pub source: String,
    /// Destination collection identifier.
    pub destination: String,
    /// Source id range to migrate.
    pub range: IdRange,
    /// Filter/transform configuration snapshot.
    #[serde(default)]
    pub filter: serde_json::Value,
    /// Priority.
    #[serde(default)]
    pub priority: JobPriority,
    /// Submitter identifier.
    #[serde(default)]
    pub submitted_by: Option<String>,
}

/// Snapshot returned by the job control surface.
///
/// Always carries processed/failed/gap counts — a job is never reported as
/// a bare "done".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusReport {
    /// Job identifier.
    pub id: JobId,
    /// Current status.
    pub status: JobStatus,
    /// Priority.
    pub priority: JobPriority,
    /// Items handled so far.
    pub processed_count: u64,
    /// Per-item failures so far.
    pub failed_count: u64,
    /// Unresolved gaps so far.
    pub gap_count: u64,
    /// Discovery-corrected total.
    pub total_count: u64,
    /// Percent complete against the corrected total.
    pub percent_complete: f64,
    /// Error message when failed.
    pub error_message: Option<String>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}
