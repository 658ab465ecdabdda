//! Collection names and document key builders.
//!
//! Centralising key construction prevents typos and makes it easy to find
//! every document the engine writes.

use chanport_entity::JobId;

/// Collection holding one checkpoint document per job.
pub const CHECKPOINTS: &str = "checkpoints";

/// Collection holding one control document per job.
pub const JOBS: &str = "jobs";

/// Document key for a job's checkpoint.
pub fn checkpoint_key(job_id: JobId) -> String {
    format!("ckpt:{job_id}")
}

/// Document key for a job's control record.
pub fn job_key(job_id: JobId) -> String {
    format!("job:{job_id}")
}
