//! Job scheduler configuration.

use serde::{Deserialize, Serialize};

/// Concurrency limits for the job scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of jobs running at once across the engine.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_jobs: usize,
    /// Maximum number of non-terminal jobs a single submitter may hold.
    #[serde(default = "default_per_submitter")]
    pub max_jobs_per_submitter: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent(),
            max_jobs_per_submitter: default_per_submitter(),
        }
    }
}

fn default_max_concurrent() -> usize {
    3
}

fn default_per_submitter() -> usize {
    2
}
