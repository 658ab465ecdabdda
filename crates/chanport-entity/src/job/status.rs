//! Job status and priority enumerations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a migration job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for a scheduler slot.
    Pending,
    /// Currently being executed by a worker.
    Running,
    /// Suspended at a sub-batch boundary (operator pause or backpressure).
    Paused,
    /// Successfully completed.
    Completed,
    /// Failed (consecutive-failure limit or checkpoint persistence exhausted).
    Failed,
    /// Cancelled cooperatively; the last checkpoint is preserved.
    Cancelled,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if the job currently holds (or may reclaim) a worker slot.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Priority level for a migration job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    /// Low priority (admitted last, paused first under pressure).
    Low,
    /// Normal priority (default).
    Normal,
    /// High priority.
    High,
    /// Urgent priority (admitted first).
    Urgent,
}

impl JobPriority {
    /// Return the numeric priority (higher = more urgent).
    pub fn numeric_priority(&self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Normal => 2,
            Self::High => 3,
            Self::Urgent => 4,
        }
    }

    /// All priorities from most to least urgent, in admission order.
    pub fn descending() -> [JobPriority; 4] {
        [Self::Urgent, Self::High, Self::Normal, Self::Low]
    }

    /// Return the priority as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
