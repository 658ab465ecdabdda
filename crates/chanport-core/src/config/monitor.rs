//! Resource monitor configuration.

use serde::{Deserialize, Serialize};

/// Memory sampling and escalation thresholds.
///
/// Thresholds are used percent of total memory. They must satisfy
/// cleanup < warning < critical < emergency; [`MonitorConfig::validate`]
/// is checked at engine construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Whether the monitor task runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between memory samples.
    #[serde(default = "default_sample_interval")]
    pub sample_interval_seconds: u64,
    /// Cache-release hint threshold.
    #[serde(default = "default_cleanup")]
    pub cleanup_threshold: f32,
    /// Shrink-batch-sizes threshold.
    #[serde(default = "default_warning")]
    pub warning_threshold: f32,
    /// Pause-low-priority-jobs threshold.
    #[serde(default = "default_critical")]
    pub critical_threshold: f32,
    /// Pause-all-but-one threshold.
    #[serde(default = "default_emergency")]
    pub emergency_threshold: f32,
    /// Samples retained in the in-memory history ring.
    #[serde(default = "default_history")]
    pub history_size: usize,
}

impl MonitorConfig {
    /// Check that the thresholds escalate strictly.
    pub fn validate(&self) -> bool {
        self.cleanup_threshold < self.warning_threshold
            && self.warning_threshold < self.critical_threshold
            && self.critical_threshold < self.emergency_threshold
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_interval_seconds: default_sample_interval(),
            cleanup_threshold: default_cleanup(),
            warning_threshold: default_warning(),
            critical_threshold: default_critical(),
            emergency_threshold: default_emergency(),
            history_size: default_history(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sample_interval() -> u64 {
    20
}

fn default_cleanup() -> f32 {
    60.0
}

fn default_warning() -> f32 {
    70.0
}

fn default_critical() -> f32 {
    85.0
}

fn default_emergency() -> f32 {
    95.0
}

fn default_history() -> usize {
    120
}
