//! Per-job migration configuration.

use serde::{Deserialize, Serialize};

/// Policy for a multi-part group that cannot be completed within its
/// look-ahead timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupPolicy {
    /// Emit the members fetched so far and log a warning.
    EmitPartial,
    /// Skip the whole group and record it as a gap.
    Skip,
}

impl Default for GroupPolicy {
    fn default() -> Self {
        Self::EmitPartial
    }
}

/// Batch sizes, group assembly, and failure limits for migration workers.
///
/// Discovery and transfer batch sizes are deliberately independent knobs:
/// probes must stay small enough that a mostly-empty window cannot hide
/// real ids, while transfer batches are sized for throughput.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Ids probed per discovery sub-batch.
    #[serde(default = "default_discovery_batch")]
    pub discovery_batch_size: usize,
    /// Items fetched/emitted per transfer batch.
    #[serde(default = "default_transfer_batch")]
    pub transfer_batch_size: usize,
    /// Floor for the transfer batch size under memory pressure.
    #[serde(default = "default_min_transfer_batch")]
    pub min_transfer_batch_size: usize,
    /// Consecutive per-item failures before the job fails.
    #[serde(default = "default_failure_limit")]
    pub consecutive_failure_limit: u32,
    /// Maximum ids to look ahead when completing a group.
    #[serde(default = "default_group_lookahead")]
    pub group_lookahead: usize,
    /// Group assembly timeout in seconds.
    #[serde(default = "default_group_timeout")]
    pub group_timeout_seconds: u64,
    /// What to do when a group cannot be completed in time.
    #[serde(default)]
    pub group_policy: GroupPolicy,
    /// Delay between emitted items in milliseconds (source pacing).
    #[serde(default = "default_emit_delay")]
    pub emit_delay_ms: u64,
    /// Retries per fetch (probe, batch fetch, look-ahead, emit) before
    /// giving up on the call.
    #[serde(default = "default_fetch_retries")]
    pub fetch_retry_attempts: u32,
    /// Fetch retry backoff base in milliseconds.
    #[serde(default = "default_fetch_retry_base")]
    pub fetch_retry_base_ms: u64,
    /// Fetch retry backoff cap in milliseconds.
    #[serde(default = "default_fetch_retry_cap")]
    pub fetch_retry_cap_ms: u64,
}

impl MigrationConfig {
    /// The retry policy applied to every platform fetch/emit call.
    pub fn fetch_retry_policy(&self) -> crate::retry::RetryPolicy {
        crate::retry::RetryPolicy::from_millis(
            self.fetch_retry_attempts,
            self.fetch_retry_base_ms,
            self.fetch_retry_cap_ms,
        )
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            discovery_batch_size: default_discovery_batch(),
            transfer_batch_size: default_transfer_batch(),
            min_transfer_batch_size: default_min_transfer_batch(),
            consecutive_failure_limit: default_failure_limit(),
            group_lookahead: default_group_lookahead(),
            group_timeout_seconds: default_group_timeout(),
            group_policy: GroupPolicy::default(),
            emit_delay_ms: default_emit_delay(),
            fetch_retry_attempts: default_fetch_retries(),
            fetch_retry_base_ms: default_fetch_retry_base(),
            fetch_retry_cap_ms: default_fetch_retry_cap(),
        }
    }
}

fn default_discovery_batch() -> usize {
    150
}

fn default_transfer_batch() -> usize {
    400
}

fn default_min_transfer_batch() -> usize {
    100
}

fn default_failure_limit() -> u32 {
    8
}

fn default_group_lookahead() -> usize {
    50
}

fn default_group_timeout() -> u64 {
    45
}

fn default_emit_delay() -> u64 {
    50
}

fn default_fetch_retries() -> u32 {
    3
}

fn default_fetch_retry_base() -> u64 {
    500
}

fn default_fetch_retry_cap() -> u64 {
    10_000
}
