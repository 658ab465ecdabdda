//! Remote store quota configuration.
//!
//! Limits are supplied by the remote document store's published quotas;
//! the defaults mirror a free-tier document database.

use serde::{Deserialize, Serialize};

/// Per-day and per-minute call budgets for the quota guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Document reads allowed per day.
    #[serde(default = "default_reads_per_day")]
    pub reads_per_day: u64,
    /// Document writes allowed per day.
    #[serde(default = "default_writes_per_day")]
    pub writes_per_day: u64,
    /// Document deletes allowed per day.
    #[serde(default = "default_deletes_per_day")]
    pub deletes_per_day: u64,
    /// Document reads allowed per minute.
    #[serde(default = "default_reads_per_minute")]
    pub reads_per_minute: u64,
    /// Document writes allowed per minute.
    #[serde(default = "default_writes_per_minute")]
    pub writes_per_minute: u64,
    /// Document deletes allowed per minute.
    #[serde(default = "default_deletes_per_minute")]
    pub deletes_per_minute: u64,
    /// Fraction of a window's budget at which flushing slows down
    /// proactively instead of waiting for rejection.
    #[serde(default = "default_soft_ratio")]
    pub soft_limit_ratio: f64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            reads_per_day: default_reads_per_day(),
            writes_per_day: default_writes_per_day(),
            deletes_per_day: default_deletes_per_day(),
            reads_per_minute: default_reads_per_minute(),
            writes_per_minute: default_writes_per_minute(),
            deletes_per_minute: default_deletes_per_minute(),
            soft_limit_ratio: default_soft_ratio(),
        }
    }
}

fn default_reads_per_day() -> u64 {
    50_000
}

fn default_writes_per_day() -> u64 {
    20_000
}

fn default_deletes_per_day() -> u64 {
    20_000
}

fn default_reads_per_minute() -> u64 {
    1000
}

fn default_writes_per_minute() -> u64 {
    500
}

fn default_deletes_per_minute() -> u64 {
    500
}

fn default_soft_ratio() -> f64 {
    0.8
}
