//! Process-wide memory pressure monitor.
//!
//! Samples used memory on a fixed interval and classifies it against four
//! escalating thresholds. The level is published over a watch channel read
//! by the scheduler and the workers; the monitor itself never pauses a job
//! or terminates anything.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::System;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use chanport_core::config::monitor::MonitorConfig;

/// Escalating memory pressure levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    /// Below every threshold.
    Normal,
    /// Release caches and other cheap memory.
    Cleanup,
    /// Shrink running jobs' transfer batches.
    Warning,
    /// Pause the newest low-priority running jobs.
    Critical,
    /// Pause all but the single highest-priority job and force-flush the
    /// store adapter.
    Emergency,
}

impl PressureLevel {
    /// Return the level as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Cleanup => "cleanup",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
        }
    }
}

/// One memory sample.
#[derive(Debug, Clone, Serialize)]
pub struct MemorySample {
    /// Used memory as a percentage of total.
    pub used_percent: f32,
    /// Used memory in bytes.
    pub used_bytes: u64,
    /// Total memory in bytes.
    pub total_bytes: u64,
    /// When the sample was taken.
    pub sampled_at: DateTime<Utc>,
}

/// Monitor statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    /// Current pressure level.
    pub level: PressureLevel,
    /// Recent samples, oldest first.
    pub history: Vec<MemorySample>,
}

/// Memory pressure monitor.
///
/// Constructed once and passed by handle to the components that read it —
/// threshold state is process-wide but never ambient.
#[derive(Debug)]
pub struct ResourceMonitor {
    config: MonitorConfig,
    level_tx: watch::Sender<PressureLevel>,
    history: Mutex<VecDeque<MemorySample>>,
}

impl ResourceMonitor {
    /// Create a monitor and the receiver for its pressure level.
    pub fn new(config: MonitorConfig) -> (std::sync::Arc<Self>, watch::Receiver<PressureLevel>) {
        let (level_tx, level_rx) = watch::channel(PressureLevel::Normal);
        (
            std::sync::Arc::new(Self {
                config,
                level_tx,
                history: Mutex::new(VecDeque::new()),
            }),
            level_rx,
        )
    }

    /// Subscribe to pressure level changes.
    pub fn subscribe(&self) -> watch::Receiver<PressureLevel> {
        self.level_tx.subscribe()
    }

    /// Classify a used-memory percentage against the thresholds.
    pub fn classify(&self, used_percent: f32) -> PressureLevel {
        if used_percent >= self.config.emergency_threshold {
            PressureLevel::Emergency
        } else if used_percent >= self.config.critical_threshold {
            PressureLevel::Critical
        } else if used_percent >= self.config.warning_threshold {
            PressureLevel::Warning
        } else if used_percent >= self.config.cleanup_threshold {
            PressureLevel::Cleanup
        } else {
            PressureLevel::Normal
        }
    }

    /// Feed one sample: classify, record, and publish.
    ///
    /// Every sample is published, not just level changes — the scheduler
    /// escalates one job per critical sample, so repeated samples at the
    /// same level still matter.
    pub fn observe(&self, sample: MemorySample) -> PressureLevel {
        let level = self.classify(sample.used_percent);
        let previous = *self.level_tx.borrow();

        if level != previous {
            match level {
                PressureLevel::Critical | PressureLevel::Emergency => warn!(
                    "Memory pressure {} -> {} ({:.1}% used)",
                    previous.as_str(),
                    level.as_str(),
                    sample.used_percent
                ),
                _ => info!(
                    "Memory pressure {} -> {} ({:.1}% used)",
                    previous.as_str(),
                    level.as_str(),
                    sample.used_percent
                ),
            }
        } else {
            debug!(
                "Memory sample: {:.1}% used, level {}",
                sample.used_percent,
                level.as_str()
            );
        }

        {
            let mut history = self.history.lock().expect("monitor history poisoned");
            history.push_back(sample);
            while history.len() > self.config.history_size.max(1) {
                history.pop_front();
            }
        }

        let _ = self.level_tx.send(level);
        level
    }

    /// Sampling loop; runs until the shutdown signal flips to true.
    pub async fn run(self: std::sync::Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if !self.config.enabled {
            info!("Resource monitor disabled by configuration");
            return;
        }
        if !self.config.validate() {
            warn!("Monitor thresholds do not escalate; resource monitor not started");
            return;
        }

        let interval = Duration::from_secs(self.config.sample_interval_seconds.max(1));
        let mut sys = System::new();
        info!(
            "Resource monitor started (interval {}s, thresholds {:.0}/{:.0}/{:.0}/{:.0})",
            interval.as_secs(),
            self.config.cleanup_threshold,
            self.config.warning_threshold,
            self.config.critical_threshold,
            self.config.emergency_threshold
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Resource monitor stopped");
                        return;
                    }
                }
                _ = tokio::time::sleep(interval) => {
                    sys.refresh_memory();
                    let total = sys.total_memory();
                    let used = sys.used_memory();
                    let used_percent = if total == 0 {
                        0.0
                    } else {
                        used as f32 / total as f32 * 100.0
                    };
                    self.observe(MemorySample {
                        used_percent,
                        used_bytes: used,
                        total_bytes: total,
                        sampled_at: Utc::now(),
                    });
                }
            }
        }
    }

    /// Current level and recent history.
    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            level: *self.level_tx.borrow(),
            history: self
                .history
                .lock()
                .expect("monitor history poisoned")
                .iter()
                .cloned()
                .collect(),
        }
    }
}
