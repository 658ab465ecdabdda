//! Quota guard for the remote document store.
//!
//! Tracks rolling per-minute and per-day call counts per operation class
//! against externally supplied limits. At the soft ratio of a window's
//! budget the guard asks callers to slow down; at the hard limit it asks
//! them to wait for the window to reset. Data is never dropped on the
//! guard's account — only flush timing reacts.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, TimeDelta, Utc};
use serde::Serialize;

use chanport_core::config::quota::QuotaConfig;

/// Class of an outgoing store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    /// Document read.
    Read,
    /// Document set/update.
    Write,
    /// Document delete.
    Delete,
}

impl OpClass {
    fn index(self) -> usize {
        match self {
            Self::Read => 0,
            Self::Write => 1,
            Self::Delete => 2,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
        }
    }
}

/// Verdict for a prospective batch of calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaVerdict {
    /// Plenty of budget left.
    Proceed,
    /// Past the soft ratio; stretch the flush interval.
    SlowDown,
    /// Budget spent; retry after the window resets.
    Exhausted {
        /// Time until the limiting window resets.
        retry_after: Duration,
    },
}

/// Usage snapshot for one operation class.
#[derive(Debug, Clone, Serialize)]
pub struct ClassUsage {
    /// Operation class name.
    pub class: &'static str,
    /// Calls used in the current day window.
    pub day_used: u64,
    /// Daily limit.
    pub day_limit: u64,
    /// Calls used in the current minute window.
    pub minute_used: u64,
    /// Per-minute limit.
    pub minute_limit: u64,
}

/// Usage snapshot across all operation classes.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaStats {
    /// Per-class usage.
    pub usage: Vec<ClassUsage>,
}

#[derive(Debug)]
struct GuardState {
    day: NaiveDate,
    day_used: [u64; 3],
    minute_started: Instant,
    minute_used: [u64; 3],
}

/// Rolling-window call budget tracker.
#[derive(Debug)]
pub struct QuotaGuard {
    config: QuotaConfig,
    minute_window: Duration,
    state: Mutex<GuardState>,
}

impl QuotaGuard {
    /// Create a guard from the backend's published limits.
    pub fn new(config: QuotaConfig) -> Self {
        Self::with_minute_window(config, Duration::from_secs(60))
    }

    /// Create a guard with a non-standard short-window length, for
    /// backends (and tests) whose burst window is not one minute.
    pub fn with_minute_window(config: QuotaConfig, minute_window: Duration) -> Self {
        Self {
            config,
            minute_window: minute_window.max(Duration::from_millis(1)),
            state: Mutex::new(GuardState {
                day: Utc::now().date_naive(),
                day_used: [0; 3],
                minute_started: Instant::now(),
                minute_used: [0; 3],
            }),
        }
    }

    fn limits(&self, class: OpClass) -> (u64, u64) {
        match class {
            OpClass::Read => (self.config.reads_per_day, self.config.reads_per_minute),
            OpClass::Write => (self.config.writes_per_day, self.config.writes_per_minute),
            OpClass::Delete => (self.config.deletes_per_day, self.config.deletes_per_minute),
        }
    }

    fn roll(&self, state: &mut GuardState) {
        if state.minute_started.elapsed() >= self.minute_window {
            state.minute_started = Instant::now();
            state.minute_used = [0; 3];
        }
        let today = Utc::now().date_naive();
        if today != state.day {
            state.day = today;
            state.day_used = [0; 3];
        }
    }

    fn until_minute_reset(&self, state: &GuardState) -> Duration {
        self.minute_window
            .saturating_sub(state.minute_started.elapsed())
    }

    fn until_day_reset() -> Duration {
        let now = Utc::now();
        let tomorrow = now
            .date_naive()
            .succ_opt()
            .unwrap_or(now.date_naive())
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or(now);
        (tomorrow - now)
            .max(TimeDelta::zero())
            .to_std()
            .unwrap_or(Duration::from_secs(60))
    }

    /// Judge whether `count` more calls of `class` fit the current windows.
    pub fn check(&self, class: OpClass, count: u64) -> QuotaVerdict {
        let mut state = self.state.lock().expect("quota state poisoned");
        self.roll(&mut state);

        let (day_limit, minute_limit) = self.limits(class);
        let idx = class.index();

        if state.minute_used[idx] + count > minute_limit {
            return QuotaVerdict::Exhausted {
                retry_after: self.until_minute_reset(&state),
            };
        }
        if state.day_used[idx] + count > day_limit {
            return QuotaVerdict::Exhausted {
                retry_after: Self::until_day_reset(),
            };
        }

        let soft = self.config.soft_limit_ratio;
        let minute_soft = (state.minute_used[idx] + count) as f64 >= minute_limit as f64 * soft;
        let day_soft = (state.day_used[idx] + count) as f64 >= day_limit as f64 * soft;
        if minute_soft || day_soft {
            return QuotaVerdict::SlowDown;
        }

        QuotaVerdict::Proceed
    }

    /// Record `count` calls of `class` made against the backend.
    pub fn record(&self, class: OpClass, count: u64) {
        let mut state = self.state.lock().expect("quota state poisoned");
        self.roll(&mut state);
        let idx = class.index();
        state.minute_used[idx] += count;
        state.day_used[idx] += count;
    }

    /// The per-minute limit for a class, used to size flush chunks so a
    /// single chunk can always fit one window.
    pub fn minute_limit(&self, class: OpClass) -> u64 {
        self.limits(class).1
    }

    /// Current usage across classes.
    pub fn stats(&self) -> QuotaStats {
        let mut state = self.state.lock().expect("quota state poisoned");
        self.roll(&mut state);
        let usage = [OpClass::Read, OpClass::Write, OpClass::Delete]
            .into_iter()
            .map(|class| {
                let (day_limit, minute_limit) = self.limits(class);
                ClassUsage {
                    class: class.as_str(),
                    day_used: state.day_used[class.index()],
                    day_limit,
                    minute_used: state.minute_used[class.index()],
                    minute_limit,
                }
            })
            .collect();
        QuotaStats { usage }
    }
}
