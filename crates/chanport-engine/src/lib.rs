//! # chanport-engine
//!
//! The job execution engine: id-space discovery over sparse ranges, the
//! streaming per-job migration worker, the priority-aware scheduler with
//! resource-based backpressure, and the memory monitor that drives it.

pub mod discovery;
pub mod monitor;
pub mod scheduler;
pub mod source;
pub mod worker;

pub use discovery::{Discoverer, Probe};
pub use monitor::{MemorySample, MonitorStats, PressureLevel, ResourceMonitor};
pub use scheduler::{JobScheduler, SchedulerContext, SchedulerStats};
pub use source::MemorySource;
pub use worker::{MigrationWorker, WorkerCommand, WorkerContext, WorkerEvent};
