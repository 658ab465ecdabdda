//! Engine configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section. Every knob is resolved once at construction time; components
//! never re-read configuration mid-run.

pub mod logging;
pub mod migration;
pub mod monitor;
pub mod quota;
pub mod scheduler;
pub mod store;

use serde::{Deserialize, Serialize};

use self::logging::LoggingConfig;
use self::migration::MigrationConfig;
use self::monitor::MonitorConfig;
use self::quota::QuotaConfig;
use self::scheduler::SchedulerConfig;
use self::store::StoreConfig;

use crate::error::AppError;

/// Root engine configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Job scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Per-job migration settings (batch sizes, group assembly, limits).
    #[serde(default)]
    pub migration: MigrationConfig,
    /// Resource monitor settings.
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Batched store adapter settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Remote store quota limits.
    #[serde(default)]
    pub quota: QuotaConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges the default configuration with an environment-specific overlay
    /// and environment variables prefixed with `CHANPORT__`.
    pub fn load(env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("CHANPORT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }
}
