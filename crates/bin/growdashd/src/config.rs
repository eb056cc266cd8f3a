//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `growdash.toml` in the working directory. Every field has a
//! default so the file is optional. Environment variables take precedence
//! over file values.

use std::time::Duration;

use chrono::TimeDelta;
use serde::Deserialize;

use growdash_app::lifecycle::LifecycleConfig;
use growdash_domain::time::minutes;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database settings.
    pub database: DatabaseConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Event scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Command timeout settings.
    pub timeouts: TimeoutsConfig,
}

/// `SQLite` database configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `SQLite` connection URL or file path.
    pub url: String,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Event scheduler configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Half-width of the firing window around `now`, in minutes.
    pub window_minutes: u64,
    /// Period of the scheduler loop in `serve`, in seconds.
    pub interval_seconds: u64,
    /// Log what would fire without writing anything.
    pub dry_run: bool,
}

/// Command timeout configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub pending_minutes: u64,
    pub executing_minutes: u64,
    /// Period of the pending sweep in `serve`, in seconds.
    pub pending_sweep_seconds: u64,
    /// Period of the executing sweep in `serve`, in seconds.
    pub executing_sweep_seconds: u64,
}

impl Config {
    /// Load configuration from `growdash.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting values fail validation.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("growdash.toml")?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("GROWDASH_DATABASE_URL") {
            self.database.url = val;
        }
        if let Some(val) = var("GROWDASH_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
        if let Some(Ok(val)) = var("GROWDASH_WINDOW_MINUTES").map(|v| v.parse()) {
            self.scheduler.window_minutes = val;
        }
        if let Some(Ok(val)) = var("GROWDASH_PENDING_TIMEOUT_MINUTES").map(|v| v.parse()) {
            self.timeouts.pending_minutes = val;
        }
        if let Some(Ok(val)) = var("GROWDASH_EXECUTING_TIMEOUT_MINUTES").map(|v| v.parse()) {
            self.timeouts.executing_minutes = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("scheduler.window_minutes", self.scheduler.window_minutes),
            ("scheduler.interval_seconds", self.scheduler.interval_seconds),
            ("timeouts.pending_minutes", self.timeouts.pending_minutes),
            ("timeouts.executing_minutes", self.timeouts.executing_minutes),
            ("timeouts.pending_sweep_seconds", self.timeouts.pending_sweep_seconds),
            ("timeouts.executing_sweep_seconds", self.timeouts.executing_sweep_seconds),
        ];
        if let Some((name, _)) = checks.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Validation(format!("{name} must be non-zero")));
        }
        Ok(())
    }

    /// Return the database URL in `sqlx`-compatible format.
    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database.url
    }

    #[must_use]
    pub fn window_radius(&self) -> TimeDelta {
        minutes(self.scheduler.window_minutes)
    }

    /// Timeout thresholds for the command lifecycle.
    #[must_use]
    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            pending_timeout: minutes(self.timeouts.pending_minutes),
            executing_timeout: minutes(self.timeouts.executing_minutes),
        }
    }

    #[must_use]
    pub fn scheduler_period(&self) -> Duration {
        Duration::from_secs(self.scheduler.interval_seconds)
    }

    #[must_use]
    pub fn pending_sweep_period(&self) -> Duration {
        Duration::from_secs(self.timeouts.pending_sweep_seconds)
    }

    #[must_use]
    pub fn executing_sweep_period(&self) -> Duration {
        Duration::from_secs(self.timeouts.executing_sweep_seconds)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:growdash.db?mode=rwc".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "growdashd=info,growdash_app=info,growdash_adapter_storage_sqlite_sqlx=info"
                .to_string(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            window_minutes: 2,
            interval_seconds: 60,
            dry_run: false,
        }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            pending_minutes: 5,
            executing_minutes: 10,
            pending_sweep_seconds: 300,
            executing_sweep_seconds: 600,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
