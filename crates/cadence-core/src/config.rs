//! Environment-sourced scheduler configuration.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SchedulerError};

/// Default cap on simultaneous task executions
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Default bound on the overflow queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Environment variable overriding the concurrency cap
pub const ENV_MAX_CONCURRENCY: &str = "CADENCE_MAX_CONCURRENCY";

/// Environment variable overriding the queue capacity
pub const ENV_QUEUE_CAPACITY: &str = "CADENCE_QUEUE_CAPACITY";

/// Environment variable overriding the default time zone
pub const ENV_TIMEZONE: &str = "CADENCE_TIMEZONE";

/// Environment variable setting the task-name prefix
pub const ENV_NAME_PREFIX: &str = "CADENCE_NAME_PREFIX";

/// Scheduler configuration properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerProperties {
    /// Cap on simultaneous task executions (default: 10)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Bound on the overflow queue (default: 1000)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Default IANA zone for triggers (default: the process zone)
    #[serde(default)]
    pub timezone: Option<String>,

    /// Prefix fed to the task-name generator
    #[serde(default)]
    pub name_prefix: Option<String>,
}

/// Returns the default concurrency cap.
pub fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

/// Returns the default overflow-queue capacity.
pub fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for SchedulerProperties {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            queue_capacity: default_queue_capacity(),
            timezone: None,
            name_prefix: None,
        }
    }
}

impl SchedulerProperties {
    /// Defaults overridden by any `CADENCE_*` environment variables.
    ///
    /// Unparsable numeric overrides are logged and ignored.
    pub fn from_env() -> Self {
        let mut properties = Self::default();
        if let Some(value) = read_env_usize(ENV_MAX_CONCURRENCY) {
            properties.max_concurrency = value;
        }
        if let Some(value) = read_env_usize(ENV_QUEUE_CAPACITY) {
            properties.queue_capacity = value;
        }
        if let Ok(zone) = std::env::var(ENV_TIMEZONE) {
            if !zone.is_empty() {
                properties.timezone = Some(zone);
            }
        }
        if let Ok(prefix) = std::env::var(ENV_NAME_PREFIX) {
            if !prefix.is_empty() {
                properties.name_prefix = Some(prefix);
            }
        }
        properties
    }

    /// Check caps are positive and the zone, if set, is a known IANA id.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(SchedulerError::InvalidConfig(
                "max-concurrency must be a positive integer".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(SchedulerError::InvalidConfig(
                "queue-capacity must be a positive integer".to_string(),
            ));
        }
        self.default_zone().map(|_| ())
    }

    /// Resolve the default trigger zone: the configured id, else the process
    /// zone.
    pub fn default_zone(&self) -> Result<Tz> {
        match &self.timezone {
            Some(id) => id
                .parse()
                .map_err(|_| SchedulerError::InvalidTimezone(id.clone())),
            None => Ok(system_zone()),
        }
    }
}

/// The process time zone, falling back to UTC when it cannot be determined.
pub fn system_zone() -> Tz {
    iana_time_zone::get_timezone()
        .ok()
        .and_then(|id| id.parse().ok())
        .unwrap_or(chrono_tz::UTC)
}

fn read_env_usize(variable: &str) -> Option<usize> {
    let raw = std::env::var(variable).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}
