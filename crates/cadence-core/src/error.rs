//! Error types for cadence-core
//!
//! Construction-time errors (bad cron text, bad trigger bundles) propagate to
//! the caller; errors thrown by task closures are recorded in the task's
//! execution context and never escape the task loop.

use thiserror::Error;

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Error raised while parsing a cron expression.
///
/// Carries the offending expression text alongside the cause so callers can
/// surface both to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid cron expression {expression:?}: {reason}")]
pub struct CronParseError {
    /// The expression that failed to parse.
    pub expression: String,
    /// Human-readable cause.
    pub reason: String,
}

impl CronParseError {
    pub(crate) fn new(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}

/// Scheduler error types
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Cron expression parsing error
    #[error(transparent)]
    InvalidCron(#[from] CronParseError),

    /// The overflow queue is at capacity; the only backpressure signal
    #[error("execution queue full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity
        capacity: usize,
    },

    /// Schedule call arrived after shutdown
    #[error("scheduler is shut down; no further tasks can be scheduled")]
    ShutdownInProgress,

    /// The trigger parameter bundle names no trigger kind
    #[error("no trigger specified; set exactly one of: cron, fixed-delay, fixed-rate, period")]
    NoTriggerSpecified,

    /// A declaration names more than one trigger kind
    #[error("conflicting triggers for {0}: declare exactly one of: cron, fixed-delay, fixed-rate, period")]
    ConflictingTriggers(String),

    /// Unknown IANA time-zone identifier
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Cron search exhausted its five-year horizon without a match
    #[error("no fire time within five years for cron expression {expression:?}")]
    NoUpcomingFire {
        /// The expression whose search was exhausted
        expression: String,
    },

    /// Start was called on a cancelled task
    #[error("task {name:?} is cancelled and cannot be started")]
    AlreadyCancelled {
        /// Name of the cancelled task
        name: String,
    },
}
