//! Per-task execution history consulted by trigger evaluation.

use std::error::Error;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

/// Mutable per-task record of timings, the last error, and the execution
/// counter.
///
/// Only the owning task's loop mutates it; observer reads are best-effort
/// snapshots. The trigger variants each anchor on a different field: cron and
/// periodic on the last actual start, fixed-rate on the last scheduled
/// instant, fixed-delay on the last completion.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    last_scheduled: Option<DateTime<Utc>>,
    last_actual_start: Option<DateTime<Utc>>,
    last_completion: Option<DateTime<Utc>>,
    last_error: Option<Arc<dyn Error + Send + Sync>>,
    execution_count: u64,
}

impl ExecutionContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the instant an execution was handed to the gate.
    pub fn record_scheduled(&self, instant: DateTime<Utc>) {
        self.lock().last_scheduled = Some(instant);
    }

    /// Record the instant the closure actually started; bumps the counter.
    pub fn record_actual_start(&self, instant: DateTime<Utc>) {
        let mut inner = self.lock();
        inner.last_actual_start = Some(instant);
        inner.execution_count += 1;
    }

    /// Record a successful completion; clears the last error.
    pub fn record_completion(&self, instant: DateTime<Utc>) {
        let mut inner = self.lock();
        inner.last_completion = Some(instant);
        inner.last_error = None;
    }

    /// Record a failed execution.
    ///
    /// Failed executions count as completed so fixed-delay spacing keeps
    /// advancing.
    pub fn record_failure(&self, error: Arc<dyn Error + Send + Sync>, instant: DateTime<Utc>) {
        let mut inner = self.lock();
        inner.last_error = Some(error);
        inner.last_completion = Some(instant);
    }

    /// Instant of the most recent hand-off to the gate.
    pub fn last_scheduled(&self) -> Option<DateTime<Utc>> {
        self.lock().last_scheduled
    }

    /// Instant the closure most recently started.
    pub fn last_actual_start(&self) -> Option<DateTime<Utc>> {
        self.lock().last_actual_start
    }

    /// Instant the closure most recently finished, successfully or not.
    pub fn last_completion(&self) -> Option<DateTime<Utc>> {
        self.lock().last_completion
    }

    /// The most recent error, if the last execution failed.
    pub fn last_error(&self) -> Option<Arc<dyn Error + Send + Sync>> {
        self.lock().last_error.clone()
    }

    /// How many times the closure has been entered.
    pub fn execution_count(&self) -> u64 {
        self.lock().execution_count
    }
}
