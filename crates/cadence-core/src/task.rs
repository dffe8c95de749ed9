//! Scheduled-task runtime: the per-task fire loop and cooperative
//! cancellation.
//!
//! Each task is a single execution chain: the loop consults the trigger,
//! sleeps until the fire instant, runs the closure, records the outcome, and
//! reschedules. At most one invocation of the closure is in flight at a time.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::context::ExecutionContext;
use crate::error::{Result, SchedulerError};
use crate::trigger::Trigger;

/// Error produced by a task closure; recorded, never propagated.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by a task closure.
pub type TaskFuture = Pin<Box<dyn Future<Output = std::result::Result<(), TaskError>> + Send>>;

/// A schedulable task closure.
pub type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// A task bound to a trigger, running its own fire loop.
///
/// Created through [`ConcurrentScheduler::schedule`] for gated execution, or
/// through [`ScheduledTask::new`] for standalone use.
///
/// [`ConcurrentScheduler::schedule`]: crate::scheduler::ConcurrentScheduler::schedule
pub struct ScheduledTask {
    name: String,
    trigger: Trigger,
    context: Arc<ExecutionContext>,
    runner: TaskFn,
    /// Cancels the pending sleep and suppresses further scheduling.
    cancel: CancellationToken,
    cancelled: AtomicBool,
    started: AtomicBool,
    /// `true` strictly while the closure runs; doubles as the completion
    /// handle awaited by non-interrupting cancellation.
    executing: watch::Sender<bool>,
    /// Self-handle so `start` can hand the loop an owned reference.
    this: Weak<ScheduledTask>,
}

impl ScheduledTask {
    /// Create a standalone task; the closure runs ungated.
    pub fn new(name: impl Into<String>, trigger: Trigger, task: TaskFn) -> Arc<Self> {
        let context = Arc::new(ExecutionContext::new());
        let runner = recording_runner(Arc::clone(&context), task);
        Self::with_runner(name, trigger, context, runner)
    }

    /// Create a task around a pre-wrapped runner (the scheduler's gate).
    ///
    /// The runner is responsible for recording the actual start, so the
    /// timestamp reflects admission rather than the hand-off.
    pub(crate) fn with_runner(
        name: impl Into<String>,
        trigger: Trigger,
        context: Arc<ExecutionContext>,
        runner: TaskFn,
    ) -> Arc<Self> {
        let (executing, _) = watch::channel(false);
        let name = name.into();
        Arc::new_cyclic(|this| Self {
            name,
            trigger,
            context,
            runner,
            cancel: CancellationToken::new(),
            cancelled: AtomicBool::new(false),
            started: AtomicBool::new(false),
            executing,
            this: this.clone(),
        })
    }

    /// Start the fire loop.
    ///
    /// Calling `start` on a live task is a no-op.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::AlreadyCancelled`] when the task was cancelled.
    pub fn start(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(SchedulerError::AlreadyCancelled {
                name: self.name.clone(),
            });
        }
        if self.started.swap(true, Ordering::SeqCst) {
            debug!(task = %self.name, "task already started");
            return Ok(());
        }
        if let Some(task) = self.this.upgrade() {
            tokio::spawn(async move { task.run_loop().await });
        }
        Ok(())
    }

    /// Cancel the task.
    ///
    /// Returns `false` when the task was already cancelled. Cancellation is
    /// cooperative: a pending sleep is aborted, but a running closure is
    /// never preempted. With `may_interrupt` unset, this waits for any
    /// in-flight execution to finish before returning.
    pub async fn cancel(&self, may_interrupt: bool) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            debug!(task = %self.name, "task already cancelled");
            return false;
        }
        debug!(task = %self.name, may_interrupt, "cancelling task");
        self.cancel.cancel();

        if may_interrupt {
            if self.is_executing() {
                warn!(
                    task = %self.name,
                    "interrupting cancel requested; running closures are not preempted"
                );
            }
        } else {
            let mut completion = self.executing.subscribe();
            let _ = completion.wait_for(|executing| !*executing).await;
        }
        true
    }

    /// The task's unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The trigger driving the loop.
    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    /// The zone the trigger evaluates in.
    pub fn zone(&self) -> Tz {
        self.trigger.zone()
    }

    /// The task's execution history.
    pub fn execution_context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    /// Instant the closure most recently started, if any.
    pub fn last_execution(&self) -> Option<DateTime<Utc>> {
        self.context.last_actual_start()
    }

    /// The next fire instant, recomputed on demand from the current history.
    pub fn next_execution(&self) -> Option<DateTime<Utc>> {
        self.trigger.next_fire_time(&self.context).ok().flatten()
    }

    /// Whether the closure is running right now.
    pub fn is_executing(&self) -> bool {
        *self.executing.borrow()
    }

    /// Whether the task has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// How many times the closure has been entered.
    pub fn execution_count(&self) -> u64 {
        self.context.execution_count()
    }

    async fn run_loop(self: Arc<Self>) {
        debug!(task = %self.name, "task loop started");
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let fire = match self.trigger.next_fire_time(&self.context) {
                Ok(Some(fire)) => fire,
                Ok(None) => {
                    debug!(task = %self.name, "trigger declared completion; stopping");
                    break;
                }
                Err(err) => {
                    error!(task = %self.name, error = %err, "trigger evaluation failed; stopping");
                    break;
                }
            };

            let delay = fire - Utc::now();
            if delay > Duration::zero() {
                let sleep = delay.to_std().unwrap_or(std::time::Duration::ZERO);
                tokio::select! {
                    _ = tokio::time::sleep(sleep) => {}
                    _ = self.cancel.cancelled() => break,
                }
            }
            // Behind schedule: run immediately; missed fires are not batched.

            self.execute_once().await;
        }
        debug!(task = %self.name, "task loop exited");
    }

    async fn execute_once(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        let _ = self.executing.send_replace(true);
        self.context.record_scheduled(Utc::now());

        let result = (self.runner)().await;
        let now = Utc::now();
        match result {
            Ok(()) => self.context.record_completion(now),
            Err(err) => {
                error!(task = %self.name, error = %err, "scheduled task failed");
                self.context.record_failure(Arc::from(err), now);
            }
        }
        let _ = self.executing.send_replace(false);
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .field("executing", &self.is_executing())
            .field("cancelled", &self.is_cancelled())
            .field("execution_count", &self.execution_count())
            .finish()
    }
}

/// Wrap a closure so the actual start is recorded right before it runs.
pub(crate) fn recording_runner(context: Arc<ExecutionContext>, task: TaskFn) -> TaskFn {
    Arc::new(move || {
        let context = Arc::clone(&context);
        let task = Arc::clone(&task);
        Box::pin(async move {
            context.record_actual_start(Utc::now());
            task().await
        })
    })
}
