//! Concurrency-gated task scheduler.
//!
//! The scheduler runs many independent task loops but caps how many closures
//! execute simultaneously. Saturated executions wait in a bounded overflow
//! queue; a full queue is the only backpressure signal and surfaces to the
//! task loop as a recorded failure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Duration;
use chrono_tz::Tz;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::config::SchedulerProperties;
use crate::context::ExecutionContext;
use crate::error::{Result, SchedulerError};
use crate::task::{recording_runner, ScheduledTask, TaskError, TaskFn};
use crate::trigger::{Trigger, TriggerSpec};

/// Admission control for task executions.
///
/// Up to `max_concurrent` closures run at once; up to `queue_capacity` more
/// wait their turn. Releasing a permit admits the longest-waiting execution.
pub(crate) struct ExecutionGate {
    semaphore: Arc<Semaphore>,
    queue_capacity: usize,
    active: Arc<AtomicUsize>,
    queued: AtomicUsize,
}

impl ExecutionGate {
    fn new(max_concurrent: usize, queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            queue_capacity,
            active: Arc::new(AtomicUsize::new(0)),
            queued: AtomicUsize::new(0),
        })
    }

    /// Acquire an execution slot, waiting in the overflow queue if the gate
    /// is saturated.
    async fn admit(&self) -> Result<GatePermit> {
        let permit = match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.enter_queue()?;
                debug!(queued = self.queued.load(Ordering::SeqCst), "execution gate saturated");
                let acquired = Arc::clone(&self.semaphore).acquire_owned().await;
                self.queued.fetch_sub(1, Ordering::SeqCst);
                acquired.map_err(|_| SchedulerError::ShutdownInProgress)?
            }
        };
        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(GatePermit {
            active: Arc::clone(&self.active),
            _permit: permit,
        })
    }

    /// Reserve a queue slot, failing when the queue is at capacity.
    fn enter_queue(&self) -> Result<()> {
        let mut queued = self.queued.load(Ordering::SeqCst);
        loop {
            if queued >= self.queue_capacity {
                return Err(SchedulerError::QueueFull {
                    capacity: self.queue_capacity,
                });
            }
            match self.queued.compare_exchange(
                queued,
                queued + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(()),
                Err(current) => queued = current,
            }
        }
    }

    /// Wrap a runner so each invocation passes through the gate.
    fn wrap(self: Arc<Self>, task: TaskFn) -> TaskFn {
        let gate = self;
        Arc::new(move || {
            let gate = Arc::clone(&gate);
            let task = Arc::clone(&task);
            Box::pin(async move {
                let _permit = gate.admit().await.map_err(TaskError::from)?;
                task().await
            })
        })
    }

    fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }
}

/// Slot held for the duration of one gated execution.
#[derive(Debug)]
struct GatePermit {
    active: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scheduler running task loops behind a shared concurrency gate.
pub struct ConcurrentScheduler {
    gate: Arc<ExecutionGate>,
    tasks: Mutex<HashMap<String, Arc<ScheduledTask>>>,
    default_zone: Tz,
    shutdown: AtomicBool,
}

impl ConcurrentScheduler {
    /// Scheduler with default properties (cap 10, queue 1000, process zone).
    pub fn new() -> Self {
        let properties = SchedulerProperties::default();
        Self {
            gate: ExecutionGate::new(properties.max_concurrency, properties.queue_capacity),
            tasks: Mutex::new(HashMap::new()),
            default_zone: crate::config::system_zone(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Scheduler configured from validated properties.
    ///
    /// # Errors
    ///
    /// Propagates [`SchedulerProperties::validate`] failures.
    pub fn with_properties(properties: &SchedulerProperties) -> Result<Self> {
        properties.validate()?;
        Ok(Self {
            gate: ExecutionGate::new(properties.max_concurrency, properties.queue_capacity),
            tasks: Mutex::new(HashMap::new()),
            default_zone: properties.default_zone()?,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Schedule a task under `name` and start its loop.
    ///
    /// Idempotent by name: when a live task with that name exists it is
    /// returned unchanged. A cancelled task's name may be reused.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::ShutdownInProgress`] after shutdown.
    pub fn schedule(
        &self,
        task: TaskFn,
        trigger: Trigger,
        name: impl Into<String>,
    ) -> Result<Arc<ScheduledTask>> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShutdownInProgress);
        }
        let name = name.into();
        let mut tasks = self.lock_tasks();
        // Re-check under the lock so a racing shutdown cannot miss the task.
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShutdownInProgress);
        }

        if let Some(existing) = tasks.get(&name) {
            if !existing.is_cancelled() {
                warn!(task = %name, "task with this name is already scheduled; returning it");
                return Ok(Arc::clone(existing));
            }
        }

        let context = Arc::new(ExecutionContext::new());
        let runner =
            Arc::clone(&self.gate).wrap(recording_runner(Arc::clone(&context), task));
        let scheduled = ScheduledTask::with_runner(name.clone(), trigger, context, runner);
        scheduled.start()?;
        debug!(task = %name, "task scheduled");
        tasks.insert(name, Arc::clone(&scheduled));
        Ok(scheduled)
    }

    /// Schedule with a fixed-rate trigger built from `period`.
    pub fn schedule_at_fixed_rate(
        &self,
        task: TaskFn,
        period: Duration,
        name: impl Into<String>,
        initial_delay: Option<Duration>,
    ) -> Result<Arc<ScheduledTask>> {
        let mut spec = TriggerSpec::fixed_rate(period);
        if let Some(delay) = initial_delay {
            spec = spec.with_initial_delay(delay);
        }
        self.schedule(task, spec.build(self.default_zone)?, name)
    }

    /// Schedule with a fixed-delay trigger built from `delay`.
    pub fn schedule_with_fixed_delay(
        &self,
        task: TaskFn,
        delay: Duration,
        name: impl Into<String>,
        initial_delay: Option<Duration>,
    ) -> Result<Arc<ScheduledTask>> {
        let mut spec = TriggerSpec::fixed_delay(delay);
        if let Some(initial) = initial_delay {
            spec = spec.with_initial_delay(initial);
        }
        self.schedule(task, spec.build(self.default_zone)?, name)
    }

    /// Cancel every task and refuse further scheduling.
    ///
    /// Idempotent. `force` is propagated to each task's cancel as
    /// `may_interrupt`; without it, shutdown resolves only once every
    /// in-flight execution has finished.
    pub async fn shutdown(&self, force: bool) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            debug!("scheduler already shut down");
            return;
        }
        info!(force, "scheduler shutting down");

        let snapshot: Vec<Arc<ScheduledTask>> = self.lock_tasks().values().cloned().collect();
        for task in &snapshot {
            task.cancel(force).await;
        }
        self.lock_tasks().clear();
        info!("scheduler shutdown complete");
    }

    /// Number of closures executing right now.
    pub fn active_count(&self) -> usize {
        self.gate.active()
    }

    /// Number of executions waiting in the overflow queue.
    pub fn queued_count(&self) -> usize {
        self.gate.queued()
    }

    /// Number of scheduled tasks.
    pub fn total_count(&self) -> usize {
        self.lock_tasks().len()
    }

    /// Whether shutdown has been initiated.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// The zone applied to triggers built by the sugar methods.
    pub fn default_zone(&self) -> Tz {
        self.default_zone
    }

    /// Snapshot of the scheduled tasks.
    pub fn tasks(&self) -> Vec<Arc<ScheduledTask>> {
        self.lock_tasks().values().cloned().collect()
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<ScheduledTask>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ConcurrentScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
