//! Programmatic task registration with deferred scheduling.
//!
//! The registrar collects tasks before the runtime is up: registrations made
//! ahead of [`Registrar::ready`] are held as pending holders and drained onto
//! the scheduler once it is attached (or constructed from configuration).
//! A declarative surface accepts serde-friendly [`ScheduleDeclaration`]
//! bundles and routes them through the same funnel.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SchedulerProperties;
use crate::error::{Result, SchedulerError};
use crate::scheduler::ConcurrentScheduler;
use crate::task::{ScheduledTask, TaskError, TaskFn};
use crate::trigger::{Trigger, TriggerSpec};

/// A capability-bearing object that can be scheduled.
///
/// The closure-based surface is primary; implement this when the task is
/// naturally a struct with state.
#[async_trait]
pub trait Runnable: Send + Sync + 'static {
    /// Execute one iteration of the task.
    async fn run(&self) -> std::result::Result<(), TaskError>;
}

/// Adapt a [`Runnable`] into the closure form the scheduler consumes.
pub fn runnable_task(runnable: Arc<dyn Runnable>) -> TaskFn {
    Arc::new(move || {
        let runnable = Arc::clone(&runnable);
        Box::pin(async move { runnable.run().await })
    })
}

/// Registration retained until the scheduler is up.
struct TaskHolder {
    name: String,
    trigger: Trigger,
    runnable: TaskFn,
}

#[derive(Default)]
struct RegistrarInner {
    scheduler: Option<Arc<ConcurrentScheduler>>,
    ready: bool,
    pending: HashMap<String, TaskHolder>,
    tasks: Vec<Arc<ScheduledTask>>,
}

/// Collects task registrations and owns their lifecycle.
pub struct Registrar {
    properties: SchedulerProperties,
    default_zone: Tz,
    names: TaskNameGenerator,
    inner: Mutex<RegistrarInner>,
}

impl Registrar {
    /// Registrar configured from properties.
    ///
    /// # Errors
    ///
    /// Propagates [`SchedulerProperties::validate`] failures.
    pub fn new(properties: SchedulerProperties) -> Result<Self> {
        properties.validate()?;
        let default_zone = properties.default_zone()?;
        let names = TaskNameGenerator::new(properties.name_prefix.clone());
        Ok(Self {
            properties,
            default_zone,
            names,
            inner: Mutex::new(RegistrarInner::default()),
        })
    }

    /// Attach an externally constructed scheduler before `ready`.
    pub fn attach_scheduler(&self, scheduler: Arc<ConcurrentScheduler>) {
        self.lock().scheduler = Some(scheduler);
    }

    /// Register a task under `name` with an explicit trigger.
    ///
    /// Before `ready` the registration is held as a pending holder; after,
    /// it is scheduled immediately. Duplicate names keep the existing
    /// registration and log a warning.
    pub fn register(
        &self,
        name: impl Into<String>,
        trigger: Trigger,
        task: TaskFn,
    ) -> Result<()> {
        let name = name.into();
        let mut inner = self.lock();

        let taken = inner.pending.contains_key(&name)
            || inner.tasks.iter().any(|task| task.name() == name);
        if taken {
            warn!(task = %name, "task name already registered; keeping the existing task");
            return Ok(());
        }

        if inner.ready {
            let scheduler = match &inner.scheduler {
                Some(scheduler) => Arc::clone(scheduler),
                // ready() always installs a scheduler; be defensive anyway.
                None => return Err(SchedulerError::ShutdownInProgress),
            };
            let scheduled = scheduler.schedule(task, trigger, name)?;
            inner.tasks.push(scheduled);
        } else {
            debug!(task = %name, "scheduler not ready; holding registration");
            inner.pending.insert(
                name.clone(),
                TaskHolder {
                    name,
                    trigger,
                    runnable: task,
                },
            );
        }
        Ok(())
    }

    /// Register a cron task.
    pub fn register_cron(
        &self,
        name: impl Into<String>,
        expression: &str,
        task: TaskFn,
    ) -> Result<()> {
        let trigger = TriggerSpec::cron(expression).build(self.default_zone)?;
        self.register(name, trigger, task)
    }

    /// Register a fixed-rate task.
    pub fn register_fixed_rate(
        &self,
        name: impl Into<String>,
        period: Duration,
        initial_delay: Option<Duration>,
        task: TaskFn,
    ) -> Result<()> {
        let mut spec = TriggerSpec::fixed_rate(period);
        if let Some(delay) = initial_delay {
            spec = spec.with_initial_delay(delay);
        }
        self.register(name, spec.build(self.default_zone)?, task)
    }

    /// Register a fixed-delay task.
    pub fn register_fixed_delay(
        &self,
        name: impl Into<String>,
        delay: Duration,
        initial_delay: Option<Duration>,
        task: TaskFn,
    ) -> Result<()> {
        let mut spec = TriggerSpec::fixed_delay(delay);
        if let Some(initial) = initial_delay {
            spec = spec.with_initial_delay(initial);
        }
        self.register(name, spec.build(self.default_zone)?, task)
    }

    /// Register a simple periodic task.
    pub fn register_periodic(
        &self,
        name: impl Into<String>,
        period: Duration,
        task: TaskFn,
    ) -> Result<()> {
        let trigger = TriggerSpec::periodic(period).build(self.default_zone)?;
        self.register(name, trigger, task)
    }

    /// Register from a declaration bundle.
    ///
    /// Trigger parameters are validated strictly: a declaration naming more
    /// than one kind fails with [`SchedulerError::ConflictingTriggers`]. The
    /// task name comes from the declaration or, failing that, the name
    /// generator.
    pub fn register_declared(
        &self,
        declaration: &ScheduleDeclaration,
        task: TaskFn,
    ) -> Result<()> {
        let source = format!("{}::{}", declaration.scope, declaration.operation);
        let trigger = declaration.spec.build_exclusive(&source, self.default_zone)?;
        let name = match &declaration.name {
            Some(name) => name.clone(),
            None => self.names.generate(
                TaskKind::of(&trigger),
                &declaration.scope,
                &declaration.operation,
            ),
        };
        self.register(name, trigger, task)
    }

    /// Bring the runtime up and drain pending holders.
    ///
    /// Constructs a scheduler from the registrar's properties unless one was
    /// attached. Idempotent.
    pub fn ready(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.ready {
            return Ok(());
        }
        if inner.scheduler.is_none() {
            inner.scheduler = Some(Arc::new(ConcurrentScheduler::with_properties(
                &self.properties,
            )?));
        }
        inner.ready = true;

        let scheduler = match &inner.scheduler {
            Some(scheduler) => Arc::clone(scheduler),
            None => return Err(SchedulerError::ShutdownInProgress),
        };
        let holders: Vec<TaskHolder> = inner.pending.drain().map(|(_, holder)| holder).collect();
        let count = holders.len();
        for holder in holders {
            let scheduled = scheduler.schedule(holder.runnable, holder.trigger, holder.name)?;
            inner.tasks.push(scheduled);
        }
        info!(tasks = count, "registrar ready; pending tasks scheduled");
        Ok(())
    }

    /// Cancel every live task and shut the scheduler down, both non-forced.
    pub async fn destroy(&self) {
        let (tasks, scheduler) = {
            let mut inner = self.lock();
            (std::mem::take(&mut inner.tasks), inner.scheduler.take())
        };
        for task in &tasks {
            task.cancel(false).await;
        }
        if let Some(scheduler) = scheduler {
            scheduler.shutdown(false).await;
        }
        info!("registrar destroyed");
    }

    /// Read-only view of the live tasks.
    pub fn tasks(&self) -> Vec<Arc<ScheduledTask>> {
        self.lock().tasks.clone()
    }

    /// Whether any task is registered, live or pending.
    pub fn has_tasks(&self) -> bool {
        let inner = self.lock();
        !inner.tasks.is_empty() || !inner.pending.is_empty()
    }

    /// The zone applied to triggers built by this registrar.
    pub fn default_zone(&self) -> Tz {
        self.default_zone
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistrarInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A serde-friendly scheduled-task declaration.
///
/// The trigger parameters are flattened, so a table row like
/// `{ "scope": "jobs::Report", "operation": "generate", "cron": "0 0 4 * * *" }`
/// deserializes directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDeclaration {
    /// Explicit task name; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Declaring scope, e.g. a type path.
    pub scope: String,
    /// Operation within the scope, e.g. a method name.
    pub operation: String,
    /// Trigger parameters; exactly one kind must be set.
    #[serde(flatten)]
    pub spec: TriggerSpec,
}

/// Task kind labels used by the name generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Calendar-scheduled task.
    Cron,
    /// Fixed-rate or fixed-delay task.
    Scheduled,
    /// Simple periodic task.
    Periodic,
}

impl TaskKind {
    /// The kind label for a built trigger.
    pub fn of(trigger: &Trigger) -> Self {
        match trigger {
            Trigger::Cron { .. } => Self::Cron,
            Trigger::FixedRate { .. } | Trigger::FixedDelay { .. } => Self::Scheduled,
            Trigger::Periodic { .. } => Self::Periodic,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cron => f.write_str("cron"),
            Self::Scheduled => f.write_str("scheduled"),
            Self::Periodic => f.write_str("periodic"),
        }
    }
}

/// Generates task names from the declaring scope and operation.
#[derive(Debug, Clone, Default)]
pub struct TaskNameGenerator {
    prefix: Option<String>,
}

impl TaskNameGenerator {
    /// Generator with an optional fixed prefix.
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    /// Produce a lowercased task name.
    ///
    /// With a prefix: `{prefix}-{operation}`. Without:
    /// `{kind}-{scope}-{simple}-{operation}`, where `scope` has `::` folded
    /// to `-` and `simple` is the scope's last path segment.
    pub fn generate(&self, kind: TaskKind, scope: &str, operation: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}-{operation}").to_lowercase(),
            None => {
                let path = scope.replace("::", "-");
                let simple = scope.rsplit("::").next().unwrap_or(scope);
                format!("{kind}-{path}-{simple}-{operation}").to_lowercase()
            }
        }
    }
}

#[cfg(test)]
mod tests;
