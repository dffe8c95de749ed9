//! Cadence Core - Concurrent Task Scheduler
//!
//! This crate provides the core scheduling runtime for Cadence, executing
//! user-supplied tasks at the times their triggers dictate:
//!
//! - **Cron triggers**: 6-field calendar expressions with per-trigger zones
//! - **Fixed-rate triggers**: start-to-start cadence, independent of runtime
//! - **Fixed-delay triggers**: end-to-start spacing
//! - **Periodic triggers**: actual-start anchored, runtime contributes drift
//!
//! Each scheduled task runs its own loop: consult the trigger, sleep until
//! the fire instant, execute, record the outcome, reschedule. Across tasks,
//! a shared gate caps simultaneous executions and queues the overflow.
//!
//! # Example
//!
//! ```ignore
//! use cadence_core::{ConcurrentScheduler, SchedulerProperties, TriggerSpec};
//!
//! let scheduler = ConcurrentScheduler::with_properties(&SchedulerProperties::from_env())?;
//! let trigger = TriggerSpec::cron("0 0 4 * * *")
//!     .with_zone("America/New_York")
//!     .build(scheduler.default_zone())?;
//!
//! scheduler.schedule(
//!     std::sync::Arc::new(|| Box::pin(async { Ok(()) })),
//!     trigger,
//!     "nightly-report",
//! )?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod cron;
pub mod error;
pub mod registrar;
pub mod scheduler;
pub mod task;
pub mod trigger;

pub use config::{system_zone, SchedulerProperties};
pub use context::ExecutionContext;
pub use cron::{CronExpression, CronField};
pub use error::{CronParseError, Result, SchedulerError};
pub use registrar::{
    runnable_task, Registrar, Runnable, ScheduleDeclaration, TaskKind, TaskNameGenerator,
};
pub use scheduler::ConcurrentScheduler;
pub use task::{ScheduledTask, TaskError, TaskFn, TaskFuture};
pub use trigger::{Trigger, TriggerSpec};
