//! # flagsched
//!
//! A single-threaded, cooperative task scheduler for battery-powered boards.
//! Tasks are polled step functions; asynchronous hardware events reach the
//! scheduler only through a shared bitset, the [`FlagRegister`]. When nothing
//! is runnable the scheduler hands control to an [`IdleHook`] so the host can
//! enter a low-power state until the next flag arrives.
//!
//! ## Module Overview
//! - [`flags`]     – Event flag allocation and the cross-context register.
//! - [`task`]      – Step results, routines, failure policies and task context.
//! - [`scheduler`] – The tick loop, configuration and termination handling.
//! - [`hooks`]     – Idle/wakeup integration points.
//! - [`trace`]     – Structured scheduler trace events.
//!
//! ```
//! use flagsched::{Scheduler, Step, TaskContext};
//!
//! let mut sched = Scheduler::new();
//! let button = sched.new_flag()?;
//!
//! sched.run(move || {
//!     let mut armed = false;
//!     move |_cx: &mut TaskContext| {
//!         if armed {
//!             Step::Done
//!         } else {
//!             armed = true;
//!             Step::Wait(button)
//!         }
//!     }
//! });
//!
//! assert!(sched.tick().is_continue());
//! assert_eq!(sched.waiting().len(), 1);
//!
//! sched.set_flag(button);
//! sched.tick();
//! assert!(sched.is_empty());
//! # Ok::<(), flagsched::SchedError>(())
//! ```

use thiserror::Error;

pub mod flags;
pub mod hooks;
pub mod scheduler;
pub mod task;
pub mod trace;

pub use flags::{FlagRegister, Flags};
pub use hooks::{IdleHook, SleepIdle};
pub use scheduler::{
    Scheduler, SchedulerConfig, SchedulerConfigBuilder, Termination, TickReport,
};
pub use task::{
    FailureHandler, FailurePolicy, Routine, Step, TaskContext, TaskError, TaskFailure, TaskId,
    TaskState,
};
pub use trace::{TraceEvent, TraceHook};

#[cfg(test)]
mod tests;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Errors reported by scheduler operations.
///
/// Task failures are not represented here: they are values returned from a
/// step ([`Step::Failed`]) and are routed to the task's [`FailurePolicy`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// Every bit of the register has already been handed out.
    #[error("event flag capacity exhausted ({capacity} flags allocated)")]
    FlagsExhausted { capacity: u32 },
    /// The handle does not name a registered task.
    #[error("task {0} not found")]
    TaskNotFound(TaskId),
}

pub type SchedResult<T> = Result<T, SchedError>;
