//! Tasks: resumable step functions and their scheduling state.
//!
//! A task is a [`Routine`] created by a factory. The scheduler advances it one
//! [`Step`] at a time; each step reports whether the task wants to run again
//! immediately, wait for flags, has finished, failed, or wants the whole loop
//! to terminate. The factory is kept so a task can be restarted with a fresh
//! computation.

use core::fmt;
use std::error::Error;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flags::{FlagRegister, Flags};
use crate::SchedResult;

/// Handle to a registered task.
///
/// Handles are allocated from a monotonic counter and never reused, so a
/// handle kept after its task was removed simply stops resolving.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for TaskId {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "#{=u64}", self.0);
    }
}

/// Outcome of advancing a task by one step.
#[derive(Debug)]
pub enum Step {
    /// Run again on the next tick.
    Yield,
    /// Park until any of the given flags is raised. An empty mask behaves
    /// like [`Step::Yield`].
    Wait(Flags),
    /// The computation finished normally.
    Done,
    /// The computation failed; the task's [`FailurePolicy`] applies.
    Failed(TaskError),
    /// Unwind the scheduler loop.
    Terminate,
}

impl Step {
    /// Shorthand for `Step::Failed(TaskError::new(err))`.
    pub fn fail<E>(err: E) -> Step
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        Step::Failed(TaskError::new(err))
    }
}

/// Error carried by a failed step.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("{0}")]
    Failed(Box<dyn Error + Send + Sync>),
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn new<E>(err: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        Self::Failed(err.into())
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }
}

/// What happens to a task whose step fails.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePolicy {
    /// Remove the task and report the failure.
    #[default]
    Drop,
    /// Report the failure, then recreate the task from its factory.
    Restart,
}

/// Scheduling state of a registered task.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Runnable,
    /// Blocked until the register intersects the mask. The mask is never
    /// empty.
    Waiting(Flags),
}

impl TaskState {
    pub fn wait_mask(self) -> Flags {
        match self {
            TaskState::Runnable => Flags::NONE,
            TaskState::Waiting(mask) => mask,
        }
    }
}

/// A failure handed to the scheduler's diagnostic sink.
#[derive(Debug)]
pub struct TaskFailure {
    pub task: TaskId,
    pub name: Option<&'static str>,
    pub policy: FailurePolicy,
    pub error: TaskError,
}

pub type FailureHandler = Arc<dyn Fn(&TaskFailure) + Send + Sync>;

/// Diagnostic sink used when no handler is configured.
pub(crate) fn log_failure(failure: &TaskFailure) {
    log::error!(
        "task {} ({}) failed: {}{}",
        failure.task,
        failure.name.unwrap_or("anonymous"),
        failure.error,
        match failure.policy {
            FailurePolicy::Drop => "",
            FailurePolicy::Restart => "; restarting",
        }
    );
}

/// A resumable unit of work.
pub trait Routine: Send + 'static {
    fn step(&mut self, cx: &mut TaskContext) -> Step;
}

impl<F> Routine for F
where
    F: FnMut(&mut TaskContext) -> Step + Send + 'static,
{
    fn step(&mut self, cx: &mut TaskContext) -> Step {
        self(cx)
    }
}

pub(crate) type Factory = Box<dyn FnMut() -> Box<dyn Routine> + Send>;

pub(crate) fn boxed_factory<F, R>(mut factory: F) -> Factory
where
    F: FnMut() -> R + Send + 'static,
    R: Routine,
{
    Box::new(move || Box::new(factory()) as Box<dyn Routine>)
}

/// Everything needed to (re)create a task.
pub(crate) struct TaskSpec {
    pub(crate) name: Option<&'static str>,
    pub(crate) policy: FailurePolicy,
    pub(crate) factory: Factory,
}

/// Control request recorded during a step.
pub(crate) enum Request {
    Spawn(TaskId, TaskSpec),
    Stop(TaskId),
    Restart(TaskId),
}

/// Per-step view of the scheduler handed to [`Routine::step`].
///
/// Control requests (`spawn`, `stop`, `restart`) are deferred: they are
/// applied right after the current step's outcome has been handled, and
/// never change the set of tasks swept during the current tick.
pub struct TaskContext {
    id: TaskId,
    name: Option<&'static str>,
    tick: u64,
    flags: Arc<FlagRegister>,
    next_id: u64,
    requests: Vec<Request>,
}

impl TaskContext {
    pub(crate) fn new(flags: Arc<FlagRegister>) -> Self {
        Self {
            id: TaskId(0),
            name: None,
            tick: 0,
            flags,
            next_id: 1,
            requests: Vec::new(),
        }
    }

    /// The task being stepped.
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    /// Number of the tick in progress.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn flags(&self) -> &Arc<FlagRegister> {
        &self.flags
    }

    pub fn new_flag(&self) -> SchedResult<Flags> {
        self.flags.new_flag()
    }

    /// Raises flags; waiting tasks see them on the next tick.
    pub fn set_flag(&self, flags: Flags) {
        self.flags.set_flag(flags);
    }

    /// Registers a new drop-on-error task. It first runs on the next tick.
    pub fn spawn<F, R>(&mut self, factory: F) -> TaskId
    where
        F: FnMut() -> R + Send + 'static,
        R: Routine,
    {
        self.spawn_spec(None, FailurePolicy::Drop, boxed_factory(factory))
    }

    pub fn spawn_with<F, R>(&mut self, policy: FailurePolicy, factory: F) -> TaskId
    where
        F: FnMut() -> R + Send + 'static,
        R: Routine,
    {
        self.spawn_spec(None, policy, boxed_factory(factory))
    }

    pub fn spawn_named<F, R>(
        &mut self,
        name: &'static str,
        policy: FailurePolicy,
        factory: F,
    ) -> TaskId
    where
        F: FnMut() -> R + Send + 'static,
        R: Routine,
    {
        self.spawn_spec(Some(name), policy, boxed_factory(factory))
    }

    fn spawn_spec(
        &mut self,
        name: Option<&'static str>,
        policy: FailurePolicy,
        factory: Factory,
    ) -> TaskId {
        let id = self.allocate_id();
        let spec = TaskSpec {
            name,
            policy,
            factory,
        };
        self.requests.push(Request::Spawn(id, spec));
        id
    }

    /// Removes a task once the current step returns.
    pub fn stop(&mut self, task: TaskId) {
        self.requests.push(Request::Stop(task));
    }

    /// Recreates a task from its factory once the current step returns.
    pub fn restart(&mut self, task: TaskId) {
        self.requests.push(Request::Restart(task));
    }

    pub(crate) fn allocate_id(&mut self) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        id
    }

    pub(crate) fn enter(&mut self, id: TaskId, name: Option<&'static str>, tick: u64) {
        self.id = id;
        self.name = name;
        self.tick = tick;
    }

    pub(crate) fn take_requests(&mut self) -> Vec<Request> {
        core::mem::take(&mut self.requests)
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("tick", &self.tick)
            .field("pending_requests", &self.requests.len())
            .finish()
    }
}
