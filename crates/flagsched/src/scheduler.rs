//! Cooperative scheduler core.
//!
//! One tick drains the flags register, promotes every waiting task whose mask
//! intersects the drained bits, then advances each runnable task by exactly
//! one step. [`Scheduler::run_loop`] ticks forever, dropping into the idle
//! hook whenever a tick leaves nothing runnable, until some task yields
//! [`Step::Terminate`].

use core::fmt;
use core::ops::ControlFlow;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::flags::{FlagRegister, Flags};
use crate::hooks::{IdleHook, SleepIdle};
use crate::task::{
    boxed_factory, log_failure, FailureHandler, FailurePolicy, Request, Routine, Step,
    TaskContext, TaskError, TaskFailure, TaskId, TaskSpec, TaskState,
};
use crate::trace::{TraceEvent, TraceHook};
use crate::{SchedError, SchedResult};

/// Scheduler configuration.
#[derive(Clone)]
pub struct SchedulerConfig {
    /// Name used in log output.
    pub name: &'static str,
    /// Number of flags [`FlagRegister::new_flag`] may hand out, at most
    /// [`Flags::BITS`].
    pub flag_capacity: u32,
    pub idle_hook: Arc<dyn IdleHook>,
    /// Diagnostic sink for failed steps. `None` logs the failure.
    pub failure_handler: Option<FailureHandler>,
    pub trace_hook: Option<TraceHook>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "flagsched",
            flag_capacity: Flags::BITS,
            idle_hook: Arc::new(SleepIdle::default()),
            failure_handler: None,
            trace_hook: None,
        }
    }
}

impl SchedulerConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }
}

impl fmt::Debug for SchedulerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerConfig")
            .field("name", &self.name)
            .field("flag_capacity", &self.flag_capacity)
            .field("failure_handler", &self.failure_handler.is_some())
            .field("trace_hook", &self.trace_hook.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`SchedulerConfig`].
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    /// Sets the scheduler name.
    pub fn name(mut self, name: &'static str) -> Self {
        self.config.name = name;
        self
    }

    /// Limits how many event flags may be allocated. Values above the
    /// register width are capped.
    pub fn flag_capacity(mut self, capacity: u32) -> Self {
        self.config.flag_capacity = capacity.min(Flags::BITS);
        self
    }

    /// Sets the idle/wakeup hook.
    pub fn idle_hook(mut self, hook: Arc<dyn IdleHook>) -> Self {
        self.config.idle_hook = hook;
        self
    }

    /// Sets the diagnostic sink for failed task steps.
    pub fn failure_handler(mut self, handler: FailureHandler) -> Self {
        self.config.failure_handler = Some(handler);
        self
    }

    /// Sets the trace hook.
    pub fn trace_hook(mut self, hook: TraceHook) -> Self {
        self.config.trace_hook = Some(hook);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> SchedulerConfig {
        self.config
    }
}

/// Returned by [`Scheduler::run_loop`] once a task raises the termination
/// signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    pub task: TaskId,
    pub name: Option<&'static str>,
    pub tick: u64,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "terminated by task {}", self.task)?;
        if let Some(name) = self.name {
            write!(f, " ({name})")?;
        }
        write!(f, " on tick {}", self.tick)
    }
}

/// What happened during one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub promoted: usize,
    pub stepped: usize,
    pub completed: usize,
    pub failed: usize,
    pub restarted: usize,
}

struct TaskSlot {
    spec: TaskSpec,
    routine: Box<dyn Routine>,
    state: TaskState,
}

/// The cooperative scheduler.
///
/// Owns every registered task. Only the thread driving [`tick`](Self::tick)
/// or [`run_loop`](Self::run_loop) touches tasks; other contexts interact
/// through the shared [`FlagRegister`] returned by [`flags`](Self::flags).
pub struct Scheduler {
    config: SchedulerConfig,
    flags: Arc<FlagRegister>,
    tasks: BTreeMap<TaskId, TaskSlot>,
    runnable: Vec<TaskId>,
    waiting: Vec<TaskId>,
    cx: TaskContext,
    ticks: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        let flags = Arc::new(FlagRegister::new(
            config.flag_capacity,
            Arc::clone(&config.idle_hook),
            config.trace_hook.clone(),
        ));
        let cx = TaskContext::new(Arc::clone(&flags));
        Self {
            config,
            flags,
            tasks: BTreeMap::new(),
            runnable: Vec::new(),
            waiting: Vec::new(),
            cx,
            ticks: 0,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The shared register, for handing to interrupt sources.
    pub fn flags(&self) -> Arc<FlagRegister> {
        Arc::clone(&self.flags)
    }

    pub fn new_flag(&self) -> SchedResult<Flags> {
        self.flags.new_flag()
    }

    pub fn set_flag(&self, flags: Flags) {
        self.flags.set_flag(flags);
    }

    /// Registers a drop-on-error task.
    pub fn run<F, R>(&mut self, factory: F) -> TaskId
    where
        F: FnMut() -> R + Send + 'static,
        R: Routine,
    {
        self.run_spec(None, FailurePolicy::Drop, factory)
    }

    /// Registers a task with an explicit failure policy.
    pub fn run_with<F, R>(&mut self, policy: FailurePolicy, factory: F) -> TaskId
    where
        F: FnMut() -> R + Send + 'static,
        R: Routine,
    {
        self.run_spec(None, policy, factory)
    }

    /// Registers a named task. The name only shows up in logs and traces.
    pub fn run_named<F, R>(
        &mut self,
        name: &'static str,
        policy: FailurePolicy,
        factory: F,
    ) -> TaskId
    where
        F: FnMut() -> R + Send + 'static,
        R: Routine,
    {
        self.run_spec(Some(name), policy, factory)
    }

    fn run_spec<F, R>(
        &mut self,
        name: Option<&'static str>,
        policy: FailurePolicy,
        factory: F,
    ) -> TaskId
    where
        F: FnMut() -> R + Send + 'static,
        R: Routine,
    {
        let id = self.cx.allocate_id();
        let spec = TaskSpec {
            name,
            policy,
            factory: boxed_factory(factory),
        };
        self.insert(id, spec);
        id
    }

    /// Removes a task from scheduling.
    pub fn stop(&mut self, id: TaskId) -> SchedResult<()> {
        self.detach(id).ok_or(SchedError::TaskNotFound(id))?;
        log::debug!("{}: stopped task {id}", self.config.name);
        self.emit(TraceEvent::Stop { task: id });
        Ok(())
    }

    /// Recreates a task from its factory and makes it runnable.
    ///
    /// If the factory panics the task is dropped and the panic goes to the
    /// failure handler.
    pub fn restart(&mut self, id: TaskId) -> SchedResult<()> {
        let slot = self.detach(id).ok_or(SchedError::TaskNotFound(id))?;
        self.reinstate(id, slot);
        Ok(())
    }

    /// Removes every task.
    pub fn clear(&mut self) {
        self.tasks.clear();
        self.runnable.clear();
        self.waiting.clear();
    }

    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.tasks.get(&id).map(|slot| slot.state)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Runnable tasks in dispatch order.
    pub fn runnable(&self) -> &[TaskId] {
        &self.runnable
    }

    /// Waiting tasks in promotion order.
    pub fn waiting(&self) -> &[TaskId] {
        &self.waiting
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of ticks executed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Runs ticks until a task raises the termination signal.
    ///
    /// Whenever a tick leaves the runnable set empty and no flags are pending,
    /// the idle hook's `sleep` is called; the loop resumes when it returns.
    pub fn run_loop(&mut self) -> Termination {
        log::info!(
            "{}: entering loop with {} task(s)",
            self.config.name,
            self.tasks.len()
        );
        loop {
            if let ControlFlow::Break(termination) = self.tick() {
                log::info!("{}: {termination}", self.config.name);
                return termination;
            }
            if self.runnable.is_empty() && self.flags.pending().is_empty() {
                self.emit(TraceEvent::Sleep);
                self.config.idle_hook.sleep();
            }
        }
    }

    /// Executes one tick: drain flags, then step every runnable task once.
    pub fn tick(&mut self) -> ControlFlow<Termination, TickReport> {
        self.ticks += 1;
        let mut report = TickReport {
            tick: self.ticks,
            promoted: self.promote(),
            ..TickReport::default()
        };

        let snapshot = self.runnable.clone();
        for id in snapshot {
            // Stopped by an earlier task this sweep. A task restarted earlier
            // in the sweep is runnable again and steps its fresh routine.
            if self.state(id) != Some(TaskState::Runnable) {
                continue;
            }
            report.stepped += 1;
            if let Some(termination) = self.dispatch(id, &mut report) {
                return ControlFlow::Break(termination);
            }
        }
        ControlFlow::Continue(report)
    }

    fn promote(&mut self) -> usize {
        let raised = self.flags.take();
        if raised.is_empty() {
            return 0;
        }

        let name = self.config.name;
        let trace = &self.config.trace_hook;
        let tasks = &mut self.tasks;
        let runnable = &mut self.runnable;
        let mut promoted = 0;
        self.waiting.retain(|id| {
            let Some(slot) = tasks.get_mut(id) else {
                return false;
            };
            if !slot.state.wait_mask().intersects(raised) {
                return true;
            }
            log::debug!("{name}: task {id} promoted by {raised}");
            slot.state = TaskState::Runnable;
            runnable.push(*id);
            promoted += 1;
            emit(
                trace,
                TraceEvent::Promote {
                    task: *id,
                    flags: raised,
                },
            );
            false
        });
        promoted
    }

    fn dispatch(&mut self, id: TaskId, report: &mut TickReport) -> Option<Termination> {
        self.emit(TraceEvent::Step { task: id });
        let slot = self.tasks.get_mut(&id)?;
        let name = slot.spec.name;
        self.cx.enter(id, name, self.ticks);
        log::trace!("{}: stepping task {id}", self.config.name);
        let step = step_guarded(slot.routine.as_mut(), &mut self.cx);

        let mut termination = None;
        let mut reinstated = false;
        match step {
            Step::Yield => {}
            Step::Wait(mask) if mask.is_empty() => {}
            Step::Wait(mask) => {
                slot.state = TaskState::Waiting(mask);
                self.runnable.retain(|other| *other != id);
                self.waiting.push(id);
                self.emit(TraceEvent::Wait { task: id, mask });
            }
            Step::Done => {
                self.detach(id);
                report.completed += 1;
                log::debug!("{}: task {id} completed", self.config.name);
                self.emit(TraceEvent::Complete { task: id });
            }
            Step::Failed(error) => {
                report.failed += 1;
                if self.fail(id, error) {
                    report.restarted += 1;
                    reinstated = true;
                }
            }
            Step::Terminate => {
                self.detach(id);
                self.emit(TraceEvent::Terminate { task: id });
                termination = Some(Termination {
                    task: id,
                    name,
                    tick: self.ticks,
                });
            }
        }

        self.apply_requests(reinstated.then_some(id));
        termination
    }

    /// Removes a failed task and applies its failure policy. Returns true
    /// when the task was recreated.
    fn fail(&mut self, id: TaskId, error: TaskError) -> bool {
        let Some(slot) = self.detach(id) else {
            return false;
        };
        self.emit(TraceEvent::Failed { task: id });

        self.report(TaskFailure {
            task: id,
            name: slot.spec.name,
            policy: slot.spec.policy,
            error,
        });

        match slot.spec.policy {
            FailurePolicy::Drop => false,
            FailurePolicy::Restart => self.reinstate(id, slot),
        }
    }

    fn report(&self, failure: TaskFailure) {
        match &self.config.failure_handler {
            Some(handler) => handler(&failure),
            None => log_failure(&failure),
        }
    }

    /// Applies the requests recorded during the last step. `reinstated` is a
    /// task the step's own failure already recreated; a restart request for
    /// it is redundant.
    fn apply_requests(&mut self, reinstated: Option<TaskId>) {
        for request in self.cx.take_requests() {
            let outcome = match request {
                Request::Spawn(id, spec) => {
                    self.insert(id, spec);
                    Ok(())
                }
                Request::Stop(id) => self.stop(id),
                Request::Restart(id) if Some(id) == reinstated => {
                    log::debug!("{}: task {id} already restarted", self.config.name);
                    Ok(())
                }
                Request::Restart(id) => self.restart(id),
            };
            if let Err(err) = outcome {
                log::warn!("{}: ignoring deferred request: {err}", self.config.name);
            }
        }
    }

    fn insert(&mut self, id: TaskId, mut spec: TaskSpec) {
        let routine = match build_guarded(&mut spec) {
            Ok(routine) => routine,
            Err(error) => {
                self.emit(TraceEvent::Failed { task: id });
                self.report(TaskFailure {
                    task: id,
                    name: spec.name,
                    policy: FailurePolicy::Drop,
                    error,
                });
                return;
            }
        };
        log::debug!(
            "{}: spawned task {id} ({})",
            self.config.name,
            spec.name.unwrap_or("anonymous")
        );
        self.tasks.insert(
            id,
            TaskSlot {
                spec,
                routine,
                state: TaskState::Runnable,
            },
        );
        self.runnable.push(id);
    }

    /// Recreates a detached task. A factory that panics drops the task and
    /// reports the panic; returns false in that case.
    fn reinstate(&mut self, id: TaskId, mut slot: TaskSlot) -> bool {
        match build_guarded(&mut slot.spec) {
            Ok(routine) => {
                slot.routine = routine;
                slot.state = TaskState::Runnable;
                self.tasks.insert(id, slot);
                self.runnable.push(id);
                log::debug!("{}: restarted task {id}", self.config.name);
                self.emit(TraceEvent::Restart { task: id });
                true
            }
            Err(error) => {
                self.emit(TraceEvent::Failed { task: id });
                self.report(TaskFailure {
                    task: id,
                    name: slot.spec.name,
                    policy: FailurePolicy::Drop,
                    error,
                });
                false
            }
        }
    }

    fn detach(&mut self, id: TaskId) -> Option<TaskSlot> {
        let slot = self.tasks.remove(&id)?;
        match slot.state {
            TaskState::Runnable => self.runnable.retain(|other| *other != id),
            TaskState::Waiting(_) => self.waiting.retain(|other| *other != id),
        }
        Some(slot)
    }

    fn emit(&self, event: TraceEvent) {
        emit(&self.config.trace_hook, event);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.config.name)
            .field("runnable", &self.runnable)
            .field("waiting", &self.waiting)
            .field("flags", &self.flags)
            .field("ticks", &self.ticks)
            .finish()
    }
}

fn emit(trace: &Option<TraceHook>, event: TraceEvent) {
    if let Some(trace) = trace {
        trace(&event);
    }
}

/// Steps a routine, turning a panic into an ordinary failure.
fn step_guarded(routine: &mut dyn Routine, cx: &mut TaskContext) -> Step {
    match panic::catch_unwind(AssertUnwindSafe(|| routine.step(cx))) {
        Ok(step) => step,
        Err(payload) => Step::Failed(TaskError::Panicked(panic_message(&*payload))),
    }
}

/// Runs a task factory, turning a panic into an ordinary failure.
fn build_guarded(spec: &mut TaskSpec) -> Result<Box<dyn Routine>, TaskError> {
    panic::catch_unwind(AssertUnwindSafe(|| (spec.factory)()))
        .map_err(|payload| TaskError::Panicked(panic_message(&*payload)))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
