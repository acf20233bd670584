//! Shutdown flag and Ctrl-C routing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flagsched::{
    FailurePolicy, FlagRegister, Flags, SchedResult, Scheduler, Step, TaskContext, TaskId,
};
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;

use crate::PortResult;

/// Name of the task registered by [`ShutdownSignal::install`].
pub const SHUTDOWN_TASK: &str = "shutdown";

/// A task that ends the scheduler loop once its flag is raised.
///
/// A trigger is also latched in a plain boolean, so a shutdown requested
/// before the task first parks on its flag is not lost.
#[derive(Debug)]
pub struct ShutdownSignal {
    task: TaskId,
    handle: ShutdownHandle,
}

impl ShutdownSignal {
    /// Allocates the shutdown flag and registers the task waiting on it.
    pub fn install(sched: &mut Scheduler) -> SchedResult<Self> {
        let handle = ShutdownHandle {
            register: sched.flags(),
            flag: sched.new_flag()?,
            requested: Arc::new(AtomicBool::new(false)),
        };
        let watch = handle.clone();
        let task = sched.run_named(SHUTDOWN_TASK, FailurePolicy::Drop, move || {
            let watch = watch.clone();
            move |_cx: &mut TaskContext| {
                if watch.is_triggered() {
                    Step::Terminate
                } else {
                    Step::Wait(watch.flag)
                }
            }
        });
        Ok(Self { task, handle })
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn flag(&self) -> Flags {
        self.handle.flag
    }

    pub fn handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }
}

/// Cloneable, thread-safe trigger for a [`ShutdownSignal`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    register: Arc<FlagRegister>,
    flag: Flags,
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.requested.store(true, Ordering::Release);
        self.register.set_flag(self.flag);
    }

    pub fn is_triggered(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

static CTRLC_TARGET: Lazy<Mutex<Option<ShutdownHandle>>> = Lazy::new(|| Mutex::new(None));
static CTRLC_INSTALLED: OnceCell<()> = OnceCell::new();

/// Makes Ctrl-C trigger `handle`.
///
/// The process-wide handler is installed on the first call; later calls only
/// retarget it.
pub fn install_ctrlc(handle: ShutdownHandle) -> PortResult<()> {
    *CTRLC_TARGET.lock() = Some(handle);
    CTRLC_INSTALLED.get_or_try_init(|| {
        ctrlc::set_handler(|| {
            log::info!("Ctrl-C received");
            if let Some(handle) = CTRLC_TARGET.lock().as_ref() {
                handle.trigger();
            }
        })
    })?;
    Ok(())
}
