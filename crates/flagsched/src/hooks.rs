//! Idle and wakeup hooks.
//!
//! The scheduler calls [`IdleHook::sleep`] whenever a tick leaves nothing
//! runnable, and every [`set_flag`](crate::FlagRegister::set_flag) calls
//! [`IdleHook::wakeup`] from whichever context raised the flag. A host port
//! pairs the two so that a wakeup releases a sleeping scheduler early; see the
//! posix port's `CondvarIdle`.

use std::thread;
use std::time::Duration;

/// Idle period used by [`SleepIdle::default`].
pub const DEFAULT_IDLE_PERIOD: Duration = Duration::from_millis(10);

/// Low-power integration point.
pub trait IdleHook: Send + Sync {
    /// Called on the scheduler thread when there is nothing to run.
    ///
    /// Must return eventually; its return is the only way back into the tick
    /// loop while the runnable set is empty.
    fn sleep(&self);

    /// Called synchronously from `set_flag`, possibly on another thread.
    fn wakeup(&self) {}
}

/// Default idle hook: a short bounded sleep, no early wakeup.
#[derive(Debug, Clone, Copy)]
pub struct SleepIdle {
    period: Duration,
}

impl SleepIdle {
    pub const fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Default for SleepIdle {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_PERIOD)
    }
}

impl IdleHook for SleepIdle {
    fn sleep(&self) {
        thread::sleep(self.period);
    }
}
