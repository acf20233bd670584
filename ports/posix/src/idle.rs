//! Condition-variable idle hook.

use std::time::{Duration, Instant};

use flagsched::IdleHook;
use parking_lot::{Condvar, Mutex};

/// Blocks the scheduler thread until a flag is raised.
///
/// `wakeup` latches a signal, so a flag raised between the scheduler's
/// "nothing to do" check and its call to `sleep` still ends the next sleep
/// immediately.
#[derive(Debug, Default)]
pub struct CondvarIdle {
    signalled: Mutex<bool>,
    cond: Condvar,
    timeout: Option<Duration>,
}

impl CondvarIdle {
    /// Sleeps until woken, however long that takes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps until woken or until `timeout` elapses.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl IdleHook for CondvarIdle {
    fn sleep(&self) {
        let mut signalled = self.signalled.lock();
        match self.timeout {
            None => {
                while !*signalled {
                    self.cond.wait(&mut signalled);
                }
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !*signalled {
                    if self.cond.wait_until(&mut signalled, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        *signalled = false;
    }

    fn wakeup(&self) {
        let mut signalled = self.signalled.lock();
        *signalled = true;
        self.cond.notify_one();
    }
}
