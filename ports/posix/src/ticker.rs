//! Periodic interrupt simulator.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flagsched::{FlagRegister, Flags};
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Control {
    stopped: Mutex<bool>,
    cond: Condvar,
}

/// Background thread that raises a flag every `period`, like a timer IRQ.
///
/// Ticks are scheduled against absolute deadlines so the rate does not drift
/// with the time spent in `set_flag`. The thread waits on a condition
/// variable between ticks, so [`stop`](Self::stop) returns without waiting
/// out the current period.
#[derive(Debug)]
pub struct Ticker {
    flag: Flags,
    period: Duration,
    control: Arc<Control>,
    thread: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn start(register: Arc<FlagRegister>, flag: Flags, period: Duration) -> io::Result<Self> {
        let control = Arc::new(Control::default());
        let shared = Arc::clone(&control);
        let thread = thread::Builder::new()
            .name(format!("ticker-{:x}", flag.bits()))
            .spawn(move || {
                let mut next_tick = Instant::now();
                loop {
                    next_tick += period;
                    {
                        let mut stopped = shared.stopped.lock();
                        while !*stopped && Instant::now() < next_tick {
                            shared.cond.wait_until(&mut stopped, next_tick);
                        }
                        if *stopped {
                            break;
                        }
                    }
                    register.set_flag(flag);
                }
            })?;
        log::debug!("ticker raising {flag} every {period:?}");
        Ok(Self {
            flag,
            period,
            control,
            thread: Some(thread),
        })
    }

    pub fn flag(&self) -> Flags {
        self.flag
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Stops the thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        *self.control.stopped.lock() = true;
        self.control.cond.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("ticker for {} panicked", self.flag);
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
