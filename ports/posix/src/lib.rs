//! POSIX host port for the flagsched scheduler.
//!
//! On a board, interrupts raise event flags and the idle hook halts the CPU.
//! On a host, threads play the interrupts ([`Ticker`]), a condition variable
//! plays the halt ([`CondvarIdle`]) and Ctrl-C is routed into a shutdown flag
//! ([`ShutdownSignal`]). [`PosixRuntime`] wires the three together.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use flagsched::{Flags, SchedError, Scheduler, SchedulerConfig, Termination};
use thiserror::Error;

pub mod idle;
pub mod shutdown;
pub mod ticker;

pub use idle::CondvarIdle;
pub use shutdown::{install_ctrlc, ShutdownHandle, ShutdownSignal};
pub use ticker::Ticker;

/// Errors raised while setting up the host runtime.
#[derive(Error, Debug)]
pub enum PortError {
    #[error(transparent)]
    Sched(#[from] SchedError),
    #[error("failed to install Ctrl-C handler: {0}")]
    CtrlC(#[from] ctrlc::Error),
    #[error("failed to spawn interrupt thread: {0}")]
    Spawn(#[from] io::Error),
}

pub type PortResult<T> = Result<T, PortError>;

/// A scheduler hosted on POSIX threads.
pub struct PosixRuntime {
    scheduler: Scheduler,
    idle: Arc<CondvarIdle>,
    shutdown: ShutdownSignal,
    tickers: Vec<Ticker>,
}

impl PosixRuntime {
    /// Builds a runtime around `config`. The idle hook is replaced by a
    /// [`CondvarIdle`] so that any raised flag ends an idle period at once.
    pub fn new(config: SchedulerConfig) -> PortResult<Self> {
        Self::with_idle(config, CondvarIdle::new())
    }

    pub fn with_idle(mut config: SchedulerConfig, idle: CondvarIdle) -> PortResult<Self> {
        let idle = Arc::new(idle);
        config.idle_hook = idle.clone();
        let mut scheduler = Scheduler::with_config(config);
        let shutdown = ShutdownSignal::install(&mut scheduler)?;
        Ok(Self {
            scheduler,
            idle,
            shutdown,
            tickers: Vec::new(),
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Access to the scheduler for registering tasks.
    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn idle(&self) -> &Arc<CondvarIdle> {
        &self.idle
    }

    /// Allocates a flag and starts a thread raising it every `period`.
    pub fn start_ticker(&mut self, period: Duration) -> PortResult<Flags> {
        let flag = self.scheduler.new_flag()?;
        let ticker = Ticker::start(self.scheduler.flags(), flag, period)?;
        self.tickers.push(ticker);
        Ok(flag)
    }

    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.handle()
    }

    /// Routes Ctrl-C to this runtime's shutdown flag.
    pub fn handle_ctrl_c(&self) -> PortResult<()> {
        install_ctrlc(self.shutdown_handle())
    }

    /// Runs the scheduler loop until a task terminates it, then stops every
    /// ticker.
    pub fn run(&mut self) -> Termination {
        let termination = self.scheduler.run_loop();
        for ticker in self.tickers.drain(..) {
            ticker.stop();
        }
        if termination.task == self.shutdown.task() {
            log::info!("{}: shutdown requested", self.scheduler.config().name);
        }
        termination
    }
}
