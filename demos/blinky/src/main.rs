//! Blinky on top of the flagsched scheduler.
//!
//! A ticker thread stands in for the board's timer interrupt. Three tasks
//! share it:
//! - `heartbeat` toggles a simulated LED on every tick,
//! - `sensor` takes a reading every tick, failing every Nth sample to show
//!   the restart policy,
//! - `reporter` wakes on the sensor's "sample ready" flag and logs it.
//!
//! The loop ends on Ctrl-C, after `--run-for-ms`, or once the heartbeat has
//! blinked `--blinks` times.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use rand::{rngs::SmallRng, Rng, SeedableRng};

use flagsched::{FailurePolicy, Flags, Routine, SchedulerConfig, Step, TaskContext};
use flagsched_port_posix::PosixRuntime;

#[derive(Parser, Debug)]
#[command(name = "blinky")]
#[command(about = "Blink a simulated LED with the flagsched scheduler", long_about = None)]
#[command(version)]
struct Args {
    /// Timer interrupt period in milliseconds
    #[arg(long, default_value_t = 100)]
    tick_ms: u64,

    /// Stop after this many LED toggles
    #[arg(long)]
    blinks: Option<u64>,

    /// Fail every Nth sensor sample (0 never fails)
    #[arg(long, default_value_t = 5)]
    fail_every: u64,

    /// Shut down after this many milliseconds
    #[arg(long)]
    run_for_ms: Option<u64>,

    /// Seed for the simulated sensor
    #[arg(long, default_value_t = 1)]
    seed: u64,
}

#[derive(Clone, Copy, Debug)]
struct Reading {
    sample: u64,
    celsius: f32,
}

type Latest = Arc<Mutex<Option<Reading>>>;

/// Parks on `flag` the first time a routine is stepped.
fn first_park(armed: &mut bool, flag: Flags) -> Option<Step> {
    if *armed {
        None
    } else {
        *armed = true;
        Some(Step::Wait(flag))
    }
}

struct Heartbeat {
    tick: Flags,
    armed: bool,
    led: bool,
    toggles: u64,
    limit: Option<u64>,
}

impl Routine for Heartbeat {
    fn step(&mut self, cx: &mut TaskContext) -> Step {
        if let Some(step) = first_park(&mut self.armed, self.tick) {
            return step;
        }
        self.led = !self.led;
        self.toggles += 1;
        log::info!(
            "[tick {}] LED {}",
            cx.tick(),
            if self.led { "ON" } else { "OFF" }
        );
        match self.limit {
            Some(limit) if self.toggles >= limit => Step::Terminate,
            _ => Step::Wait(self.tick),
        }
    }
}

struct Sensor {
    tick: Flags,
    ready: Flags,
    armed: bool,
    fail_every: u64,
    samples: u64,
    rng: SmallRng,
    latest: Latest,
}

impl Routine for Sensor {
    fn step(&mut self, cx: &mut TaskContext) -> Step {
        if let Some(step) = first_park(&mut self.armed, self.tick) {
            return step;
        }
        self.samples += 1;
        if self.fail_every > 0 && self.samples % self.fail_every == 0 {
            return Step::fail(format!("sensor timeout on sample {}", self.samples));
        }

        let reading = Reading {
            sample: self.samples,
            celsius: self.rng.gen_range(18.0..27.0),
        };
        *self.latest.lock() = Some(reading);
        cx.set_flag(self.ready);
        Step::Wait(self.tick)
    }
}

struct Reporter {
    ready: Flags,
    armed: bool,
    latest: Latest,
}

impl Routine for Reporter {
    fn step(&mut self, cx: &mut TaskContext) -> Step {
        if let Some(step) = first_park(&mut self.armed, self.ready) {
            return step;
        }
        let reading = *self.latest.lock();
        if let Some(reading) = reading {
            log::info!(
                "[tick {}] sample {}: {:.1} C",
                cx.tick(),
                reading.sample,
                reading.celsius
            );
        }
        Step::Wait(self.ready)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = SchedulerConfig::builder().name("blinky").build();
    let mut runtime = PosixRuntime::new(config).context("failed to build runtime")?;
    let tick = runtime
        .start_ticker(Duration::from_millis(args.tick_ms))
        .context("failed to start timer")?;
    let ready = runtime.scheduler().new_flag()?;
    runtime.handle_ctrl_c()?;

    if let Some(ms) = args.run_for_ms {
        let shutdown = runtime.shutdown_handle();
        thread::Builder::new()
            .name("deadline".into())
            .spawn(move || {
                thread::sleep(Duration::from_millis(ms));
                log::info!("run time of {ms} ms elapsed");
                shutdown.trigger();
            })
            .context("failed to start deadline timer")?;
    }

    let latest: Latest = Arc::new(Mutex::new(None));
    let sched = runtime.scheduler_mut();

    let limit = args.blinks;
    sched.run_named("heartbeat", FailurePolicy::Drop, move || Heartbeat {
        tick,
        armed: false,
        led: false,
        toggles: 0,
        limit,
    });

    let generation = Arc::new(AtomicU64::new(0));
    let (seed, fail_every) = (args.seed, args.fail_every);
    let sensor_latest = Arc::clone(&latest);
    let sensor_generation = Arc::clone(&generation);
    sched.run_named("sensor", FailurePolicy::Restart, move || {
        let generation = sensor_generation.fetch_add(1, Ordering::Relaxed);
        Sensor {
            tick,
            ready,
            armed: false,
            fail_every,
            samples: 0,
            rng: SmallRng::seed_from_u64(seed.wrapping_add(generation)),
            latest: Arc::clone(&sensor_latest),
        }
    });

    let reporter_latest = Arc::clone(&latest);
    sched.run_named("reporter", FailurePolicy::Drop, move || Reporter {
        ready,
        armed: false,
        latest: Arc::clone(&reporter_latest),
    });

    let termination = runtime.run();
    log::info!(
        "{termination}; sensor started {} time(s)",
        generation.load(Ordering::Relaxed)
    );
    Ok(())
}
