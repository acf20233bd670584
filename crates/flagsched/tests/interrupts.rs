//! Integration tests with threads standing in for interrupt sources.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use flagsched::{Scheduler, SchedulerConfig, SleepIdle, Step, TaskContext};

/// Raises `flag` every `period` until `stop` is set.
fn timer_irq(
    sched: &Scheduler,
    flag: flagsched::Flags,
    period: Duration,
    stop: &Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    let register = sched.flags();
    let stop = Arc::clone(stop);
    thread::spawn(move || {
        while !stop.load(Ordering::Acquire) {
            thread::sleep(period);
            register.set_flag(flag);
        }
    })
}

#[test]
fn timer_interrupt_drives_a_countdown() {
    let mut sched = Scheduler::new();
    let timer = sched.new_flag().unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let irq = timer_irq(&sched, timer, Duration::from_millis(5), &stop);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let task = sched.run(move || {
        let log = Arc::clone(&log);
        let mut remaining = 3;
        move |_cx: &mut TaskContext| {
            log.lock().unwrap().push(remaining);
            if remaining == 0 {
                return Step::Terminate;
            }
            remaining -= 1;
            Step::Wait(timer)
        }
    });

    let termination = sched.run_loop();
    stop.store(true, Ordering::Release);
    irq.join().unwrap();

    assert_eq!(termination.task, task);
    assert_eq!(*seen.lock().unwrap(), vec![3, 2, 1, 0]);
}

#[test]
fn waiting_task_does_not_run_before_its_delay() {
    let mut sched = Scheduler::with_config(
        SchedulerConfig::builder()
            .idle_hook(Arc::new(SleepIdle::new(Duration::from_millis(1))))
            .build(),
    );
    let alarm = sched.new_flag().unwrap();
    let register = sched.flags();
    let delay = Duration::from_millis(30);

    let start = Instant::now();
    let fired = thread::spawn(move || {
        thread::sleep(delay);
        register.set_flag(alarm);
    });

    let woke_at = Arc::new(Mutex::new(None));
    let record = Arc::clone(&woke_at);
    sched.run(move || {
        let record = Arc::clone(&record);
        let mut armed = false;
        move |_cx: &mut TaskContext| {
            if !armed {
                armed = true;
                return Step::Wait(alarm);
            }
            *record.lock().unwrap() = Some(Instant::now());
            Step::Terminate
        }
    });

    sched.run_loop();
    fired.join().unwrap();

    let woke_at = woke_at.lock().unwrap().expect("task never resumed");
    assert!(woke_at.duration_since(start) >= delay);
}

#[test]
fn flags_raised_by_many_threads_are_never_lost() {
    let mut sched = Scheduler::new();
    let sources: Vec<_> = (0..4).map(|_| sched.new_flag().unwrap()).collect();
    let all = sources.iter().fold(flagsched::Flags::NONE, |acc, f| acc | *f);

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    sched.run(move || {
        let counter = Arc::clone(&counter);
        let mut first = true;
        move |_cx: &mut TaskContext| {
            if first {
                first = false;
            } else {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Step::Wait(all)
        }
    });
    assert!(sched.tick().is_continue());

    let threads: Vec<_> = sources
        .iter()
        .map(|&flag| {
            let register = sched.flags();
            thread::spawn(move || register.set_flag(flag))
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(sched.flags().pending(), all);
    let report = sched.tick();
    assert!(report.is_continue());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(sched.flags().pending().is_empty());
}
