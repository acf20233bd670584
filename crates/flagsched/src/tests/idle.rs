use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use super::Recorder;
use crate::{
    FlagRegister, Flags, IdleHook, Scheduler, SchedulerConfig, Step, TaskContext, TraceEvent,
};

/// Idle hook that behaves like an interrupt firing while the board sleeps.
#[derive(Default)]
struct RaiseOnSleep {
    irq: OnceLock<(Arc<FlagRegister>, Flags)>,
    sleeps: AtomicUsize,
    wakeups: AtomicUsize,
}

impl IdleHook for RaiseOnSleep {
    fn sleep(&self) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        if let Some((register, flag)) = self.irq.get() {
            register.set_flag(*flag);
        }
    }

    fn wakeup(&self) {
        self.wakeups.fetch_add(1, Ordering::SeqCst);
    }
}

fn sleepy() -> (Scheduler, Arc<RaiseOnSleep>, Recorder) {
    let idle = Arc::new(RaiseOnSleep::default());
    let recorder = Recorder::default();
    let config = SchedulerConfig::builder()
        .idle_hook(idle.clone())
        .trace_hook(recorder.hook())
        .build();
    (Scheduler::with_config(config), idle, recorder)
}

#[test]
fn loop_sleeps_until_a_flag_arrives() {
    let (mut sched, idle, recorder) = sleepy();
    let irq = sched.new_flag().unwrap();
    assert!(idle.irq.set((sched.flags(), irq)).is_ok());

    let task = sched.run(move || {
        let mut waits = 0;
        move |_cx: &mut TaskContext| {
            if waits == 2 {
                Step::Terminate
            } else {
                waits += 1;
                Step::Wait(irq)
            }
        }
    });

    let termination = sched.run_loop();
    assert_eq!(termination.task, task);
    assert_eq!(termination.tick, 3);
    assert_eq!(idle.sleeps.load(Ordering::SeqCst), 2);
    assert_eq!(idle.wakeups.load(Ordering::SeqCst), 2);

    let wake_cycle = [
        TraceEvent::Sleep,
        TraceEvent::SetFlag(irq),
        TraceEvent::Promote { task, flags: irq },
        TraceEvent::Step { task },
    ];
    let mut expected = vec![
        TraceEvent::Step { task },
        TraceEvent::Wait { task, mask: irq },
    ];
    expected.extend(wake_cycle);
    expected.push(TraceEvent::Wait { task, mask: irq });
    expected.extend(wake_cycle);
    expected.push(TraceEvent::Terminate { task });
    assert_eq!(recorder.events(), expected);
}

#[test]
fn loop_skips_sleep_while_flags_are_pending() {
    let (mut sched, idle, recorder) = sleepy();
    let irq = sched.new_flag().unwrap();
    let unrelated = sched.new_flag().unwrap();
    assert!(idle.irq.set((sched.flags(), irq)).is_ok());

    let task = sched.run(move || {
        let mut step = 0;
        move |cx: &mut TaskContext| {
            step += 1;
            match step {
                1 => {
                    cx.set_flag(unrelated);
                    Step::Wait(irq)
                }
                _ => Step::Terminate,
            }
        }
    });

    sched.run_loop();
    assert_eq!(idle.sleeps.load(Ordering::SeqCst), 1);
    assert_eq!(
        recorder.events(),
        vec![
            TraceEvent::Step { task },
            TraceEvent::SetFlag(unrelated),
            TraceEvent::Wait { task, mask: irq },
            TraceEvent::Sleep,
            TraceEvent::SetFlag(irq),
            TraceEvent::Promote { task, flags: irq },
            TraceEvent::Step { task },
            TraceEvent::Terminate { task },
        ]
    );
}
