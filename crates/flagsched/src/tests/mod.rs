mod idle;

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::{
    Flags, Routine, Scheduler, Step, TaskContext, TaskId, TickReport, TraceEvent, TraceHook,
};

/// Collects trace events, like a logic analyzer on the scheduler.
#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<TraceEvent>>>,
}

impl Recorder {
    fn hook(&self) -> TraceHook {
        let events = Arc::clone(&self.events);
        Arc::new(move |event: &TraceEvent| events.lock().unwrap().push(*event))
    }

    fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    fn stepped(&self) -> Vec<TaskId> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TraceEvent::Step { task } => Some(task),
                _ => None,
            })
            .collect()
    }
}

/// Yields forever, counting its steps.
struct Spinner {
    steps: Arc<AtomicUsize>,
}

impl Routine for Spinner {
    fn step(&mut self, _cx: &mut TaskContext) -> Step {
        self.steps.fetch_add(1, Ordering::SeqCst);
        Step::Yield
    }
}

fn spinner(steps: &Arc<AtomicUsize>) -> impl FnMut() -> Spinner + Send + 'static {
    let steps = Arc::clone(steps);
    move || Spinner {
        steps: Arc::clone(&steps),
    }
}

/// Waits on the same mask forever, counting its steps.
struct Waiter {
    mask: Flags,
    steps: Arc<AtomicUsize>,
}

impl Routine for Waiter {
    fn step(&mut self, _cx: &mut TaskContext) -> Step {
        self.steps.fetch_add(1, Ordering::SeqCst);
        Step::Wait(self.mask)
    }
}

fn waiter(mask: Flags, steps: &Arc<AtomicUsize>) -> impl FnMut() -> Waiter + Send + 'static {
    let steps = Arc::clone(steps);
    move || Waiter {
        mask,
        steps: Arc::clone(&steps),
    }
}

fn tick(sched: &mut Scheduler) -> TickReport {
    match sched.tick() {
        ControlFlow::Continue(report) => report,
        ControlFlow::Break(termination) => panic!("unexpected {termination}"),
    }
}

fn count(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}
