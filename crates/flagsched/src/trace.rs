//! Scheduler trace events.
//!
//! A [`TraceHook`] receives one [`TraceEvent`] per scheduler decision. Hooks
//! run inline on the emitting context (the scheduler thread, or the thread
//! that called `set_flag`), so they should be quick.

use std::sync::Arc;

use crate::flags::Flags;
use crate::task::TaskId;

/// One scheduler decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    /// A context raised flags.
    SetFlag(Flags),
    /// The loop entered the idle hook.
    Sleep,
    /// A waiting task became runnable because of `flags`.
    Promote { task: TaskId, flags: Flags },
    /// A task is about to be stepped.
    Step { task: TaskId },
    /// A task parked itself on `mask`.
    Wait { task: TaskId, mask: Flags },
    /// A task ran to completion.
    Complete { task: TaskId },
    /// A task step failed.
    Failed { task: TaskId },
    /// A task was recreated from its factory.
    Restart { task: TaskId },
    /// A task was removed by request.
    Stop { task: TaskId },
    /// A task raised the termination signal.
    Terminate { task: TaskId },
}

pub type TraceHook = Arc<dyn Fn(&TraceEvent) + Send + Sync>;
