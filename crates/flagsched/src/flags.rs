//! Event flags register.
//!
//! Every asynchronous wakeup source (timer, interrupt, another thread) owns one
//! bit of a process-wide register. Sources raise their bit with
//! [`FlagRegister::set_flag`]; the scheduler drains the register once per
//! tick and promotes the tasks waiting on any of the raised bits.
//!
//! The register is the only state shared across execution contexts. Writers
//! only ever OR bits in, so an atomic `fetch_or` is all the exclusion needed.

use core::fmt;
use core::ops::{BitAnd, BitOr, BitOrAssign};
use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::hooks::IdleHook;
use crate::trace::{TraceEvent, TraceHook};
use crate::{SchedError, SchedResult};

/// A set of event-class bits.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Flags(pub u32);

impl Flags {
    /// No bits set.
    pub const NONE: Flags = Flags(0);

    /// Width of the register; the maximum number of distinct event classes.
    pub const BITS: u32 = u32::BITS;

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when the two sets share at least one bit.
    #[inline]
    pub const fn intersects(self, other: Flags) -> bool {
        self.0 & other.0 != 0
    }

    /// True when every bit of `other` is also set in `self`.
    #[inline]
    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl From<u32> for Flags {
    #[inline]
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Flags {
    type Output = Flags;

    fn bitand(self, rhs: Flags) -> Flags {
        Flags(self.0 & rhs.0)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FLAGS({:#010x})", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Flags {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "FLAGS({=u32:#x})", self.0);
    }
}

/// The shared flags register.
///
/// Cheap to share: hand an `Arc<FlagRegister>` (see
/// [`Scheduler::flags`](crate::Scheduler::flags)) to every interrupt source.
/// Nothing here ever promotes a task or runs task code; that happens on the
/// scheduler's own thread during the next tick.
pub struct FlagRegister {
    pending: AtomicU32,
    next_bit: AtomicU32,
    capacity: u32,
    idle: Arc<dyn IdleHook>,
    trace: Option<TraceHook>,
}

impl FlagRegister {
    pub(crate) fn new(capacity: u32, idle: Arc<dyn IdleHook>, trace: Option<TraceHook>) -> Self {
        Self {
            pending: AtomicU32::new(0),
            next_bit: AtomicU32::new(0),
            capacity: capacity.min(Flags::BITS),
            idle,
            trace,
        }
    }

    /// Allocates the next unused single-bit flag.
    ///
    /// Flags are handed out in increasing order (`1 << 0`, `1 << 1`, ...) and
    /// never reused. Asking for more than the configured capacity is a
    /// configuration error and fails instead of wrapping.
    pub fn new_flag(&self) -> SchedResult<Flags> {
        let capacity = self.capacity;
        self.next_bit
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bit| {
                (bit < capacity).then_some(bit + 1)
            })
            .map(|bit| Flags(1 << bit))
            .map_err(|_| SchedError::FlagsExhausted { capacity })
    }

    /// Raises `flags` and wakes the idle hook.
    ///
    /// Safe to call from any thread, including while a tick is in progress.
    /// The raised bits are seen by the first drain that starts after this
    /// call.
    pub fn set_flag(&self, flags: Flags) {
        self.pending.fetch_or(flags.0, Ordering::AcqRel);
        if let Some(trace) = &self.trace {
            trace(&TraceEvent::SetFlag(flags));
        }
        self.idle.wakeup();
    }

    /// Bits raised since the last drain.
    pub fn pending(&self) -> Flags {
        Flags(self.pending.load(Ordering::Acquire))
    }

    /// Number of flags allocated so far.
    pub fn allocated(&self) -> u32 {
        self.next_bit.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Drains the register.
    pub(crate) fn take(&self) -> Flags {
        Flags(self.pending.swap(0, Ordering::AcqRel))
    }
}

impl fmt::Debug for FlagRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlagRegister")
            .field("pending", &self.pending())
            .field("allocated", &self.allocated())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
