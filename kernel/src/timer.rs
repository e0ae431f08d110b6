// =============================================================================
// Ferrite OS — Timer Descriptor & Clock-Framework Boundary
// =============================================================================
//
// A hardware timer driver describes itself to the clock framework with a
// `Timer` descriptor: capabilities, quality, frequency, representable
// period range, and the operations to drive it. The framework compares
// quality scores across registered timers, picks the best one, and runs
// the scheduler tick off it.
//
// IMPORTANT DESIGN NOTE:
//   The framework itself (selection logic, tick bookkeeping) does NOT live
//   in this crate. It is reached through the `ClockFramework` trait and
//   injected into drivers at attach time — no ambient global registry.
//   Descriptors are created once at attach and never mutated afterwards.
// =============================================================================

use crate::time::BinTime;
use alloc::sync::Arc;
use bitflags::bitflags;
use core::fmt;

bitflags! {
    /// Capability and start-mode flags of a timer device.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct TimerFlags: u32 {
        /// Fires repeatedly with a fixed period.
        const PERIODIC = 1 << 0;
        /// Fires once after a programmed delay.
        const ONESHOT = 1 << 1;
    }
}

/// Status codes of the clock-framework boundary.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TimerError {
    /// The descriptor was already registered; registration is one-shot
    /// per attach.
    AlreadyRegistered,
    /// The operation needs a running timer, but `start` has not been
    /// called (or `stop` already was).
    NotRunning,
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerError::AlreadyRegistered => write!(f, "timer already registered"),
            TimerError::NotRunning => write!(f, "timer is not running"),
        }
    }
}

/// Operations a driver supplies with its descriptor.
pub trait TimerOps: Send + Sync {
    /// Starts the timer. `flags` selects the mode (a driver may support
    /// only a subset of its capability flags), `start` is the requested
    /// origin, `period` the interval between firings.
    fn start(&self, flags: TimerFlags, start: BinTime, period: BinTime) -> Result<(), TimerError>;

    /// Stops the timer; no further time accumulates afterwards.
    fn stop(&self) -> Result<(), TimerError>;

    /// Current absolute time accumulated since `start`.
    fn gettime(&self) -> BinTime;
}

/// Descriptor of one hardware timer, handed to the clock framework at
/// attach time. Immutable after registration.
pub struct Timer {
    /// Human-readable device name, e.g. `"i8254"`.
    pub name: &'static str,
    /// Modes the device can run in.
    pub flags: TimerFlags,
    /// Selection score; the framework prefers the highest-quality timer.
    pub quality: u32,
    /// Counter frequency in ticks per second.
    pub frequency: u32,
    /// Shortest representable period (one tick).
    pub min_period: BinTime,
    /// Longest representable period (the counter's full range).
    pub max_period: BinTime,
    /// The driver's entry points.
    ops: Arc<dyn TimerOps>,
}

impl Timer {
    pub fn new(
        name: &'static str,
        flags: TimerFlags,
        quality: u32,
        frequency: u32,
        min_period: BinTime,
        max_period: BinTime,
        ops: Arc<dyn TimerOps>,
    ) -> Timer {
        Timer {
            name,
            flags,
            quality,
            frequency,
            min_period,
            max_period,
            ops,
        }
    }

    pub fn start(
        &self,
        flags: TimerFlags,
        start: BinTime,
        period: BinTime,
    ) -> Result<(), TimerError> {
        self.ops.start(flags, start, period)
    }

    pub fn stop(&self) -> Result<(), TimerError> {
        self.ops.stop()
    }

    pub fn gettime(&self) -> BinTime {
        self.ops.gettime()
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("quality", &self.quality)
            .field("frequency", &self.frequency)
            .finish_non_exhaustive()
    }
}

/// The external clock framework, as seen from a driver.
pub trait ClockFramework: Send + Sync {
    /// Adds a timer to the framework's candidate set. One-shot per attach.
    fn register(&self, timer: Arc<Timer>) -> Result<(), TimerError>;

    /// Called by a driver's interrupt path to report that one period of
    /// the given timer elapsed. Drives the scheduler tick.
    fn trigger(&self, timer: &Timer);
}
