//! Time sources for the streaming core.
//!
//! Clock recovery and statistics need a monotonic microsecond clock, and the
//! receive path needs the current bus cycle time. Both are traits so tests
//! and offline runs can drive them by hand.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::cycle_timer::{CycleTime, TICKS_PER_WRAP};

/// Monotonic microsecond clock
pub trait TimeSource: Send + Sync {
    /// Microseconds since an arbitrary fixed origin. Never decreases.
    fn now_usecs(&self) -> u64;
}

/// Read access to the bus cycle timer (CYCLE_TIME register layout).
/// Implemented by the bus collaborator; the core never touches the hardware.
pub trait CycleTimeSource: Send + Sync {
    fn read_cycle_time(&self) -> io::Result<u32>;
}

/// System monotonic clock anchored at construction
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicClock {
    fn now_usecs(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// Clock advanced explicitly by its owner.
/// Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    usecs: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_usecs: u64) -> Self {
        Self {
            usecs: Arc::new(AtomicU64::new(start_usecs)),
        }
    }

    pub fn set(&self, usecs: u64) {
        self.usecs.store(usecs, Ordering::Release);
    }

    pub fn advance(&self, usecs: u64) {
        self.usecs.fetch_add(usecs, Ordering::AcqRel);
    }
}

impl TimeSource for ManualClock {
    fn now_usecs(&self) -> u64 {
        self.usecs.load(Ordering::Acquire)
    }
}

/// Cycle timer derived from a time source at the nominal 24.576 MHz rate.
pub struct SimulatedBus<T: TimeSource> {
    clock: T,
    /// Tick value reported at time zero
    offset_ticks: u64,
}

impl<T: TimeSource> SimulatedBus<T> {
    pub fn new(clock: T, offset_ticks: u64) -> Self {
        Self {
            clock,
            offset_ticks: offset_ticks % TICKS_PER_WRAP,
        }
    }

    /// Current bus time in ticks (wrapped at 128 seconds)
    pub fn now_ticks(&self) -> u64 {
        // 24.576 ticks per microsecond
        let ticks = self.clock.now_usecs() as u128 * 24_576 / 1_000;
        ((ticks as u64) + self.offset_ticks) % TICKS_PER_WRAP
    }
}

impl<T: TimeSource> CycleTimeSource for SimulatedBus<T> {
    fn read_cycle_time(&self) -> io::Result<u32> {
        Ok(CycleTime::from_ticks(self.now_ticks()).to_register())
    }
}
