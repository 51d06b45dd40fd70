//! Device clock recovery from bus timestamps.
//!
//! A second-order delay-locked loop follows the SYT presentation times of the
//! incoming stream. Node 0 predicts the next timestamp and node 1 holds the
//! filtered period between timestamps; the ratio of that period to the
//! nominal one is the rate correction handed to the resampler.
//!
//! Timestamps are cycle-timer ticks and wrap every 128 seconds. The loop
//! runs in the wrapped domain: errors are taken as the shortest signed
//! distance and the prediction is folded back after each update.

use crate::cycle_timer::{ticks_diff, TICKS_PER_SECOND, TICKS_PER_WRAP};
use crate::debug::DebugModule;
use crate::dll::{DelayLockedLoop, DllCoefficients};
use crate::error::{Error, Result};
use crate::{dbg_debug, dbg_info};

/// Phase error (ticks) under which an update counts towards lock (~4 µs)
const LOCK_THRESHOLD_TICKS: f64 = 100.0;
/// Consecutive good updates required to report lock
const LOCK_COUNT: u32 = 8;
/// Consecutive bad updates required to drop lock
const UNLOCK_COUNT: u32 = 4;
/// Errors beyond this are treated as a discontinuity, not as drift (16 cycles)
pub const MAX_PHASE_ERROR_TICKS: f64 = 16.0 * 3072.0;

/// Rate estimator for one stream
pub struct ClockRecovery {
    dll: DelayLockedLoop,
    /// Nominal ticks between consecutive timestamps
    nominal_period: f64,
    /// Whether the loop has seen its first timestamp
    primed: bool,
    /// Locked state (stable tracking)
    locked: bool,
    /// Consecutive updates within threshold
    samples_in_lock: u32,
    /// Consecutive updates outside threshold while locked
    samples_out_of_lock: u32,
    /// Number of timestamps processed
    updates: u64,
    /// Timestamps rejected as jumps
    discontinuities: u64,
    debug: DebugModule,
}

impl ClockRecovery {
    /// Create an estimator.
    ///
    /// # Arguments
    /// * `nominal_period_ticks` - Expected ticks between timestamps
    /// * `bandwidth_hz` - Loop bandwidth
    /// * `update_rate_hz` - Expected timestamps per second
    pub fn new(
        nominal_period_ticks: f64,
        bandwidth_hz: f64,
        update_rate_hz: f64,
        debug: DebugModule,
    ) -> Result<Self> {
        if !(nominal_period_ticks > 0.0) || !(bandwidth_hz > 0.0) || !(update_rate_hz > bandwidth_hz) {
            return Err(Error::InvalidConfig(format!(
                "clock recovery needs period > 0 and 0 < bandwidth < update rate \
                 (period {}, bandwidth {}, rate {})",
                nominal_period_ticks, bandwidth_hz, update_rate_hz
            )));
        }

        let coefficients = DllCoefficients::second_order(bandwidth_hz, update_rate_hz);
        let dll = DelayLockedLoop::with_coefficients(&coefficients)?;

        dbg_info!(
            debug,
            "clock recovery: period {:.1} ticks, bandwidth {} Hz at {:.1} Hz",
            nominal_period_ticks,
            bandwidth_hz,
            update_rate_hz
        );

        Ok(Self {
            dll,
            nominal_period: nominal_period_ticks,
            primed: false,
            locked: false,
            samples_in_lock: 0,
            samples_out_of_lock: 0,
            updates: 0,
            discontinuities: 0,
            debug,
        })
    }

    /// Estimator for an AMDTP stream whose timestamps are `syt_interval` frames apart
    pub fn for_stream(
        sample_rate: u32,
        syt_interval: u32,
        bandwidth_hz: f64,
        debug: DebugModule,
    ) -> Result<Self> {
        if sample_rate == 0 || syt_interval == 0 {
            return Err(Error::InvalidConfig("sample rate and SYT interval must be non-zero".to_string()));
        }
        let period = syt_interval as f64 * TICKS_PER_SECOND as f64 / sample_rate as f64;
        let update_rate = sample_rate as f64 / syt_interval as f64;
        Self::new(period, bandwidth_hz, update_rate, debug)
    }

    /// Feed a timestamp one nominal period after the previous one.
    pub fn update(&mut self, timestamp_ticks: u64) -> f64 {
        self.update_after(timestamp_ticks, 1)
    }

    /// Feed a timestamp `periods` nominal periods after the previous one.
    /// Returns the current rate ratio.
    pub fn update_after(&mut self, timestamp_ticks: u64, periods: u32) -> f64 {
        if periods == 0 {
            return self.rate_ratio();
        }
        self.updates += 1;
        let timestamp = (timestamp_ticks % TICKS_PER_WRAP) as f64;

        if !self.primed {
            self.prime(timestamp, self.nominal_period);
            return self.rate_ratio();
        }

        let period = self.period_ticks();
        if periods > 1 {
            let predicted = self.dll.get() + (periods - 1) as f64 * period;
            self.dll.set_integrator(0, wrap(predicted));
        }

        let predicted = self.dll.get();
        let error = ticks_diff(timestamp as u64, predicted.round() as u64 % TICKS_PER_WRAP) as f64
            + (predicted.round() - predicted);

        if error.abs() > MAX_PHASE_ERROR_TICKS {
            self.discontinuities += 1;
            dbg_debug!(
                self.debug,
                "timestamp jump of {:.0} ticks, re-priming",
                error
            );
            self.prime(timestamp, period);
            self.set_unlocked();
            return self.rate_ratio();
        }

        self.dll.put(predicted + error);
        let next = self.dll.get();
        self.dll.set_integrator(0, wrap(next));
        self.track_lock(error);

        self.rate_ratio()
    }

    fn prime(&mut self, timestamp: f64, period: f64) {
        self.dll.reset();
        self.dll.set_integrator(0, wrap(timestamp + period));
        self.dll.set_integrator(1, period);
        self.primed = true;
    }

    fn track_lock(&mut self, error: f64) {
        if error.abs() < LOCK_THRESHOLD_TICKS {
            self.samples_in_lock += 1;
            self.samples_out_of_lock = 0;
            if !self.locked && self.samples_in_lock >= LOCK_COUNT {
                self.locked = true;
                dbg_debug!(self.debug, "locked at {:.6} x nominal", self.rate_ratio());
            }
        } else {
            self.samples_in_lock = 0;
            if self.locked {
                self.samples_out_of_lock += 1;
                if self.samples_out_of_lock >= UNLOCK_COUNT {
                    self.set_unlocked();
                }
            }
        }
    }

    fn set_unlocked(&mut self) {
        if self.locked {
            dbg_debug!(self.debug, "lost lock");
        }
        self.locked = false;
        self.samples_in_lock = 0;
        self.samples_out_of_lock = 0;
    }

    /// Estimated period divided by the nominal one (1.0 before priming)
    pub fn rate_ratio(&self) -> f64 {
        if self.primed {
            self.period_ticks() / self.nominal_period
        } else {
            1.0
        }
    }

    /// Filtered period in ticks
    pub fn period_ticks(&self) -> f64 {
        self.dll.integrator(1).unwrap_or(self.nominal_period)
    }

    pub fn nominal_period_ticks(&self) -> f64 {
        self.nominal_period
    }

    /// Predicted time of the next timestamp
    pub fn predicted_ticks(&self) -> f64 {
        self.dll.get()
    }

    /// Phase error of the last accepted timestamp
    pub fn phase_error_ticks(&self) -> f64 {
        self.dll.get_error()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn is_primed(&self) -> bool {
        self.primed
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn discontinuities(&self) -> u64 {
        self.discontinuities
    }

    /// Forget the phase and rate, keeping the loop tuning
    pub fn reset(&mut self) {
        self.dll.reset();
        self.primed = false;
        self.updates = 0;
        self.discontinuities = 0;
        self.set_unlocked();
    }
}

fn wrap(ticks: f64) -> f64 {
    ticks.rem_euclid(TICKS_PER_WRAP as f64)
}
