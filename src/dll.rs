//! Delay-locked loop.
//!
//! A chain of integrators driven by the error between each new sample and
//! the loop's current estimate. For a loop of order N:
//!
//! ```text
//! e        = x - node[0]
//! node[i] += c[i] * e + node[i + 1]     (i < N - 1)
//! node[N-1] += c[N-1] * e
//! ```
//!
//! With N = 2 and `node[1]` seeded with the nominal period, `node[0]` tracks
//! the next expected event time and `node[1]` the filtered period. Storage is
//! fixed-size, so `put` never allocates and costs O(order).
//!
//! Coefficients are not checked for stability; use `DllCoefficients` or tune
//! them offline.

use std::f64::consts::{PI, SQRT_2};

use crate::error::{Error, Result};

/// Highest supported loop order
pub const MAX_ORDER: usize = 4;

/// Delay-locked loop of order 1 to `MAX_ORDER`
#[derive(Debug, Clone)]
pub struct DelayLockedLoop {
    /// 0 while uninitialized
    order: usize,
    coefficients: [f64; MAX_ORDER],
    nodes: [f64; MAX_ORDER],
    error: f64,
}

impl DelayLockedLoop {
    /// Uninitialized loop; `put` is ignored until `set_order`.
    pub fn new() -> Self {
        Self {
            order: 0,
            coefficients: [0.0; MAX_ORDER],
            nodes: [0.0; MAX_ORDER],
            error: 0.0,
        }
    }

    /// Loop already configured with `coefficients.len()` as its order
    pub fn with_coefficients(coefficients: &[f64]) -> Result<Self> {
        let mut dll = Self::new();
        dll.set_order(coefficients.len(), coefficients)?;
        Ok(dll)
    }

    /// Configure order and coefficients and zero the integrators.
    pub fn set_order(&mut self, order: usize, coefficients: &[f64]) -> Result<()> {
        if order == 0 || order > MAX_ORDER {
            return Err(Error::InvalidConfig(format!(
                "loop order {} outside 1..={}",
                order, MAX_ORDER
            )));
        }
        if coefficients.len() != order {
            return Err(Error::OrderMismatch {
                order,
                coefficients: coefficients.len(),
            });
        }

        self.coefficients = [0.0; MAX_ORDER];
        self.coefficients[..order].copy_from_slice(coefficients);
        self.order = order;
        self.reset();
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.order > 0
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients[..self.order]
    }

    /// Zero the integrators and the last error, keeping the tuning.
    pub fn reset(&mut self) {
        self.nodes = [0.0; MAX_ORDER];
        self.error = 0.0;
    }

    /// Seed integrator `index`. Returns false if out of range.
    pub fn set_integrator(&mut self, index: usize, value: f64) -> bool {
        if index < self.order {
            self.nodes[index] = value;
            true
        } else {
            false
        }
    }

    /// Current value of integrator `index`
    pub fn integrator(&self, index: usize) -> Option<f64> {
        if index < self.order {
            Some(self.nodes[index])
        } else {
            None
        }
    }

    /// Feed one sample. Returns false (and does nothing) while uninitialized.
    pub fn put(&mut self, value: f64) -> bool {
        let order = self.order;
        if order == 0 {
            return false;
        }

        let error = value - self.nodes[0];
        self.error = error;
        for i in 0..order - 1 {
            self.nodes[i] += self.coefficients[i] * error + self.nodes[i + 1];
        }
        self.nodes[order - 1] += self.coefficients[order - 1] * error;
        true
    }

    /// Current estimate (`node[0]`)
    pub fn get(&self) -> f64 {
        self.nodes[0]
    }

    /// Error computed by the last `put`
    pub fn get_error(&self) -> f64 {
        self.error
    }
}

impl Default for DelayLockedLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// Coefficient design helpers
pub struct DllCoefficients;

impl DllCoefficients {
    /// Second-order loop with damping 1/√2.
    ///
    /// Tracks a frequency offset with zero steady-state error. A type-2 loop
    /// overshoots a step input before settling (about 22% here); use
    /// `first_order` where a monotonic approach matters.
    ///
    /// # Arguments
    /// * `bandwidth_hz` - Loop bandwidth
    /// * `update_rate_hz` - Rate at which `put` is called
    pub fn second_order(bandwidth_hz: f64, update_rate_hz: f64) -> [f64; 2] {
        let omega = 2.0 * PI * bandwidth_hz / update_rate_hz;
        [SQRT_2 * omega, omega * omega]
    }

    /// First-order loop with the same bandwidth
    pub fn first_order(bandwidth_hz: f64, update_rate_hz: f64) -> [f64; 1] {
        [2.0 * PI * bandwidth_hz / update_rate_hz]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uninitialized_ignores_input() {
        let mut dll = DelayLockedLoop::new();
        assert!(!dll.is_running());
        assert!(!dll.put(10.0));
        assert_eq!(dll.get(), 0.0);
        assert_eq!(dll.get_error(), 0.0);
    }

    #[test]
    fn test_order_mismatch() {
        let mut dll = DelayLockedLoop::new();
        assert!(matches!(
            dll.set_order(2, &[0.1]),
            Err(Error::OrderMismatch { order: 2, coefficients: 1 })
        ));
        assert!(dll.set_order(0, &[]).is_err());
        assert!(dll.set_order(5, &[0.1; 5]).is_err());
        assert!(!dll.is_running());
    }

    #[test]
    fn test_zero_input_stays_put() {
        let mut dll = DelayLockedLoop::with_coefficients(&DllCoefficients::second_order(1.0, 100.0)).unwrap();
        for _ in 0..10_000 {
            dll.put(0.0);
        }
        assert_eq!(dll.get(), 0.0);
        assert_eq!(dll.get_error(), 0.0);
    }

    #[test]
    fn test_first_order_converges_monotonically() {
        let mut dll = DelayLockedLoop::with_coefficients(&[0.2]).unwrap();
        let target = 5.0;
        let mut last = dll.get();
        for _ in 0..200 {
            dll.put(target);
            let now = dll.get();
            assert!(now >= last, "estimate went backwards: {} -> {}", last, now);
            assert!(now <= target);
            last = now;
        }
        assert!((dll.get() - target).abs() < 1.0e-9);
    }

    #[test]
    fn test_second_order_step_overshoot_bounded() {
        let mut dll = DelayLockedLoop::with_coefficients(&DllCoefficients::second_order(1.0, 100.0)).unwrap();
        let target = 5.0;
        let mut peak = 0.0f64;
        for _ in 0..2000 {
            dll.put(target);
            peak = peak.max(dll.get());
        }
        assert!(peak > target);
        assert!(peak < target * 1.25, "overshoot too large: {}", peak);
        assert!((dll.get() - target).abs() < 1.0e-9);
        assert!(dll.integrator(1).unwrap().abs() < 1.0e-9);
    }

    #[test]
    fn test_second_order_tracks_ramp() {
        // Events every 3072 ticks; the loop should learn the period
        let period = 3072.0;
        let mut dll = DelayLockedLoop::with_coefficients(&DllCoefficients::second_order(0.5, 100.0)).unwrap();
        dll.set_integrator(0, period);
        dll.set_integrator(1, period * 0.999);

        for k in 1..5000 {
            dll.put(k as f64 * period);
        }
        assert!(dll.get_error().abs() < 1.0e-3, "error {}", dll.get_error());
        assert!((dll.integrator(1).unwrap() - period).abs() < 1.0e-3);
    }

    #[test]
    fn test_reset_keeps_coefficients() {
        let coeffs = DllCoefficients::second_order(2.0, 1000.0);
        let mut dll = DelayLockedLoop::with_coefficients(&coeffs).unwrap();
        dll.put(1.0);
        assert!(dll.get() != 0.0);
        dll.reset();
        assert_eq!(dll.get(), 0.0);
        assert_eq!(dll.get_error(), 0.0);
        assert_eq!(dll.coefficients(), &coeffs[..]);
        assert!(dll.is_running());
    }

    #[test]
    fn test_large_finite_input_no_special_casing() {
        let mut dll = DelayLockedLoop::with_coefficients(&[0.5, 0.01]).unwrap();
        dll.put(1.0e300);
        assert!(dll.get().is_finite());
        assert_eq!(dll.get_error(), 1.0e300);
    }

    #[test]
    fn test_integrator_bounds() {
        let mut dll = DelayLockedLoop::with_coefficients(&[0.5]).unwrap();
        assert!(dll.set_integrator(0, 1.0));
        assert!(!dll.set_integrator(1, 1.0));
        assert_eq!(dll.integrator(0), Some(1.0));
        assert_eq!(dll.integrator(1), None);
    }
}
