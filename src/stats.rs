//! Stream statistics for real-time monitoring.
//!
//! `StreamStatistics` is an online min/max/mean accumulator with a small
//! histogram of signal codes. It is owned by the stream-processing context and
//! never allocates after construction. Diagnostic threads read a copy through
//! `StatsPublisher`, which the real-time side updates with `try_lock` so it
//! can never be blocked by a reader.
//!
//! `StreamCounters` holds the event counters shared between the bus I/O and
//! stream-processing threads. Atomics only, no locking in the audio path.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::dbg_info;
use crate::debug::DebugModule;

/// Highest histogram bucket accepted by `signal`
pub const MAX_SIGNAL_VALUE: usize = 7;

/// Number of histogram buckets
pub const SIGNAL_BUCKETS: usize = MAX_SIGNAL_VALUE + 1;

/// Plain copy of an accumulator's state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatisticsSnapshot {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub histogram: [u64; SIGNAL_BUCKETS],
}

impl Default for StatisticsSnapshot {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            histogram: [0; SIGNAL_BUCKETS],
        }
    }
}

impl StatisticsSnapshot {
    /// One-line summary, e.g. "n=120 min=2.000 max=9.000 mean=4.210"
    pub fn format_display(&self) -> String {
        if self.count == 0 {
            return "n=0".to_string();
        }
        format!(
            "n={} min={:.3} max={:.3} mean={:.3}",
            self.count, self.min, self.max, self.mean
        )
    }
}

/// Online accumulator for one monitored quantity
#[derive(Debug, Clone)]
pub struct StreamStatistics {
    name: String,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    mean: f64,
    histogram: [u64; SIGNAL_BUCKETS],
    debug: DebugModule,
}

impl StreamStatistics {
    /// Accumulator whose reports are only returned, not logged
    pub fn new(name: &str) -> Self {
        Self::with_debug(name, DebugModule::silent(name))
    }

    /// Accumulator that also logs `dump_info` through `debug`
    pub fn with_debug(name: &str, debug: DebugModule) -> Self {
        Self {
            name: name.to_string(),
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            mean: 0.0,
            histogram: [0; SIGNAL_BUCKETS],
            debug,
        }
    }

    /// Record one value. Non-finite values are ignored.
    pub fn mark(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.count += 1;
        self.sum += value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
        // sum/count can land an ulp outside the observed range
        self.mean = (self.sum / self.count as f64).clamp(self.min, self.max);
    }

    /// Count one occurrence of `value`. Values outside `0..=MAX_SIGNAL_VALUE` are dropped.
    pub fn signal(&mut self, value: i64) {
        if (0..=MAX_SIGNAL_VALUE as i64).contains(&value) {
            self.histogram[value as usize] += 1;
        }
    }

    /// Zero every accumulator
    pub fn reset(&mut self) {
        self.count = 0;
        self.sum = 0.0;
        self.min = f64::INFINITY;
        self.max = f64::NEG_INFINITY;
        self.mean = 0.0;
        self.histogram = [0; SIGNAL_BUCKETS];
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Smallest marked value (0.0 before the first mark)
    pub fn min(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.min
        }
    }

    /// Largest marked value (0.0 before the first mark)
    pub fn max(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.max
        }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn histogram(&self) -> &[u64; SIGNAL_BUCKETS] {
        &self.histogram
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            count: self.count,
            sum: self.sum,
            min: self.min(),
            max: self.max(),
            mean: self.mean,
            histogram: self.histogram,
        }
    }

    /// Human-readable report. Allocates; call from a diagnostic context only.
    pub fn dump_info(&self) -> String {
        let report = self.to_string();
        dbg_info!(self.debug, "{}", report);
        report
    }
}

impl fmt::Display for StreamStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Statistics for {}:", self.name)?;
        writeln!(f, "  Count : {}", self.count)?;
        writeln!(f, "  Sum   : {:.3}", self.sum)?;
        writeln!(f, "  Min   : {:.3}", self.min())?;
        writeln!(f, "  Max   : {:.3}", self.max())?;
        writeln!(f, "  Mean  : {:.3}", self.mean)?;
        write!(f, "  Signals:")?;
        for (code, hits) in self.histogram.iter().enumerate() {
            write!(f, " {}={}", code, hits)?;
        }
        Ok(())
    }
}

/// Latest-value hand-off from the real-time side to diagnostic readers.
///
/// Clones share the same slot.
#[derive(Clone, Default)]
pub struct StatsPublisher {
    slot: Arc<Mutex<StatisticsSnapshot>>,
    skipped: Arc<AtomicU64>,
}

impl StatsPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a copy of `stats` unless a reader currently holds the slot.
    /// Returns false when the update was skipped.
    pub fn publish(&self, stats: &StreamStatistics) -> bool {
        match self.slot.try_lock() {
            Some(mut slot) => {
                *slot = stats.snapshot();
                true
            }
            None => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Most recently published snapshot
    pub fn latest(&self) -> StatisticsSnapshot {
        *self.slot.lock()
    }

    /// Updates dropped because the slot was busy
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

/// Event counters shared by the bus I/O and stream-processing threads
#[derive(Debug, Default)]
pub struct StreamCounters {
    /// Packets accepted into the packet buffer
    pub packets_received: AtomicU64,
    /// Packets handed to the bus
    pub packets_transmitted: AtomicU64,
    /// Packets dropped because the buffer was full
    pub dropped_full: AtomicU64,
    /// Packets rejected as malformed or larger than the configured size
    pub oversized: AtomicU64,
    /// Packets whose DBC did not follow the previous one
    pub dbc_discontinuities: AtomicU64,
    /// Engine periods that could not be filled completely
    pub underruns: AtomicU64,
    /// Packets dropped because the bus time could not be read
    pub bus_time_errors: AtomicU64,
}

/// Plain copy of `StreamCounters`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub packets_received: u64,
    pub packets_transmitted: u64,
    pub dropped_full: u64,
    pub oversized: u64,
    pub dbc_discontinuities: u64,
    pub underruns: u64,
    pub bus_time_errors: u64,
}

impl StreamCounters {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_transmitted: self.packets_transmitted.load(Ordering::Relaxed),
            dropped_full: self.dropped_full.load(Ordering::Relaxed),
            oversized: self.oversized.load(Ordering::Relaxed),
            dbc_discontinuities: self.dbc_discontinuities.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            bus_time_errors: self.bus_time_errors.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.packets_received.store(0, Ordering::Relaxed);
        self.packets_transmitted.store(0, Ordering::Relaxed);
        self.dropped_full.store(0, Ordering::Relaxed);
        self.oversized.store(0, Ordering::Relaxed);
        self.dbc_discontinuities.store(0, Ordering::Relaxed);
        self.underruns.store(0, Ordering::Relaxed);
        self.bus_time_errors.store(0, Ordering::Relaxed);
    }
}

impl CountersSnapshot {
    /// Format counters for display.
    ///
    /// Returns a string like:
    /// "RX 8000, TX 0, Drop 0, Oversize 0, DBC 0, Underrun 0, BusTime 0"
    pub fn format_display(&self) -> String {
        format!(
            "RX {}, TX {}, Drop {}, Oversize {}, DBC {}, Underrun {}, BusTime {}",
            self.packets_received,
            self.packets_transmitted,
            self.dropped_full,
            self.oversized,
            self.dbc_discontinuities,
            self.underruns,
            self.bus_time_errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::XorShift;

    #[test]
    fn test_empty_statistics() {
        let stats = StreamStatistics::new("empty");
        assert_eq!(stats.count(), 0);
        assert_eq!(stats.min(), 0.0);
        assert_eq!(stats.max(), 0.0);
        assert_eq!(stats.mean(), 0.0);
        assert_eq!(stats.snapshot().format_display(), "n=0");
    }

    #[test]
    fn test_mark_matches_reference_reduction() {
        let mut rng = XorShift::new(42);
        let values: Vec<f64> = (0..5000)
            .map(|_| (rng.next_u32() as f64 / u32::MAX as f64) * 200.0 - 100.0)
            .collect();

        let mut stats = StreamStatistics::new("fill");
        for &v in &values {
            stats.mark(v);
        }

        let sum: f64 = values.iter().sum();
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mean = sum / values.len() as f64;

        assert_eq!(stats.count(), values.len() as u64);
        assert_eq!(stats.min(), min);
        assert_eq!(stats.max(), max);
        assert!((stats.sum() - sum).abs() < 1.0e-6);
        assert!((stats.mean() - mean).abs() < 1.0e-9);
        assert!(stats.min() <= stats.mean() && stats.mean() <= stats.max());
    }

    #[test]
    fn test_mean_stays_in_range_for_constant_input() {
        let mut stats = StreamStatistics::new("const");
        for _ in 0..1000 {
            stats.mark(0.1);
        }
        assert!(stats.min() <= stats.mean() && stats.mean() <= stats.max());
    }

    #[test]
    fn test_non_finite_ignored() {
        let mut stats = StreamStatistics::new("nan");
        stats.mark(f64::NAN);
        stats.mark(f64::INFINITY);
        stats.mark(3.0);
        assert_eq!(stats.count(), 1);
        assert_eq!(stats.mean(), 3.0);
    }

    #[test]
    fn test_signal_range() {
        let mut stats = StreamStatistics::new("signals");
        for v in [-1, 0, 3, 7, 8, 100, i64::MIN, i64::MAX] {
            stats.signal(v);
        }
        let mut expected = [0u64; SIGNAL_BUCKETS];
        expected[0] = 1;
        expected[3] = 1;
        expected[7] = 1;
        assert_eq!(stats.histogram(), &expected);
    }

    #[test]
    fn test_reset() {
        let mut stats = StreamStatistics::new("reset");
        stats.mark(5.0);
        stats.signal(2);
        stats.reset();
        assert_eq!(stats.snapshot(), StatisticsSnapshot::default());
        stats.mark(-1.0);
        assert_eq!(stats.min(), -1.0);
        assert_eq!(stats.max(), -1.0);
    }

    #[test]
    fn test_dump_info_contents() {
        let mut stats = StreamStatistics::new("rx fill");
        stats.mark(2.0);
        stats.mark(4.0);
        stats.signal(1);
        let report = stats.dump_info();
        assert!(report.starts_with("Statistics for rx fill:"));
        assert!(report.contains("Count : 2"));
        assert!(report.contains("Mean  : 3.000"));
        assert!(report.contains("1=1"));
    }

    #[test]
    fn test_publisher_latest_and_skip() {
        let publisher = StatsPublisher::new();
        let mut stats = StreamStatistics::new("pub");
        stats.mark(1.5);
        assert!(publisher.publish(&stats));
        assert_eq!(publisher.latest().count, 1);

        let reader = publisher.clone();
        let guard = reader.slot.lock();
        stats.mark(2.5);
        assert!(!publisher.publish(&stats));
        drop(guard);
        assert_eq!(publisher.skipped(), 1);
        assert_eq!(publisher.latest().count, 1);
    }

    #[test]
    fn test_counters() {
        let counters = StreamCounters::new();
        StreamCounters::add(&counters.packets_received, 3);
        StreamCounters::add(&counters.dropped_full, 1);
        let snap = counters.snapshot();
        assert_eq!(snap.packets_received, 3);
        assert_eq!(snap.dropped_full, 1);
        assert_eq!(
            snap.format_display(),
            "RX 3, TX 0, Drop 1, Oversize 0, DBC 0, Underrun 0, BusTime 0"
        );
        counters.reset();
        assert_eq!(counters.snapshot(), CountersSnapshot::default());
    }
}
