//! IEEE 1394 cycle-time arithmetic.
//!
//! The bus cycle timer runs at 24.576 MHz and is exposed as a 32-bit
//! register: 7 bits of seconds, 13 bits of cycle count (0-7999) and 12 bits
//! of cycle offset (0-3071). The whole value wraps every 128 seconds, so all
//! tick arithmetic here is modular.

/// Ticks per isochronous cycle (125 µs)
pub const TICKS_PER_CYCLE: u64 = 3072;
/// Isochronous cycles per second
pub const CYCLES_PER_SECOND: u64 = 8000;
/// Cycle-timer ticks per second (24.576 MHz)
pub const TICKS_PER_SECOND: u64 = TICKS_PER_CYCLE * CYCLES_PER_SECOND;
/// Seconds field range
pub const SECONDS_PER_WRAP: u64 = 128;
/// Tick count after which the cycle timer wraps
pub const TICKS_PER_WRAP: u64 = SECONDS_PER_WRAP * TICKS_PER_SECOND;

const SECONDS_SHIFT: u32 = 25;
const CYCLES_SHIFT: u32 = 12;
const CYCLES_MASK: u32 = 0x1FFF;
const OFFSET_MASK: u32 = 0x0FFF;

/// Decoded CYCLE_TIME register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleTime {
    /// Seconds (0-127)
    pub seconds: u32,
    /// Cycle within the second (0-7999)
    pub cycles: u32,
    /// Offset within the cycle (0-3071)
    pub offset: u32,
}

impl CycleTime {
    /// Split a raw register value. Out-of-range cycle/offset fields are
    /// kept as read; `to_ticks` folds them back into range.
    pub fn from_register(reg: u32) -> Self {
        Self {
            seconds: reg >> SECONDS_SHIFT,
            cycles: (reg >> CYCLES_SHIFT) & CYCLES_MASK,
            offset: reg & OFFSET_MASK,
        }
    }

    pub fn to_register(&self) -> u32 {
        ((self.seconds & 0x7F) << SECONDS_SHIFT)
            | ((self.cycles & CYCLES_MASK) << CYCLES_SHIFT)
            | (self.offset & OFFSET_MASK)
    }

    pub fn to_ticks(&self) -> u64 {
        let ticks = self.seconds as u64 * TICKS_PER_SECOND
            + self.cycles as u64 * TICKS_PER_CYCLE
            + self.offset as u64;
        ticks % TICKS_PER_WRAP
    }

    pub fn from_ticks(ticks: u64) -> Self {
        let ticks = ticks % TICKS_PER_WRAP;
        Self {
            seconds: (ticks / TICKS_PER_SECOND) as u32,
            cycles: ((ticks % TICKS_PER_SECOND) / TICKS_PER_CYCLE) as u32,
            offset: (ticks % TICKS_PER_CYCLE) as u32,
        }
    }
}

/// Convert a raw register value straight to ticks
pub fn register_to_ticks(reg: u32) -> u64 {
    CycleTime::from_register(reg).to_ticks()
}

/// `a + b` modulo the cycle-timer wrap
pub fn ticks_add(a: u64, b: u64) -> u64 {
    (a % TICKS_PER_WRAP + b % TICKS_PER_WRAP) % TICKS_PER_WRAP
}

/// `a - b` modulo the cycle-timer wrap (always non-negative)
pub fn ticks_sub(a: u64, b: u64) -> u64 {
    (a % TICKS_PER_WRAP + TICKS_PER_WRAP - b % TICKS_PER_WRAP) % TICKS_PER_WRAP
}

/// Signed shortest distance from `b` to `a` across the wrap
pub fn ticks_diff(a: u64, b: u64) -> i64 {
    let d = ticks_sub(a, b) as i64;
    if d > (TICKS_PER_WRAP / 2) as i64 {
        d - TICKS_PER_WRAP as i64
    } else {
        d
    }
}

/// Expand a 16-bit SYT field (4-bit cycle, 12-bit offset) into full ticks.
///
/// The SYT only names a cycle modulo 16, so the result is the candidate
/// closest to `reference_ticks` (normally the packet's arrival time).
pub fn syt_to_ticks(syt: u16, reference_ticks: u64) -> u64 {
    let syt_cycle = ((syt >> 12) & 0x0F) as u64;
    let syt_offset = (syt & 0x0FFF) as u64;

    let reference = reference_ticks % TICKS_PER_WRAP;
    let ref_cycle = reference / TICKS_PER_CYCLE;

    // Base the candidate on the reference cycle with its low 4 bits replaced
    let base_cycle = (ref_cycle & !0x0F) | syt_cycle;
    let candidate = ticks_add(base_cycle * TICKS_PER_CYCLE, syt_offset);

    // Pick the neighbour 16 cycles away if it is closer to the reference
    let span = 16 * TICKS_PER_CYCLE;
    let diff = ticks_diff(candidate, reference);
    if diff > (span / 2) as i64 {
        ticks_sub(candidate, span)
    } else if diff < -((span / 2) as i64) {
        ticks_add(candidate, span)
    } else {
        candidate
    }
}

/// Compress a tick value into a SYT field (low 4 cycle bits, 12-bit offset)
pub fn ticks_to_syt(ticks: u64) -> u16 {
    let ticks = ticks % TICKS_PER_WRAP;
    let cycle = (ticks / TICKS_PER_CYCLE) & 0x0F;
    let offset = ticks % TICKS_PER_CYCLE;
    ((cycle << 12) | offset) as u16
}
