//! FireWire AMDTP stream core
//!
//! Real-time data path between IEEE 1394 isochronous packets and an audio
//! engine's per-channel sample buffers:
//! - Packet buffer: lock-free SPSC ring of variable-length packets between
//!   the bus I/O thread and the stream-processing thread
//! - Format conversion: float / 24-bit samples to and from AM824 labelled
//!   big-endian quadlets, with interchangeable scalar and SSE2 strategies
//! - Clock recovery: delay-locked loop following the device's SYT timestamps
//! - Statistics: allocation-free monitoring usable from the real-time path
//!
//! Wire format notes:
//! - One sample per 32-bit big-endian quadlet, label 0x40 in the top byte
//! - The low 24 bits carry the sample; float full scale maps to 0x7FFFFF
//! - Every packet starts with a two-quadlet CIP header (IEC 61883-1)
//!
//! Device enumeration, AV/C and the kernel interface are left to the
//! embedding application, which plugs in through `IsoReceive` and
//! `CycleTimeSource`.

pub mod cip;
pub mod clock_recovery;
pub mod config;
pub mod convert;
pub mod cycle_timer;
pub mod debug;
pub mod dll;
pub mod error;
pub mod packet_buffer;
pub mod stats;
pub mod stream;
pub mod time;

#[doc(hidden)]
pub use log as __log;

pub use clock_recovery::ClockRecovery;
pub use config::{ChannelLayout, DeviceTable, StreamConfig};
pub use convert::{ConversionPath, HostOrder, SampleConverter};
pub use debug::DebugModule;
pub use dll::{DelayLockedLoop, DllCoefficients};
pub use error::{Error, Result};
pub use packet_buffer::{
    AddError, OversizePolicy, PacketBuffer, PacketBufferConfig, PacketReader, PacketWriter,
    ReadError,
};
pub use stats::{StatsPublisher, StreamCounters, StreamStatistics, MAX_SIGNAL_VALUE};
pub use stream::{BusIoContext, IsoReceive, ReceiveProcessor, TransmitProcessor};
pub use time::{CycleTimeSource, ManualClock, MonotonicClock, SimulatedBus, TimeSource};

#[cfg(test)]
pub(crate) mod testutil {
    /// Deterministic xorshift32 generator for test data
    pub(crate) struct XorShift(u32);

    impl XorShift {
        pub(crate) fn new(seed: u32) -> Self {
            Self(seed | 1)
        }

        pub(crate) fn next_u32(&mut self) -> u32 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            self.0 = x;
            x
        }
    }
}
