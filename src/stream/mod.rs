//! AMDTP stream processing.
//!
//! The receive side is split across two threads sharing one packet buffer:
//!
//! ```text
//! IsoReceive ----------> BusIoContext (bus thread) -> PacketWriter
//! CycleTimeSource ----/                              -> PacketReader -> ReceiveProcessor -> engine
//! ```
//!
//! Packets are stored in the buffer as records: the CIP header quadlets in
//! bus order, then (when the stream is configured with a stamped header) the
//! host-order CYCLE_TIME register value at which the packet arrived, then
//! the payload in bus order. `build_rx_record` assembles one; the bus thread
//! stamps every received packet this way.
//!
//! The transmit side is a single encoder that writes complete bus-order
//! packets for the transport to send.

mod bus_io;
mod receive;
mod transmit;

pub use bus_io::{BusIoContext, IsoReceive};
pub use receive::ReceiveProcessor;
pub use transmit::TransmitProcessor;

use crate::cip::CIP_HEADER_QUADLETS;

/// Index of the arrival stamp within a stamped record header
pub const ARRIVAL_STAMP_WORD: usize = CIP_HEADER_QUADLETS;

/// MIDI slot label with no bytes (IEC 61883-6 "MIDI conformant data", count 0)
pub const MIDI_NO_DATA: u32 = 0x8000_0000;

/// Per-packet outcome codes recorded in the receive histogram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum PacketStatus {
    /// Decoded normally
    Ok = 0,
    /// No data blocks (empty or NO-DATA packet)
    NoData = 1,
    /// CIP markers, format, rate or block size did not match the stream
    BadHeader = 2,
    /// DBC did not follow the previous packet
    Discontinuity = 3,
    /// Packet larger than the processor's buffer
    Oversized = 4,
    /// Buffer state did not add up
    Inconsistent = 5,
    /// Engine period only partly filled
    Underrun = 6,
}

impl PacketStatus {
    pub fn code(self) -> i64 {
        self as i64
    }
}

/// Assemble a receive record from a bus-order packet (CIP header + payload).
///
/// With `header_words` greater than the CIP header, the arrival cycle time
/// is stored after the CIP quadlets and any further header words are zero.
/// Returns the record length, or `None` if `out` is too small or the packet
/// has no complete CIP header.
pub fn build_rx_record(
    packet: &[u32],
    arrival_cycle_time: u32,
    header_words: usize,
    out: &mut [u32],
) -> Option<usize> {
    if packet.len() < CIP_HEADER_QUADLETS || header_words < CIP_HEADER_QUADLETS {
        return None;
    }
    let payload = &packet[CIP_HEADER_QUADLETS..];
    let len = header_words + payload.len();
    if out.len() < len {
        return None;
    }

    out[..CIP_HEADER_QUADLETS].copy_from_slice(&packet[..CIP_HEADER_QUADLETS]);
    if header_words > CIP_HEADER_QUADLETS {
        out[ARRIVAL_STAMP_WORD] = arrival_cycle_time;
        out[ARRIVAL_STAMP_WORD + 1..header_words].fill(0);
    }
    out[header_words..len].copy_from_slice(payload);
    Some(len)
}
