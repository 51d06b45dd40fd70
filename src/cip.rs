//! CIP header handling for AMDTP packets (IEC 61883-1/6).
//!
//! Every isochronous audio packet starts with two header quadlets:
//!
//! ```text
//! q0: 0 0 | SID(6) | DBS(8) | FN(2) QPC(3) SPH(1) rsv(2) | DBC(8)
//! q1: 1 0 | FMT(6) | FDF(8) | SYT(16)
//! ```
//!
//! Quadlets are taken in host order; callers convert from bus order first.

/// FMT code for audio and music data
pub const FMT_AMDTP: u8 = 0x10;
/// SYT value meaning "no timestamp in this packet"
pub const SYT_NO_INFO: u16 = 0xFFFF;
/// FDF of a packet that carries no data blocks
pub const FDF_NO_DATA: u8 = 0xFF;
/// Number of header quadlets
pub const CIP_HEADER_QUADLETS: usize = 2;

/// Sample rates indexed by SFC code
const SFC_RATES: [u32; 7] = [32_000, 44_100, 48_000, 88_200, 96_000, 176_400, 192_000];

/// Header marker bits were not the expected two-quadlet CIP form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipMarkerError {
    pub q0: u32,
    pub q1: u32,
}

/// Decoded CIP header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CipHeader {
    /// Source node ID
    pub sid: u8,
    /// Data block size in quadlets
    pub dbs: u8,
    /// Fraction number
    pub fn_: u8,
    /// Quadlet padding count
    pub qpc: u8,
    /// Source packet header flag
    pub sph: bool,
    /// Data block counter
    pub dbc: u8,
    /// Format
    pub fmt: u8,
    /// Format dependent field (SFC for AM824)
    pub fdf: u8,
    /// Presentation timestamp
    pub syt: u16,
}

impl CipHeader {
    /// Decode two host-order header quadlets.
    pub fn parse(q: [u32; 2]) -> Result<Self, CipMarkerError> {
        // EOH must be 0 on q0 and 1 on q1; form bits must be 0
        if q[0] & 0xC000_0000 != 0 || q[1] & 0xC000_0000 != 0x8000_0000 {
            return Err(CipMarkerError { q0: q[0], q1: q[1] });
        }
        Ok(Self {
            sid: ((q[0] >> 24) & 0x3F) as u8,
            dbs: ((q[0] >> 16) & 0xFF) as u8,
            fn_: ((q[0] >> 14) & 0x03) as u8,
            qpc: ((q[0] >> 11) & 0x07) as u8,
            sph: (q[0] >> 10) & 0x01 != 0,
            dbc: (q[0] & 0xFF) as u8,
            fmt: ((q[1] >> 24) & 0x3F) as u8,
            fdf: ((q[1] >> 16) & 0xFF) as u8,
            syt: (q[1] & 0xFFFF) as u16,
        })
    }

    /// Encode into two host-order quadlets
    pub fn to_quadlets(&self) -> [u32; 2] {
        let q0 = ((self.sid as u32 & 0x3F) << 24)
            | ((self.dbs as u32) << 16)
            | ((self.fn_ as u32 & 0x03) << 14)
            | ((self.qpc as u32 & 0x07) << 11)
            | ((self.sph as u32) << 10)
            | self.dbc as u32;
        let q1 = 0x8000_0000
            | ((self.fmt as u32 & 0x3F) << 24)
            | ((self.fdf as u32) << 16)
            | self.syt as u32;
        [q0, q1]
    }

    /// Whether the SYT field carries a timestamp
    pub fn has_syt(&self) -> bool {
        self.syt != SYT_NO_INFO
    }

    /// Whether the packet is flagged as carrying no data
    pub fn is_no_data(&self) -> bool {
        self.fdf == FDF_NO_DATA
    }

    /// Data blocks in a payload of `payload_quadlets`
    pub fn data_blocks(&self, payload_quadlets: usize) -> usize {
        if self.dbs == 0 {
            0
        } else {
            payload_quadlets / self.dbs as usize
        }
    }
}

/// FDF (SFC code) for a nominal sample rate
pub fn fdf_for_rate(rate: u32) -> Option<u8> {
    SFC_RATES.iter().position(|&r| r == rate).map(|sfc| sfc as u8)
}

/// Sample rate for an AM824 FDF
pub fn rate_for_fdf(fdf: u8) -> Option<u32> {
    // Low three bits carry the SFC; EVT bits must say AM824
    if fdf & 0x30 != 0 {
        return None;
    }
    SFC_RATES.get((fdf & 0x07) as usize).copied()
}

/// Frames between two SYT timestamps at `rate` (IEC 61883-6 table)
pub fn syt_interval(rate: u32) -> Option<u32> {
    match rate {
        32_000 | 44_100 | 48_000 => Some(8),
        88_200 | 96_000 => Some(16),
        176_400 | 192_000 => Some(32),
        _ => None,
    }
}

/// Checks that each packet's DBC follows the previous one.
#[derive(Debug, Clone, Default)]
pub struct DbcTracker {
    next: Option<u8>,
}

impl DbcTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a packet with `data_blocks` blocks starting at `dbc`.
    ///
    /// Returns false on a discontinuity and resynchronises to the packet.
    /// Packets without data are neither checked nor counted.
    pub fn check(&mut self, dbc: u8, data_blocks: usize) -> bool {
        if data_blocks == 0 {
            return true;
        }
        let continuous = match self.next {
            Some(expected) => expected == dbc,
            None => true,
        };
        self.next = Some(dbc.wrapping_add(data_blocks as u8));
        continuous
    }

    /// Expected DBC of the next data-carrying packet
    pub fn expected(&self) -> Option<u8> {
        self.next
    }

    pub fn reset(&mut self) {
        self.next = None;
    }
}
