//! Sample format conversion between engine buffers and AM824 bus quadlets.
//!
//! Every audio sample travels as one big-endian quadlet: the top byte carries
//! the label (0x40 = multi-bit linear audio) and the low 24 bits carry the
//! two's complement sample. Conversions here work on host-order quadlets;
//! `HostOrder` moves whole blocks to and from the wire order.
//!
//! Two interchangeable strategies implement `SampleConverter`: a scalar one
//! that runs everywhere, and an SSE2 one on x86 targets. Both must produce
//! byte-for-byte identical output for every input, including out-of-range
//! floats and NaN.

mod scalar;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod sse2;

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

pub use scalar::ScalarConverter;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub use sse2::Sse2Converter;

/// AM824 label for multi-bit linear audio, already shifted into the top byte
pub const AUDIO_LABEL: u32 = 0x4000_0000;
/// Bits carrying the 24-bit sample
pub const SAMPLE_MASK: u32 = 0x00FF_FFFF;
/// Float full scale maps onto the top 24 bits of an i32 (0x7FFFFF00)
pub const FLOAT_SCALE: f32 = 2147483392.0;
/// Inverse scale for the receive direction (1 / 0x7FFFFF)
pub const FLOAT_UNSCALE: f32 = 1.0 / 8388607.0;
/// Quadlets handled per vector step by block-optimized strategies
pub const BLOCK_QUADLETS: usize = 4;

/// Float to i32 truncation with the out-of-range rule of the SSE `cvttps2dq`
/// instruction: anything that does not fit (including NaN) becomes `i32::MIN`.
#[inline]
pub fn truncate_to_i32(v: f32) -> i32 {
    if v >= -2147483648.0 && v < 2147483648.0 {
        v as i32
    } else {
        i32::MIN
    }
}

/// Label one float sample. Inputs outside [-1.0, 1.0] wrap; clipping is the caller's job.
#[inline]
pub fn label_float(v: f32) -> u32 {
    let tmp = truncate_to_i32(v * FLOAT_SCALE) >> 8;
    (tmp as u32 & SAMPLE_MASK) | AUDIO_LABEL
}

/// Label one 24-bit integer sample (bits above 23 are discarded)
#[inline]
pub fn label_int24(v: i32) -> u32 {
    (v as u32 & SAMPLE_MASK) | AUDIO_LABEL
}

/// Strip the label and sign-extend the 24-bit sample
#[inline]
pub fn unlabel_int24(quadlet: u32) -> i32 {
    ((quadlet << 8) as i32) >> 8
}

/// Strip the label and scale the sample into [-1.0, 1.0]
#[inline]
pub fn unlabel_float(quadlet: u32) -> f32 {
    unlabel_int24(quadlet) as f32 * FLOAT_UNSCALE
}

/// Reverse the four bytes of a quadlet
#[inline]
pub fn byte_swap(word: u32) -> u32 {
    word.swap_bytes()
}

/// Host-order quadlet to wire order
#[inline]
pub fn to_bus(word: u32) -> u32 {
    HostOrder::NATIVE.to_bus(word)
}

/// Wire-order quadlet to host order
#[inline]
pub fn from_bus(word: u32) -> u32 {
    HostOrder::NATIVE.from_bus(word)
}

/// Byte order of the machine doing the conversion.
/// The wire is always big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOrder {
    Little,
    Big,
}

impl HostOrder {
    #[cfg(target_endian = "big")]
    pub const NATIVE: HostOrder = HostOrder::Big;
    #[cfg(target_endian = "little")]
    pub const NATIVE: HostOrder = HostOrder::Little;

    #[inline]
    pub fn to_bus(self, word: u32) -> u32 {
        match self {
            HostOrder::Little => byte_swap(word),
            HostOrder::Big => word,
        }
    }

    #[inline]
    pub fn from_bus(self, word: u32) -> u32 {
        // Byte reversal is its own inverse
        self.to_bus(word)
    }

    /// Convert a block to wire order in place. A no-op on big-endian hosts.
    pub fn to_bus_block(self, converter: &dyn SampleConverter, words: &mut [u32]) {
        match self {
            HostOrder::Little => converter.byte_swap_block(words),
            HostOrder::Big => {}
        }
    }

    /// Convert a block from wire order in place. A no-op on big-endian hosts.
    pub fn from_bus_block(self, converter: &dyn SampleConverter, words: &mut [u32]) {
        self.to_bus_block(converter, words);
    }
}

/// Which conversion strategy to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionPath {
    Scalar,
    Sse2,
}

impl ConversionPath {
    /// Whether the current CPU can run this path
    pub fn is_available(self) -> bool {
        match self {
            ConversionPath::Scalar => true,
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            ConversionPath::Sse2 => is_x86_feature_detected!("sse2"),
            #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
            ConversionPath::Sse2 => false,
        }
    }
}

/// Block conversion between engine samples and host-order labelled quadlets.
///
/// Each method converts `min(src.len(), dst.len())` elements and never
/// allocates. Slices may start at any alignment.
pub trait SampleConverter: Send + Sync {
    fn path(&self) -> ConversionPath;
    fn float_to_labelled(&self, src: &[f32], dst: &mut [u32]);
    fn int24_to_labelled(&self, src: &[i32], dst: &mut [u32]);
    fn labelled_to_float(&self, src: &[u32], dst: &mut [f32]);
    fn labelled_to_int24(&self, src: &[u32], dst: &mut [i32]);
    fn byte_swap_block(&self, words: &mut [u32]);
}

static SCALAR: ScalarConverter = ScalarConverter;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
static SSE2: Sse2Converter = Sse2Converter::UNCHECKED;

/// Strategy for `path`, falling back to scalar when the CPU lacks support.
pub fn converter_for(path: ConversionPath) -> &'static dyn SampleConverter {
    match path {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        ConversionPath::Sse2 if path.is_available() => &SSE2,
        _ => &SCALAR,
    }
}

/// Best strategy for this CPU, detected once per process.
pub fn detect() -> &'static dyn SampleConverter {
    static DETECTED: OnceLock<ConversionPath> = OnceLock::new();
    let path = *DETECTED.get_or_init(|| {
        if ConversionPath::Sse2.is_available() {
            ConversionPath::Sse2
        } else {
            ConversionPath::Scalar
        }
    });
    converter_for(path)
}
