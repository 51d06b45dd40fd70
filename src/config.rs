//! Stream and device configuration.
//!
//! Per-device channel layouts come from a JSON device table loaded at
//! startup, keyed by vendor and model ID. The stream itself is described by
//! a `StreamConfig`, which can also be read from JSON; every field has a
//! default so a partial document is enough.
//!
//! ```json
//! {
//!   "devices": [
//!     {
//!       "vendor_id": 1183, "model_id": 65540, "name": "Example 8x8",
//!       "layouts": [
//!         { "rates": [44100, 48000], "audio_channels": 8, "midi_slots": 1 },
//!         { "rates": [88200, 96000], "audio_channels": 4, "midi_slots": 1 }
//!       ]
//!     }
//!   ]
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cip::{fdf_for_rate, syt_interval, CIP_HEADER_QUADLETS};
use crate::convert::ConversionPath;
use crate::error::{Error, Result};
use crate::packet_buffer::{OversizePolicy, PacketBufferConfig};

/// Default stored header: the CIP header plus the arrival cycle-time stamp
pub const STAMPED_HEADER_QUADLETS: usize = CIP_HEADER_QUADLETS + 1;

/// Quadlets per data block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLayout {
    /// PCM audio quadlets per data block
    pub audio_channels: u32,
    /// Multiplexed MIDI quadlets per data block
    #[serde(default)]
    pub midi_slots: u32,
}

impl ChannelLayout {
    pub fn new(audio_channels: u32, midi_slots: u32) -> Self {
        Self {
            audio_channels,
            midi_slots,
        }
    }

    /// Data block size (DBS) in quadlets. Saturates for layouts too large
    /// to stream; `StreamConfig::validate` rejects those.
    pub fn dimension(&self) -> u32 {
        self.audio_channels.saturating_add(self.midi_slots)
    }
}

impl Default for ChannelLayout {
    fn default() -> Self {
        Self::new(2, 0)
    }
}

/// Layout a device uses at a set of sample rates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLayout {
    pub rates: Vec<u32>,
    #[serde(flatten)]
    pub layout: ChannelLayout,
}

/// One known device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub vendor_id: u32,
    pub model_id: u32,
    pub name: String,
    #[serde(default)]
    pub layouts: Vec<RateLayout>,
}

impl DeviceEntry {
    /// Layout used at `rate`, if the device supports it
    pub fn layout_for(&self, rate: u32) -> Option<ChannelLayout> {
        self.layouts
            .iter()
            .find(|l| l.rates.contains(&rate))
            .map(|l| l.layout)
    }
}

/// Vendor/model lookup table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTable {
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

impl DeviceTable {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a table file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn lookup(&self, vendor_id: u32, model_id: u32) -> Option<&DeviceEntry> {
        self.devices
            .iter()
            .find(|d| d.vendor_id == vendor_id && d.model_id == model_id)
    }

    pub fn layout_for(&self, vendor_id: u32, model_id: u32, rate: u32) -> Option<ChannelLayout> {
        self.lookup(vendor_id, model_id)?.layout_for(rate)
    }
}

/// Everything fixed for one stream at setup
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Nominal sample rate in Hz
    pub sample_rate: u32,
    /// Data block layout
    pub layout: ChannelLayout,
    /// Header quadlets stored per packet (CIP header, then the arrival stamp if present)
    pub header_words: usize,
    /// Largest payload accepted, in quadlets
    pub max_payload_quadlets: usize,
    /// Packet buffer depth
    pub buffer_packets: usize,
    /// Clock recovery loop bandwidth in Hz
    pub dll_bandwidth_hz: f64,
    /// Reader behaviour for packets larger than its buffer
    pub oversize_policy: OversizePolicy,
    /// Forced conversion path; `None` picks the best one for this CPU
    pub conversion: Option<ConversionPath>,
    /// Source node ID written into transmitted headers
    pub node_id: u8,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::with_layout(48_000, ChannelLayout::default())
    }
}

impl StreamConfig {
    /// Config sized for `layout` at `sample_rate`, other fields at their defaults
    pub fn with_layout(sample_rate: u32, layout: ChannelLayout) -> Self {
        let blocks = syt_interval(sample_rate).unwrap_or(8) as usize;
        Self {
            sample_rate,
            layout,
            header_words: STAMPED_HEADER_QUADLETS,
            max_payload_quadlets: blocks * layout.dimension() as usize,
            buffer_packets: 256,
            dll_bandwidth_hz: 1.0,
            oversize_policy: OversizePolicy::default(),
            conversion: None,
            node_id: 0,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Frames between SYT timestamps
    pub fn syt_interval(&self) -> u32 {
        syt_interval(self.sample_rate).unwrap_or(8)
    }

    pub fn validate(&self) -> Result<()> {
        if fdf_for_rate(self.sample_rate).is_none() {
            return Err(Error::InvalidConfig(format!(
                "unsupported sample rate {}",
                self.sample_rate
            )));
        }
        let dimension = match self.layout.audio_channels.checked_add(self.layout.midi_slots) {
            Some(d) if self.layout.audio_channels > 0 && d <= 0xFF => d,
            _ => {
                return Err(Error::InvalidConfig(format!(
                    "data block of {} audio + {} MIDI quadlets is not representable",
                    self.layout.audio_channels, self.layout.midi_slots
                )))
            }
        };
        if self.header_words < CIP_HEADER_QUADLETS {
            return Err(Error::InvalidConfig(format!(
                "header of {} quadlets cannot hold a CIP header",
                self.header_words
            )));
        }
        if self.max_payload_quadlets < dimension as usize {
            return Err(Error::InvalidConfig(format!(
                "payload limit {} is smaller than one data block ({})",
                self.max_payload_quadlets, dimension
            )));
        }
        let update_rate = self.sample_rate as f64 / self.syt_interval() as f64;
        if !(self.dll_bandwidth_hz > 0.0) || self.dll_bandwidth_hz >= update_rate / 4.0 {
            return Err(Error::InvalidConfig(format!(
                "loop bandwidth {} Hz outside (0, {})",
                self.dll_bandwidth_hz,
                update_rate / 4.0
            )));
        }
        self.packet_buffer_config().validate()
    }

    pub fn packet_buffer_config(&self) -> PacketBufferConfig {
        PacketBufferConfig {
            capacity_packets: self.buffer_packets,
            header_words: self.header_words,
            max_payload_quadlets: self.max_payload_quadlets,
            oversize_policy: self.oversize_policy,
        }
    }
}
