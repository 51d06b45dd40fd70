//! Engine samples to bus-order AMDTP packets.

use std::sync::Arc;

use super::MIDI_NO_DATA;
use crate::cip::{fdf_for_rate, CipHeader, CIP_HEADER_QUADLETS, FDF_NO_DATA, FMT_AMDTP, SYT_NO_INFO};
use crate::config::StreamConfig;
use crate::convert::{converter_for, detect, HostOrder, SampleConverter};
use crate::debug::DebugModule;
use crate::error::{Error, Result};
use crate::stats::StreamCounters;
use crate::{dbg_info, dbg_trace};

/// Encoder for one outgoing stream
pub struct TransmitProcessor {
    config: StreamConfig,
    converter: &'static dyn SampleConverter,
    sfc: u8,
    dbc: u8,
    /// Interleaved engine samples for one packet
    interleaved: Vec<f32>,
    counters: Arc<StreamCounters>,
    debug: DebugModule,
}

impl TransmitProcessor {
    pub fn new(config: StreamConfig, debug: DebugModule) -> Result<Self> {
        config.validate()?;
        let sfc = fdf_for_rate(config.sample_rate)
            .ok_or_else(|| Error::InvalidConfig(format!("unsupported sample rate {}", config.sample_rate)))?;
        let converter = config.conversion.map(converter_for).unwrap_or_else(detect);

        dbg_info!(
            debug,
            "transmit: {} Hz, {} audio + {} MIDI, {:?} conversion",
            config.sample_rate,
            config.layout.audio_channels,
            config.layout.midi_slots,
            converter.path()
        );

        Ok(Self {
            config,
            converter,
            sfc,
            dbc: 0,
            interleaved: vec![0.0; config.max_payload_quadlets],
            counters: Arc::new(StreamCounters::new()),
            debug,
        })
    }

    /// Largest number of frames one packet can carry
    pub fn max_frames(&self) -> usize {
        self.config.max_payload_quadlets / self.config.layout.dimension() as usize
    }

    /// Encode `frames` frames starting at `frame_offset` of each engine
    /// channel into `out` as a bus-order packet.
    ///
    /// Engine channels beyond the stream's audio channels are ignored and
    /// missing ones (or frames past a channel's end) are sent as silence.
    /// `frames == 0` produces a NO-DATA packet. Returns the packet length in
    /// quadlets, or 0 when the packet would not fit `out` or the payload limit.
    pub fn encode_packet(
        &mut self,
        engine: &[&[f32]],
        frame_offset: usize,
        frames: usize,
        syt: u16,
        out: &mut [u32],
    ) -> usize {
        let dimension = self.config.layout.dimension() as usize;
        let audio = self.config.layout.audio_channels as usize;
        let payload_len = frames * dimension;
        let len = CIP_HEADER_QUADLETS + payload_len;
        if payload_len > self.config.max_payload_quadlets || out.len() < len {
            dbg_trace!(self.debug, "packet of {} frames does not fit", frames);
            return 0;
        }

        let header = CipHeader {
            sid: self.config.node_id,
            dbs: dimension as u8,
            dbc: self.dbc,
            fmt: FMT_AMDTP,
            fdf: if frames == 0 { FDF_NO_DATA } else { self.sfc },
            syt: if frames == 0 { SYT_NO_INFO } else { syt },
            ..Default::default()
        };
        let [q0, q1] = header.to_quadlets();
        out[0] = HostOrder::NATIVE.to_bus(q0);
        out[1] = HostOrder::NATIVE.to_bus(q1);

        let samples = &mut self.interleaved[..payload_len];
        for (f, block) in samples.chunks_exact_mut(dimension).enumerate() {
            for (ch, slot) in block.iter_mut().enumerate().take(audio) {
                *slot = engine
                    .get(ch)
                    .and_then(|c| c.get(frame_offset + f))
                    .copied()
                    .unwrap_or(0.0);
            }
        }

        let payload = &mut out[CIP_HEADER_QUADLETS..len];
        self.converter.float_to_labelled(samples, payload);
        if dimension > audio {
            for block in payload.chunks_exact_mut(dimension) {
                block[audio..].fill(MIDI_NO_DATA);
            }
        }
        HostOrder::NATIVE.to_bus_block(self.converter, payload);

        self.dbc = self.dbc.wrapping_add(frames as u8);
        StreamCounters::add(&self.counters.packets_transmitted, 1);
        len
    }

    /// DBC the next data packet will carry
    pub fn dbc(&self) -> u8 {
        self.dbc
    }

    /// Restart the block count, e.g. after a bus reset
    pub fn reset(&mut self) {
        self.dbc = 0;
    }

    pub fn counters(&self) -> Arc<StreamCounters> {
        self.counters.clone()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelLayout;
    use crate::convert::{from_bus, label_float, ConversionPath};

    fn processor(layout: ChannelLayout) -> TransmitProcessor {
        let mut config = StreamConfig::with_layout(48_000, layout);
        config.conversion = Some(ConversionPath::Scalar);
        TransmitProcessor::new(config, DebugModule::silent("tx")).unwrap()
    }

    #[test]
    fn test_encode_header_and_samples() {
        let mut tx = processor(ChannelLayout::new(2, 1));
        let left = [0.5f32, -0.5, 0.25, 0.0];
        let right = [1.0f32, -1.0, 0.0, 0.125];
        let mut out = [0u32; 64];

        let len = tx.encode_packet(&[&left, &right], 0, 4, 0x1234, &mut out);
        assert_eq!(len, 2 + 4 * 3);

        let header = CipHeader::parse([from_bus(out[0]), from_bus(out[1])]).unwrap();
        assert_eq!(header.dbs, 3);
        assert_eq!(header.dbc, 0);
        assert_eq!(header.fmt, FMT_AMDTP);
        assert_eq!(header.fdf, 0x02);
        assert_eq!(header.syt, 0x1234);

        for f in 0..4 {
            let block = &out[2 + f * 3..2 + f * 3 + 3];
            assert_eq!(from_bus(block[0]), label_float(left[f]));
            assert_eq!(from_bus(block[1]), label_float(right[f]));
            assert_eq!(from_bus(block[2]), MIDI_NO_DATA);
        }
        assert_eq!(tx.dbc(), 4);
        assert_eq!(tx.counters().snapshot().packets_transmitted, 1);
    }

    #[test]
    fn test_dbc_wraps_and_no_data() {
        let mut tx = processor(ChannelLayout::new(2, 0));
        let silence = [0.0f32; 8];
        let mut out = [0u32; 64];
        for _ in 0..32 {
            assert!(tx.encode_packet(&[&silence, &silence], 0, 8, 0, &mut out) > 0);
        }
        assert_eq!(tx.dbc(), 0);

        let len = tx.encode_packet(&[], 0, 0, 0x1111, &mut out);
        assert_eq!(len, 2);
        let header = CipHeader::parse([from_bus(out[0]), from_bus(out[1])]).unwrap();
        assert!(header.is_no_data());
        assert!(!header.has_syt());
        assert_eq!(tx.dbc(), 0);
    }

    #[test]
    fn test_missing_channels_and_frames_are_silent() {
        let mut tx = processor(ChannelLayout::new(2, 0));
        let left = [0.5f32; 2];
        let mut out = [0u32; 64];
        let len = tx.encode_packet(&[&left], 1, 4, 0, &mut out);
        assert_eq!(len, 2 + 8);
        let silent = label_float(0.0);
        // frame 0 of the packet is left[1], the rest is past the end
        assert_eq!(from_bus(out[2]), label_float(0.5));
        assert_eq!(from_bus(out[3]), silent);
        for &q in &out[4..10] {
            assert_eq!(from_bus(q), silent);
        }
    }

    #[test]
    fn test_refuses_oversized() {
        let mut tx = processor(ChannelLayout::new(2, 0));
        let mut out = [0u32; 64];
        assert_eq!(tx.max_frames(), 8);
        assert_eq!(tx.encode_packet(&[], 0, 9, 0, &mut out), 0);
        let mut tiny = [0u32; 4];
        assert_eq!(tx.encode_packet(&[], 0, 2, 0, &mut tiny), 0);
        assert_eq!(tx.dbc(), 0);
    }
}
