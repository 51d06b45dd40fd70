//! Packet buffer to engine sample buffers.
//!
//! `process` is called once per engine period from the stream-processing
//! context. It drains whole packets from the reader, checks their CIP
//! headers, follows the DBC sequence, feeds SYT timestamps to the clock
//! recovery loop and deinterleaves the decoded samples into the engine's
//! per-channel buffers. Frames of a packet that do not fit the current
//! period are kept for the next call.

use std::sync::Arc;

use super::{PacketStatus, ARRIVAL_STAMP_WORD};
use crate::cip::{rate_for_fdf, CipHeader, DbcTracker, CIP_HEADER_QUADLETS, FMT_AMDTP};
use crate::clock_recovery::ClockRecovery;
use crate::config::StreamConfig;
use crate::convert::{converter_for, detect, HostOrder, SampleConverter};
use crate::cycle_timer::{register_to_ticks, syt_to_ticks, ticks_diff};
use crate::debug::DebugModule;
use crate::error::{Error, Result};
use crate::packet_buffer::{OversizePolicy, PacketReader, ReadError};
use crate::stats::{StatsPublisher, StreamCounters, StreamStatistics};
use crate::{dbg_debug, dbg_info, dbg_trace};

/// Decoder for one incoming stream
pub struct ReceiveProcessor {
    config: StreamConfig,
    reader: PacketReader,
    converter: &'static dyn SampleConverter,
    clock: ClockRecovery,
    dbc: DbcTracker,
    /// Record scratch, sized for the largest packet
    packet: Vec<u32>,
    /// Decoded interleaved samples of the current packet
    decoded: Vec<f32>,
    pending_offset: usize,
    pending_frames: usize,
    /// DBC of the last event that carried a SYT
    last_syt: Option<u8>,
    /// Set when the reader refuses to make progress (halting oversize policy)
    halted: bool,
    fill: StreamStatistics,
    phase: StreamStatistics,
    results: StreamStatistics,
    publisher: StatsPublisher,
    counters: Arc<StreamCounters>,
    debug: DebugModule,
}

impl ReceiveProcessor {
    pub fn new(config: StreamConfig, reader: PacketReader, debug: DebugModule) -> Result<Self> {
        config.validate()?;
        if *reader.config() != config.packet_buffer_config() {
            return Err(Error::InvalidConfig(
                "packet buffer was not created from this stream config".to_string(),
            ));
        }

        let converter = config.conversion.map(converter_for).unwrap_or_else(detect);
        let clock = ClockRecovery::for_stream(
            config.sample_rate,
            config.syt_interval(),
            config.dll_bandwidth_hz,
            debug.child("clock"),
        )?;

        dbg_info!(
            debug,
            "receive: {} Hz, {} audio + {} MIDI, {:?} conversion, {} packet buffer",
            config.sample_rate,
            config.layout.audio_channels,
            config.layout.midi_slots,
            converter.path(),
            config.buffer_packets
        );

        let max_packet = config.packet_buffer_config().max_packet_words();
        Ok(Self {
            config,
            reader,
            converter,
            clock,
            dbc: DbcTracker::new(),
            packet: vec![0; max_packet],
            decoded: vec![0.0; config.max_payload_quadlets],
            pending_offset: 0,
            pending_frames: 0,
            last_syt: None,
            halted: false,
            fill: StreamStatistics::with_debug("packet fill", debug.child("fill")),
            phase: StreamStatistics::with_debug("phase error", debug.child("phase")),
            results: StreamStatistics::with_debug("packet status", debug.child("status")),
            publisher: StatsPublisher::new(),
            counters: Arc::new(StreamCounters::new()),
            debug,
        })
    }

    /// Fill one engine period. `engine` holds one buffer per channel; the
    /// period length is the shortest of them.
    ///
    /// Channels beyond the stream's audio channels are zeroed. Returns the
    /// number of frames taken from the stream; the rest of the period is
    /// zero-filled and counted as an underrun.
    pub fn process(&mut self, engine: &mut [&mut [f32]]) -> usize {
        let frames = engine.iter().map(|c| c.len()).min().unwrap_or(0);
        self.fill.mark(self.reader.fill_packets() as f64);

        let mut written = 0;
        while written < frames {
            if self.pending_frames == 0 {
                if !self.load_packet() {
                    break;
                }
                continue;
            }
            let n = self.pending_frames.min(frames - written);
            self.deinterleave(engine, written, n);
            self.pending_offset += n;
            self.pending_frames -= n;
            written += n;
        }

        if written < frames {
            for channel in engine.iter_mut() {
                channel[written..frames].fill(0.0);
            }
            StreamCounters::add(&self.counters.underruns, 1);
            self.results.signal(PacketStatus::Underrun.code());
            dbg_trace!(self.debug, "underrun: {} of {} frames", written, frames);
        }

        self.publisher.publish(&self.fill);
        written
    }

    fn deinterleave(&self, engine: &mut [&mut [f32]], at: usize, frames: usize) {
        let dimension = self.config.layout.dimension() as usize;
        let audio = self.config.layout.audio_channels as usize;
        let start = self.pending_offset * dimension;
        let blocks = &self.decoded[start..start + frames * dimension];

        for (ch, channel) in engine.iter_mut().enumerate() {
            let dst = &mut channel[at..at + frames];
            if ch < audio {
                for (out, block) in dst.iter_mut().zip(blocks.chunks_exact(dimension)) {
                    *out = block[ch];
                }
            } else {
                dst.fill(0.0);
            }
        }
    }

    /// Take the next packet from the buffer. Returns false when nothing more
    /// can be read in this period.
    fn load_packet(&mut self) -> bool {
        if self.halted {
            return false;
        }

        let len = match self.reader.get_next_packet(&mut self.packet) {
            Ok(len) => len,
            Err(ReadError::Empty) => return false,
            // The scratch holds the largest record the writer accepts, so this
            // only fires if the buffer and processor configs diverge.
            Err(ReadError::Oversized { needed, capacity }) => {
                StreamCounters::add(&self.counters.oversized, 1);
                self.results.signal(PacketStatus::Oversized.code());
                dbg_debug!(
                    self.debug,
                    "packet of {} quadlets exceeds {}",
                    needed,
                    capacity
                );
                if self.config.oversize_policy == OversizePolicy::Halt {
                    self.halted = true;
                    return false;
                }
                return true;
            }
            Err(ReadError::Inconsistent) => {
                self.results.signal(PacketStatus::Inconsistent.code());
                dbg_debug!(self.debug, "packet buffer inconsistent, halting");
                self.halted = true;
                return false;
            }
        };

        let status = self.decode_packet(len);
        self.results.signal(status.code());
        true
    }

    fn decode_packet(&mut self, len: usize) -> PacketStatus {
        let header_words = self.config.header_words;
        let q0 = HostOrder::NATIVE.from_bus(self.packet[0]);
        let q1 = HostOrder::NATIVE.from_bus(self.packet[1]);
        let header = match CipHeader::parse([q0, q1]) {
            Ok(h) => h,
            Err(_) => return PacketStatus::BadHeader,
        };
        if header.fmt != FMT_AMDTP {
            return PacketStatus::BadHeader;
        }
        if header.is_no_data() {
            return PacketStatus::NoData;
        }
        let dimension = self.config.layout.dimension() as usize;
        if header.dbs as usize != dimension || rate_for_fdf(header.fdf) != Some(self.config.sample_rate) {
            return PacketStatus::BadHeader;
        }

        let blocks = header.data_blocks(len - header_words);
        if blocks == 0 {
            return PacketStatus::NoData;
        }

        let mut status = PacketStatus::Ok;
        if !self.dbc.check(header.dbc, blocks) {
            StreamCounters::add(&self.counters.dbc_discontinuities, 1);
            self.last_syt = None;
            status = PacketStatus::Discontinuity;
            dbg_trace!(self.debug, "DBC discontinuity at {}", header.dbc);
        }

        if header.has_syt() && header_words > CIP_HEADER_QUADLETS {
            let arrival = register_to_ticks(self.packet[ARRIVAL_STAMP_WORD]);
            self.track_syt(&header, blocks, arrival);
        }

        let quadlets = blocks * dimension;
        let payload = &mut self.packet[header_words..header_words + quadlets];
        HostOrder::NATIVE.from_bus_block(self.converter, payload);
        self.converter
            .labelled_to_float(payload, &mut self.decoded[..quadlets]);
        self.pending_offset = 0;
        self.pending_frames = blocks;
        status
    }

    /// Feed the SYT of this packet into clock recovery.
    fn track_syt(&mut self, header: &CipHeader, blocks: usize, arrival_ticks: u64) {
        let interval = self.config.syt_interval();
        // The SYT belongs to the first event whose DBC is a multiple of the interval
        let offset = (interval - header.dbc as u32 % interval) % interval;
        if offset as usize >= blocks {
            return;
        }
        let event_dbc = header.dbc.wrapping_add(offset as u8);
        let ticks = syt_to_ticks(header.syt, arrival_ticks);

        let periods = match self.last_syt {
            Some(last_dbc) => event_dbc.wrapping_sub(last_dbc) as u32 / interval,
            None if self.clock.is_primed() => {
                // No DBC reference after a gap; count periods from the prediction
                let period = self.clock.period_ticks();
                let late = ticks_diff(ticks, self.clock.predicted_ticks().round() as u64) as f64;
                (1.0 + (late / period).round()).max(1.0) as u32
            }
            None => 1,
        };
        self.last_syt = Some(event_dbc);

        let primed = self.clock.is_primed();
        self.clock.update_after(ticks, periods);
        if primed {
            self.phase.mark(self.clock.phase_error_ticks());
        }
    }

    /// Current rate of the device clock relative to nominal
    pub fn rate_ratio(&self) -> f64 {
        self.clock.rate_ratio()
    }

    pub fn clock(&self) -> &ClockRecovery {
        &self.clock
    }

    /// Whether a halting oversize policy or a buffer defect stopped decoding
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Drop the packet that halted decoding and resume
    pub fn resume(&mut self) -> bool {
        let skipped = self.reader.skip_packet();
        self.halted = false;
        skipped
    }

    /// Discard buffered packets and restart tracking. For use while the bus
    /// thread is stopped. Returns the number of packets dropped.
    pub fn flush(&mut self) -> usize {
        let dropped = self.reader.flush();
        self.pending_frames = 0;
        self.pending_offset = 0;
        self.last_syt = None;
        self.halted = false;
        self.dbc.reset();
        self.clock.reset();
        dbg_debug!(self.debug, "flushed {} packets", dropped);
        dropped
    }

    pub fn counters(&self) -> Arc<StreamCounters> {
        self.counters.clone()
    }

    /// Latest buffer-fill statistics for diagnostic threads
    pub fn stats_publisher(&self) -> StatsPublisher {
        self.publisher.clone()
    }

    pub fn fill_stats(&self) -> &StreamStatistics {
        &self.fill
    }

    pub fn phase_stats(&self) -> &StreamStatistics {
        &self.phase
    }

    pub fn status_stats(&self) -> &StreamStatistics {
        &self.results
    }

    /// Reports of all accumulators. Diagnostic context only.
    pub fn dump_info(&self) -> String {
        format!(
            "{}\n{}\n{}\nRate: {:.6} ({})\nCounters: {}",
            self.fill.dump_info(),
            self.phase.dump_info(),
            self.results.dump_info(),
            self.clock.rate_ratio(),
            if self.clock.is_locked() { "locked" } else { "unlocked" },
            self.counters.snapshot().format_display()
        )
    }

    pub fn reset_stats(&mut self) {
        self.fill.reset();
        self.phase.reset();
        self.results.reset();
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelLayout;
    use crate::convert::{label_float, unlabel_float, ConversionPath};
    use crate::cycle_timer::{ticks_to_syt, CycleTime, TICKS_PER_CYCLE};
    use crate::packet_buffer::{PacketBuffer, PacketWriter};
    use crate::stream::{build_rx_record, TransmitProcessor};

    const START_TICKS: u64 = 1_000_000;

    struct Rig {
        writer: PacketWriter,
        rx: ReceiveProcessor,
        tx: TransmitProcessor,
    }

    fn rig(layout: ChannelLayout) -> Rig {
        let mut config = StreamConfig::with_layout(48_000, layout);
        config.conversion = Some(ConversionPath::Scalar);
        config.buffer_packets = 32;
        let buffer = PacketBuffer::new(config.packet_buffer_config(), DebugModule::silent("pb")).unwrap();
        let (writer, reader) = buffer.split();
        Rig {
            writer,
            rx: ReceiveProcessor::new(config, reader, DebugModule::silent("rx")).unwrap(),
            tx: TransmitProcessor::new(config, DebugModule::silent("tx")).unwrap(),
        }
    }

    /// Encode one packet presented at `presentation` ticks and queue it,
    /// unless `queue` is false (lost on the bus).
    fn send(rig: &mut Rig, engine: &[&[f32]], offset: usize, frames: usize, presentation: u64, queue: bool) {
        let mut packet = [0u32; 128];
        let len = rig
            .tx
            .encode_packet(engine, offset, frames, ticks_to_syt(presentation), &mut packet);
        assert!(len > 0);
        let arrival = CycleTime::from_ticks(presentation - 3 * TICKS_PER_CYCLE).to_register();
        let mut record = [0u32; 160];
        let n = build_rx_record(&packet[..len], arrival, 3, &mut record).unwrap();
        if queue {
            rig.writer.add_packet(&record[..n]).unwrap();
        }
    }

    fn ramp(frames: usize, sign: f32) -> Vec<f32> {
        (0..frames).map(|i| sign * i as f32 / 4096.0).collect()
    }

    fn quantized(v: f32) -> f32 {
        unlabel_float(label_float(v))
    }

    #[test]
    fn test_rejects_foreign_buffer() {
        let config = StreamConfig::default();
        let mut other = config.packet_buffer_config();
        other.capacity_packets += 1;
        let (_, reader) = PacketBuffer::new(other, DebugModule::silent("pb")).unwrap().split();
        assert!(ReceiveProcessor::new(config, reader, DebugModule::silent("rx")).is_err());
    }

    #[test]
    fn test_decode_across_periods() {
        let mut rig = rig(ChannelLayout::new(2, 0));
        let left = ramp(80, 1.0);
        let right = ramp(80, -1.0);
        for p in 0..10 {
            send(&mut rig, &[&left[..], &right[..]], p * 8, 8, START_TICKS + p as u64 * 4096, true);
        }

        let mut out_l = vec![0.0f32; 80];
        let mut out_r = vec![0.0f32; 80];
        // Periods of 20 frames split packets in the middle
        for period in 0..4 {
            let range = period * 20..(period + 1) * 20;
            let mut engine: [&mut [f32]; 2] = [&mut out_l[range.clone()], &mut out_r[range]];
            assert_eq!(rig.rx.process(&mut engine), 20);
        }

        for i in 0..80 {
            assert_eq!(out_l[i], quantized(left[i]), "left frame {}", i);
            assert_eq!(out_r[i], quantized(right[i]), "right frame {}", i);
        }
        assert_eq!(rig.rx.counters().snapshot().underruns, 0);
        assert_eq!(rig.rx.status_stats().histogram()[PacketStatus::Ok.code() as usize], 10);
    }

    #[test]
    fn test_oversized_record_halts_until_resume() {
        let mut rig = rig(ChannelLayout::new(2, 0));
        let left = ramp(16, 1.0);
        let right = ramp(16, -1.0);
        send(&mut rig, &[&left[..], &right[..]], 0, 8, START_TICKS, true);
        send(&mut rig, &[&left[..], &right[..]], 8, 8, START_TICKS + 4096, true);

        let full = rig.rx.packet.len();
        rig.rx.packet.truncate(4);

        let mut out_l = vec![0.0f32; 8];
        let mut out_r = vec![0.0f32; 8];
        for _ in 0..2 {
            let mut engine: [&mut [f32]; 2] = [&mut out_l[..], &mut out_r[..]];
            assert_eq!(rig.rx.process(&mut engine), 0);
            assert!(rig.rx.is_halted());
        }
        let snap = rig.rx.counters().snapshot();
        assert_eq!(snap.oversized, 1);
        assert_eq!(snap.underruns, 2);
        assert_eq!(rig.rx.status_stats().histogram()[PacketStatus::Oversized.code() as usize], 1);

        // Resume drops the refused packet; decoding continues with the next one
        rig.rx.packet.resize(full, 0);
        assert!(rig.rx.resume());
        assert!(!rig.rx.is_halted());
        let mut engine: [&mut [f32]; 2] = [&mut out_l[..], &mut out_r[..]];
        assert_eq!(rig.rx.process(&mut engine), 8);
        for i in 0..8 {
            assert_eq!(out_l[i], quantized(left[8 + i]), "left frame {}", i);
            assert_eq!(out_r[i], quantized(right[8 + i]), "right frame {}", i);
        }
    }

    #[test]
    fn test_underrun_zero_fills() {
        let mut rig = rig(ChannelLayout::new(2, 0));
        let left = ramp(8, 1.0);
        send(&mut rig, &[&left[..], &left[..]], 0, 8, START_TICKS, true);

        let mut a = [9.0f32; 12];
        let mut b = [9.0f32; 12];
        let mut engine: [&mut [f32]; 2] = [&mut a, &mut b];
        assert_eq!(rig.rx.process(&mut engine), 8);
        assert!(a[8..].iter().all(|&v| v == 0.0));
        assert!(b[8..].iter().all(|&v| v == 0.0));
        assert_eq!(rig.rx.counters().snapshot().underruns, 1);
        assert_eq!(rig.rx.status_stats().histogram()[PacketStatus::Underrun.code() as usize], 1);
    }

    #[test]
    fn test_extra_channels_and_midi_slots() {
        let mut rig = rig(ChannelLayout::new(2, 1));
        let left = [0.5f32; 8];
        let right = [-0.25f32; 8];
        send(&mut rig, &[&left, &right], 0, 8, START_TICKS, true);

        let mut a = [0.0f32; 8];
        let mut b = [0.0f32; 8];
        let mut c = [7.0f32; 8];
        let mut engine: [&mut [f32]; 3] = [&mut a, &mut b, &mut c];
        assert_eq!(rig.rx.process(&mut engine), 8);
        assert!(a.iter().all(|&v| v == quantized(0.5)));
        assert!(b.iter().all(|&v| v == quantized(-0.25)));
        assert!(c.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_dbc_gap_detected() {
        let mut rig = rig(ChannelLayout::new(2, 0));
        let silence = [0.0f32; 8];
        for p in 0..6u64 {
            // Packet 3 is lost on the bus
            send(&mut rig, &[&silence, &silence], 0, 8, START_TICKS + p * 4096, p != 3);
        }
        let mut a = [0.0f32; 40];
        let mut b = [0.0f32; 40];
        let mut engine: [&mut [f32]; 2] = [&mut a, &mut b];
        assert_eq!(rig.rx.process(&mut engine), 40);

        assert_eq!(rig.rx.counters().snapshot().dbc_discontinuities, 1);
        let hist = rig.rx.status_stats().histogram();
        assert_eq!(hist[PacketStatus::Discontinuity.code() as usize], 1);
        assert_eq!(rig.rx.clock().discontinuities(), 0);
    }

    #[test]
    fn test_wrong_rate_rejected() {
        let mut rig = rig(ChannelLayout::new(2, 0));
        let silence = [0.0f32; 8];
        let mut packet = [0u32; 64];
        let len = rig.tx.encode_packet(&[&silence, &silence], 0, 8, 0, &mut packet);
        // Rewrite the FDF to 96 kHz
        let q1 = HostOrder::NATIVE.from_bus(packet[1]);
        packet[1] = HostOrder::NATIVE.to_bus((q1 & 0xFF00_FFFF) | (0x04 << 16));
        let mut record = [0u32; 80];
        let n = build_rx_record(&packet[..len], 0, 3, &mut record).unwrap();
        rig.writer.add_packet(&record[..n]).unwrap();

        let mut a = [0.0f32; 8];
        let mut engine: [&mut [f32]; 1] = [&mut a];
        assert_eq!(rig.rx.process(&mut engine), 0);
        assert_eq!(rig.rx.status_stats().histogram()[PacketStatus::BadHeader.code() as usize], 1);
    }

    #[test]
    fn test_clock_recovery_locks() {
        let mut rig = rig(ChannelLayout::new(2, 0));
        let silence = [0.0f32; 8];
        let mut a = [0.0f32; 8];
        let mut b = [0.0f32; 8];
        for p in 0..2000u64 {
            send(&mut rig, &[&silence, &silence], 0, 8, START_TICKS + p * 4096, true);
            let mut engine: [&mut [f32]; 2] = [&mut a, &mut b];
            assert_eq!(rig.rx.process(&mut engine), 8);
        }
        assert!(rig.rx.clock().is_locked());
        assert!((rig.rx.rate_ratio() - 1.0).abs() < 1.0e-9);
        assert_eq!(rig.rx.phase_stats().count(), 1999);
        assert_eq!(rig.rx.stats_publisher().latest().count, 2000);
    }

    #[test]
    fn test_flush_resets_tracking() {
        let mut rig = rig(ChannelLayout::new(2, 0));
        let silence = [0.0f32; 8];
        for p in 0..4u64 {
            send(&mut rig, &[&silence, &silence], 0, 8, START_TICKS + p * 4096, true);
        }
        assert_eq!(rig.rx.flush(), 4);
        assert!(!rig.rx.clock().is_primed());
        let report = rig.rx.dump_info();
        assert!(report.contains("Statistics for packet fill:"));
        assert!(report.contains("unlocked"));
    }
}
