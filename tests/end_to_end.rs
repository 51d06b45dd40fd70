use std::thread;
use std::time::{Duration, Instant};

use firewire_amdtp_stream::config::STAMPED_HEADER_QUADLETS;
use firewire_amdtp_stream::convert::{label_float, unlabel_float};
use firewire_amdtp_stream::cycle_timer::{ticks_to_syt, TICKS_PER_CYCLE};
use firewire_amdtp_stream::{
    AddError, BusIoContext, ChannelLayout, ConversionPath, DebugModule, ManualClock,
    OversizePolicy, PacketBuffer, PacketBufferConfig, ReadError, ReceiveProcessor, SimulatedBus,
    StreamConfig, TransmitProcessor,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const HEADER_WORDS: usize = 8;
const PAYLOAD_WORDS: usize = 16;
const PACKETS: u32 = 1000;

fn marker_packet(n: u32) -> [u32; HEADER_WORDS + PAYLOAD_WORDS] {
    let mut packet = [0u32; HEADER_WORDS + PAYLOAD_WORDS];
    for (i, word) in packet.iter_mut().enumerate() {
        *word = n * (HEADER_WORDS + PAYLOAD_WORDS) as u32 + i as u32;
    }
    packet
}

#[test]
fn thousand_packets_across_threads() {
    init_logging();
    let config = PacketBufferConfig {
        capacity_packets: 32,
        header_words: HEADER_WORDS,
        max_payload_quadlets: PAYLOAD_WORDS,
        oversize_policy: OversizePolicy::Halt,
    };
    let buffer = PacketBuffer::new(config, DebugModule::new("e2e", log::LevelFilter::Debug)).unwrap();
    let (mut writer, mut reader) = buffer.split();

    let producer = thread::spawn(move || {
        for n in 0..PACKETS {
            let packet = marker_packet(n);
            loop {
                match writer.add_packet(&packet) {
                    Ok(()) => break,
                    Err(AddError::BufferFull) => thread::yield_now(),
                    Err(e) => panic!("unexpected add error {:?}", e),
                }
            }
        }
        writer
    });

    let consumer = thread::spawn(move || {
        let mut out = [0u32; HEADER_WORDS + PAYLOAD_WORDS];
        let mut next = 0u32;
        while next < PACKETS {
            match reader.get_next_packet(&mut out) {
                Ok(len) => {
                    assert_eq!(len, HEADER_WORDS + PAYLOAD_WORDS);
                    assert_eq!(out, marker_packet(next), "packet {} out of order", next);
                    next += 1;
                }
                Err(ReadError::Empty) => thread::yield_now(),
                Err(e) => panic!("unexpected read error {:?}", e),
            }
        }
        reader
    });

    let writer = producer.join().unwrap();
    let reader = consumer.join().unwrap();
    assert_eq!(reader.fill_packets(), 0);
    assert_eq!(reader.fill_payload(), 0);
    assert_eq!(writer.fill_payload(), 0);
}

#[test]
fn receive_pipeline_from_bus_thread() {
    init_logging();
    let mut config = StreamConfig::with_layout(48_000, ChannelLayout::new(2, 1));
    config.conversion = Some(ConversionPath::Scalar);
    config.buffer_packets = 512;
    assert_eq!(config.header_words, STAMPED_HEADER_QUADLETS);

    // Device side: a ramp on the left channel, its negation on the right
    let frames_per_packet = config.syt_interval() as usize;
    let packets = 300usize;
    let total = packets * frames_per_packet;
    let left: Vec<f32> = (0..total).map(|i| (i % 1000) as f32 / 2000.0).collect();
    let right: Vec<f32> = left.iter().map(|v| -v).collect();

    // Each packet reaches the host two cycles ahead of its presentation time
    let mut tx = TransmitProcessor::new(config, DebugModule::silent("device")).unwrap();
    let mut wire = Vec::with_capacity(packets);
    let start = 500 * TICKS_PER_CYCLE;
    for p in 0..packets {
        let presentation = start + p as u64 * 4096;
        let mut packet = vec![0u32; 2 + config.max_payload_quadlets];
        let len = tx.encode_packet(
            &[&left[..], &right[..]],
            p * frames_per_packet,
            frames_per_packet,
            ticks_to_syt(presentation),
            &mut packet,
        );
        packet.truncate(len);
        let arrival_usecs = (presentation - 2 * TICKS_PER_CYCLE) * 1_000 / 24_576;
        wire.push((packet, arrival_usecs));
    }

    // Host side
    let buffer = PacketBuffer::new(config.packet_buffer_config(), DebugModule::silent("pb")).unwrap();
    let (writer, reader) = buffer.split();
    let mut rx = ReceiveProcessor::new(config, reader, DebugModule::silent("rx")).unwrap();
    let counters = rx.counters();

    let clock = ManualClock::new(0);
    let cycle_timer = SimulatedBus::new(clock.clone(), 0);
    let mut queue = wire.into_iter();
    let transport = move |buf: &mut [u32]| {
        let (packet, arrival_usecs) = queue.next()?;
        clock.set(arrival_usecs);
        buf[..packet.len()].copy_from_slice(&packet);
        Some(packet.len())
    };
    let mut bus = BusIoContext::spawn(
        transport,
        cycle_timer,
        writer,
        counters.clone(),
        DebugModule::silent("bus"),
    )
    .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while counters.snapshot().packets_received < packets as u64 {
        assert!(Instant::now() < deadline, "bus thread stalled");
        thread::sleep(Duration::from_millis(1));
    }
    assert!(bus.stop().is_some());

    let mut out_l = vec![0.0f32; total];
    let mut out_r = vec![0.0f32; total];
    let period = 60;
    let mut done = 0;
    while done < total {
        let end = (done + period).min(total);
        let mut engine: [&mut [f32]; 2] = [&mut out_l[done..end], &mut out_r[done..end]];
        let got = rx.process(&mut engine);
        assert_eq!(got, end - done);
        done = end;
    }

    for i in 0..total {
        assert_eq!(out_l[i], unlabel_float(label_float(left[i])), "left frame {}", i);
        assert_eq!(out_r[i], unlabel_float(label_float(right[i])), "right frame {}", i);
    }

    let snap = counters.snapshot();
    assert_eq!(snap.dropped_full, 0);
    assert_eq!(snap.dbc_discontinuities, 0);
    assert_eq!(snap.underruns, 0);
    assert_eq!(snap.bus_time_errors, 0);
    assert!(rx.clock().is_locked());
    assert!((rx.rate_ratio() - 1.0).abs() < 1.0e-9);
    assert!(!rx.dump_info().contains("unlocked"));
}
