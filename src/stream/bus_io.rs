//! Bus I/O context: the producer side of the packet buffer.
//!
//! A dedicated thread asks the transport for packets, stamps each with the
//! bus cycle time at arrival and commits the resulting record to the packet
//! buffer. It never blocks on the buffer: when it is full the packet is
//! dropped and counted. Teardown is cooperative; `stop` clears the run
//! flag, which the thread checks between packets, and joins it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::build_rx_record;
use crate::cip::CIP_HEADER_QUADLETS;
use crate::debug::DebugModule;
use crate::error::{Error, Result};
use crate::packet_buffer::{AddError, PacketWriter};
use crate::stats::StreamCounters;
use crate::time::CycleTimeSource;
use crate::{dbg_debug, dbg_info, dbg_trace};

/// Pause after the transport reports nothing, about one bus cycle
const IDLE_SLEEP: Duration = Duration::from_micros(125);

/// Source of received isochronous packets.
///
/// `receive_packet` writes one bus-order packet (CIP header, then payload)
/// into `buf` and returns its length in quadlets, or `None` when no packet
/// is available yet. Implementations should wait at most a few milliseconds
/// so the run flag is polled regularly.
pub trait IsoReceive: Send {
    fn receive_packet(&mut self, buf: &mut [u32]) -> Option<usize>;
}

impl<F> IsoReceive for F
where
    F: FnMut(&mut [u32]) -> Option<usize> + Send,
{
    fn receive_packet(&mut self, buf: &mut [u32]) -> Option<usize> {
        self(buf)
    }
}

/// Running bus thread
pub struct BusIoContext {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<PacketWriter>>,
    debug: DebugModule,
}

impl BusIoContext {
    /// Start the bus thread. It owns `transport`, `cycle_timer` and `writer`
    /// until `stop`. The cycle timer is read once per packet when the buffer
    /// records carry an arrival stamp.
    pub fn spawn<T, C>(
        transport: T,
        cycle_timer: C,
        writer: PacketWriter,
        counters: Arc<StreamCounters>,
        debug: DebugModule,
    ) -> Result<Self>
    where
        T: IsoReceive + 'static,
        C: CycleTimeSource + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let thread_debug = debug.clone();

        let thread = thread::Builder::new()
            .name("fw-iso-rx".to_string())
            .spawn(move || {
                Self::receive_loop(transport, cycle_timer, writer, flag, counters, thread_debug)
            })
            .map_err(|e| Error::Thread(e.to_string()))?;

        dbg_info!(debug, "bus thread started");
        Ok(Self {
            running,
            thread: Some(thread),
            debug,
        })
    }

    /// Bus thread loop. This is the only thread that writes to the packet buffer.
    fn receive_loop<T: IsoReceive, C: CycleTimeSource>(
        mut transport: T,
        cycle_timer: C,
        mut writer: PacketWriter,
        running: Arc<AtomicBool>,
        counters: Arc<StreamCounters>,
        debug: DebugModule,
    ) -> PacketWriter {
        raise_thread_priority(&debug);

        let header_words = writer.config().header_words;
        let stamped = header_words > CIP_HEADER_QUADLETS;
        // One spare quadlet: anything that fills it is oversized
        let mut packet = vec![0u32; CIP_HEADER_QUADLETS + writer.config().max_payload_quadlets + 1];
        let mut record = vec![0u32; writer.config().max_packet_words()];

        while running.load(Ordering::SeqCst) {
            let len = match transport.receive_packet(&mut packet) {
                Some(len) => len.min(packet.len()),
                None => {
                    thread::sleep(IDLE_SLEEP);
                    continue;
                }
            };

            let arrival = if stamped {
                match cycle_timer.read_cycle_time() {
                    Ok(register) => register,
                    Err(e) => {
                        StreamCounters::add(&counters.bus_time_errors, 1);
                        dbg_trace!(debug, "bus time unavailable: {}", e);
                        continue;
                    }
                }
            } else {
                0
            };

            let record_len = match build_rx_record(&packet[..len], arrival, header_words, &mut record) {
                Some(n) => n,
                None => {
                    StreamCounters::add(&counters.oversized, 1);
                    dbg_trace!(debug, "rejected packet of {} quadlets", len);
                    continue;
                }
            };

            match writer.add_packet(&record[..record_len]) {
                Ok(()) => StreamCounters::add(&counters.packets_received, 1),
                Err(AddError::BufferFull) => StreamCounters::add(&counters.dropped_full, 1),
                Err(e) => {
                    StreamCounters::add(&counters.oversized, 1);
                    dbg_trace!(debug, "rejected packet: {:?}", e);
                }
            }
        }

        dbg_debug!(debug, "bus thread exiting");
        writer
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.thread.is_some()
    }

    /// Stop the thread and wait for it. Returns the writer so the stream can
    /// be restarted, or `None` if already stopped or the thread panicked.
    pub fn stop(&mut self) -> Option<PacketWriter> {
        self.running.store(false, Ordering::SeqCst);
        let thread = self.thread.take()?;
        match thread.join() {
            Ok(writer) => {
                dbg_info!(self.debug, "bus thread stopped");
                Some(writer)
            }
            Err(_) => {
                dbg_debug!(self.debug, "bus thread panicked");
                None
            }
        }
    }
}

impl Drop for BusIoContext {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Best effort: raise the calling thread to real-time priority.
fn raise_thread_priority(debug: &DebugModule) {
    #[cfg(unix)]
    {
        // Needs privileges; without them the thread keeps its priority
        let rc = unsafe { libc::nice(-20) };
        if rc == -1 {
            dbg_debug!(debug, "could not raise bus thread priority");
        }
    }

    #[cfg(windows)]
    {
        use windows_sys::Win32::System::Threading::{
            GetCurrentThread, SetThreadPriority, THREAD_PRIORITY_TIME_CRITICAL,
        };
        let ok = unsafe { SetThreadPriority(GetCurrentThread(), THREAD_PRIORITY_TIME_CRITICAL) };
        if ok == 0 {
            dbg_debug!(debug, "could not raise bus thread priority");
        }
    }

    #[cfg(not(any(unix, windows)))]
    let _ = debug;
}
