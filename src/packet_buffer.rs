//! Bounded packet buffer between the bus I/O context and stream processing.
//!
//! Packets are stored as three parallel lock-free rings: header quadlets,
//! payload quadlets, and one length record per packet. The writer commits a
//! packet by pushing the header last, so a reader that finds a complete
//! header is guaranteed to find the matching length and payload.
//!
//! `split()` hands out a `PacketWriter` and a `PacketReader`. Neither can be
//! cloned and both need `&mut self`, so there is exactly one producer and
//! one consumer; a second one does not compile.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use serde::{Deserialize, Serialize};

use crate::debug::DebugModule;
use crate::error::{Error, Result};
use crate::{dbg_info, dbg_trace};

/// What the reader does with a packet larger than the caller's buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OversizePolicy {
    /// Discard the packet and report it; the next read continues with the following packet.
    Skip,
    /// Leave the packet in place and keep reporting it until the caller
    /// skips it, flushes, or offers a larger buffer.
    #[default]
    Halt,
}

/// Sizes fixed at stream setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketBufferConfig {
    /// Number of packets the buffer holds
    pub capacity_packets: usize,
    /// Header quadlets per packet
    pub header_words: usize,
    /// Maximum payload quadlets per packet
    pub max_payload_quadlets: usize,
    /// Reader behaviour for packets larger than the caller's buffer
    #[serde(default)]
    pub oversize_policy: OversizePolicy,
}

impl PacketBufferConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity_packets == 0 {
            return Err(Error::InvalidConfig("packet capacity must be non-zero".to_string()));
        }
        if self.header_words == 0 {
            return Err(Error::InvalidConfig("header size must be non-zero".to_string()));
        }
        if self.max_payload_quadlets == 0 {
            return Err(Error::InvalidConfig("maximum payload must be non-zero".to_string()));
        }
        self.header_store_len()?;
        self.payload_store_len()?;
        Ok(())
    }

    fn header_store_len(&self) -> Result<usize> {
        self.capacity_packets
            .checked_mul(self.header_words)
            .ok_or_else(|| Error::InvalidConfig("header store size overflows".to_string()))
    }

    fn payload_store_len(&self) -> Result<usize> {
        self.capacity_packets
            .checked_mul(self.max_payload_quadlets)
            .ok_or_else(|| Error::InvalidConfig("payload store size overflows".to_string()))
    }

    /// Largest packet (header + payload) the buffer accepts
    pub fn max_packet_words(&self) -> usize {
        self.header_words + self.max_payload_quadlets
    }
}

/// Reasons `add_packet` refuses a packet. Nothing is written in any case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddError {
    /// Not enough room for this packet right now
    BufferFull,
    /// Packet shorter than the configured header
    TooShort { len: usize },
    /// Payload larger than the configured maximum
    Oversized { payload: usize, max: usize },
}

/// Reasons `get_next_packet` produced nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    /// No complete packet buffered
    Empty,
    /// The next packet needs `needed` quadlets but the caller offered `capacity`
    Oversized { needed: usize, capacity: usize },
    /// A header was committed without its length or payload. Indicates a defect.
    Inconsistent,
}

fn alloc_store(store: &'static str, words: usize) -> Result<HeapRb<u32>> {
    HeapRb::<u32>::try_new(words).map_err(|_| Error::Allocation { store, words })
}

/// Producer half, owned by the bus I/O context
pub struct PacketWriter {
    config: PacketBufferConfig,
    headers: HeapProd<u32>,
    payload: HeapProd<u32>,
    lengths: HeapProd<u32>,
    debug: DebugModule,
}

/// Consumer half, owned by the stream-processing context
pub struct PacketReader {
    config: PacketBufferConfig,
    headers: HeapCons<u32>,
    payload: HeapCons<u32>,
    lengths: HeapCons<u32>,
    debug: DebugModule,
}

/// Both halves together, for setup, single-context use and flushing
pub struct PacketBuffer {
    writer: PacketWriter,
    reader: PacketReader,
}

impl PacketBuffer {
    /// Allocate the three stores. Fails on invalid sizes or allocation failure.
    pub fn new(config: PacketBufferConfig, debug: DebugModule) -> Result<Self> {
        config.validate()?;

        let headers = alloc_store("header", config.header_store_len()?)?;
        let payload = alloc_store("payload", config.payload_store_len()?)?;
        let lengths = alloc_store("length", config.capacity_packets)?;

        dbg_info!(
            debug,
            "packet buffer: {} packets, {} header + {} payload quadlets",
            config.capacity_packets,
            config.header_words,
            config.max_payload_quadlets
        );

        let (header_prod, header_cons) = headers.split();
        let (payload_prod, payload_cons) = payload.split();
        let (length_prod, length_cons) = lengths.split();

        Ok(Self {
            writer: PacketWriter {
                config,
                headers: header_prod,
                payload: payload_prod,
                lengths: length_prod,
                debug: debug.clone(),
            },
            reader: PacketReader {
                config,
                headers: header_cons,
                payload: payload_cons,
                lengths: length_cons,
                debug,
            },
        })
    }

    /// Hand the halves to their contexts
    pub fn split(self) -> (PacketWriter, PacketReader) {
        (self.writer, self.reader)
    }

    pub fn config(&self) -> &PacketBufferConfig {
        &self.writer.config
    }

    pub fn add_packet(&mut self, packet: &[u32]) -> std::result::Result<(), AddError> {
        self.writer.add_packet(packet)
    }

    pub fn get_next_packet(&mut self, out: &mut [u32]) -> std::result::Result<usize, ReadError> {
        self.reader.get_next_packet(out)
    }

    pub fn fill_packets(&self) -> usize {
        self.reader.fill_packets()
    }

    pub fn fill_payload(&self) -> usize {
        self.reader.fill_payload()
    }

    /// Empty all three stores
    pub fn flush(&mut self) -> usize {
        self.reader.flush()
    }
}

impl PacketWriter {
    /// Queue one packet (header quadlets followed by payload quadlets).
    ///
    /// All-or-nothing: either the whole packet is committed or nothing is
    /// written. Payload and length go in before the header.
    pub fn add_packet(&mut self, packet: &[u32]) -> std::result::Result<(), AddError> {
        let header_words = self.config.header_words;
        if packet.len() < header_words {
            return Err(AddError::TooShort { len: packet.len() });
        }

        let payload_len = packet.len() - header_words;
        if payload_len > self.config.max_payload_quadlets {
            return Err(AddError::Oversized {
                payload: payload_len,
                max: self.config.max_payload_quadlets,
            });
        }

        if self.headers.vacant_len() < header_words
            || self.payload.vacant_len() < payload_len
            || self.lengths.vacant_len() < 1
        {
            dbg_trace!(self.debug, "buffer full, {} packets queued", self.fill_packets());
            return Err(AddError::BufferFull);
        }

        let (header, body) = packet.split_at(header_words);
        self.payload.push_slice(body);
        // Capacity was checked above and only this half pushes
        let _ = self.lengths.try_push(payload_len as u32);
        self.headers.push_slice(header);
        Ok(())
    }

    /// Committed packets (best effort while the reader runs)
    pub fn fill_packets(&self) -> usize {
        self.headers.occupied_len() / self.config.header_words
    }

    /// Queued payload quadlets
    pub fn fill_payload(&self) -> usize {
        self.payload.occupied_len()
    }

    /// Packets that still fit assuming maximum-size payloads
    pub fn free_packets(&self) -> usize {
        let by_header = self.headers.vacant_len() / self.config.header_words;
        let by_payload = self.payload.vacant_len() / self.config.max_payload_quadlets;
        by_header.min(by_payload).min(self.lengths.vacant_len())
    }

    pub fn config(&self) -> &PacketBufferConfig {
        &self.config
    }
}

impl PacketReader {
    /// Copy the next packet (header then payload) into `out`.
    /// Returns the number of quadlets written.
    pub fn get_next_packet(&mut self, out: &mut [u32]) -> std::result::Result<usize, ReadError> {
        let header_words = self.config.header_words;
        if self.headers.occupied_len() < header_words {
            return Err(ReadError::Empty);
        }

        let payload_len = match self.peek_length() {
            Some(len) => len,
            None => return Err(ReadError::Inconsistent),
        };
        if self.payload.occupied_len() < payload_len {
            return Err(ReadError::Inconsistent);
        }

        let needed = header_words + payload_len;
        if needed > out.len() {
            dbg_trace!(
                self.debug,
                "packet of {} quadlets exceeds buffer of {}",
                needed,
                out.len()
            );
            if self.config.oversize_policy == OversizePolicy::Skip {
                self.discard(payload_len);
            }
            return Err(ReadError::Oversized {
                needed,
                capacity: out.len(),
            });
        }

        self.headers.pop_slice(&mut out[..header_words]);
        let _ = self.lengths.try_pop();
        self.payload.pop_slice(&mut out[header_words..needed]);
        Ok(needed)
    }

    /// Size in quadlets (header + payload) of the next packet, if one is committed
    pub fn peek_packet_len(&self) -> Option<usize> {
        if self.headers.occupied_len() < self.config.header_words {
            return None;
        }
        self.peek_length().map(|len| len + self.config.header_words)
    }

    /// Drop the next packet without copying it. Returns false when empty.
    pub fn skip_packet(&mut self) -> bool {
        if self.headers.occupied_len() < self.config.header_words {
            return false;
        }
        match self.peek_length() {
            Some(len) => {
                self.discard(len);
                true
            }
            None => false,
        }
    }

    /// Committed packets
    pub fn fill_packets(&self) -> usize {
        self.headers.occupied_len() / self.config.header_words
    }

    /// Queued payload quadlets
    pub fn fill_payload(&self) -> usize {
        self.payload.occupied_len()
    }

    /// Discard everything. Only meaningful while the writer is stopped.
    /// Returns the number of packets dropped.
    pub fn flush(&mut self) -> usize {
        let packets = self.fill_packets();
        self.headers.clear();
        self.lengths.clear();
        self.payload.clear();
        packets
    }

    pub fn config(&self) -> &PacketBufferConfig {
        &self.config
    }

    fn peek_length(&self) -> Option<usize> {
        let (first, second) = self.lengths.as_slices();
        first.first().or_else(|| second.first()).map(|&len| len as usize)
    }

    fn discard(&mut self, payload_len: usize) {
        self.headers.skip(self.config.header_words);
        let _ = self.lengths.try_pop();
        self.payload.skip(payload_len);
    }
}
