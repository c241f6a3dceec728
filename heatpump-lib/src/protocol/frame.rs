use log::{debug, info, warn};

use super::{checksum, hexdump, ReadError, Result, StatsCollector, SELECTOR_OFFSET};
use crate::port::Bus;

/// Fixed capacity byte container. Pushing never grows past `capacity`.
#[derive(Debug)]
struct FrameBuf {
    data: Vec<u8>,
    capacity: usize,
}

impl FrameBuf {
    fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, byte: u8) -> bool {
        if self.is_full() {
            return false;
        }
        self.data.push(byte);
        true
    }

    fn is_full(&self) -> bool {
        self.data.len() >= self.capacity
    }

    fn room(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Total length announced by the length byte, once it has arrived.
    fn expected_len(&self) -> Option<usize> {
        self.data.get(1).map(|&len| len as usize + 3)
    }

    fn take(&mut self) -> Vec<u8> {
        let frame = self.data.clone();
        self.data.clear();
        frame
    }
}

/// A complete frame whose checksum holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

// validated frames are never empty
#[allow(clippy::len_without_is_empty)]
impl Frame {
    /// Wrap bytes that already passed [`checksum::validate`].
    pub fn from_validated(bytes: Vec<u8>) -> Self {
        debug_assert!(checksum::validate(&bytes));
        Self { bytes }
    }

    pub fn header(&self) -> u8 {
        self.bytes[0]
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[2..self.bytes.len() - 1]
    }

    pub fn selector(&self) -> Option<u8> {
        self.bytes.get(SELECTOR_OFFSET).copied()
    }

    pub fn byte(&self, index: usize) -> Option<u8> {
        self.bytes.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Frame without its checksum, ready to be resubmitted.
    pub fn command_bytes(&self) -> &[u8] {
        &self.bytes[..self.bytes.len() - 1]
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum FrameResult {
    Incomplete,
    Complete(Frame),
    Rejected(ReadError),
}

/// Collects bytes of one bus into frames: header tag, length byte,
/// payload, checksum.
pub struct FrameAccumulator {
    name: &'static str,
    accepted: &'static [u8],
    buf: FrameBuf,
    stats: StatsCollector,
    log_hexdump: bool,
}

impl FrameAccumulator {
    pub fn new(name: &'static str, accepted: &'static [u8], capacity: usize) -> Self {
        Self {
            name,
            accepted,
            buf: FrameBuf::new(capacity),
            stats: StatsCollector::new(),
            log_hexdump: false,
        }
    }

    pub fn with_hexdump(mut self, enabled: bool) -> Self {
        self.log_hexdump = enabled;
        self
    }

    pub fn feed(&mut self, byte: u8) -> FrameResult {
        self.push(&[byte])
    }

    /// Append a chunk as it came off the wire. Bytes beyond the first
    /// rejection are discarded along with the buffer.
    pub fn push(&mut self, bytes: &[u8]) -> FrameResult {
        if bytes.is_empty() {
            return FrameResult::Incomplete;
        }

        let fresh = self.buf.data.is_empty();

        for &byte in bytes {
            if !self.buf.push(byte) {
                break;
            }
            if self.buf.data.len() == 1 && !self.accepted.contains(&byte) {
                return self.reject(ReadError::BadHeader(byte));
            }
        }

        if fresh {
            self.stats.attempt();
        }

        let expected = match self.buf.expected_len() {
            Some(expected) => expected,
            None => return FrameResult::Incomplete,
        };

        let len = self.buf.data.len();
        if len > expected || self.buf.is_full() {
            return self.reject(ReadError::TooLong(len));
        }

        if len < expected {
            return FrameResult::Incomplete;
        }

        debug!("{}: received {} bytes data", self.name, len);
        self.dump();

        let bytes = self.buf.take();
        if !checksum::validate(&bytes) {
            warn!("{}: {}", self.name, ReadError::BadChecksum);
            self.stats.failed(&ReadError::BadChecksum);
            return FrameResult::Rejected(ReadError::BadChecksum);
        }

        debug!("{}: checksum and header received ok", self.name);
        self.stats.good();
        FrameResult::Complete(Frame::from_validated(bytes))
    }

    /// Consume whatever the bus has ready, never more than fits.
    pub fn read_from(&mut self, bus: &mut dyn Bus) -> Result<FrameResult> {
        let available = bus.bytes_available()?;
        if available == 0 {
            return Ok(FrameResult::Incomplete);
        }

        let mut chunk = vec![0u8; available.min(self.buf.room())];
        let n = bus.read_bytes(&mut chunk)?;
        Ok(self.push(&chunk[..n]))
    }

    /// Give up on the current read: nothing at all is a timeout, a partial
    /// frame is too short.
    pub fn expire(&mut self) -> ReadError {
        let error = if self.buf.data.is_empty() {
            ReadError::Timeout
        } else {
            ReadError::TooShort(self.buf.data.len())
        };

        warn!("{}: {}", self.name, error);
        self.dump();
        self.stats.failed(&error);
        self.buf.data.clear();
        error
    }

    fn reject(&mut self, error: ReadError) -> FrameResult {
        warn!("{}: {}", self.name, error);
        self.dump();
        self.stats.failed(&error);
        self.buf.data.clear();
        FrameResult::Rejected(error)
    }

    fn dump(&self) {
        if self.log_hexdump {
            for line in hexdump(&self.buf.data) {
                info!("{}: data: {}", self.name, line);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buf.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.data.is_empty()
    }

    pub fn stats(&self) -> &StatsCollector {
        &self.stats
    }
}
