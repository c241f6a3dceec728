use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::engine::FrameCache;
use super::{
    Frame, FrameAccumulator, FrameClass, FrameResult, HeaderTag, StatsCollector,
    SECONDARY_HEADERS,
};
use crate::port::Bus;

/// Passive side of the heat pump bus shared with a second controller.
///
/// Queries from that controller are answered from the frames this system
/// already holds, so only one party ever polls the heat pump. Anything
/// else it sends is handed back to the engine to forward.
pub struct BusBridge {
    bus: Box<dyn Bus>,
    reader: FrameAccumulator,
    last_rx: Option<Instant>,
    timeout: Duration,
}

impl BusBridge {
    pub fn new(bus: Box<dyn Bus>, timeout: Duration, capacity: usize, log_hexdump: bool) -> Self {
        Self {
            bus,
            reader: FrameAccumulator::new("secondary", SECONDARY_HEADERS, capacity)
                .with_hexdump(log_hexdump),
            last_rx: None,
            timeout,
        }
    }

    /// Read what the secondary controller sent. Returns a command to
    /// forward to the heat pump, without checksum.
    pub fn poll(&mut self, cache: &FrameCache, now: Instant) -> Option<Vec<u8>> {
        let before = self.reader.len();
        let result = match self.reader.read_from(self.bus.as_mut()) {
            Ok(result) => result,
            Err(e) => {
                warn!("secondary: read failed: {:#}", e);
                return None;
            }
        };
        if self.reader.len() > before {
            self.last_rx = Some(now);
        }

        match result {
            FrameResult::Complete(frame) => self.handle(frame, cache),
            FrameResult::Rejected(_) => None,
            FrameResult::Incomplete => {
                self.expire_stale(now);
                None
            }
        }
    }

    fn handle(&mut self, frame: Frame, cache: &FrameCache) -> Option<Vec<u8>> {
        if frame.header() != HeaderTag::Data as u8 {
            info!("forwarding secondary command to heat pump");
            return Some(frame.command_bytes().to_vec());
        }

        let class = match frame.selector().and_then(FrameClass::for_selector) {
            Some(class) => class,
            None => {
                warn!("secondary: query for unknown block {:?}", frame.selector());
                return None;
            }
        };

        match cache.get(class) {
            Some(cached) => {
                debug!("answering secondary {:?} query from cache", class);
                let bytes = cached.as_bytes().to_vec();
                self.write(&bytes);
            }
            None => debug!("no {:?} block cached yet, secondary will retry", class),
        }
        None
    }

    /// Pass a heat pump frame through unchanged.
    pub fn relay(&mut self, frame: &Frame) {
        debug!("relaying {} bytes to secondary", frame.len());
        self.write(frame.as_bytes());
    }

    fn write(&mut self, bytes: &[u8]) {
        if let Err(e) = self.bus.write_bytes(bytes) {
            warn!("secondary: write failed: {:#}", e);
        }
    }

    fn expire_stale(&mut self, now: Instant) {
        if self.reader.is_empty() {
            return;
        }
        if let Some(last_rx) = self.last_rx {
            if now.saturating_duration_since(last_rx) > self.timeout {
                self.reader.expire();
            }
        }
    }

    pub fn stats(&self) -> &StatsCollector {
        self.reader.stats()
    }
}
