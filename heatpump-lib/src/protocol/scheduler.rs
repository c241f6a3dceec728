use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::checksum;
use super::hexdump;
use super::queue::{CommandQueue, PendingCommand};
use super::ProtocolError;
use crate::port::Bus;

/// Who asked for the outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Idle,
    AwaitingResponse { sent_at: Instant, origin: Origin },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Sent,
    Buffered,
}

/// Keeps at most one request on the heat pump bus and queues the rest.
pub struct SendScheduler {
    state: SendState,
    queue: CommandQueue,
    timeout: Duration,
    listen_only: bool,
    log_hexdump: bool,
}

impl SendScheduler {
    pub fn new(timeout: Duration, queue_capacity: usize, listen_only: bool) -> Self {
        Self {
            state: SendState::Idle,
            queue: CommandQueue::new(queue_capacity),
            timeout,
            listen_only,
            log_hexdump: false,
        }
    }

    pub fn with_hexdump(mut self, enabled: bool) -> Self {
        self.log_hexdump = enabled;
        self
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == SendState::Idle
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn submit(
        &mut self,
        bus: &mut dyn Bus,
        command: &[u8],
        origin: Origin,
        now: Instant,
    ) -> Result<SubmitOutcome, ProtocolError> {
        if self.listen_only {
            warn!("{}", ProtocolError::ListenOnly);
            return Err(ProtocolError::ListenOnly);
        }

        if !self.is_idle() {
            debug!("already sending data, buffering this send request");
            let pending = PendingCommand {
                bytes: command.to_vec(),
                origin,
            };
            return match self.queue.push(pending) {
                Ok(()) => Ok(SubmitOutcome::Buffered),
                Err(_) => {
                    warn!("{}", ProtocolError::QueueFull);
                    Err(ProtocolError::QueueFull)
                }
            };
        }

        let frame = checksum::with_checksum(command);
        if let Err(e) = bus.write_bytes(&frame) {
            warn!("send failed: {:#}", e);
            return Err(ProtocolError::BusWrite(e.to_string()));
        }

        info!(
            "sent bytes: {} including checksum value: {}",
            frame.len(),
            frame[frame.len() - 1]
        );
        if self.log_hexdump {
            for line in hexdump(&frame) {
                info!("send: {}", line);
            }
        }

        self.state = SendState::AwaitingResponse {
            sent_at: now,
            origin,
        };
        Ok(SubmitOutcome::Sent)
    }

    /// A complete frame arrived, valid or not: the channel is free again.
    pub fn answered(&mut self) -> Option<Origin> {
        match std::mem::replace(&mut self.state, SendState::Idle) {
            SendState::AwaitingResponse { origin, .. } => Some(origin),
            SendState::Idle => None,
        }
    }

    pub fn timed_out(&self, now: Instant) -> bool {
        match self.state {
            SendState::AwaitingResponse { sent_at, .. } => {
                now.saturating_duration_since(sent_at) > self.timeout
            }
            SendState::Idle => false,
        }
    }

    /// Send the oldest queued command if the channel is free.
    pub fn drain(
        &mut self,
        bus: &mut dyn Bus,
        now: Instant,
    ) -> Option<Result<SubmitOutcome, ProtocolError>> {
        if !self.is_idle() {
            return None;
        }
        let pending = self.queue.pop()?;
        debug!("sending command from buffer");
        let result = self.submit(bus, &pending.bytes, pending.origin, now);
        if let Err(e) = &result {
            warn!(
                "dropping buffered command of {} bytes: {}",
                pending.bytes.len(),
                e
            );
        }
        Some(result)
    }
}
