use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::bridge::BusBridge;
use super::codec::{CommandEncoder, Decoder};
use super::gate::GateToken;
use super::queries;
use super::scheduler::{Origin, SendScheduler, SendState, SubmitOutcome};
use super::{
    Frame, FrameAccumulator, FrameClass, FrameResult, ProtocolError, StatsSnapshot,
    EXTRA_BLOCK_PROBE_OFFSET, HEATPUMP_HEADERS, MAX_FRAME_SIZE, SELECTOR_DATA, SELECTOR_EXTRA,
};
use crate::port::Bus;

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(2000);
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub response_timeout: Duration,
    pub queue_capacity: usize,
    pub max_frame_size: usize,
    pub listen_only: bool,
    pub has_secondary_bus: bool,
    pub log_hexdump: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_frame_size: MAX_FRAME_SIZE,
            listen_only: false,
            has_secondary_bus: false,
            log_hexdump: false,
        }
    }
}

/// Whether the heat pump serves the extended data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraBlock {
    Unknown,
    /// Probe sent; stays here if no extended block ever arrives.
    Checked,
    Available,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalCommand {
    Raw(Vec<u8>),
    Named { name: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Decoded {
        class: FrameClass,
        values: Vec<(String, String)>,
    },
    RawFrame {
        class: FrameClass,
        bytes: Vec<u8>,
    },
}

/// Last valid frame of each cached class. Frames are replaced whole.
#[derive(Debug, Default)]
pub struct FrameCache {
    frames: HashMap<FrameClass, Frame>,
}

impl FrameCache {
    pub fn get(&self, class: FrameClass) -> Option<&Frame> {
        self.frames.get(&class)
    }

    pub fn store(&mut self, class: FrameClass, frame: Frame) {
        self.frames.insert(class, frame);
    }
}

pub struct ProtocolEngine {
    config: EngineConfig,
    bus: Box<dyn Bus>,
    reader: FrameAccumulator,
    scheduler: SendScheduler,
    bridge: Option<BusBridge>,
    cache: FrameCache,
    extra_block: ExtraBlock,
    decoder: Box<dyn Decoder>,
    encoder: Box<dyn CommandEncoder>,
}

impl ProtocolEngine {
    pub fn new(
        config: EngineConfig,
        bus: Box<dyn Bus>,
        decoder: Box<dyn Decoder>,
        encoder: Box<dyn CommandEncoder>,
    ) -> Self {
        let reader = FrameAccumulator::new("heatpump", HEATPUMP_HEADERS, config.max_frame_size)
            .with_hexdump(config.log_hexdump);
        let scheduler = SendScheduler::new(
            config.response_timeout,
            config.queue_capacity,
            config.listen_only,
        )
        .with_hexdump(config.log_hexdump);

        Self {
            config,
            bus,
            reader,
            scheduler,
            bridge: None,
            cache: FrameCache::default(),
            extra_block: ExtraBlock::Unknown,
            decoder,
            encoder,
        }
    }

    /// Attach the secondary controller's bus. Ignored unless the
    /// configuration enables the bridge.
    pub fn with_secondary_bus(mut self, bus: Box<dyn Bus>) -> Self {
        if self.config.has_secondary_bus {
            self.bridge = Some(BusBridge::new(
                bus,
                self.config.response_timeout,
                self.config.max_frame_size,
                self.config.log_hexdump,
            ));
        } else {
            warn!("secondary bus given but bridging is disabled, ignoring it");
        }
        self
    }

    pub fn submit(&mut self, command: &[u8], now: Instant) -> Result<SubmitOutcome, ProtocolError> {
        self.submit_from(command, Origin::Local, now)
    }

    fn submit_from(
        &mut self,
        command: &[u8],
        origin: Origin,
        now: Instant,
    ) -> Result<SubmitOutcome, ProtocolError> {
        self.scheduler
            .submit(self.bus.as_mut(), command, origin, now)
    }

    /// Entry point for commands arriving from outside the poll loop.
    /// Holding the token keeps a second caller out until this returns.
    pub fn handle_command(
        &mut self,
        _token: &GateToken,
        command: ExternalCommand,
        now: Instant,
    ) -> Result<SubmitOutcome, ProtocolError> {
        match command {
            ExternalCommand::Raw(bytes) => {
                info!("sending raw value");
                self.submit(&bytes, now)
            }
            ExternalCommand::Named { name, value } => match self.encoder.encode(&name, &value) {
                Some(bytes) => {
                    info!("sending command {} = {}", name, value);
                    self.submit(&bytes, now)
                }
                None => {
                    let error = ProtocolError::UnknownCommand(name);
                    warn!("{}", error);
                    Err(error)
                }
            },
        }
    }

    /// Routine data poll. Once the extended block is known to exist it is
    /// requested right behind the normal one.
    pub fn request_data(&mut self, now: Instant) -> Result<SubmitOutcome, ProtocolError> {
        info!("requesting new heat pump data");
        let outcome = self.submit(&queries::data_query(SELECTOR_DATA), now);

        if self.extra_block == ExtraBlock::Available {
            info!("requesting new heat pump extra data");
            // failure is already logged by the scheduler
            let _ = self.submit(&queries::data_query(SELECTOR_EXTRA), now);
        }
        outcome
    }

    pub fn request_optional_pcb(&mut self, now: Instant) -> Result<SubmitOutcome, ProtocolError> {
        if !self.scheduler.is_idle() {
            return Err(ProtocolError::Busy);
        }
        debug!("sending optional PCB data");
        self.submit(&queries::OPTIONAL_PCB_QUERY, now)
    }

    pub fn request_handshake(&mut self, now: Instant) -> Result<SubmitOutcome, ProtocolError> {
        info!("requesting initial start query");
        self.submit(&queries::INITIAL_QUERY, now)
    }

    /// One pass of the poll loop: timeouts, heat pump bytes, the secondary
    /// bus, then the backlog.
    pub fn tick(&mut self, now: Instant) -> Vec<EngineEvent> {
        let mut events = Vec::new();

        if self.scheduler.timed_out(now) {
            warn!("previous read data attempt failed due to timeout");
            self.reader.expire();
            self.scheduler.answered();
        }

        if self.config.listen_only || !self.scheduler.is_idle() {
            self.read_heatpump(now, &mut events);
        }

        let forward = match self.bridge.as_mut() {
            Some(bridge) => bridge.poll(&self.cache, now),
            None => None,
        };
        if let Some(command) = forward {
            // refusal is already logged by the scheduler
            let _ = self.submit_from(&command, Origin::Secondary, now);
        }

        // failures are logged by the scheduler; the command is gone either way
        let _ = self.scheduler.drain(self.bus.as_mut(), now);

        events
    }

    fn read_heatpump(&mut self, now: Instant, events: &mut Vec<EngineEvent>) {
        let result = match self.reader.read_from(self.bus.as_mut()) {
            Ok(result) => result,
            Err(e) => {
                warn!("heatpump: read failed: {:#}", e);
                return;
            }
        };

        match result {
            FrameResult::Incomplete => {}
            FrameResult::Complete(frame) => {
                let origin = self.scheduler.answered();
                self.process_frame(frame, origin, now, events);
            }
            FrameResult::Rejected(error) => {
                if error.is_complete_frame() {
                    self.scheduler.answered();
                }
            }
        }
    }

    fn process_frame(
        &mut self,
        frame: Frame,
        origin: Option<Origin>,
        now: Instant,
        events: &mut Vec<EngineEvent>,
    ) {
        let class = FrameClass::of(&frame);

        if let Some(bridge) = self.bridge.as_mut() {
            if origin == Some(Origin::Secondary) || class == FrameClass::Handshake {
                bridge.relay(&frame);
            }
        }

        match class {
            FrameClass::Handshake => {
                info!("received handshake answer");
                return;
            }
            FrameClass::Unknown => {
                warn!("received an unknown full size datagram, can't decode this yet");
                return;
            }
            FrameClass::ExtraData if self.extra_block != ExtraBlock::Available => {
                info!("heat pump has an extra data block");
                self.extra_block = ExtraBlock::Available;
            }
            _ => {}
        }

        let values = self.decoder.decode(class, &frame);
        events.push(EngineEvent::Decoded { class, values });
        events.push(EngineEvent::RawFrame {
            class,
            bytes: frame.as_bytes().to_vec(),
        });

        if class == FrameClass::Data {
            self.probe_extra_block(&frame, now);
        }

        if class.is_cached() {
            self.cache.store(class, frame);
        }
    }

    fn probe_extra_block(&mut self, frame: &Frame, now: Instant) {
        if self.extra_block != ExtraBlock::Unknown {
            return;
        }
        if frame.byte(EXTRA_BLOCK_PROBE_OFFSET) != Some(0) {
            return;
        }

        info!("checking if connected heat pump has extra data");
        self.extra_block = ExtraBlock::Checked;
        let _ = self.submit(&queries::data_query(SELECTOR_EXTRA), now);
    }

    pub fn send_state(&self) -> SendState {
        self.scheduler.state()
    }

    pub fn queued(&self) -> usize {
        self.scheduler.queued()
    }

    pub fn extra_block(&self) -> ExtraBlock {
        self.extra_block
    }

    pub fn cached(&self, class: FrameClass) -> Option<&Frame> {
        self.cache.get(class)
    }

    pub fn pending_bytes(&self) -> usize {
        self.reader.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.reader.stats().snapshot()
    }

    pub fn secondary_stats(&self) -> Option<StatsSnapshot> {
        self.bridge.as_ref().map(|bridge| bridge.stats().snapshot())
    }
}
