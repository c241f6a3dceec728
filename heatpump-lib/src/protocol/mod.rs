pub mod bridge;
pub mod checksum;
pub mod codec;
pub mod engine;
pub mod frame;
pub mod gate;
pub mod queries;
pub mod queue;
pub mod scheduler;
pub mod stats;

use itertools::Itertools;
use num_derive::{FromPrimitive, ToPrimitive};
use thiserror::Error;

pub use anyhow::Result;

pub use bridge::BusBridge;
pub use codec::{CommandEncoder, Decoder};
pub use engine::{EngineConfig, EngineEvent, ExternalCommand, ExtraBlock, ProtocolEngine};
pub use frame::{Frame, FrameAccumulator, FrameResult};
pub use gate::{DispatchGate, GateToken};
pub use scheduler::{Origin, SendScheduler, SendState, SubmitOutcome};
pub use stats::{StatsCollector, StatsSnapshot};

/// Largest frame either bus will buffer; a declared length that would
/// reach it is rejected as too long.
pub const MAX_FRAME_SIZE: usize = 255;

/// header + length + 200 payload bytes
pub const DATA_FRAME_SIZE: usize = 203;
pub const OPTIONAL_FRAME_SIZE: usize = 20;

/// Byte 3 of data queries and data frames selects the block.
pub const SELECTOR_OFFSET: usize = 3;
pub const SELECTOR_DATA: u8 = 0x10;
pub const SELECTOR_EXTRA: u8 = 0x21;

/// Heat consumption field of the data block. Models with the extended
/// block leave it at zero.
pub const EXTRA_BLOCK_PROBE_OFFSET: usize = 193;

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum HeaderTag {
    Handshake = 0x31,
    Data = 0x71,
    Command = 0xF1,
}

/// Frames the heat pump itself sends.
pub const HEATPUMP_HEADERS: &[u8] = &[HeaderTag::Data as u8, HeaderTag::Handshake as u8];

/// Frames a secondary controller sends towards the heat pump.
pub const SECONDARY_HEADERS: &[u8] = &[
    HeaderTag::Data as u8,
    HeaderTag::Command as u8,
    HeaderTag::Handshake as u8,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameClass {
    Data,
    ExtraData,
    OptionalAck,
    Handshake,
    /// Any other short answer, usually to a command.
    Reply,
    /// Full size frame with an unrecognised selector.
    Unknown,
}

impl FrameClass {
    /// Classify a validated frame received from the heat pump.
    pub fn of(frame: &Frame) -> Self {
        if frame.header() == HeaderTag::Handshake as u8 {
            return FrameClass::Handshake;
        }

        match frame.len() {
            DATA_FRAME_SIZE => match frame.selector() {
                Some(SELECTOR_DATA) => FrameClass::Data,
                Some(SELECTOR_EXTRA) => FrameClass::ExtraData,
                _ => FrameClass::Unknown,
            },
            OPTIONAL_FRAME_SIZE => FrameClass::OptionalAck,
            _ => FrameClass::Reply,
        }
    }

    /// Data block a query with this selector asks for.
    pub fn for_selector(selector: u8) -> Option<Self> {
        match selector {
            SELECTOR_DATA => Some(FrameClass::Data),
            SELECTOR_EXTRA => Some(FrameClass::ExtraData),
            _ => None,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(
            self,
            FrameClass::Data | FrameClass::ExtraData | FrameClass::OptionalAck
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("received bad header {0:#04x}, ignoring this data")]
    BadHeader(u8),
    #[error("received more data than header suggests ({0} bytes)")]
    TooLong(usize),
    #[error("checksum received false")]
    BadChecksum,
    #[error("answer timed out after {0} bytes")]
    TooShort(usize),
    #[error("answer timed out, nothing received")]
    Timeout,
}

impl ReadError {
    /// A frame of the declared length arrived, even if it was corrupted.
    pub fn is_complete_frame(&self) -> bool {
        matches!(self, ReadError::BadChecksum)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("too many commands already in buffer, ignoring this command")]
    QueueFull,
    #[error("not sending this command, listen only mode")]
    ListenOnly,
    #[error("bus busy, request skipped")]
    Busy,
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("bus write failed: {0}")]
    BusWrite(String),
}

const HEXDUMP_BYTES_PER_LINE: usize = 32;

pub fn hexdump(data: &[u8]) -> Vec<String> {
    data.chunks(HEXDUMP_BYTES_PER_LINE)
        .map(|line| line.iter().map(|b| format!("{:02X}", b)).join(" "))
        .collect()
}
