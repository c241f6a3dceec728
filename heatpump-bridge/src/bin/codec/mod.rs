use std::collections::HashMap;
use std::time::{Duration, Instant};

use heatpump_lib::protocol::{CommandEncoder, Decoder, Frame, FrameClass, HeaderTag};

/// Publishes the payload bytes of every cached block by offset. Only
/// changed bytes are reported, except on the first frame of a class and
/// once every `update_all`.
pub struct ByteDecoder {
    update_all: Duration,
    last: HashMap<FrameClass, Vec<u8>>,
    last_full: HashMap<FrameClass, Instant>,
}

impl ByteDecoder {
    pub fn new(update_all: Duration) -> Self {
        Self {
            update_all,
            last: HashMap::new(),
            last_full: HashMap::new(),
        }
    }

    fn decode_at(&mut self, class: FrameClass, frame: &Frame, now: Instant) -> Vec<(String, String)> {
        if !class.is_cached() {
            return Vec::new();
        }

        let full = match self.last_full.get(&class) {
            Some(&at) => now.saturating_duration_since(at) >= self.update_all,
            None => true,
        };
        if full {
            self.last_full.insert(class, now);
        }

        let payload = frame.payload();
        let previous = self.last.insert(class, payload.to_vec());

        payload
            .iter()
            .enumerate()
            .filter(|&(i, byte)| full || previous.as_ref().and_then(|p| p.get(i)) != Some(byte))
            // keys are frame offsets, payload starts after header and length
            .map(|(i, byte)| (format!("Byte_{}", i + 2), byte.to_string()))
            .collect()
    }
}

impl Decoder for ByteDecoder {
    fn decode(&mut self, class: FrameClass, frame: &Frame) -> Vec<(String, String)> {
        self.decode_at(class, frame, Instant::now())
    }
}

const SET_QUERY_SIZE: usize = 110;
const SET_QUERY_HEAD: [u8; 4] = [HeaderTag::Command as u8, 0x6C, 0x01, 0x10];

struct Setting {
    name: &'static str,
    offset: usize,
    encode: fn(i64) -> Option<u8>,
}

fn on_off(value: i64) -> Option<u8> {
    match value {
        0 => Some(1),
        1 => Some(2),
        _ => None,
    }
}

fn pump(value: i64) -> Option<u8> {
    on_off(value).map(|v| v << 4)
}

fn force_dhw(value: i64) -> Option<u8> {
    on_off(value).map(|v| v << 6)
}

fn holiday(value: i64) -> Option<u8> {
    on_off(value).map(|v| v << 4)
}

fn quiet_mode(value: i64) -> Option<u8> {
    match value {
        0..=3 => Some((value as u8 + 1) * 8),
        _ => None,
    }
}

fn powerful_mode(value: i64) -> Option<u8> {
    match value {
        0..=3 => Some(value as u8 + 73),
        _ => None,
    }
}

fn temperature(value: i64) -> Option<u8> {
    value.checked_add(128).and_then(|v| u8::try_from(v).ok())
}

static SETTINGS: &[Setting] = &[
    Setting {
        name: "SetHeatpump",
        offset: 4,
        encode: on_off,
    },
    Setting {
        name: "SetPump",
        offset: 4,
        encode: pump,
    },
    Setting {
        name: "SetForceDHW",
        offset: 4,
        encode: force_dhw,
    },
    Setting {
        name: "SetHolidayMode",
        offset: 5,
        encode: holiday,
    },
    Setting {
        name: "SetQuietMode",
        offset: 7,
        encode: quiet_mode,
    },
    Setting {
        name: "SetPowerfulMode",
        offset: 7,
        encode: powerful_mode,
    },
    Setting {
        name: "SetZ1HeatRequestTemperature",
        offset: 38,
        encode: temperature,
    },
    Setting {
        name: "SetZ1CoolRequestTemperature",
        offset: 39,
        encode: temperature,
    },
    Setting {
        name: "SetZ2HeatRequestTemperature",
        offset: 40,
        encode: temperature,
    },
    Setting {
        name: "SetZ2CoolRequestTemperature",
        offset: 41,
        encode: temperature,
    },
    Setting {
        name: "SetDHWTemp",
        offset: 42,
        encode: temperature,
    },
];

/// Named settings, each writing one byte of the set request.
pub struct SettingEncoder;

impl CommandEncoder for SettingEncoder {
    fn encode(&self, name: &str, value: &str) -> Option<Vec<u8>> {
        let setting = SETTINGS.iter().find(|s| s.name == name)?;
        let value: i64 = value.trim().parse().ok()?;
        let byte = (setting.encode)(value)?;

        let mut query = vec![0u8; SET_QUERY_SIZE];
        query[..SET_QUERY_HEAD.len()].copy_from_slice(&SET_QUERY_HEAD);
        query[setting.offset] = byte;
        Some(query)
    }
}
