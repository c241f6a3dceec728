use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use env_logger::TimestampPrecision;
use log::{debug, info};
use num_traits::FromPrimitive;

use heatpump_lib::port::{self, Bus, Parity};
use heatpump_lib::protocol::checksum::with_checksum;
use heatpump_lib::protocol::queries::{INITIAL_QUERY, OPTIONAL_PCB_QUERY};
use heatpump_lib::protocol::{
    Frame, FrameAccumulator, FrameResult, HeaderTag, DATA_FRAME_SIZE, EXTRA_BLOCK_PROBE_OFFSET,
    MAX_FRAME_SIZE, OPTIONAL_FRAME_SIZE, SECONDARY_HEADERS, SELECTOR_DATA, SELECTOR_EXTRA,
    SELECTOR_OFFSET,
};

const IDLE_SLEEP: Duration = Duration::from_millis(5);
const STALE_AFTER: Duration = Duration::from_millis(500);

/// Byte bumped on every data frame so consumers see values change.
const COUNTER_OFFSET: usize = 10;
/// Settings requests carry their values from this offset on.
const SETTINGS_OFFSET: usize = 4;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Heat pump bus emulator", long_about = None)]
struct Args {
    /// Skip sanity checks
    #[clap(long, short)]
    force: bool,

    /// enable debug output
    #[clap(long, short)]
    debug: bool,

    /// UART device or 'auto'
    #[clap(long, short, default_value = "auto")]
    port: String,

    /// UART baud rate
    #[clap(long, short, default_value_t = 9600)]
    baudrate: u32,

    /// Serve the extended data block
    #[clap(long, short)]
    extra: bool,
}

struct Model {
    extra: bool,
    data: Vec<u8>,
}

impl Model {
    fn new(extra: bool) -> Self {
        let mut data = vec![0u8; DATA_FRAME_SIZE - 1];
        data[0] = HeaderTag::Data as u8;
        data[1] = (DATA_FRAME_SIZE - 3) as u8;
        data[2] = 0x01;
        for (i, byte) in data.iter_mut().enumerate().skip(SETTINGS_OFFSET) {
            *byte = (i % 0x80) as u8 | 0x01;
        }
        // models with the extended block report no consumption here
        data[EXTRA_BLOCK_PROBE_OFFSET] = if extra { 0 } else { 0x20 };

        Self { extra, data }
    }

    fn data_frame(&mut self, selector: u8) -> Vec<u8> {
        self.data[COUNTER_OFFSET] = self.data[COUNTER_OFFSET].wrapping_add(1);
        self.data[SELECTOR_OFFSET] = selector;
        with_checksum(&self.data)
    }

    fn optional_ack(&self) -> Vec<u8> {
        let mut ack = vec![0u8; OPTIONAL_FRAME_SIZE - 1];
        ack[..4].copy_from_slice(&[HeaderTag::Data as u8, 0x11, 0x01, 0x50]);
        with_checksum(&ack)
    }

    fn apply_settings(&mut self, frame: &Frame) {
        let bytes = frame.command_bytes();
        for offset in SETTINGS_OFFSET..bytes.len().min(self.data.len()) {
            if bytes[offset] != 0 && offset != EXTRA_BLOCK_PROBE_OFFSET {
                debug!("setting byte {} to {}", offset, bytes[offset]);
                self.data[offset] = bytes[offset];
            }
        }
    }

    fn answer(&mut self, frame: &Frame) -> Option<Vec<u8>> {
        match HeaderTag::from_u8(frame.header())? {
            HeaderTag::Handshake => {
                info!("handshake");
                Some(with_checksum(&INITIAL_QUERY))
            }
            HeaderTag::Data => match frame.selector()? {
                SELECTOR_DATA => Some(self.data_frame(SELECTOR_DATA)),
                SELECTOR_EXTRA if self.extra => Some(self.data_frame(SELECTOR_EXTRA)),
                selector => {
                    info!("ignoring query for block {:#04x}", selector);
                    None
                }
            },
            HeaderTag::Command if frame.len() == OPTIONAL_PCB_QUERY.len() + 1 => {
                Some(self.optional_ack())
            }
            HeaderTag::Command => {
                info!("settings request");
                self.apply_settings(frame);
                Some(self.data_frame(SELECTOR_DATA))
            }
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if args.debug {
        "debug"
    } else {
        "info"
    }))
    .format_timestamp(Some(TimestampPrecision::Millis))
    .format_target(false)
    .init();

    let mut port = port::open_port(&args.port, args.baudrate, Parity::Even, args.force)?;
    let mut reader = FrameAccumulator::new("sim", SECONDARY_HEADERS, MAX_FRAME_SIZE);
    let mut model = Model::new(args.extra);
    let mut last_rx = Instant::now();

    info!("emulating heat pump, extra block {}", args.extra);

    loop {
        let before = reader.len();
        let result = reader.read_from(&mut port)?;
        if reader.len() != before {
            last_rx = Instant::now();
        }

        match result {
            FrameResult::Complete(frame) => {
                if let Some(answer) = model.answer(&frame) {
                    port.write_bytes(&answer)?;
                }
            }
            FrameResult::Rejected(_) => {}
            FrameResult::Incomplete => {
                if !reader.is_empty() && last_rx.elapsed() > STALE_AFTER {
                    reader.expire();
                }
                thread::sleep(IDLE_SLEEP);
            }
        }
    }
}
