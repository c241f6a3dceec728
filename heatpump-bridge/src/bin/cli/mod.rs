use clap::Parser;
use std::time::Duration;
use thiserror::Error;

use heatpump_lib::port::Parity;
use heatpump_lib::protocol::EngineConfig;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("invalid parity '{0}', expected none, odd or even")]
    BadParity(String),
}

fn parse_parity(input: &str) -> Result<Parity, CliError> {
    match input.to_ascii_lowercase().as_str() {
        "none" | "n" => Ok(Parity::None),
        "odd" | "o" => Ok(Parity::Odd),
        "even" | "e" => Ok(Parity::Even),
        _ => Err(CliError::BadParity(input.to_string())),
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Skip sanity checks
    #[clap(long, short)]
    pub force: bool,

    /// enable debug output
    #[clap(long, short)]
    pub debug: bool,

    /// Heat pump UART device or 'auto'
    #[clap(long, short, default_value = "auto")]
    pub port: String,

    /// UART baud rate
    #[clap(long, short, default_value_t = 9600)]
    pub baudrate: u32,

    /// UART parity: none, odd or even
    #[clap(long, default_value = "even", parse(try_from_str=parse_parity))]
    pub parity: Parity,

    /// UART device of a second controller sharing the heat pump
    #[clap(long, short)]
    pub secondary_port: Option<String>,

    /// Never transmit, only decode what passes on the bus
    #[clap(long, short)]
    pub listen_only: bool,

    /// Send the initial handshake query at startup
    #[clap(long)]
    pub handshake: bool,

    /// Take SendRawValue payloads as hex text instead of raw frame bytes
    #[clap(long)]
    pub raw_hex: bool,

    /// Log every frame as a hexdump
    #[clap(long, short = 'x')]
    pub log_hexdump: bool,

    /// Also publish log lines to the MQTT log topic
    #[clap(long)]
    pub log_mqtt: bool,

    /// MQTT broker host
    #[clap(long, short = 'H', default_value = "localhost")]
    pub mqtt_host: String,

    /// MQTT broker port
    #[clap(long, default_value_t = 1883)]
    pub mqtt_port: u16,

    #[clap(long)]
    pub mqtt_user: Option<String>,

    #[clap(long)]
    pub mqtt_password: Option<String>,

    /// MQTT client id
    #[clap(long, default_value = "heatpump-bridge")]
    pub client_id: String,

    /// Prefix of every published and subscribed topic
    #[clap(long, short, default_value = "panasonic_heat_pump")]
    pub topic_base: String,

    /// Seconds between data requests
    #[clap(long, short = 'w', default_value_t = 5)]
    pub poll_interval: u64,

    /// Seconds after which every value is published again, changed or not
    #[clap(long, default_value_t = 300)]
    pub update_all_time: u64,

    /// Emulate the optional PCB
    #[clap(long)]
    pub optional_pcb: bool,

    /// Milliseconds between optional PCB queries
    #[clap(long, default_value_t = 1000)]
    pub optional_pcb_interval: u64,

    /// Milliseconds to wait for an answer
    #[clap(long, default_value_t = 2000)]
    pub timeout: u64,

    /// Commands buffered while waiting for an answer
    #[clap(long, default_value_t = 10)]
    pub queue_capacity: usize,
}

impl Cli {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            response_timeout: Duration::from_millis(self.timeout),
            queue_capacity: self.queue_capacity,
            listen_only: self.listen_only,
            has_secondary_bus: self.secondary_port.is_some(),
            log_hexdump: self.log_hexdump,
            ..Default::default()
        }
    }

    pub fn sends_handshake(&self) -> bool {
        self.handshake && !self.listen_only
    }
}
