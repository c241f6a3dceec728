use std::time::Duration;

use anyhow::Result;
use hex::FromHex;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use thiserror::Error;
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedSender};

use heatpump_lib::protocol::{
    DispatchGate, EngineEvent, ExternalCommand, FrameClass, GateToken, StatsSnapshot,
};

use crate::cli::Cli;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 10;
const LOG_CAPACITY: usize = 64;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TopicError {
    #[error("unexpected topic '{0}'")]
    Unexpected(String),
    #[error("unusable payload on '{0}'")]
    BadPayload(String),
}

/// Topic layout under one base prefix.
#[derive(Debug, Clone)]
pub struct Topics {
    base: String,
    raw_hex: bool,
}

impl Topics {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            raw_hex: false,
        }
    }

    /// Expect `SendRawValue` payloads as hex text instead of frame bytes.
    pub fn with_raw_hex(mut self, raw_hex: bool) -> Self {
        self.raw_hex = raw_hex;
        self
    }

    pub fn lwt(&self) -> String {
        format!("{}/LWT", self.base)
    }

    pub fn log(&self) -> String {
        format!("{}/log", self.base)
    }

    pub fn stats(&self) -> String {
        format!("{}/stats", self.base)
    }

    pub fn commands_filter(&self) -> String {
        format!("{}/commands/#", self.base)
    }

    pub fn send_raw(&self) -> String {
        format!("{}/SendRawValue", self.base)
    }

    pub fn value(&self, class: FrameClass, key: &str) -> Option<String> {
        let group = match class {
            FrameClass::Data => "main",
            FrameClass::ExtraData => "extra",
            FrameClass::OptionalAck => "optional",
            _ => return None,
        };
        Some(format!("{}/{}/{}", self.base, group, key))
    }

    pub fn raw(&self, class: FrameClass) -> Option<String> {
        let name = match class {
            FrameClass::Data => "data",
            FrameClass::ExtraData => "dataextra",
            FrameClass::OptionalAck => "optional",
            _ => return None,
        };
        Some(format!("{}/raw/{}", self.base, name))
    }

    /// Turn an incoming publish into a command for the engine.
    pub fn parse_command(&self, topic: &str, payload: &[u8]) -> Result<ExternalCommand, TopicError> {
        lazy_static! {
            static ref RE: Regex =
                Regex::new(r"^(.+)/(?:commands/([^/]+)|(SendRawValue))$").unwrap();
        }

        let c = RE
            .captures(topic)
            .filter(|c| &c[1] == self.base)
            .ok_or_else(|| TopicError::Unexpected(topic.to_string()))?;

        let bad_payload = || TopicError::BadPayload(topic.to_string());

        let name = match c.get(2) {
            Some(name) => name.as_str(),
            None => {
                let bytes = if self.raw_hex {
                    let text = std::str::from_utf8(payload).map_err(|_| bad_payload())?;
                    Vec::from_hex(text.trim()).map_err(|_| bad_payload())?
                } else {
                    payload.to_vec()
                };
                if bytes.is_empty() {
                    return Err(bad_payload());
                }
                return Ok(ExternalCommand::Raw(bytes));
            }
        };

        let text = std::str::from_utf8(payload).map_err(|_| bad_payload())?;
        Ok(ExternalCommand::Named {
            name: name.to_string(),
            value: text.trim().to_string(),
        })
    }
}

pub fn connect(cli: &Cli, topics: &Topics) -> (AsyncClient, EventLoop) {
    let mut options = MqttOptions::new(&cli.client_id, &cli.mqtt_host, cli.mqtt_port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_last_will(LastWill::new(
        topics.lwt(),
        "Offline",
        QoS::AtLeastOnce,
        true,
    ));
    if let (Some(user), Some(password)) = (&cli.mqtt_user, &cli.mqtt_password) {
        options.set_credentials(user, password);
    }

    AsyncClient::new(options, REQUEST_CAPACITY)
}

/// Drive the MQTT connection. Commands are handed over together with the
/// gate token, so a second one arriving before the first is processed is
/// dropped here.
pub async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topics: Topics,
    gate: DispatchGate,
    commands: UnboundedSender<(ExternalCommand, GateToken)>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("connected to MQTT broker");
                for filter in [topics.commands_filter(), topics.send_raw()] {
                    if let Err(e) = client.try_subscribe(filter, QoS::AtLeastOnce) {
                        warn!("MQTT subscribe failed: {}", e);
                    }
                }
                if let Err(e) = client.try_publish(topics.lwt(), QoS::AtLeastOnce, true, "Online") {
                    warn!("MQTT publish failed: {}", e);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let command = match topics.parse_command(&publish.topic, &publish.payload) {
                    Ok(command) => command,
                    Err(e) => {
                        warn!("{}", e);
                        continue;
                    }
                };

                let token = match gate.try_acquire() {
                    Some(token) => token,
                    None => {
                        warn!("already processing another command, ignoring this one");
                        continue;
                    }
                };

                if commands.send((command, token)).is_err() {
                    debug!("command receiver gone, stopping MQTT loop");
                    return;
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT connection error: {}, retrying", e);
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

pub fn stats_json(
    uptime: Duration,
    stats: &StatsSnapshot,
    secondary: Option<&StatsSnapshot>,
) -> String {
    fn counters(stats: &StatsSnapshot) -> json::JsonValue {
        let mut value = json::JsonValue::new_object();
        value["total reads"] = stats.total.into();
        value["good reads"] = stats.good.into();
        value["bad crc reads"] = stats.bad_checksum.into();
        value["bad header reads"] = stats.bad_header.into();
        value["too short reads"] = stats.too_short.into();
        value["too long reads"] = stats.too_long.into();
        value["timeout reads"] = stats.timeout.into();
        value["read percentage"] = stats.read_percentage().into();
        value
    }

    let mut value = counters(stats);
    value["uptime"] = uptime.as_secs().into();
    if let Some(secondary) = secondary {
        value["secondary"] = counters(secondary);
    }
    value["version"] = env!("CARGO_PKG_VERSION").into();
    json::stringify(value)
}

pub struct Publisher {
    client: AsyncClient,
    topics: Topics,
}

impl Publisher {
    pub fn new(client: AsyncClient, topics: Topics) -> Self {
        Self { client, topics }
    }

    /// Queue one message without waiting. Messages that do not fit in the
    /// request channel are dropped.
    fn send(&self, topic: String, payload: Vec<u8>, retain: bool) -> bool {
        match self.client.try_publish(&topic, QoS::AtLeastOnce, retain, payload) {
            Ok(()) => true,
            Err(e) => {
                debug!("dropping MQTT message for {}: {}", topic, e);
                false
            }
        }
    }

    /// Returns how many messages were queued.
    pub fn event(&self, event: EngineEvent) -> usize {
        let (queued, dropped) = match event {
            EngineEvent::Decoded { class, values } => values
                .into_iter()
                .filter_map(|(key, value)| Some((self.topics.value(class, &key)?, value)))
                .fold((0, 0), |(queued, dropped), (topic, value)| {
                    if self.send(topic, value.into_bytes(), true) {
                        (queued + 1, dropped)
                    } else {
                        (queued, dropped + 1)
                    }
                }),
            EngineEvent::RawFrame { class, bytes } => match self.topics.raw(class) {
                Some(topic) => {
                    if self.send(topic, bytes, false) {
                        (1, 0)
                    } else {
                        (0, 1)
                    }
                }
                None => (0, 0),
            },
        };

        if dropped > 0 {
            warn!("MQTT client busy, dropped {} messages", dropped);
        }
        queued
    }

    pub fn stats(
        &self,
        uptime: Duration,
        stats: &StatsSnapshot,
        secondary: Option<&StatsSnapshot>,
    ) {
        let payload = stats_json(uptime, stats, secondary);
        if !self.send(self.topics.stats(), payload.into_bytes(), true) {
            warn!("MQTT client busy, stats not published");
        }
        // the broker may have marked us dead in between
        self.send(self.topics.lwt(), b"Online".to_vec(), true);
    }
}

/// Wraps the console logger and copies the crate's own lines to a
/// channel for publishing.
struct MqttLogger {
    inner: env_logger::Logger,
    lines: Sender<String>,
}

impl log::Log for MqttLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !self.inner.matches(record) {
            return;
        }
        self.inner.log(record);

        // MQTT client internals would feed back into themselves.
        // Lines are dropped while the channel is full.
        if record.target().starts_with("heatpump") {
            let _ = self.lines.try_send(record.args().to_string());
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

pub fn forward_logs(inner: env_logger::Logger) -> Result<Receiver<String>> {
    let (lines, rx) = mpsc::channel(LOG_CAPACITY);
    log::set_max_level(inner.filter());
    log::set_boxed_logger(Box::new(MqttLogger { inner, lines }))?;
    Ok(rx)
}

pub async fn publish_logs(client: AsyncClient, topic: String, mut lines: Receiver<String>) {
    while let Some(line) = lines.recv().await {
        // no logging here, it would come straight back
        if client
            .publish(&topic, QoS::AtMostOnce, false, line)
            .await
            .is_err()
        {
            return;
        }
    }
}
