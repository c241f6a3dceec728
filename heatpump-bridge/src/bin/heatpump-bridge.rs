mod cli;
mod codec;
mod mqtt;

use std::io;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::{generate, shells::Bash};
use env_logger::TimestampPrecision;
use log::{error, info};
use tokio::sync::mpsc::{self, Receiver};

use heatpump_lib::port;
use heatpump_lib::protocol::{DispatchGate, ProtocolEngine, SendState};

use cli::Cli;
use codec::{ByteDecoder, SettingEncoder};
use mqtt::{Publisher, Topics};

const TICK: Duration = Duration::from_millis(10);

fn init_logging(cli: &Cli) -> Result<Option<Receiver<String>>> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if cli.debug {
            "debug"
        } else {
            "info"
        }));
    builder
        .format_timestamp(Some(TimestampPrecision::Millis))
        .format_target(false);

    if cli.log_mqtt {
        Ok(Some(mqtt::forward_logs(builder.build())?))
    } else {
        builder.init();
        Ok(None)
    }
}

fn open_engine(cli: &Cli) -> Result<ProtocolEngine> {
    let heatpump = port::open_port(&cli.port, cli.baudrate, cli.parity, cli.force)
        .context("Failed to open heat pump port")?;

    let engine = ProtocolEngine::new(
        cli.engine_config(),
        Box::new(heatpump),
        Box::new(ByteDecoder::new(Duration::from_secs(cli.update_all_time))),
        Box::new(SettingEncoder),
    );

    Ok(match &cli.secondary_port {
        Some(name) => {
            let secondary = port::open_port(name, cli.baudrate, cli.parity, cli.force)
                .with_context(|| format!("Failed to open secondary port {}", name))?;
            engine.with_secondary_bus(Box::new(secondary))
        }
        None => engine,
    })
}

async fn do_main() -> Result<()> {
    if std::env::var("GENERATE_COMPLETION").is_ok() {
        generate(Bash, &mut Cli::command(), "heatpump-bridge", &mut io::stdout());
        return Ok(());
    }

    let cli = Cli::parse();
    let log_lines = init_logging(&cli)?;
    let mut engine = open_engine(&cli)?;

    let topics = Topics::new(&cli.topic_base).with_raw_hex(cli.raw_hex);
    let (client, eventloop) = mqtt::connect(&cli, &topics);
    let (command_tx, mut commands) = mpsc::unbounded_channel();
    tokio::spawn(mqtt::run_event_loop(
        eventloop,
        client.clone(),
        topics.clone(),
        DispatchGate::new(),
        command_tx,
    ));
    if let Some(lines) = log_lines {
        tokio::spawn(mqtt::publish_logs(client.clone(), topics.log(), lines));
    }
    let publisher = Publisher::new(client, topics);

    let started = Instant::now();
    if cli.sends_handshake() {
        let _ = engine.request_handshake(started);
    }

    let poll_interval = Duration::from_secs(cli.poll_interval);
    let optional_interval = Duration::from_millis(cli.optional_pcb_interval);
    let mut last_poll = started;
    let mut last_optional = started;
    let mut ticker = tokio::time::interval(TICK);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            received = commands.recv() => match received {
                Some((command, token)) => {
                    let _ = engine.handle_command(&token, command, Instant::now());
                }
                None => return Err(anyhow!("MQTT event loop stopped")),
            },
        }

        let now = Instant::now();
        for event in engine.tick(now) {
            publisher.event(event);
        }

        if cli.optional_pcb
            && !cli.listen_only
            && now.duration_since(last_optional) > optional_interval
            && engine.send_state() == SendState::Idle
        {
            last_optional = now;
            let _ = engine.request_optional_pcb(now);
        }

        if now.duration_since(last_poll) > poll_interval {
            last_poll = now;
            if !cli.listen_only {
                let _ = engine.request_data(now);
            }

            let stats = engine.stats();
            info!("heat pump stats: {}", stats);
            if let Some(secondary) = engine.secondary_stats() {
                info!("secondary stats: {}", secondary);
            }
            publisher.stats(
                now.duration_since(started),
                &stats,
                engine.secondary_stats().as_ref(),
            );
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = do_main().await {
        error!("{:#}", e);
    }
}
