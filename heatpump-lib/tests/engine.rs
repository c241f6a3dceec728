use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use heatpump_lib::port::MemoryBus;
use heatpump_lib::protocol::checksum::with_checksum;
use heatpump_lib::protocol::queries::{self, data_query};
use heatpump_lib::protocol::{
    CommandEncoder, Decoder, DispatchGate, EngineConfig, EngineEvent, ExternalCommand, ExtraBlock,
    Frame, FrameClass, Origin, ProtocolEngine, ProtocolError, SendState, SubmitOutcome,
    DATA_FRAME_SIZE, EXTRA_BLOCK_PROBE_OFFSET, SELECTOR_DATA, SELECTOR_EXTRA,
};

type Calls = Arc<Mutex<Vec<(FrameClass, Vec<u8>)>>>;

struct RecordingDecoder {
    calls: Calls,
}

impl Decoder for RecordingDecoder {
    fn decode(&mut self, class: FrameClass, frame: &Frame) -> Vec<(String, String)> {
        self.calls
            .lock()
            .unwrap()
            .push((class, frame.payload().to_vec()));
        vec![("Payload_Len".to_string(), frame.payload().len().to_string())]
    }
}

struct TestEncoder;

impl CommandEncoder for TestEncoder {
    fn encode(&self, name: &str, value: &str) -> Option<Vec<u8>> {
        match name {
            "SetHeatpump" => {
                let state: u8 = value.parse().ok()?;
                Some(vec![0xF1, 0x02, 0x01, state + 1])
            }
            _ => None,
        }
    }
}

struct Rig {
    heatpump: MemoryBus,
    secondary: MemoryBus,
    calls: Calls,
    engine: ProtocolEngine,
    start: Instant,
}

impl Rig {
    fn new(config: EngineConfig) -> Self {
        let heatpump = MemoryBus::new();
        let secondary = MemoryBus::new();
        let calls: Calls = Arc::default();
        let bridged = config.has_secondary_bus;

        let mut engine = ProtocolEngine::new(
            config,
            Box::new(heatpump.clone()),
            Box::new(RecordingDecoder {
                calls: calls.clone(),
            }),
            Box::new(TestEncoder),
        );
        if bridged {
            engine = engine.with_secondary_bus(Box::new(secondary.clone()));
        }

        Self {
            heatpump,
            secondary,
            calls,
            engine,
            start: Instant::now(),
        }
    }

    fn at(&self, millis: u64) -> Instant {
        self.start + Duration::from_millis(millis)
    }

    fn decoded(&self) -> Vec<(FrameClass, Vec<u8>)> {
        self.calls.lock().unwrap().clone()
    }
}

fn data_frame(selector: u8, probe_value: u8) -> Vec<u8> {
    let mut bytes = vec![0x55u8; DATA_FRAME_SIZE - 1];
    bytes[0] = 0x71;
    bytes[1] = (DATA_FRAME_SIZE - 3) as u8;
    bytes[2] = 0x01;
    bytes[3] = selector;
    bytes[EXTRA_BLOCK_PROBE_OFFSET] = probe_value;
    with_checksum(&bytes)
}

#[test]
fn valid_reply_is_decoded_once() {
    let mut rig = Rig::new(EngineConfig {
        listen_only: true,
        ..Default::default()
    });

    rig.heatpump.inject(&with_checksum(&[0x71, 0x02, 0xAA, 0xBB]));
    let events = rig.engine.tick(rig.at(0));

    assert_eq!(rig.decoded(), vec![(FrameClass::Reply, vec![0xAA, 0xBB])]);
    assert_eq!(
        events[0],
        EngineEvent::Decoded {
            class: FrameClass::Reply,
            values: vec![("Payload_Len".to_string(), "2".to_string())],
        }
    );

    let stats = rig.engine.stats();
    assert_eq!(stats.good, 1);
    assert_eq!(stats.total, 1);
    assert!(rig.engine.cached(FrameClass::Reply).is_none());
}

#[test]
fn partial_reply_times_out_as_too_short() {
    let mut rig = Rig::new(EngineConfig::default());

    rig.engine.submit(&[0x71, 0x01, 0x10], rig.at(0)).unwrap();
    rig.heatpump.inject(&[0x71, 0x02, 0xAA]);
    rig.engine.tick(rig.at(10));
    assert_eq!(rig.engine.pending_bytes(), 3);

    rig.engine.tick(rig.at(2000));
    assert!(matches!(
        rig.engine.send_state(),
        SendState::AwaitingResponse { .. }
    ));

    rig.engine.tick(rig.at(2001));
    assert_eq!(rig.engine.send_state(), SendState::Idle);
    assert_eq!(rig.engine.pending_bytes(), 0);

    let stats = rig.engine.stats();
    assert_eq!(stats.too_short, 1);
    assert_eq!(stats.timeout, 0);
    assert!(rig.decoded().is_empty());
}

#[test]
fn silent_bus_counts_timeout_and_attempt() {
    let mut rig = Rig::new(EngineConfig::default());

    rig.engine.submit(&[0x71, 0x01, 0x10], rig.at(0)).unwrap();
    rig.engine.tick(rig.at(2500));

    let stats = rig.engine.stats();
    assert_eq!(stats.timeout, 1);
    assert_eq!(stats.total, 1);
    assert_eq!(stats.too_short, 0);
    assert_eq!(rig.engine.send_state(), SendState::Idle);
}

#[test]
fn buffered_command_follows_answer() {
    let mut rig = Rig::new(EngineConfig::default());
    let a = [0xF1, 0x02, 0x01, 0x02];
    let b = [0xF1, 0x02, 0x01, 0x03];

    assert_eq!(rig.engine.submit(&a, rig.at(0)), Ok(SubmitOutcome::Sent));
    assert_eq!(rig.engine.submit(&b, rig.at(0)), Ok(SubmitOutcome::Buffered));
    assert_eq!(rig.heatpump.take_written(), with_checksum(&a));
    assert_eq!(rig.engine.queued(), 1);

    rig.engine.tick(rig.at(5));
    assert!(rig.heatpump.take_written().is_empty());

    rig.heatpump.inject(&with_checksum(&[0x71, 0x01, 0x00]));
    rig.engine.tick(rig.at(50));

    assert_eq!(rig.heatpump.take_written(), with_checksum(&b));
    assert_eq!(rig.engine.queued(), 0);
    assert_eq!(
        rig.engine.send_state(),
        SendState::AwaitingResponse {
            sent_at: rig.at(50),
            origin: Origin::Local,
        }
    );
}

#[test]
fn corrupt_answer_frees_channel() {
    let mut rig = Rig::new(EngineConfig::default());
    rig.engine.submit(&[0x71, 0x01, 0x10], rig.at(0)).unwrap();

    rig.heatpump.inject(&[0x71, 0x02, 0xAA, 0xBB, 0x00]);
    let events = rig.engine.tick(rig.at(10));

    assert!(events.is_empty());
    assert_eq!(rig.engine.send_state(), SendState::Idle);
    assert_eq!(rig.engine.stats().bad_checksum, 1);
    assert!(rig.decoded().is_empty());
}

#[test]
fn garbage_does_not_answer_request() {
    let mut rig = Rig::new(EngineConfig::default());
    rig.engine.submit(&[0x71, 0x01, 0x10], rig.at(0)).unwrap();

    rig.heatpump.inject(&[0x00, 0x13, 0x37]);
    rig.engine.tick(rig.at(10));

    assert_eq!(rig.engine.stats().bad_header, 1);
    assert_eq!(rig.engine.stats().total, 0);
    assert!(matches!(
        rig.engine.send_state(),
        SendState::AwaitingResponse { .. }
    ));
}

#[test]
fn idle_engine_leaves_bus_unread() {
    let mut rig = Rig::new(EngineConfig::default());

    rig.heatpump.inject(&with_checksum(&[0x71, 0x01, 0x00]));
    rig.engine.tick(rig.at(0));

    assert_eq!(rig.heatpump.unread(), 4);
    assert_eq!(rig.engine.stats().total, 0);
}

#[test]
fn data_frame_is_cached_and_published() {
    let mut rig = Rig::new(EngineConfig::default());
    rig.engine.request_data(rig.at(0)).unwrap();
    assert_eq!(
        rig.heatpump.take_written(),
        with_checksum(&data_query(SELECTOR_DATA))
    );

    let frame = data_frame(SELECTOR_DATA, 7);
    rig.heatpump.inject(&frame);
    let events = rig.engine.tick(rig.at(100));

    assert_eq!(events.len(), 2);
    assert_eq!(
        events[1],
        EngineEvent::RawFrame {
            class: FrameClass::Data,
            bytes: frame.clone(),
        }
    );
    assert_eq!(
        rig.engine.cached(FrameClass::Data).map(|f| f.as_bytes().to_vec()),
        Some(frame)
    );
    // non-zero consumption field: no probe
    assert_eq!(rig.engine.extra_block(), ExtraBlock::Unknown);
    assert!(rig.heatpump.take_written().is_empty());
}

#[test]
fn extra_block_probed_once_then_polled_every_cycle() {
    let mut rig = Rig::new(EngineConfig::default());
    let probe = with_checksum(&data_query(SELECTOR_EXTRA));

    rig.engine.request_data(rig.at(0)).unwrap();
    rig.heatpump.take_written();
    rig.heatpump.inject(&data_frame(SELECTOR_DATA, 0));
    rig.engine.tick(rig.at(100));

    assert_eq!(rig.engine.extra_block(), ExtraBlock::Checked);
    assert_eq!(rig.heatpump.take_written(), probe);

    rig.heatpump.inject(&data_frame(SELECTOR_EXTRA, 0));
    let events = rig.engine.tick(rig.at(200));
    assert_eq!(rig.engine.extra_block(), ExtraBlock::Available);
    assert!(matches!(
        events[0],
        EngineEvent::Decoded {
            class: FrameClass::ExtraData,
            ..
        }
    ));
    assert!(rig.engine.cached(FrameClass::ExtraData).is_some());

    for cycle in 1..=3u64 {
        let t = cycle * 5000;
        rig.engine.request_data(rig.at(t)).unwrap();
        assert_eq!(
            rig.heatpump.take_written(),
            with_checksum(&data_query(SELECTOR_DATA))
        );
        assert_eq!(rig.engine.queued(), 1);

        rig.heatpump.inject(&data_frame(SELECTOR_DATA, 0));
        rig.engine.tick(rig.at(t + 100));
        // the queued extended request, never another probe
        assert_eq!(rig.heatpump.take_written(), probe);
        assert_eq!(rig.engine.queued(), 0);

        rig.heatpump.inject(&data_frame(SELECTOR_EXTRA, 0));
        rig.engine.tick(rig.at(t + 200));
        assert_eq!(rig.engine.send_state(), SendState::Idle);
    }
}

#[test]
fn failed_probe_is_not_retried() {
    let mut rig = Rig::new(EngineConfig::default());

    rig.engine.request_data(rig.at(0)).unwrap();
    rig.heatpump.inject(&data_frame(SELECTOR_DATA, 0));
    rig.engine.tick(rig.at(100));
    rig.heatpump.take_written();

    // probe goes unanswered
    rig.engine.tick(rig.at(2200));
    assert_eq!(rig.engine.stats().timeout, 1);

    rig.engine.request_data(rig.at(5000)).unwrap();
    rig.heatpump.take_written();
    rig.heatpump.inject(&data_frame(SELECTOR_DATA, 0));
    rig.engine.tick(rig.at(5100));

    assert_eq!(rig.engine.extra_block(), ExtraBlock::Checked);
    assert!(rig.heatpump.take_written().is_empty());
}

#[test]
fn optional_pcb_ack_cached() {
    let mut rig = Rig::new(EngineConfig::default());

    assert_eq!(
        rig.engine.request_optional_pcb(rig.at(0)),
        Ok(SubmitOutcome::Sent)
    );
    assert_eq!(
        rig.engine.request_optional_pcb(rig.at(1)),
        Err(ProtocolError::Busy)
    );
    assert_eq!(
        rig.heatpump.take_written(),
        with_checksum(&queries::OPTIONAL_PCB_QUERY)
    );

    let mut ack = vec![0u8; 19];
    ack[0] = 0x71;
    ack[1] = 0x11;
    ack[2] = 0x01;
    ack[3] = 0x50;
    rig.heatpump.inject(&with_checksum(&ack));
    rig.engine.tick(rig.at(100));

    assert!(rig.engine.cached(FrameClass::OptionalAck).is_some());
    assert_eq!(rig.decoded()[0].0, FrameClass::OptionalAck);
}

#[test]
fn listen_only_never_writes() {
    let mut rig = Rig::new(EngineConfig {
        listen_only: true,
        ..Default::default()
    });

    assert_eq!(
        rig.engine.request_data(rig.at(0)),
        Err(ProtocolError::ListenOnly)
    );
    assert!(rig.heatpump.take_written().is_empty());

    rig.heatpump.inject(&data_frame(SELECTOR_DATA, 0));
    rig.engine.tick(rig.at(10));
    assert!(rig.engine.cached(FrameClass::Data).is_some());
    // discovery needs to send, which listen only forbids
    assert!(rig.heatpump.take_written().is_empty());
}

#[test]
fn external_commands_go_through_gate() {
    let mut rig = Rig::new(EngineConfig::default());
    let gate = DispatchGate::new();

    let token = gate.try_acquire().unwrap();
    assert!(gate.try_acquire().is_none());

    let outcome = rig.engine.handle_command(
        &token,
        ExternalCommand::Named {
            name: "SetHeatpump".to_string(),
            value: "1".to_string(),
        },
        rig.at(0),
    );
    assert_eq!(outcome, Ok(SubmitOutcome::Sent));
    assert_eq!(
        rig.heatpump.take_written(),
        with_checksum(&[0xF1, 0x02, 0x01, 0x02])
    );

    let outcome = rig.engine.handle_command(
        &token,
        ExternalCommand::Named {
            name: "SetNothing".to_string(),
            value: "1".to_string(),
        },
        rig.at(1),
    );
    assert_eq!(
        outcome,
        Err(ProtocolError::UnknownCommand("SetNothing".to_string()))
    );

    let outcome =
        rig.engine
            .handle_command(&token, ExternalCommand::Raw(vec![0xF1, 0x00]), rig.at(2));
    assert_eq!(outcome, Ok(SubmitOutcome::Buffered));
    drop(token);

    assert!(gate.try_acquire().is_some());
}

#[test]
fn secondary_command_forwarded_and_answer_relayed() {
    let mut rig = Rig::new(EngineConfig {
        has_secondary_bus: true,
        ..Default::default()
    });

    let command = [0xF1, 0x02, 0x01, 0x02];
    rig.secondary.inject(&with_checksum(&command));
    rig.engine.tick(rig.at(0));

    assert_eq!(rig.heatpump.take_written(), with_checksum(&command));
    assert!(matches!(
        rig.engine.send_state(),
        SendState::AwaitingResponse {
            origin: Origin::Secondary,
            ..
        }
    ));

    let answer = data_frame(SELECTOR_DATA, 9);
    rig.heatpump.inject(&answer);
    rig.engine.tick(rig.at(100));

    assert_eq!(rig.secondary.take_written(), answer);
    assert!(rig.engine.cached(FrameClass::Data).is_some());
    assert_eq!(rig.decoded().len(), 1);
}

#[test]
fn secondary_query_served_from_cache() {
    let mut rig = Rig::new(EngineConfig {
        has_secondary_bus: true,
        ..Default::default()
    });

    // nothing cached yet: query is neither answered nor forwarded
    rig.secondary
        .inject(&with_checksum(&data_query(SELECTOR_DATA)));
    rig.engine.tick(rig.at(0));
    assert!(rig.secondary.take_written().is_empty());
    assert!(rig.heatpump.take_written().is_empty());

    rig.engine.request_data(rig.at(10)).unwrap();
    rig.heatpump.take_written();
    let frame = data_frame(SELECTOR_DATA, 9);
    rig.heatpump.inject(&frame);
    rig.engine.tick(rig.at(20));
    // our own poll is not relayed
    assert!(rig.secondary.take_written().is_empty());

    rig.secondary
        .inject(&with_checksum(&data_query(SELECTOR_DATA)));
    rig.engine.tick(rig.at(30));
    assert_eq!(rig.secondary.take_written(), frame);
    assert!(rig.heatpump.take_written().is_empty());
}

#[test]
fn handshake_relayed_not_decoded() {
    let mut rig = Rig::new(EngineConfig {
        has_secondary_bus: true,
        ..Default::default()
    });

    rig.engine.request_handshake(rig.at(0)).unwrap();
    assert_eq!(
        rig.heatpump.take_written(),
        with_checksum(&queries::INITIAL_QUERY)
    );

    let handshake = with_checksum(&[0x31, 0x05, 0x10, 0x01, 0x00, 0x00, 0x00]);
    rig.heatpump.inject(&handshake);
    let events = rig.engine.tick(rig.at(50));

    assert!(events.is_empty());
    assert!(rig.decoded().is_empty());
    assert_eq!(rig.secondary.take_written(), handshake);
    assert_eq!(rig.engine.send_state(), SendState::Idle);
}

#[test]
fn secondary_bus_ignored_when_disabled() {
    let secondary = MemoryBus::new();
    let mut engine = ProtocolEngine::new(
        EngineConfig::default(),
        Box::new(MemoryBus::new()),
        Box::new(RecordingDecoder {
            calls: Arc::default(),
        }),
        Box::new(TestEncoder),
    )
    .with_secondary_bus(Box::new(secondary.clone()));

    secondary.inject(&with_checksum(&[0xF1, 0x01, 0x00]));
    engine.tick(Instant::now());

    assert_eq!(secondary.unread(), 4);
    assert!(engine.secondary_stats().is_none());
}
