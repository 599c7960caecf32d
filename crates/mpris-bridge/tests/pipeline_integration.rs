//! Integration tests for the full stdin → bus → stdout pipeline.
//!
//! A scripted browser stream feeds the frame pump, the event loop serves bus
//! calls in between, and commands are decoded back out of the bytes written
//! to the outbound pipe.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use mpris_bridge::application::session_manager::SessionManager;
use mpris_bridge::domain::BridgeConfig;
use mpris_bridge::infrastructure::bus::{CallOutcome, LocalBus};
use mpris_bridge::infrastructure::event_loop::run;
use mpris_bridge::infrastructure::stdio::{spawn_frame_pump, FrameSink};
use mpris_bridge_core::protocol::frame::{decode_frame, encode_frame};
use mpris_bridge_core::schema::mpris::{MPRIS_SCHEMA, OBJECT_PATH, PLAYER_INTERFACE};
use mpris_bridge_core::{Command, FrameReader, SchemaRegistry, TabId, Value};
use serde_json::json;
use tokio::sync::mpsc;

const BASE: &str = "org.mpris.MediaPlayer2.browser_tab";

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Outbound pipe whose bytes stay readable after the sink is moved away.
#[derive(Clone, Default)]
struct SharedPipe(Rc<RefCell<Vec<u8>>>);

impl Write for SharedPipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn frame(json: &str) -> Vec<u8> {
    encode_frame(json.as_bytes()).unwrap()
}

fn decode_commands(mut bytes: &[u8]) -> Vec<Command> {
    let mut commands = Vec::new();
    while !bytes.is_empty() {
        let (payload, used) = decode_frame(bytes).unwrap();
        commands.push(serde_json::from_slice(payload).unwrap());
        bytes = &bytes[used..];
    }
    commands
}

async fn until(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::task::yield_now().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_bus_call_becomes_outbound_frame() {
    // Arrange
    let stdin = tokio_test::io::Builder::new()
        .read(&frame(r#"{"type":"change","tabId":7,"data":{"title":"Intro"}}"#))
        .wait(Duration::from_millis(200))
        .build();
    let stdout = SharedPipe::default();
    let bus = LocalBus::new();
    let (calls_tx, calls_rx) = mpsc::unbounded_channel();
    bus.attach(calls_tx);
    let mut manager = SessionManager::new(
        bus.clone(),
        Arc::new(SchemaRegistry::parse(MPRIS_SCHEMA).unwrap()),
        Arc::new(BridgeConfig::default()),
        Rc::new(FrameSink::new(stdout.clone())),
    );
    let frames = spawn_frame_pump(FrameReader::new(stdin));

    // Act
    let driver = async {
        until(|| bus.is_owned(BASE)).await;
        let seek = bus
            .call(
                BASE,
                OBJECT_PATH,
                PLAYER_INTERFACE,
                "Seek",
                vec![Value::Int64(-5_000_000)],
            )
            .unwrap();
        until(|| bus.reply_to(seek).is_some()).await;
        seek
    };
    let (result, seek) = tokio::join!(run(&mut manager, frames, calls_rx, None), driver);

    // Assert
    assert!(result.is_ok());
    assert_eq!(bus.reply_to(seek), Some(CallOutcome::Return(vec![])));
    assert!(bus.owned_names().is_empty(), "hang-up unpublishes");
    assert_eq!(
        decode_commands(&stdout.0.borrow()),
        vec![Command::with_data(TabId(7), "seek", json!(-5_000_000))]
    );
}

#[tokio::test]
async fn test_truncated_stream_fails_run_and_unpublishes() {
    // Arrange
    let mut bytes = frame(r#"{"type":"change","tabId":1,"data":{}}"#);
    bytes.extend_from_slice(&9i32.to_ne_bytes());
    bytes.push(b'{');
    let stdin = tokio_test::io::Builder::new().read(&bytes).build();
    let bus = LocalBus::new();
    let (_calls_tx, calls_rx) = mpsc::unbounded_channel();
    let mut manager = SessionManager::new(
        bus.clone(),
        Arc::new(SchemaRegistry::parse(MPRIS_SCHEMA).unwrap()),
        Arc::new(BridgeConfig::default()),
        Rc::new(FrameSink::new(SharedPipe::default())),
    );

    // Act
    let result = run(
        &mut manager,
        spawn_frame_pump(FrameReader::new(stdin)),
        calls_rx,
        None,
    )
    .await;

    // Assert
    assert!(result.is_err());
    assert!(manager.is_empty());
    assert!(bus.owned_names().is_empty());
}
