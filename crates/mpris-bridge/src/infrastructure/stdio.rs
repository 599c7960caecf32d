//! Frame plumbing between the browser pipe and the event loop.
//!
//! ```text
//! stdin ──FrameReader──► pump task ──mpsc(128)──► event loop
//! event loop ──CommandSink──► FrameSink ──FrameWriter──► stdout
//! ```
//!
//! The pump runs as its own task so a slow or silent browser never blocks
//! bus calls.  Outbound writes stay on the loop thread and are synchronous.

use std::cell::RefCell;
use std::io::{self, Write};

use mpris_bridge_core::{Command, FrameReader, FrameWriter, FramingError};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::application::player::CommandSink;

/// Capacity of the inbound frame queue.
pub const INBOX_CAPACITY: usize = 128;

/// One item from the frame pump.
#[derive(Debug)]
pub enum Inbound {
    /// A complete frame payload.
    Frame(Vec<u8>),
    /// The browser closed the stream at a frame boundary.
    HangUp,
    /// The stream broke; nothing further will arrive.
    Failed(FramingError),
}

/// Reads frames on a background task and queues them for the event loop.
///
/// The task ends after queueing [`Inbound::HangUp`] or [`Inbound::Failed`],
/// or when the receiver is dropped.
pub fn spawn_frame_pump<R>(mut reader: FrameReader<R>) -> mpsc::Receiver<Inbound>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
    tokio::spawn(async move {
        loop {
            let item = match reader.read_frame().await {
                Ok(Some(payload)) => Inbound::Frame(payload),
                Ok(None) => Inbound::HangUp,
                Err(e) => Inbound::Failed(e),
            };
            let last = !matches!(item, Inbound::Frame(_));
            if tx.send(item).await.is_err() {
                debug!("event loop gone, frame pump stopping");
                break;
            }
            if last {
                break;
            }
        }
    });
    rx
}

/// [`CommandSink`] that writes each command as one frame.
pub struct FrameSink<W: Write> {
    writer: RefCell<FrameWriter<W>>,
}

impl<W: Write> FrameSink<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: RefCell::new(FrameWriter::new(inner)),
        }
    }

    /// Returns the wrapped sink.
    pub fn into_inner(self) -> W {
        self.writer.into_inner().into_inner()
    }
}

impl FrameSink<io::Stdout> {
    /// Sink writing to the process's stdout.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> CommandSink for FrameSink<W> {
    fn send(&self, command: &Command) -> usize {
        match self.writer.borrow_mut().send(command) {
            Ok(written) => written,
            Err(e) => {
                warn!(tab = %command.tab_id, "command {} not delivered: {e}", command.cmd);
                0
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
