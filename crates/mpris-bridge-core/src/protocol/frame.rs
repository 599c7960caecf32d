//! Length-prefixed frame codec for the browser native-messaging pipe.
//!
//! Wire format:
//! ```text
//! [length:4][payload:length]
//! ```
//! `length` is a signed 32-bit integer in the host's native byte order and
//! counts the payload bytes only.  The payload is UTF-8 JSON.  There is no
//! terminator; the next frame starts immediately after the payload.
//!
//! # Atomicity
//!
//! A frame is the atomic unit of the protocol: no partial frame is ever handed
//! to a caller.  [`FrameReader::read_frame`] either returns a complete payload,
//! reports a clean end of stream at a frame boundary, or fails with a
//! [`FramingError`].  A framing error means the byte stream can no longer be
//! trusted and the channel must be closed.
//!
//! # Latency
//!
//! [`FrameWriter`] flushes after every frame.  The browser side is
//! interactive (play/pause from a media key) and waits for nothing else, so a
//! frame sitting in a buffer is a frame the user perceives as lag.

use std::io::{self, Write};

use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

/// Size of the length prefix in bytes.
pub const HEADER_SIZE: usize = 4;

/// Largest payload the codec accepts in either direction (64 MiB).
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Errors that make the frame stream unusable.
#[derive(Debug, Error)]
pub enum FramingError {
    /// The stream ended inside the 4-byte length prefix.
    #[error("truncated frame header: need {HEADER_SIZE} bytes, got {available}")]
    TruncatedHeader { available: usize },

    /// The stream ended before the declared number of payload bytes arrived.
    #[error("truncated frame body: header declares {declared} bytes, got {available}")]
    TruncatedBody { declared: usize, available: usize },

    /// The length prefix is negative.
    #[error("negative frame length: {0}")]
    NegativeLength(i32),

    /// The length prefix exceeds [`MAX_FRAME_LEN`].
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN}-byte limit")]
    Oversized(usize),

    /// The underlying stream failed.
    #[error("I/O error on frame stream: {0}")]
    Io(#[from] io::Error),
}

// ── Buffer-level codec ────────────────────────────────────────────────────────

/// Prepends the length header to `payload`.
///
/// # Errors
///
/// Returns [`FramingError::Oversized`] if the payload is longer than
/// [`MAX_FRAME_LEN`].
///
/// # Examples
///
/// ```rust
/// use mpris_bridge_core::protocol::frame::{decode_frame, encode_frame};
///
/// let bytes = encode_frame(br#"{"cmd":"play"}"#).unwrap();
/// let (payload, consumed) = decode_frame(&bytes).unwrap();
/// assert_eq!(payload, br#"{"cmd":"play"}"#);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FramingError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(FramingError::Oversized(payload.len()));
    }
    // MAX_FRAME_LEN < i32::MAX, so the cast cannot truncate.
    let length = payload.len() as i32;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&length.to_ne_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Decodes one frame from the beginning of `bytes`.
///
/// Returns the payload slice and the total number of bytes consumed (header +
/// payload), so the caller can advance their read cursor.
///
/// # Errors
///
/// - [`FramingError::TruncatedHeader`] if fewer than 4 bytes are available.
/// - [`FramingError::TruncatedBody`] if fewer than `length` payload bytes follow.
/// - [`FramingError::NegativeLength`] / [`FramingError::Oversized`] for a
///   length prefix outside `0..=MAX_FRAME_LEN`.
pub fn decode_frame(bytes: &[u8]) -> Result<(&[u8], usize), FramingError> {
    if bytes.len() < HEADER_SIZE {
        return Err(FramingError::TruncatedHeader {
            available: bytes.len(),
        });
    }

    let declared = payload_len([bytes[0], bytes[1], bytes[2], bytes[3]])?;
    let available = bytes.len() - HEADER_SIZE;
    if available < declared {
        return Err(FramingError::TruncatedBody {
            declared,
            available,
        });
    }

    let total = HEADER_SIZE + declared;
    Ok((&bytes[HEADER_SIZE..total], total))
}

fn payload_len(header: [u8; HEADER_SIZE]) -> Result<usize, FramingError> {
    let raw = i32::from_ne_bytes(header);
    let len = usize::try_from(raw).map_err(|_| FramingError::NegativeLength(raw))?;
    if len > MAX_FRAME_LEN {
        return Err(FramingError::Oversized(len));
    }
    Ok(len)
}

// ── Streaming reader ──────────────────────────────────────────────────────────

/// Reads complete frames from an async byte stream (stdin in production).
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wraps `inner`.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Waits until one complete frame is available and returns its payload.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between two frames,
    /// which is how the browser signals that the extension went away.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError`] if the stream ends in the middle of a frame,
    /// the length prefix is out of range, or the read itself fails.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        let mut header = [0u8; HEADER_SIZE];
        let got = read_full(&mut self.inner, &mut header).await?;
        if got == 0 {
            return Ok(None);
        }
        if got < HEADER_SIZE {
            return Err(FramingError::TruncatedHeader { available: got });
        }

        let declared = payload_len(header)?;
        let mut payload = vec![0u8; declared];
        let got = read_full(&mut self.inner, &mut payload).await?;
        if got < declared {
            return Err(FramingError::TruncatedBody {
                declared,
                available: got,
            });
        }

        Ok(Some(payload))
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Fills `buf` unless the stream ends first; returns the number of bytes read.
///
/// Unlike `read_exact`, a short read at EOF is reported as a count rather than
/// an error, so the caller can tell "clean EOF" from "EOF mid-frame".
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// Writes frames to a blocking byte sink (stdout in production).
///
/// Writes are synchronous and never wait for a reply; every frame is flushed
/// before the call returns.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    /// Wraps `inner`.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes the length header followed by `payload`, then flushes.
    ///
    /// Returns the total number of bytes written (header + payload).
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::Oversized`] for payloads above
    /// [`MAX_FRAME_LEN`] and [`FramingError::Io`] if the sink fails.
    pub fn write_frame(&mut self, payload: &[u8]) -> Result<usize, FramingError> {
        let frame = encode_frame(payload)?;
        self.inner.write_all(&frame)?;
        self.inner.flush()?;
        Ok(frame.len())
    }

    /// Serializes `message` as JSON and writes it as one frame.
    ///
    /// A message that cannot be serialized is dropped: a warning is logged and
    /// `Ok(0)` is returned.  Callers must treat `0` as "not delivered" and must
    /// not retry.
    ///
    /// # Errors
    ///
    /// Same as [`FrameWriter::write_frame`].
    pub fn send<T: Serialize>(&mut self, message: &T) -> Result<usize, FramingError> {
        let payload = match serde_json::to_vec(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("dropping outbound message that cannot be encoded: {e}");
                return Ok(0);
            }
        };
        self.write_frame(&payload)
    }

    /// Returns a reference to the wrapped sink.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Returns the wrapped sink.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
