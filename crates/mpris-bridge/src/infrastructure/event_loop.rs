//! The bridge's single actor loop.
//!
//! Two producers feed one consumer:
//!
//! ```text
//! frame pump ──Inbound──┐
//!                       ├──► run() ──► SessionManager
//! bus ───────MethodCall─┘
//! ```
//!
//! `run` owns the [`SessionManager`] for its whole life and handles one item
//! at a time, so no two handlers ever run concurrently.  When a read timeout
//! is configured, a timer tick on the same loop expires overdue reads.

use std::time::{Duration, Instant};

use mpris_bridge_core::{decode_inbound, FramingError};
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::bus::{BusProvider, MethodCall};
use super::stdio::Inbound;
use crate::application::session_manager::SessionManager;

/// Smallest expiry check period.
const MIN_TICK: Duration = Duration::from_millis(10);

/// Runs until the browser hangs up or the frame stream breaks.
///
/// Every session is unpublished before returning.
///
/// # Errors
///
/// Returns the [`FramingError`] that broke the stream.  A message that is
/// framed correctly but is not a valid message only logs a warning.
pub async fn run<P>(
    manager: &mut SessionManager<P>,
    mut frames: mpsc::Receiver<Inbound>,
    mut calls: mpsc::UnboundedReceiver<MethodCall>,
    read_timeout: Option<Duration>,
) -> Result<(), FramingError>
where
    P: BusProvider,
    P::Connection: 'static,
{
    let mut ticker = read_timeout.map(|timeout| {
        let mut ticker = interval((timeout / 2).max(MIN_TICK));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        tokio::select! {
            inbound = frames.recv() => match inbound {
                Some(Inbound::Frame(payload)) => handle_frame(manager, &payload),
                Some(Inbound::HangUp) | None => {
                    info!("browser closed the stream");
                    manager.shutdown();
                    return Ok(());
                }
                Some(Inbound::Failed(e)) => {
                    error!("frame stream broken: {e}");
                    manager.shutdown();
                    return Err(e);
                }
            },
            Some(call) = calls.recv() => manager.route_call(call),
            _ = tick(&mut ticker) => {
                let expired = manager.expire_pending_reads(Instant::now());
                if expired > 0 {
                    debug!("expired {expired} pending reads");
                }
            }
        }
    }
}

fn handle_frame<P>(manager: &mut SessionManager<P>, payload: &[u8])
where
    P: BusProvider,
    P::Connection: 'static,
{
    match decode_inbound(payload) {
        Ok(msg) => manager.on_inbound_message(msg),
        Err(e) => warn!("dropping inbound message: {e}"),
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
