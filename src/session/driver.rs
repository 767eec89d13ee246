//! Runs a [`Session`] against a connection.
//!
//! The connection is any stream of inbound text frames plus a sink of
//! outbound ones. Outbound frames are sent one at a time and awaited, so a
//! subscriber that stops reading pauses delivery instead of growing a buffer.
//! A paused send still yields to the stop signal.

use std::fmt::Display;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use offramp_protocol::{decode, encode, Event};
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::session::{Session, SessionControl};

/// Bound for the best-effort `ERROR` event after termination.
const FINAL_EVENT_TIMEOUT: Duration = Duration::from_secs(5);

enum Action {
    Inbound(String),
    Deliver(Result<Vec<Event>>),
    Stop(SessionError),
    Disconnected,
}

/// Drive `session` until the client disconnects or the session terminates.
///
/// Always releases the session's consumer before returning. `Ok` means the
/// client closed the connection; every other ending is the returned error,
/// which is also reported to the client as an `ERROR` event when possible.
pub async fn drive<I, E, O>(
    session: &mut Session,
    control: &SessionControl,
    inbound: &mut I,
    outbound: &mut O,
) -> Result<()>
where
    I: Stream<Item = std::result::Result<String, E>> + Unpin,
    E: Into<SessionError>,
    O: Sink<String> + Unpin,
    O::Error: Display,
{
    let mut stalled = false;
    let outcome = run(session, control, inbound, outbound, &mut stalled).await;
    session.close().await;

    match &outcome {
        Ok(()) => info!(session = %session.id(), "Client closed the session"),
        Err(e) => {
            info!(session = %session.id(), "Session terminated: {e}");
            if stalled {
                debug!(session = %session.id(), "Client stopped reading, skipping final ERROR event");
            } else if e.reportable() {
                let report = send(outbound, Event::error(e.to_string()));
                if tokio::time::timeout(FINAL_EVENT_TIMEOUT, report).await.is_err() {
                    debug!(session = %session.id(), "Final ERROR event not delivered in time");
                }
            }
        }
    }
    outcome
}

async fn run<I, E, O>(
    session: &mut Session,
    control: &SessionControl,
    inbound: &mut I,
    outbound: &mut O,
    stalled: &mut bool,
) -> Result<()>
where
    I: Stream<Item = std::result::Result<String, E>> + Unpin,
    E: Into<SessionError>,
    O: Sink<String> + Unpin,
    O::Error: Display,
{
    loop {
        let action = tokio::select! {
            biased;
            reason = control.stopped() => Action::Stop(reason),
            frame = inbound.next() => match frame {
                Some(Ok(text)) => Action::Inbound(text),
                Some(Err(e)) => Action::Stop(e.into()),
                None => Action::Disconnected,
            },
            events = session.step(), if session.state().is_streaming() => Action::Deliver(events),
        };

        match action {
            Action::Inbound(text) => {
                let event = decode(&text).map_err(SessionError::Decode)?;
                if matches!(event, Event::Request(_) | Event::Commit(_)) {
                    control.touch();
                }
                let events = session.handle(event).await?;
                send_all(outbound, control, events, stalled).await?;
            }
            Action::Deliver(events) => send_all(outbound, control, events?, stalled).await?,
            Action::Stop(e) => return Err(e),
            Action::Disconnected => return Ok(()),
        }
    }
}

/// Send `events` in order, giving up when the session is told to stop.
async fn send_all<O>(
    outbound: &mut O,
    control: &SessionControl,
    events: Vec<Event>,
    stalled: &mut bool,
) -> Result<()>
where
    O: Sink<String> + Unpin,
    O::Error: Display,
{
    for event in events {
        tokio::select! {
            biased;
            sent = send(outbound, event) => sent?,
            reason = control.stopped() => {
                *stalled = true;
                return Err(reason);
            }
        }
    }
    Ok(())
}

async fn send<O>(outbound: &mut O, event: Event) -> Result<()>
where
    O: Sink<String> + Unpin,
    O::Error: Display,
{
    let text = encode(&event).map_err(|e| {
        warn!("Failed to encode {} event: {e}", event.event_type());
        SessionError::Internal(e.to_string())
    })?;
    outbound
        .send(text)
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))
}
