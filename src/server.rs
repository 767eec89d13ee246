//! WebSocket listener.
//!
//! Each connection to `/offramp/v2/roads/{road}/streams/{stream}/messages`
//! becomes one session. Text frames carry exactly one protocol event each.

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{future, SinkExt, StreamExt};
use offramp_protocol::{encode, Event, ProtocolError};
use road_consumer::OffsetPolicy;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::{close_code, Result, SessionError};
use crate::manager::SessionManager;
use crate::session::StreamTarget;

/// Longest close reason a control frame can carry.
const MAX_CLOSE_REASON: usize = 123;

/// Bound for frames sent outside a session, so a client that stopped reading
/// cannot hold the connection open.
const FINAL_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct StreamParams {
    #[serde(rename = "defaultOffset")]
    default_offset: Option<String>,
}

pub fn router(manager: Arc<SessionManager>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/sessions", get(list_sessions))
        .route(
            "/offramp/v2/roads/:road/streams/:stream/messages",
            get(messages),
        )
        .with_state(manager)
}

/// Accept connections until `signal` resolves, then close every session.
pub async fn serve<F>(listener: TcpListener, manager: Arc<SessionManager>, signal: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(manager.clone());
    let shutdown_manager = manager.clone();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            // Open sockets keep the server alive until their sessions end.
            shutdown_manager.shutdown().await;
        })
        .await?;

    info!("Listener stopped");
    Ok(())
}

async fn health(State(manager): State<Arc<SessionManager>>) -> Json<serde_json::Value> {
    let status = if manager.is_shutting_down() {
        "shutting_down"
    } else {
        "ok"
    };
    Json(json!({
        "status": status,
        "sessions": manager.active(),
    }))
}

async fn list_sessions(State(manager): State<Arc<SessionManager>>) -> impl IntoResponse {
    Json(manager.sessions())
}

async fn messages(
    State(manager): State<Arc<SessionManager>>,
    Path((road, stream)): Path<(String, String)>,
    Query(params): Query<StreamParams>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let policy = match params.default_offset.as_deref() {
        None => OffsetPolicy::default(),
        Some(raw) => match raw.parse::<OffsetPolicy>() {
            Ok(policy) => policy,
            Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
        },
    };
    if manager.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down").into_response();
    }
    let Some(ws) = ws else {
        return (StatusCode::UPGRADE_REQUIRED, "WebSocket upgrade required").into_response();
    };

    let target = StreamTarget::new(road, stream, policy);
    ws.on_upgrade(move |socket| handle_socket(socket, manager, target))
}

async fn handle_socket(socket: WebSocket, manager: Arc<SessionManager>, target: StreamTarget) {
    let (sink, stream) = socket.split();
    let mut inbound = stream.filter_map(|frame| future::ready(text_frame(frame)));
    let mut outbound =
        sink.with(|text: String| future::ready(Ok::<_, axum::Error>(Message::Text(text))));

    let outcome = match manager.create(target.clone()) {
        Ok((session, control)) => {
            manager
                .serve(session, control, &mut inbound, &mut outbound)
                .await
        }
        Err(e) => {
            warn!(
                road = %target.road,
                stream = %target.stream,
                "Session refused: {e}"
            );
            if let Ok(text) = encode(&Event::error(e.to_string())) {
                let _ = tokio::time::timeout(FINAL_FRAME_TIMEOUT, outbound.send(text)).await;
            }
            Err(e)
        }
    };

    let frame = close_frame(&outcome);
    debug!(code = frame.code, "Closing connection");
    let mut sink = outbound.into_inner();
    match tokio::time::timeout(FINAL_FRAME_TIMEOUT, sink.send(Message::Close(Some(frame)))).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Close frame not delivered: {e}"),
        Err(_) => debug!("Close frame not delivered in time"),
    }
}

/// Keep data frames, decoding binary ones as UTF-8. Control frames are handled
/// by the WebSocket layer.
fn text_frame(frame: std::result::Result<Message, axum::Error>) -> Option<Result<String>> {
    match frame {
        Ok(Message::Text(text)) => Some(Ok(text)),
        Ok(Message::Binary(data)) => Some(String::from_utf8(data).map_err(|e| {
            SessionError::Decode(ProtocolError::Malformed(format!(
                "binary frame is not valid UTF-8: {e}"
            )))
        })),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Close(_)) => None,
        Err(e) => Some(Err(SessionError::Transport(e.to_string()))),
    }
}

fn close_frame(outcome: &Result<()>) -> CloseFrame<'static> {
    match outcome {
        Ok(()) => CloseFrame {
            code: close_code::NORMAL,
            reason: Cow::Borrowed(""),
        },
        Err(e) => CloseFrame {
            code: e.close_code(),
            reason: Cow::Owned(close_reason(e)),
        },
    }
}

fn close_reason(e: &SessionError) -> String {
    let mut reason = e.to_string();
    if reason.len() > MAX_CLOSE_REASON {
        let mut end = MAX_CLOSE_REASON;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}
