//! WebSocket transport for the terminal protocol.
//!
//! The caller is authenticated during the HTTP upgrade, so a rejected
//! token gets a plain 401 and never reaches the protocol handler. After the
//! upgrade every text frame is one client message, and every server message
//! is one text frame.
//!
//! The server pings on a fixed interval. A client that sends nothing at all,
//! pongs included, for an interval plus the timeout is dropped, as is one
//! that stops taking writes. Its sessions detach and wait for a resume.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::auth::Identity;
use super::handlers::AppState;
use crate::protocol::{ConnectionHandler, ServerMessage};

type FrameSink = SplitSink<WebSocket, Message>;

/// Connection liveness settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    /// Time between server pings.
    pub interval: Duration,
    /// How long a write may block, and how late a client may be past the
    /// interval before it counts as gone.
    pub timeout: Duration,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(25),
            timeout: Duration::from_secs(20),
        }
    }
}

impl Keepalive {
    fn deadline(&self) -> Duration {
        self.interval + self.timeout
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    Identity(identity): Identity,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

/// Handle WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState, identity: String) {
    let (mut handler, mut events) =
        ConnectionHandler::new(Arc::clone(&state.registry), state.limits, state.tracker());
    if let Err(e) = handler.authenticate(identity.as_str()) {
        warn!(connection_id = %handler.id(), "cannot bind identity: {}", e);
        return;
    }
    info!(connection_id = %handler.id(), identity = %identity, "connection opened");

    let keepalive = state.keepalive;
    let (mut sink, mut stream) = socket.split();
    let mut ping = tokio::time::interval(keepalive.interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ping.tick().await;
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            frame = stream.next() => {
                last_seen = Instant::now();
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Ping(data))) => {
                        if send_frame(&mut sink, Message::Pong(data), keepalive).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(connection_id = %handler.id(), "websocket error: {}", e);
                        break;
                    }
                };

                // Replies go out before anything queued on `events`.
                let replies = handler.handle_text(text.as_str()).await;
                if send_all(&mut sink, &replies, keepalive).await.is_err() {
                    break;
                }
            }
            Some(event) = events.recv() => {
                let message = handler.on_event(event);
                if send(&mut sink, &message, keepalive).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                let silent = last_seen.elapsed();
                if silent > keepalive.deadline() {
                    info!(
                        connection_id = %handler.id(),
                        silent_ms = silent.as_millis() as u64,
                        "client unresponsive"
                    );
                    break;
                }
                if send_frame(&mut sink, Message::Ping(Default::default()), keepalive)
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }

    let detached = handler.disconnect();
    info!(connection_id = %handler.id(), identity = %identity, detached, "connection closed");
}

/// Write one frame, giving up after the keepalive timeout.
async fn send_frame(
    sink: &mut FrameSink,
    frame: Message,
    keepalive: Keepalive,
) -> Result<(), axum::Error> {
    match tokio::time::timeout(keepalive.timeout, sink.send(frame)).await {
        Ok(result) => result,
        Err(elapsed) => {
            debug!("websocket write timed out");
            Err(axum::Error::new(elapsed))
        }
    }
}

async fn send(
    sink: &mut FrameSink,
    message: &ServerMessage,
    keepalive: Keepalive,
) -> Result<(), axum::Error> {
    match message.to_json() {
        Ok(json) => send_frame(sink, Message::Text(json.into()), keepalive).await,
        Err(e) => {
            warn!("dropping unserializable message: {}", e);
            Ok(())
        }
    }
}

async fn send_all(
    sink: &mut FrameSink,
    messages: &[ServerMessage],
    keepalive: Keepalive,
) -> Result<(), axum::Error> {
    for message in messages {
        send(sink, message, keepalive).await?;
    }
    Ok(())
}
