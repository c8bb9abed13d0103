//! Per-connection message dispatch.
//!
//! A [`ConnectionHandler`] turns client messages into registry calls and
//! replies. It is transport-agnostic: the transport feeds it text frames,
//! writes the returned replies, and forwards the [`SessionEvent`]s that
//! arrive on the receiver returned by [`ConnectionHandler::new`].
//!
//! Replies are returned directly while session output is queued, so a
//! transport that writes replies before draining the queue delivers
//! `terminal.ready` ahead of any replayed backlog.
//!
//! `terminal.cwd` has to wait on the shell, so its answer is produced by a
//! background task and arrives on the queue like output does. Input sent
//! meanwhile is handled straight away.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::messages::{terminal_id_hint, ClientMessage, ServerMessage};
use super::relay;
use super::state::{ConnectionState, TerminalState};
use super::validation::Limits;
use crate::error::RelayError;
use crate::session::{
    ConnectionId, CreateRequest, DirectoryTracker, EventSink, SessionEvent, SessionRegistry,
    TerminalKey, EVENT_QUEUE_CAPACITY,
};
use crate::Result;

/// Protocol state of one client connection.
pub struct ConnectionHandler {
    id: ConnectionId,
    state: ConnectionState,
    registry: Arc<SessionRegistry>,
    tracker: DirectoryTracker,
    limits: Limits,
    sink: EventSink,
    terminals: HashMap<String, TerminalState>,
    disconnected: bool,
}

impl ConnectionHandler {
    /// Create a handler and the queue its sessions' output arrives on.
    pub fn new(
        registry: Arc<SessionRegistry>,
        limits: Limits,
        tracker: DirectoryTracker,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (sink, events) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let handler = Self {
            id: ConnectionId::new(),
            state: ConnectionState::default(),
            registry,
            tracker,
            limits,
            sink,
            terminals: HashMap::new(),
            disconnected: false,
        };
        (handler, events)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Bind the verified identity. Must happen before any terminal message.
    pub fn authenticate(&mut self, identity: impl Into<String>) -> Result<()> {
        self.state.authenticate(identity)?;
        debug!(connection_id = %self.id, identity = self.identity().unwrap_or(""), "authenticated");
        Ok(())
    }

    pub fn identity(&self) -> Option<&str> {
        self.state.identity().ok()
    }

    pub fn terminal_state(&self, terminal_id: &str) -> Option<TerminalState> {
        self.terminals.get(terminal_id).copied()
    }

    /// Handle one text frame.
    pub async fn handle_text(&mut self, text: &str) -> Vec<ServerMessage> {
        match ClientMessage::parse(text) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                warn!(connection_id = %self.id, "unparseable message: {}", e);
                vec![ServerMessage::error(terminal_id_hint(text).as_deref(), &e)]
            }
        }
    }

    /// Handle one message. Failures become a `terminal.error` reply; they
    /// never end the connection.
    pub async fn handle(&mut self, message: ClientMessage) -> Vec<ServerMessage> {
        let terminal_id = message.terminal_id().map(str::to_string);
        match self.dispatch(message).await {
            Ok(replies) => replies,
            Err(e) => {
                warn!(
                    connection_id = %self.id,
                    terminal_id = terminal_id.as_deref().unwrap_or(""),
                    code = e.code(),
                    "request failed: {}",
                    e
                );
                vec![ServerMessage::error(terminal_id.as_deref(), &e)]
            }
        }
    }

    async fn dispatch(&mut self, message: ClientMessage) -> Result<Vec<ServerMessage>> {
        if matches!(message, ClientMessage::Ping) {
            return Ok(vec![ServerMessage::Pong]);
        }

        let identity = self.state.identity()?.to_string();
        if let Some(terminal_id) = message.terminal_id() {
            self.limits.terminal_id(terminal_id)?;
        }

        match message {
            ClientMessage::Create {
                client_terminal_id,
                cols,
                rows,
                resumption_token,
                env,
            } => {
                let key = TerminalKey::new(identity, client_terminal_id);
                let ready =
                    self.create(key, cols.as_ref(), rows.as_ref(), resumption_token, env)?;
                Ok(vec![ready])
            }
            ClientMessage::Input {
                client_terminal_id,
                data,
            } => {
                let text = self.limits.input(&data)?;
                let key = TerminalKey::new(identity, client_terminal_id);
                self.registry.write(&key, text.as_bytes())?;
                Ok(Vec::new())
            }
            ClientMessage::Resize {
                client_terminal_id,
                cols,
                rows,
            } => {
                let size = self.limits.dimensions(&cols, &rows)?;
                let key = TerminalKey::new(identity, client_terminal_id);
                self.registry.resize(&key, size)?;
                Ok(Vec::new())
            }
            ClientMessage::Close { client_terminal_id } => {
                let key = TerminalKey::new(identity, client_terminal_id);
                if !self.registry.destroy(&key, true) {
                    debug!(connection_id = %self.id, terminal = %key, "close of unknown terminal");
                }
                self.mark_closed(&key.terminal_id);
                Ok(Vec::new())
            }
            ClientMessage::Detach { client_terminal_id } => {
                let key = TerminalKey::new(identity, client_terminal_id);
                self.registry.destroy(&key, false);
                self.mark_closed(&key.terminal_id);
                Ok(Vec::new())
            }
            ClientMessage::Cwd { client_terminal_id } => {
                let key = TerminalKey::new(identity, client_terminal_id);
                if !self.registry.contains(&key) {
                    return Err(RelayError::SessionNotFound(key.to_string()));
                }
                self.spawn_cwd(key);
                Ok(Vec::new())
            }
            ClientMessage::Ping => Ok(vec![ServerMessage::Pong]),
        }
    }

    fn create(
        &mut self,
        key: TerminalKey,
        cols: Option<&Value>,
        rows: Option<&Value>,
        token: Option<String>,
        env: HashMap<String, String>,
    ) -> Result<ServerMessage> {
        let size = self.limits.optional_dimensions(cols, rows)?;

        let mut state = match self.terminals.get(&key.terminal_id) {
            Some(previous) => *previous,
            None => TerminalState::Closed,
        };
        state.transition_to(TerminalState::Created)?;

        let attachment = self.registry.create_or_reuse(CreateRequest {
            connection: self.id,
            sink: self.sink.clone(),
            key: key.clone(),
            token,
            size,
            env,
        })?;

        if let Some(events) = attachment.events {
            relay::spawn(
                Arc::clone(&self.registry),
                key.clone(),
                attachment.session_id,
                events,
            );
        }

        state.transition_to(TerminalState::Ready)?;
        self.terminals.insert(key.terminal_id.clone(), state);

        info!(
            connection_id = %self.id,
            identity = %key.identity,
            terminal_id = %key.terminal_id,
            session_id = %attachment.session_id,
            pid = attachment.pid,
            is_new = attachment.is_new,
            "terminal ready"
        );

        Ok(ServerMessage::Ready {
            client_terminal_id: key.terminal_id,
            resumption_token: attachment.token.as_str().to_string(),
            is_new: attachment.is_new,
            pid: attachment.pid,
        })
    }

    fn spawn_cwd(&self, key: TerminalKey) {
        let registry = Arc::clone(&self.registry);
        let tracker = self.tracker.clone();
        let sink = self.sink.clone();
        let connection = self.id;

        tokio::spawn(async move {
            let terminal_id = key.terminal_id.clone();
            let event = match tracker.probe_cwd(&registry, &key).await {
                Ok(path) => SessionEvent::Cwd { terminal_id, path },
                Err(e) => {
                    warn!(
                        connection_id = %connection,
                        terminal = %key,
                        code = e.code(),
                        "cwd request failed: {}",
                        e
                    );
                    SessionEvent::Failed {
                        terminal_id,
                        code: e.code(),
                        message: e.to_string(),
                    }
                }
            };
            if sink.send(event).await.is_err() {
                debug!(connection_id = %connection, terminal = %key, "cwd reply dropped");
            }
        });
    }

    /// Convert queued session output into a message for the client.
    pub fn on_event(&mut self, event: SessionEvent) -> ServerMessage {
        if let SessionEvent::Exit { terminal_id, .. } = &event {
            self.mark_closed(terminal_id);
        }
        ServerMessage::from(event)
    }

    fn mark_closed(&mut self, terminal_id: &str) {
        if let Some(state) = self.terminals.get_mut(terminal_id) {
            if state.transition_to(TerminalState::Closed).is_err() {
                debug!(connection_id = %self.id, terminal_id, state = ?state, "already closed");
            }
        }
    }

    /// Connection teardown: unbind every session, keep the processes.
    pub fn disconnect(&mut self) -> usize {
        if self.disconnected {
            return 0;
        }
        self.disconnected = true;

        let attached: Vec<String> = self
            .terminals
            .iter()
            .filter(|(_, state)| state.is_attached())
            .map(|(id, _)| id.clone())
            .collect();
        for terminal_id in attached {
            self.mark_closed(&terminal_id);
        }
        self.registry.disconnect(self.id)
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for ConnectionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandler")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("terminals", &self.terminals)
            .finish()
    }
}
