//! The session record.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};

use super::{ConnectionId, ResumptionToken, SessionId, TerminalKey};
use crate::pty::{ExitStatus, PtyProcess};

/// Capacity of the per-session output tap used by directory probes.
const TAP_CAPACITY: usize = 64;

/// Events a connection's queue holds before output waits for the client.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Output routed to the connection a session is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Data {
        terminal_id: String,
        data: String,
    },
    Exit {
        terminal_id: String,
        status: ExitStatus,
    },
    /// Working directory reply.
    Cwd {
        terminal_id: String,
        path: String,
    },
    /// A deferred request failed.
    Failed {
        terminal_id: String,
        code: &'static str,
        message: String,
    },
}

/// Sending half of a connection's event queue.
pub type EventSink = mpsc::Sender<SessionEvent>;

/// Outcome of [`Session::route_output`].
#[derive(Debug)]
pub(crate) enum Routed {
    /// Sent, or kept in the backlog.
    Done,
    /// The bound connection's queue is full; `data` was not taken.
    Full { sink: EventSink, data: String },
}

/// The connection currently receiving a session's output.
#[derive(Debug, Clone)]
pub struct Binding {
    pub connection: ConnectionId,
    pub sink: EventSink,
}

/// Output produced while no connection was bound.
///
/// Bounded by total bytes; the oldest chunks go first.
#[derive(Debug)]
pub struct Backlog {
    chunks: VecDeque<String>,
    bytes: usize,
    limit: usize,
}

impl Backlog {
    pub fn new(limit: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            bytes: 0,
            limit,
        }
    }

    pub fn push(&mut self, mut chunk: String) {
        if self.limit == 0 || chunk.is_empty() {
            return;
        }
        if chunk.len() > self.limit {
            let mut cut = chunk.len() - self.limit;
            while !chunk.is_char_boundary(cut) {
                cut += 1;
            }
            chunk.drain(..cut);
        }

        self.bytes += chunk.len();
        self.chunks.push_back(chunk);
        while self.bytes > self.limit {
            match self.chunks.pop_front() {
                Some(old) => self.bytes -= old.len(),
                None => break,
            }
        }
    }

    /// Take everything, oldest first.
    pub fn drain(&mut self) -> Vec<String> {
        self.bytes = 0;
        self.chunks.drain(..).collect()
    }

    /// Take everything as one string.
    pub fn take(&mut self) -> Option<String> {
        if self.chunks.is_empty() {
            return None;
        }
        Some(self.drain().concat())
    }

    /// Return a chunk obtained from [`Backlog::take`] to the front.
    pub fn put_back(&mut self, chunk: String) {
        if chunk.is_empty() {
            return;
        }
        self.bytes += chunk.len();
        self.chunks.push_front(chunk);
    }

    pub fn len_bytes(&self) -> usize {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// One live or dormant shell process.
#[derive(Debug)]
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) key: TerminalKey,
    pub(crate) token: ResumptionToken,
    pub(crate) process: PtyProcess,
    pub(crate) created_at: Instant,
    pub(crate) last_activity: Instant,
    pub(crate) binding: Option<Binding>,
    pub(crate) cwd: Option<String>,
    pub(crate) backlog: Backlog,
    pub(crate) tap: broadcast::Sender<String>,
}

impl Session {
    pub(crate) fn new(
        key: TerminalKey,
        process: PtyProcess,
        binding: Binding,
        backlog_limit: usize,
    ) -> Self {
        let now = Instant::now();
        let (tap, _) = broadcast::channel(TAP_CAPACITY);
        Self {
            id: SessionId::new(),
            key,
            token: ResumptionToken::generate(),
            process,
            created_at: now,
            last_activity: now,
            binding: Some(binding),
            cwd: None,
            backlog: Backlog::new(backlog_limit),
            tap,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn key(&self) -> &TerminalKey {
        &self.key
    }

    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    pub fn bound_connection(&self) -> Option<ConnectionId> {
        self.binding.as_ref().map(|b| b.connection)
    }

    /// Update the last activity timestamp.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Get the idle duration since last activity.
    pub fn idle_duration(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Show a chunk to any pending working directory lookup.
    pub(crate) fn publish(&self, data: &str) {
        if self.tap.receiver_count() > 0 {
            let _ = self.tap.send(data.to_string());
        }
    }

    /// Route one decoded output chunk: to the bound connection if there is
    /// one, otherwise into the backlog.
    ///
    /// While bound, anything still in the backlog goes out first. A full
    /// queue hands `data` back untouched so the caller can wait and retry.
    pub(crate) fn route_output(&mut self, data: String) -> Routed {
        let Some(binding) = &self.binding else {
            self.backlog.push(data);
            return Routed::Done;
        };

        if let Some(pending) = self.backlog.take() {
            let event = SessionEvent::Data {
                terminal_id: self.key.terminal_id.clone(),
                data: pending,
            };
            match binding.sink.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(SessionEvent::Data { data: pending, .. })) => {
                    self.backlog.put_back(pending);
                    return Routed::Full {
                        sink: binding.sink.clone(),
                        data,
                    };
                }
                Err(TrySendError::Closed(SessionEvent::Data { data: pending, .. })) => {
                    self.backlog.put_back(pending);
                    self.backlog.push(data);
                    return Routed::Done;
                }
                Err(_) => {}
            }
        }

        let event = SessionEvent::Data {
            terminal_id: self.key.terminal_id.clone(),
            data,
        };
        match binding.sink.try_send(event) {
            Ok(()) => Routed::Done,
            Err(TrySendError::Full(SessionEvent::Data { data, .. })) => Routed::Full {
                sink: binding.sink.clone(),
                data,
            },
            Err(TrySendError::Closed(SessionEvent::Data { data, .. })) => {
                self.backlog.push(data);
                Routed::Done
            }
            Err(_) => Routed::Done,
        }
    }

    /// Bind to `binding`, replaying the backlog into its sink first.
    ///
    /// If the new queue has no room the backlog stays put and goes out
    /// ahead of the next output.
    pub(crate) fn rebind(&mut self, binding: Binding) -> Option<ConnectionId> {
        if let Some(pending) = self.backlog.take() {
            let event = SessionEvent::Data {
                terminal_id: self.key.terminal_id.clone(),
                data: pending,
            };
            if let Err(
                TrySendError::Full(SessionEvent::Data { data, .. })
                | TrySendError::Closed(SessionEvent::Data { data, .. }),
            ) = binding.sink.try_send(event)
            {
                self.backlog.put_back(data);
            }
        }
        self.binding.replace(binding).map(|b| b.connection)
    }
}

/// Point-in-time view of a session, safe to hand to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub terminal_id: String,
    pub session_id: SessionId,
    pub pid: u32,
    pub attached: bool,
    pub idle: Duration,
    pub age: Duration,
    pub cwd: Option<String>,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            terminal_id: session.key.terminal_id.clone(),
            session_id: session.id,
            pid: session.pid(),
            attached: session.binding.is_some(),
            idle: session.idle_duration(),
            age: session.created_at.elapsed(),
            cwd: session.cwd.clone(),
        }
    }
}
