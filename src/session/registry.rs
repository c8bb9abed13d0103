//! The session registry.
//!
//! Three indexes, always mutated together under one lock:
//!
//! - `sessions`: composite key -> [`Session`]
//! - `by_connection`: connection -> keys of the sessions bound to it
//! - `tokens`: identity -> terminal id -> resumption token
//!
//! The lock is a plain `std::sync::Mutex`. No method holds it across an
//! `.await`, and process termination happens while it is held, so a
//! destroyed session is never observable half-removed.
//!
//! Output waits for room in a full connection queue outside the lock. The
//! relay stops reading meanwhile, so the shell blocks on its own writes.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::record::{Binding, EventSink, Routed, Session, SessionEvent, SessionInfo};
use super::{ConnectionId, ResumptionToken, SessionId, TerminalKey};
use crate::env;
use crate::error::RelayError;
use crate::pty::{
    default_shell, ExitStatus, NativePty, PtyEvents, PtySize, SpawnOptions, TerminalBounds,
};
use crate::Result;

/// How long output waits on a full queue before checking the binding again.
const QUEUE_RETRY: Duration = Duration::from_millis(100);

/// Registry settings.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub shell: String,
    pub working_dir: Option<PathBuf>,
    pub bounds: TerminalBounds,
    /// How long a session may stay unbound before it is reclaimed.
    pub session_timeout: Duration,
    pub reap_interval: Duration,
    /// Per-session limit on output kept while detached.
    pub backlog_bytes: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            working_dir: None,
            bounds: TerminalBounds::default(),
            session_timeout: Duration::from_secs(30 * 60),
            reap_interval: Duration::from_secs(60),
            backlog_bytes: 64 * 1024,
        }
    }
}

/// A `create` as seen by the registry.
#[derive(Debug)]
pub struct CreateRequest {
    pub connection: ConnectionId,
    pub sink: EventSink,
    pub key: TerminalKey,
    pub token: Option<String>,
    pub size: Option<PtySize>,
    /// Caller-requested environment; filtered by [`env::sanitize`].
    pub env: HashMap<String, String>,
}

/// Result of [`SessionRegistry::create_or_reuse`].
#[derive(Debug)]
pub struct Attachment {
    pub session_id: SessionId,
    pub token: ResumptionToken,
    pub pid: u32,
    pub is_new: bool,
    /// Output of a freshly spawned process. `None` on reuse: the relay
    /// started at creation is still running.
    pub events: Option<PtyEvents>,
}

/// What a directory probe needs from a session.
#[derive(Debug)]
pub struct ProbeStart {
    pub session_id: SessionId,
    pub output: broadcast::Receiver<String>,
    pub cached: Option<String>,
}

#[derive(Debug, Default)]
struct Indexes {
    sessions: HashMap<TerminalKey, Session>,
    by_connection: HashMap<ConnectionId, HashSet<TerminalKey>>,
    tokens: HashMap<String, HashMap<String, ResumptionToken>>,
}

impl Indexes {
    fn bind(&mut self, connection: ConnectionId, key: &TerminalKey) {
        self.by_connection
            .entry(connection)
            .or_default()
            .insert(key.clone());
    }

    fn unbind(&mut self, connection: ConnectionId, key: &TerminalKey) {
        if let Some(keys) = self.by_connection.get_mut(&connection) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_connection.remove(&connection);
            }
        }
    }

    fn cached_token(&self, key: &TerminalKey) -> Option<&ResumptionToken> {
        self.tokens
            .get(&key.identity)
            .and_then(|slots| slots.get(&key.terminal_id))
    }

    fn insert(&mut self, session: Session) {
        let key = session.key.clone();
        if let Some(conn) = session.bound_connection() {
            self.bind(conn, &key);
        }
        self.tokens
            .entry(key.identity.clone())
            .or_default()
            .insert(key.terminal_id.clone(), session.token.clone());
        self.sessions.insert(key, session);
    }

    /// Remove a session from every index and kill its process.
    fn destroy(&mut self, key: &TerminalKey, reason: &str) -> bool {
        let Some(mut session) = self.sessions.remove(key) else {
            return false;
        };

        if let Some(conn) = session.bound_connection() {
            self.unbind(conn, key);
        }
        if let Some(slots) = self.tokens.get_mut(&key.identity) {
            slots.remove(&key.terminal_id);
            if slots.is_empty() {
                self.tokens.remove(&key.identity);
            }
        }

        if let Err(e) = session.process.kill() {
            warn!(session_id = %session.id, terminal = %key, "kill failed: {}", e);
        }
        info!(
            session_id = %session.id,
            terminal = %key,
            pid = session.pid(),
            reason,
            "session destroyed"
        );
        true
    }

    fn current(&mut self, key: &TerminalKey, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(key).filter(|s| s.id == id)
    }
}

/// Owns every session of the server.
///
/// Constructed once at startup and shared as `Arc<SessionRegistry>`.
pub struct SessionRegistry {
    indexes: Mutex<Indexes>,
    pty: NativePty,
    config: RegistryConfig,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            indexes: Mutex::new(Indexes::default()),
            pty: NativePty::new(config.bounds),
            config,
            reaper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, Indexes>> {
        self.indexes.lock().map_err(|_| RelayError::LockPoisoned)
    }

    /// Teardown paths keep going even if another thread panicked mid-update.
    fn lock_for_teardown(&self) -> MutexGuard<'_, Indexes> {
        self.indexes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Attach `request.connection` to the session at `request.key`, spawning
    /// one if none is live.
    ///
    /// A live session at the key is always reused. Keys are scoped to the
    /// caller's identity, so a supplied token only matters when nothing is
    /// live; an unknown or stale token is not an error and a new session
    /// is created.
    pub fn create_or_reuse(&self, request: CreateRequest) -> Result<Attachment> {
        let CreateRequest {
            connection,
            sink,
            key,
            token,
            size,
            env: overrides,
        } = request;

        let size = size.map(|s| self.config.bounds.check(s)).transpose()?;
        let binding = Binding {
            connection,
            sink,
        };

        let mut indexes = self.lock()?;

        if let Some(session) = indexes.sessions.get(&key) {
            let stale = token.as_deref().is_some_and(|t| !session.token.matches(t));
            if stale {
                debug!(terminal = %key, "stale resumption token, using cached token");
            }
            return self.reattach(&mut indexes, &key, binding, size);
        } else if token.is_some() {
            debug!(terminal = %key, "no live session for resumption token");
        }

        let mut opts = SpawnOptions::new(self.config.shell.clone(), size.unwrap_or_default())
            .env(env::sanitize_current(&overrides));
        if let Some(dir) = &self.config.working_dir {
            opts = opts.cwd(dir.clone());
        }

        let (process, events) = self.pty.spawn(opts).inspect_err(|e| {
            warn!(terminal = %key, connection_id = %connection, "spawn failed: {}", e);
        })?;

        let session = Session::new(key.clone(), process, binding, self.config.backlog_bytes);
        let attachment = Attachment {
            session_id: session.id,
            token: session.token.clone(),
            pid: session.pid(),
            is_new: true,
            events: Some(events),
        };

        info!(
            session_id = %session.id,
            terminal = %key,
            connection_id = %connection,
            pid = attachment.pid,
            "session created"
        );
        indexes.insert(session);
        Ok(attachment)
    }

    fn reattach(
        &self,
        indexes: &mut Indexes,
        key: &TerminalKey,
        binding: Binding,
        size: Option<PtySize>,
    ) -> Result<Attachment> {
        let connection = binding.connection;
        let session = indexes
            .sessions
            .get_mut(key)
            .ok_or_else(|| RelayError::SessionNotFound(key.to_string()))?;

        if let Some(size) = size {
            session.process.resize(size)?;
        }
        let previous = session.rebind(binding);
        session.touch();

        let attachment = Attachment {
            session_id: session.id,
            token: session.token.clone(),
            pid: session.pid(),
            is_new: false,
            events: None,
        };
        info!(
            session_id = %session.id,
            terminal = %key,
            connection_id = %connection,
            previous = ?previous,
            "session resumed"
        );

        if let Some(old) = previous.filter(|old| *old != connection) {
            indexes.unbind(old, key);
        }
        indexes.bind(connection, key);
        Ok(attachment)
    }

    /// Send input to a session.
    pub fn write(&self, key: &TerminalKey, data: &[u8]) -> Result<()> {
        let mut indexes = self.lock()?;
        let session = indexes
            .sessions
            .get_mut(key)
            .ok_or_else(|| RelayError::SessionNotFound(key.to_string()))?;
        session.touch();
        session.process.write(data)
    }

    pub fn resize(&self, key: &TerminalKey, size: PtySize) -> Result<()> {
        self.config.bounds.check(size)?;
        let mut indexes = self.lock()?;
        let session = indexes
            .sessions
            .get_mut(key)
            .ok_or_else(|| RelayError::SessionNotFound(key.to_string()))?;
        session.touch();
        session.process.resize(size)?;
        debug!(terminal = %key, rows = size.rows, cols = size.cols, "resized");
        Ok(())
    }

    /// Soft-unbind every session bound to `connection`. Processes keep
    /// running. Returns how many sessions were unbound.
    pub fn disconnect(&self, connection: ConnectionId) -> usize {
        let mut indexes = self.lock_for_teardown();
        let Some(keys) = indexes.by_connection.remove(&connection) else {
            return 0;
        };

        let mut unbound = 0;
        for key in keys {
            if let Some(session) = indexes.sessions.get_mut(&key) {
                if session.bound_connection() == Some(connection) {
                    session.binding = None;
                    session.touch();
                    unbound += 1;
                }
            }
        }
        info!(connection_id = %connection, sessions = unbound, "connection detached");
        unbound
    }

    /// Destroy the session at `key`.
    ///
    /// Without `force`, a session that can still be resumed is only
    /// unbound from its connection. Destroying a missing key is a no-op.
    /// Returns true if anything changed.
    pub fn destroy(&self, key: &TerminalKey, force: bool) -> bool {
        let mut indexes = self.lock_for_teardown();
        if force {
            return indexes.destroy(key, "closed");
        }

        let Some(session) = indexes.sessions.get_mut(key) else {
            return false;
        };
        session.touch();
        let Some(binding) = session.binding.take() else {
            return false;
        };
        indexes.unbind(binding.connection, key);
        debug!(terminal = %key, connection_id = %binding.connection, "session detached");
        true
    }

    /// Route process output. Returns false once the session is gone, after
    /// which the caller should stop relaying.
    ///
    /// While the bound connection's queue is full this waits, so a slow
    /// client slows the shell down instead of growing memory.
    pub async fn deliver(
        &self,
        key: &TerminalKey,
        id: SessionId,
        data: String,
        cd_seen: bool,
    ) -> bool {
        {
            let mut indexes = self.lock_for_teardown();
            let Some(session) = indexes.current(key, id) else {
                return false;
            };
            if cd_seen {
                session.cwd = None;
            }
            session.publish(&data);
        }

        let mut data = data;
        loop {
            let routed = {
                let mut indexes = self.lock_for_teardown();
                let Some(session) = indexes.current(key, id) else {
                    return false;
                };
                session.route_output(data)
            };

            match routed {
                Routed::Done => return true,
                Routed::Full { sink, data: rest } => {
                    data = rest;
                    // Room may go to another session first; routing again
                    // also picks up a detach or rebind that happened here.
                    let _ = tokio::time::timeout(QUEUE_RETRY, sink.reserve()).await;
                }
            }
        }
    }

    /// Handle process exit: force-destroy, then hand the bound connection
    /// any output it has not seen followed by the exit status.
    pub async fn finish(&self, key: &TerminalKey, id: SessionId, status: ExitStatus) -> bool {
        let (sink, pending) = {
            let mut indexes = self.lock_for_teardown();
            let Some(session) = indexes.current(key, id) else {
                return false;
            };

            info!(
                session_id = %id,
                terminal = %key,
                code = status.code,
                signal = ?status.signal,
                "shell exited"
            );
            let sink = session.binding.as_ref().map(|b| b.sink.clone());
            let pending = session.backlog.take();
            indexes.destroy(key, "exited");
            (sink, pending)
        };

        if let Some(sink) = sink {
            if let Some(data) = pending {
                let _ = sink
                    .send(SessionEvent::Data {
                        terminal_id: key.terminal_id.clone(),
                        data,
                    })
                    .await;
            }
            let _ = sink
                .send(SessionEvent::Exit {
                    terminal_id: key.terminal_id.clone(),
                    status,
                })
                .await;
        }
        true
    }

    /// Force-destroy every unbound session idle for longer than the
    /// session timeout.
    pub fn reap_idle(&self) -> usize {
        let timeout = self.config.session_timeout;
        let mut indexes = self.lock_for_teardown();
        let expired: Vec<TerminalKey> = indexes
            .sessions
            .values()
            .filter(|s| s.binding.is_none() && s.idle_duration() > timeout)
            .map(|s| s.key.clone())
            .collect();

        expired
            .iter()
            .filter(|key| indexes.destroy(key, "timeout"))
            .count()
    }

    /// Start the periodic reclamation task. Replaces any running one.
    pub fn start_reaper(self: &Arc<Self>) {
        let registry = Arc::downgrade(self);
        let period = self.config.reap_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let reaped = registry.reap_idle();
                if reaped > 0 {
                    info!(reaped, "reclaimed idle sessions");
                }
            }
        });

        let mut slot = self
            .reaper
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    /// Stop reclamation and force-destroy every session.
    pub fn shutdown(&self) -> usize {
        if let Some(reaper) = self
            .reaper
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            reaper.abort();
        }

        let mut indexes = self.lock_for_teardown();
        let keys: Vec<TerminalKey> = indexes.sessions.keys().cloned().collect();
        let destroyed = keys
            .iter()
            .filter(|key| indexes.destroy(key, "shutdown"))
            .count();
        info!(destroyed, "registry shut down");
        destroyed
    }

    // Directory tracking support.

    /// Write `probe` into the session and subscribe to its output.
    ///
    /// Subscribing happens before the write, under the lock, so no reply
    /// can slip past the subscriber.
    pub fn begin_probe(&self, key: &TerminalKey, probe: &[u8]) -> Result<ProbeStart> {
        let mut indexes = self.lock()?;
        let session = indexes
            .sessions
            .get_mut(key)
            .ok_or_else(|| RelayError::SessionNotFound(key.to_string()))?;

        let output = session.tap.subscribe();
        session.touch();
        session.process.write(probe)?;
        Ok(ProbeStart {
            session_id: session.id,
            output,
            cached: session.cwd.clone(),
        })
    }

    /// Cache a probed directory, unless the session was destroyed meanwhile.
    pub fn cache_cwd(&self, key: &TerminalKey, id: SessionId, path: &str) -> Result<()> {
        let mut indexes = self.lock()?;
        let session = indexes
            .current(key, id)
            .ok_or_else(|| RelayError::SessionNotFound(key.to_string()))?;
        session.cwd = Some(path.to_string());
        Ok(())
    }

    pub fn cached_cwd(&self, key: &TerminalKey) -> Option<String> {
        self.lock().ok()?.sessions.get(key)?.cwd.clone()
    }

    // Introspection.

    /// Get the number of live sessions.
    pub fn count(&self) -> usize {
        self.indexes.lock().map(|i| i.sessions.len()).unwrap_or(0)
    }

    pub fn contains(&self, key: &TerminalKey) -> bool {
        self.indexes
            .lock()
            .map(|i| i.sessions.contains_key(key))
            .unwrap_or(false)
    }

    /// Snapshot of one identity's sessions, ordered by terminal id.
    pub fn sessions_for(&self, identity: &str) -> Vec<SessionInfo> {
        let Ok(indexes) = self.lock() else {
            return Vec::new();
        };
        let mut infos: Vec<SessionInfo> = indexes
            .sessions
            .values()
            .filter(|s| s.key.identity == identity)
            .map(SessionInfo::from)
            .collect();
        infos.sort_by(|a, b| a.terminal_id.cmp(&b.terminal_id));
        infos
    }

    /// Keys of the sessions bound to `connection`.
    pub fn connection_sessions(&self, connection: ConnectionId) -> Vec<TerminalKey> {
        self.lock()
            .ok()
            .and_then(|i| i.by_connection.get(&connection).cloned())
            .map(|keys| keys.into_iter().collect())
            .unwrap_or_default()
    }

    /// Token cached for `key`, if a session lives there.
    pub fn token_for(&self, key: &TerminalKey) -> Option<ResumptionToken> {
        self.lock().ok()?.cached_token(key).cloned()
    }

    pub fn pid_of(&self, key: &TerminalKey) -> Option<u32> {
        self.lock().ok()?.sessions.get(key).map(Session::pid)
    }

    pub fn session_id_of(&self, key: &TerminalKey) -> Option<SessionId> {
        self.lock().ok()?.sessions.get(key).map(Session::id)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.reaper.lock() {
            if let Some(reaper) = slot.take() {
                reaper.abort();
            }
        }
    }
}
