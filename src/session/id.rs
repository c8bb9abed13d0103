//! Session, connection and terminal identifiers.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::RngCore;

/// Global counter for session ID generation.
static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for one spawned shell.
///
/// Session IDs are generated using an atomic counter, ensuring uniqueness
/// within a single process lifetime. A client terminal id may be reused
/// after its session is destroyed; the session id tells the two apart.
/// Displayed as `sess-XXXXXXXX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Create a new unique session ID.
    pub fn new() -> Self {
        Self(SESSION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Create a SessionId from a raw u64 value.
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sess-{:08x}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = crate::error::RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("sess-")
            .and_then(|hex| u64::from_str_radix(hex, 16).ok())
            .map(SessionId)
            .ok_or_else(|| crate::error::RelayError::SessionNotFound(s.into()))
    }
}

/// Identifier of one transport connection. Displayed as `conn-XXXXXXXX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{:08x}", self.0)
    }
}

/// Opaque value that lets a dropped connection reattach to its session.
///
/// 32 random bytes, hex encoded. `Debug` and `Display` only show a prefix
/// so tokens do not end up in logs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ResumptionToken(String);

impl ResumptionToken {
    const BYTES: usize = 32;

    /// Generate a fresh random token.
    pub fn generate() -> Self {
        let mut bytes = [0u8; Self::BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Wrap a token received from a client.
    pub fn from_client(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Full token value, for sending to the owning client only.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare without short-circuiting on the first differing byte.
    pub fn matches(&self, other: &str) -> bool {
        let a = self.0.as_bytes();
        let b = other.as_bytes();
        a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

impl fmt::Display for ResumptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "{}…", prefix)
    }
}

impl fmt::Debug for ResumptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResumptionToken({})", self)
    }
}

/// Composite key of a session: the owning identity and the client's
/// terminal id. At most one session exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TerminalKey {
    pub identity: String,
    pub terminal_id: String,
}

impl TerminalKey {
    pub fn new(identity: impl Into<String>, terminal_id: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            terminal_id: terminal_id.into(),
        }
    }
}

impl fmt::Display for TerminalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.identity, self.terminal_id)
    }
}
