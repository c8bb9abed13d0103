//! Working directory probing.
//!
//! The PTY only offers a byte stream, so the current directory is found by
//! typing `echo <marker>; pwd` into the shell and watching its output for
//! the marker line followed by an absolute path.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::RngCore;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use super::registry::{ProbeStart, SessionRegistry};
use super::TerminalKey;
use crate::error::RelayError;
use crate::output::strip_ansi;
use crate::Result;

/// Output scanned per probe before giving up on finding the marker.
const MAX_SCAN_BYTES: usize = 64 * 1024;

/// Probes session working directories with a bounded wait.
#[derive(Debug, Clone)]
pub struct DirectoryTracker {
    timeout: Duration,
    fallback: String,
}

impl DirectoryTracker {
    pub fn new(timeout: Duration, fallback: impl Into<String>) -> Self {
        Self {
            timeout,
            fallback: fallback.into(),
        }
    }

    /// Fallback is the configured working directory, else the home directory.
    pub fn for_registry(registry: &SessionRegistry, timeout: Duration) -> Self {
        let fallback = registry
            .config()
            .working_dir
            .clone()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("/"));
        Self::new(timeout, fallback.to_string_lossy())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Current directory of the session at `key`.
    ///
    /// On timeout this returns the cached directory, or the fallback. It
    /// fails with `SessionNotFound` if the session is missing, or is
    /// destroyed before the probe completes.
    pub async fn probe_cwd(&self, registry: &SessionRegistry, key: &TerminalKey) -> Result<String> {
        let marker = new_marker();
        let command = format!("echo {}; pwd\r", marker);

        let ProbeStart {
            session_id,
            mut output,
            cached,
        } = registry.begin_probe(key, command.as_bytes())?;

        let scan = async {
            let mut raw = String::new();
            loop {
                match output.recv().await {
                    Ok(chunk) => {
                        raw.push_str(&chunk);
                        if let Some(path) = find_path(&strip_ansi(raw.as_bytes()), &marker) {
                            return Some(path);
                        }
                        if raw.len() > MAX_SCAN_BYTES {
                            let mut cut = raw.len() - MAX_SCAN_BYTES;
                            while !raw.is_char_boundary(cut) {
                                cut += 1;
                            }
                            raw.drain(..cut);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(terminal = %key, skipped, "directory probe lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        };

        match tokio::time::timeout(self.timeout, scan).await {
            Ok(Some(path)) => {
                registry.cache_cwd(key, session_id, &path)?;
                debug!(terminal = %key, cwd = %path, "probed working directory");
                Ok(path)
            }
            Ok(None) => Err(RelayError::SessionNotFound(key.to_string())),
            Err(_) => {
                let path = registry
                    .cached_cwd(key)
                    .or(cached)
                    .unwrap_or_else(|| self.fallback.clone());
                debug!(terminal = %key, cwd = %path, "directory probe timed out");
                Ok(path)
            }
        }
    }
}

/// Timestamp plus random suffix, unique per call.
fn new_marker() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let mut suffix = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut suffix);
    format!("__relay_cwd_{}_{}__", millis, hex::encode(suffix))
}

/// Find the first non-empty complete line after a line equal to `marker`,
/// if it looks like an absolute path.
fn find_path(text: &str, marker: &str) -> Option<String> {
    let complete = &text[..text.rfind('\n')? + 1];
    let mut lines = complete.lines().map(str::trim);
    lines.by_ref().find(|line| *line == marker)?;
    lines
        .find(|line| !line.is_empty())
        .filter(|line| is_absolute_path(line))
        .map(str::to_string)
}

fn is_absolute_path(s: &str) -> bool {
    let bytes = s.as_bytes();
    s.starts_with('/')
        || (bytes.len() >= 3
            && bytes[0].is_ascii_alphabetic()
            && bytes[1] == b':'
            && matches!(bytes[2], b'\\' | b'/'))
}
