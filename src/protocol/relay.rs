//! Relays PTY output into the registry.
//!
//! One task per session, started when the session is created and running
//! until the process exits or the session is destroyed. Reattaching a
//! connection does not start another one; the registry routes output to
//! whichever connection is bound at the time.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::output::{looks_like_cd, PlainLines, Utf8Carry};
use crate::pty::{PtyEvent, PtyEvents};
use crate::session::{SessionId, SessionRegistry, TerminalKey};

/// Start relaying `events` for the session `id` at `key`.
pub fn spawn(
    registry: Arc<SessionRegistry>,
    key: TerminalKey,
    id: SessionId,
    events: PtyEvents,
) -> JoinHandle<()> {
    tokio::spawn(run(registry, key, id, events))
}

async fn run(
    registry: Arc<SessionRegistry>,
    key: TerminalKey,
    id: SessionId,
    mut events: PtyEvents,
) {
    let mut carry = Utf8Carry::new();
    let mut lines = PlainLines::new();

    while let Some(event) = events.recv().await {
        match event {
            PtyEvent::Output(bytes) => {
                let cd_seen = lines.feed(&bytes).iter().any(|line| looks_like_cd(line));
                let text = carry.decode(&bytes);
                if text.is_empty() {
                    continue;
                }
                if !registry.deliver(&key, id, text, cd_seen).await {
                    debug!(session_id = %id, terminal = %key, "session gone, relay stopping");
                    return;
                }
            }
            PtyEvent::Exit(status) => {
                if let Some(rest) = carry.finish() {
                    registry.deliver(&key, id, rest, false).await;
                }
                registry.finish(&key, id, status).await;
                return;
            }
        }
    }

    debug!(session_id = %id, terminal = %key, "PTY events ended without exit");
}
