//! REST API handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, Json};

use super::auth::{Authenticator, Identity, StaticTokens};
use super::types::{ListSessionsResponse, SessionSummary};
use super::websocket::Keepalive;
use crate::protocol::Limits;
use crate::session::{DirectoryTracker, RegistryConfig, SessionRegistry};

/// Default bound on a `terminal.cwd` probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub authenticator: Arc<dyn Authenticator>,
    pub limits: Limits,
    pub probe_timeout: Duration,
    pub keepalive: Keepalive,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>, authenticator: Arc<dyn Authenticator>) -> Self {
        let limits = Limits {
            bounds: registry.config().bounds,
            ..Limits::default()
        };
        Self {
            registry,
            authenticator,
            limits,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            keepalive: Keepalive::default(),
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_keepalive(mut self, keepalive: Keepalive) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Directory tracker for one connection.
    pub fn tracker(&self) -> DirectoryTracker {
        DirectoryTracker::for_registry(&self.registry, self.probe_timeout)
    }
}

impl Default for AppState {
    /// Default registry with authentication disabled.
    fn default() -> Self {
        Self::new(
            Arc::new(SessionRegistry::new(RegistryConfig::default())),
            Arc::new(StaticTokens::disabled()),
        )
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("sessions", &self.registry.count())
            .field("limits", &self.limits)
            .field("probe_timeout", &self.probe_timeout)
            .field("keepalive", &self.keepalive)
            .finish()
    }
}

/// Health check endpoint.
pub async fn health() -> &'static str {
    "OK"
}

/// API information endpoint.
pub async fn api_info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "shell-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// Sessions owned by the caller's identity.
pub async fn list_sessions(
    Identity(identity): Identity,
    State(state): State<AppState>,
) -> Json<ListSessionsResponse> {
    let sessions: Vec<SessionSummary> = state
        .registry
        .sessions_for(&identity)
        .into_iter()
        .map(SessionSummary::from)
        .collect();

    Json(ListSessionsResponse {
        identity,
        total: sessions.len(),
        sessions,
    })
}
