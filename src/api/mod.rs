//! HTTP and WebSocket surface of shell-relay.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /api/v1` - API information
//! - `GET /api/v1/sessions` - Sessions of the calling identity
//! - `GET /ws` - WebSocket carrying the terminal protocol
//!
//! `/api/v1/sessions` and `/ws` need a token, sent as
//! `Authorization: Bearer <token>` or `?token=<token>`, unless
//! authentication is disabled.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use shell_relay::api::{serve, AppState, ServerConfig, StaticTokens};
//! use shell_relay::session::{RegistryConfig, SessionRegistry};
//!
//! #[tokio::main]
//! async fn main() -> shell_relay::Result<()> {
//!     let registry = Arc::new(SessionRegistry::new(RegistryConfig::default()));
//!     let auth = StaticTokens::default().with_token("secret", "alice");
//!     let state = AppState::new(registry, Arc::new(auth));
//!     serve(ServerConfig::new("127.0.0.1", 3000), state).await
//! }
//! ```

pub mod auth;
pub mod handlers;
pub mod router;
pub mod types;
pub mod websocket;

pub use auth::{Authenticator, Identity, StaticTokens, LOCAL_IDENTITY};
pub use handlers::AppState;
pub use router::{
    create_router, create_router_with_state, serve, serve_with_shutdown, ServerConfig,
};
pub use types::{ApiError, ErrorResponse, ListSessionsResponse, SessionSummary};
pub use websocket::Keepalive;
