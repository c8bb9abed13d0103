//! # shell-relay
//!
//! Resumable, multi-terminal shell access for remote clients.
//!
//! Each authenticated client may hold many terminals, each backed by a
//! real shell in a pseudo-terminal. Shells outlive the connection that
//! created them: a client that reconnects with its resumption token gets
//! the same process back, along with the output it missed.
//!
//! ## Layers
//!
//! - [`pty`]: spawning, writing to and resizing shells
//! - [`session`]: the registry of live shells, their tokens and reclamation
//! - [`protocol`]: the `terminal.*` message set and per-connection dispatch
//! - [`api`]: the axum router carrying the protocol over WebSocket
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use shell_relay::api::{AppState, StaticTokens};
//! use shell_relay::protocol::ConnectionHandler;
//! use shell_relay::session::{RegistryConfig, SessionRegistry};
//!
//! #[tokio::main]
//! async fn main() -> shell_relay::Result<()> {
//!     let registry = Arc::new(SessionRegistry::new(RegistryConfig::default()));
//!     let state = AppState::new(registry, Arc::new(StaticTokens::disabled()));
//!
//!     let (mut conn, _events) =
//!         ConnectionHandler::new(state.registry.clone(), state.limits, state.tracker());
//!     conn.authenticate("local")?;
//!     let replies = conn
//!         .handle_text(r#"{"type":"terminal.create","clientTerminalId":"t1"}"#)
//!         .await;
//!     println!("{:?}", replies);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod env;
pub mod error;
pub mod logging;
pub mod output;
pub mod protocol;
pub mod pty;
pub mod session;

// Re-export commonly used types
pub use error::{RelayError, Result};
pub use protocol::{ClientMessage, ConnectionHandler, ServerMessage};
pub use pty::{NativePty, PtyProcess, PtySize, TerminalBounds};
pub use session::{RegistryConfig, SessionId, SessionRegistry, TerminalKey};
