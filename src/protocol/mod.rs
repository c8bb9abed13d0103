//! Terminal protocol: message types, validation and per-connection dispatch.
//!
//! The protocol layer knows nothing about the transport. A transport
//! authenticates the connection, then feeds text frames to a
//! [`ConnectionHandler`] and writes back what it returns.

pub mod handler;
pub mod messages;
pub mod relay;
pub mod state;
pub mod validation;

pub use handler::ConnectionHandler;
pub use messages::{ClientMessage, ServerMessage};
pub use state::{ConnectionState, TerminalState};
pub use validation::{Limits, MAX_TERMINAL_ID_LEN};
