//! Per-connection state machines.

use crate::error::RelayError;
use crate::Result;

/// Whether a connection has presented a verified identity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Unauthenticated,
    Authenticated { identity: String },
}

impl ConnectionState {
    /// Record the verified identity. A connection authenticates once.
    pub fn authenticate(&mut self, identity: impl Into<String>) -> Result<()> {
        match self {
            Self::Unauthenticated => {
                *self = Self::Authenticated {
                    identity: identity.into(),
                };
                Ok(())
            }
            Self::Authenticated { .. } => {
                Err(RelayError::AuthFailed("connection already authenticated".into()))
            }
        }
    }

    pub fn identity(&self) -> Result<&str> {
        match self {
            Self::Unauthenticated => Err(RelayError::AuthRequired),
            Self::Authenticated { identity } => Ok(identity),
        }
    }
}

/// Lifecycle of one terminal as seen by one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    /// `create` received, not yet answered.
    Created,
    /// Attached; output flows to this connection.
    Ready,
    /// Closed, exited or detached from this connection.
    Closed,
}

impl TerminalState {
    /// Check if transition to target state is valid.
    ///
    /// Valid transitions:
    /// - Created -> Ready
    /// - Ready -> Closed
    /// - Ready -> Created (create again on the same connection)
    /// - Closed -> Created
    pub fn can_transition_to(&self, target: TerminalState) -> bool {
        use TerminalState::*;
        matches!(
            (*self, target),
            (Created, Ready) | (Ready, Closed) | (Ready, Created) | (Closed, Created)
        )
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&mut self, target: TerminalState) -> Result<()> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(RelayError::InvalidInput(format!(
                "terminal cannot go from {:?} to {:?}",
                self, target
            )))
        }
    }

    /// Check if output for this terminal is expected on this connection.
    pub fn is_attached(&self) -> bool {
        matches!(self, TerminalState::Ready)
    }
}
