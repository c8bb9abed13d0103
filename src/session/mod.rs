//! Session management module.
//!
//! A session is one spawned shell, addressed by the owning identity and a
//! client-chosen terminal id. The [`SessionRegistry`] owns every session and
//! keeps them alive across reconnects; the [`DirectoryTracker`] answers
//! "where is this shell right now".

mod id;
mod record;
mod registry;
mod tracker;

pub use id::{ConnectionId, ResumptionToken, SessionId, TerminalKey};
pub use record::{
    Backlog, Binding, EventSink, Session, SessionEvent, SessionInfo, EVENT_QUEUE_CAPACITY,
};
pub use registry::{Attachment, CreateRequest, ProbeStart, RegistryConfig, SessionRegistry};
pub use tracker::DirectoryTracker;
