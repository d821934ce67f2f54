//! Core types of the relay: session identifiers, the typed event family with
//! its wire codec, and the shared error kinds. Everything here is transport-
//! and framework-free; the server crate supplies the registry, dispatch, and
//! HTTP/WebSocket surfaces on top.

pub mod error;
pub mod events;
pub mod ids;

pub use error::{Direction, RelayError};
pub use events::{
    AdjustAction, Channel, Event, EventKind, FeedbackButton, PulseSequence, RawEvent,
    StrengthAdjustment, StrengthReport,
};
pub use ids::{ClientRole, IdentityMinter, InsecureId, SecureId};
