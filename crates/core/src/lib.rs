#![deny(unsafe_code)]

//! Synchronous chat timeline domain: messages, ordering, send gating and scroll pinning.

/// Push subscription lifecycle and stale-event routing keys.
pub mod connection;
pub mod error;
pub mod ids;
/// Message model and server timestamp parsing.
pub mod message;
/// Canonical ordered, deduplicated timeline.
pub mod reconciler;
pub mod render;
pub mod room;
pub mod send_gate;
pub mod viewport;

pub use connection::{
    ConnectionState, ConnectionTransition, ConnectionTransitionRejection,
    ConnectionTransitionResult, SessionSerial, SubscriptionTarget,
};
pub use error::{CoreError, CoreResult};
pub use ids::{MessageId, SenderId, is_opaque_sender_id};
pub use message::{Message, Origin, parse_timestamp};
pub use reconciler::{MergeOutcome, Reconciler, Rejection};
pub use render::{RenderedMessage, decorate};
pub use room::{DEFAULT_ROOM, RoomId};
pub use send_gate::{
    DEFAULT_MAX_MESSAGE_LENGTH, DEFAULT_RATE_LIMIT_MESSAGE, ModerationFlags, Outbound, SendGate,
    SendRejection,
};
pub use viewport::{
    DEFAULT_PIN_THRESHOLD, PinState, ScrollAction, ScrollMetrics, ViewportController,
};
