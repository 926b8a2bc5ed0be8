#![deny(unsafe_code)]

//! Networked half of the chat client: history fetch, push subscription,
//! identity resolution and the per-room view actor.

pub mod backend;
pub mod client;
pub mod error;
pub mod history;
pub mod identity;
pub mod logging;
pub mod reconnect;
/// Websocket push subscription for one room view.
pub mod session;
pub mod settings;
pub mod urls;
/// Room view actor and the snapshots it publishes.
pub mod view;
pub mod wire;

pub use backend::{BoxFuture, HttpBackend};
pub use client::ChatClient;
pub use error::{ClientError, ClientResult};
pub use history::{HistorySource, load_history};
pub use identity::{IdentityLookup, IdentityResolver};
pub use reconnect::{FixedDelay, NeverReconnect, ReconnectPolicy};
pub use session::{CloseReason, SessionConnection, SessionEvent, SessionEventKind};
pub use settings::{ClientSettings, ReconnectSettings, SettingsStore};
pub use view::{RoomView, SessionIdentity, TimelineSnapshot, ViewContext};
