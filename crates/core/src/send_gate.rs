use std::fmt;

use crate::connection::ConnectionState;
use crate::message::Message;
use crate::reconciler::Reconciler;

/// Character cap of one outbound message.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 500;
/// Shown when the moderation collaborator rate-limits without its own wording.
pub const DEFAULT_RATE_LIMIT_MESSAGE: &str =
    "Sending messages too frequently, please try again later";
pub const BLOCKED_MESSAGE: &str = "You have been blocked and cannot send messages";

/// Moderation and rate-limit signals supplied by an outside collaborator.
///
/// Only their values at send time matter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModerationFlags {
    pub is_blocked: bool,
    pub is_rate_limited: bool,
    pub rate_limit_message: Option<String>,
}

impl ModerationFlags {
    pub fn blocked() -> Self {
        Self {
            is_blocked: true,
            ..Self::default()
        }
    }

    pub fn rate_limited(message: Option<String>) -> Self {
        Self {
            is_rate_limited: true,
            rate_limit_message: message,
            ..Self::default()
        }
    }
}

/// Expected gate outcome when a send is not permitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendRejection {
    Empty,
    TooLong { length: usize, max: usize },
    Blocked,
    RateLimited { message: String },
    NotConnected { state: ConnectionState },
}

impl SendRejection {
    /// Text a caller can show the user directly.
    pub fn user_message(&self) -> String {
        match self {
            Self::Empty => "Message is empty".to_string(),
            Self::TooLong { length, max } => {
                format!("Message is too long ({length}/{max} characters)")
            }
            Self::Blocked => BLOCKED_MESSAGE.to_string(),
            Self::RateLimited { message } => message.clone(),
            Self::NotConnected { state } => format!("Not connected to the room ({state})"),
        }
    }
}

impl fmt::Display for SendRejection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.user_message())
    }
}

/// Outbound half of the push subscription as seen by the gate.
pub trait Outbound {
    fn connection_state(&self) -> ConnectionState;

    /// Queues `content` for transmission; returns false when nothing was queued.
    fn transmit(&mut self, content: &str) -> bool;
}

/// Decides whether a user-initiated send may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendGate {
    max_length: usize,
}

impl Default for SendGate {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_LENGTH)
    }
}

impl SendGate {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(1),
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Evaluates every condition and returns the trimmed text on success.
    pub fn check<'a>(
        &self,
        text: &'a str,
        flags: &ModerationFlags,
        state: ConnectionState,
    ) -> Result<&'a str, SendRejection> {
        if flags.is_blocked {
            return Err(SendRejection::Blocked);
        }
        if flags.is_rate_limited {
            let message = flags
                .rate_limit_message
                .as_deref()
                .map(str::trim)
                .filter(|message| !message.is_empty())
                .unwrap_or(DEFAULT_RATE_LIMIT_MESSAGE)
                .to_string();
            return Err(SendRejection::RateLimited { message });
        }

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(SendRejection::Empty);
        }

        let length = trimmed.chars().count();
        if length > self.max_length {
            return Err(SendRejection::TooLong {
                length,
                max: self.max_length,
            });
        }

        if !state.is_open() {
            return Err(SendRejection::NotConnected { state });
        }

        Ok(trimmed)
    }

    /// Transmits a permitted send, then records its local echo.
    ///
    /// A rejected send leaves both the outbound channel and the timeline untouched.
    pub fn submit<O>(
        &self,
        text: &str,
        flags: &ModerationFlags,
        outbound: &mut O,
        reconciler: &mut Reconciler,
    ) -> Result<Message, SendRejection>
    where
        O: Outbound + ?Sized,
    {
        let state = outbound.connection_state();
        let content = self.check(text, flags, state)?;

        if !outbound.transmit(content) {
            tracing::debug!(state = %state, "outbound queue refused a permitted send");
            return Err(SendRejection::NotConnected { state });
        }

        let echo = Message::local_echo(reconciler.current_user().clone(), content);
        if let Err(rejection) = reconciler.insert(echo.clone()) {
            // Fresh local ids cannot collide; keep going with what the user sent.
            tracing::warn!(?rejection, id = %echo.id, "local echo was not inserted");
        }
        Ok(echo)
    }
}
