use chrono::{DateTime, Utc};

use crate::ids::{MessageId, SenderId};
use crate::message::{Message, Origin};

/// Timeline entry decorated for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub id: MessageId,
    pub sender_id: SenderId,
    pub display_name: String,
    /// Untrusted text; render as plain text only.
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub origin: Origin,
    pub is_own: bool,
}

/// Decorates the timeline with display names.
///
/// `names` returns a resolved name when one is known; otherwise the raw sender id is shown.
pub fn decorate<F>(messages: &[Message], current_user: &SenderId, names: F) -> Vec<RenderedMessage>
where
    F: Fn(&SenderId) -> Option<String>,
{
    messages
        .iter()
        .map(|message| RenderedMessage {
            id: message.id.clone(),
            sender_id: message.sender_id.clone(),
            display_name: names(&message.sender_id)
                .unwrap_or_else(|| message.sender_id.to_string()),
            content: message.content.clone(),
            timestamp: message.timestamp,
            origin: message.origin,
            is_own: &message.sender_id == current_user,
        })
        .collect()
}
