use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::error::{CoreResult, InvalidTimestampSnafu};
use crate::ids::{MessageId, SenderId};

/// How a message entered the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    History,
    Live,
    LocalEcho,
}

/// Atomic timeline entry. Never mutated after it is inserted.
///
/// `content` is untrusted text; renderers must not interpret it as markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: SenderId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub origin: Origin,
}

impl Message {
    pub fn new(
        id: MessageId,
        sender_id: SenderId,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
        origin: Origin,
    ) -> Self {
        Self {
            id,
            sender_id,
            content: content.into(),
            timestamp,
            origin,
        }
    }

    /// Creates a local echo stamped with the client clock.
    pub fn local_echo(sender_id: SenderId, content: impl Into<String>) -> Self {
        Self::new(
            MessageId::new_local(),
            sender_id,
            content,
            Utc::now(),
            Origin::LocalEcho,
        )
    }
}

/// Parses a server timestamp.
///
/// RFC 3339 is preferred; offset-less ISO-8601 values are read as UTC.
pub fn parse_timestamp(raw: &str) -> CoreResult<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .context(InvalidTimestampSnafu {
            stage: "parse-timestamp",
            raw: trimmed.to_string(),
        })
}
