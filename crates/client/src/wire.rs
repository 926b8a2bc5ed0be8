use chatorbit_core::{Message, MessageId, Origin, RoomId, SenderId, parse_timestamp};
use serde::{Deserialize, Deserializer, Serialize};
use snafu::ResultExt;

use crate::error::{ClientResult, InvalidRecordSnafu};

/// Message as stored by the server; shared by the history body and inbound push frames.
///
/// Field names vary between endpoints, so both camel and snake spellings are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WireMessage {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    #[serde(alias = "senderId", alias = "sender_id", alias = "userId")]
    pub user_id: String,
    pub content: String,
    pub timestamp: String,
    /// Room tag sent by multiplexed backends.
    #[serde(default, alias = "roomId")]
    pub room_id: Option<String>,
}

impl WireMessage {
    pub fn into_message(self, origin: Origin) -> ClientResult<Message> {
        let id = MessageId::parse(&self.id).context(InvalidRecordSnafu {
            stage: "parse-wire-message-id",
        })?;
        let sender_id = SenderId::parse(&self.user_id).context(InvalidRecordSnafu {
            stage: "parse-wire-sender-id",
        })?;
        let timestamp = parse_timestamp(&self.timestamp).context(InvalidRecordSnafu {
            stage: "parse-wire-timestamp",
        })?;

        Ok(Message::new(id, sender_id, self.content, timestamp, origin))
    }

    /// False only when a room tag is present and names another room.
    pub fn belongs_to(&self, room: &RoomId) -> bool {
        self.room_id
            .as_deref()
            .is_none_or(|tag| RoomId::normalize(tag) == *room)
    }
}

/// Frame written to the push socket for a send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundFrame<'a> {
    pub room_id: &'a str,
    pub content: &'a str,
}

fn deserialize_flexible_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text,
        RawId::Number(number) => number.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_history_and_push_spellings() {
        let history: WireMessage = serde_json::from_str(
            r#"{"id":"1","senderId":"u1","content":"hi","timestamp":"2024-01-15T10:00:00Z"}"#,
        )
        .expect("history record");
        let push: WireMessage = serde_json::from_str(
            r#"{"id":7,"user_id":"u2","content":"hey","timestamp":"2024-01-15T10:00:01Z","room_id":"General"}"#,
        )
        .expect("push frame");

        assert_eq!(history.user_id, "u1");
        assert_eq!(push.id, "7");
        assert!(push.belongs_to(&RoomId::default_room()));
        assert!(!push.belongs_to(&RoomId::normalize("tech")));
        assert!(history.belongs_to(&RoomId::normalize("tech")));
    }

    #[test]
    fn conversion_rejects_bad_timestamps() {
        let record = WireMessage {
            id: "1".into(),
            user_id: "u1".into(),
            content: "hi".into(),
            timestamp: "not a time".into(),
            room_id: None,
        };

        assert!(record.into_message(Origin::History).is_err());
    }

    #[test]
    fn outbound_frame_uses_snake_case_keys() {
        let frame = OutboundFrame {
            room_id: "general",
            content: "hello",
        };

        assert_eq!(
            serde_json::to_string(&frame).expect("encode"),
            r#"{"room_id":"general","content":"hello"}"#
        );
    }
}
