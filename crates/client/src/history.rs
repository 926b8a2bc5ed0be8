use chatorbit_core::{Message, Origin, RoomId};

use crate::backend::BoxFuture;
use crate::error::ClientResult;
use crate::wire::WireMessage;

pub type HistoryRecord = WireMessage;

/// One-shot fetch of a room's persisted backlog.
pub trait HistorySource: Send + Sync {
    fn fetch_history<'a>(
        &'a self,
        room: &'a RoomId,
    ) -> BoxFuture<'a, ClientResult<Vec<HistoryRecord>>>;
}

/// Fetches history once and maps it into a sorted batch of `history` messages.
///
/// Records that fail to parse are dropped individually. There is no retry.
pub async fn load_history(
    source: &dyn HistorySource,
    room: &RoomId,
) -> ClientResult<Vec<Message>> {
    let records = source.fetch_history(room).await?;
    let fetched = records.len();

    let mut messages = records
        .into_iter()
        .filter_map(|record| match record.into_message(Origin::History) {
            Ok(message) => Some(message),
            Err(error) => {
                tracing::warn!(room_id = %room, error = %error, "dropping malformed history record");
                None
            }
        })
        .collect::<Vec<_>>();
    messages.sort_by(|left, right| left.timestamp.cmp(&right.timestamp));

    tracing::debug!(room_id = %room, fetched, kept = messages.len(), "history loaded");
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HttpStatusSnafu;

    struct FixedHistory(Vec<HistoryRecord>);

    impl HistorySource for FixedHistory {
        fn fetch_history<'a>(
            &'a self,
            _room: &'a RoomId,
        ) -> BoxFuture<'a, ClientResult<Vec<HistoryRecord>>> {
            Box::pin(async move { Ok(self.0.clone()) })
        }
    }

    struct BrokenHistory;

    impl HistorySource for BrokenHistory {
        fn fetch_history<'a>(
            &'a self,
            room: &'a RoomId,
        ) -> BoxFuture<'a, ClientResult<Vec<HistoryRecord>>> {
            Box::pin(async move {
                HttpStatusSnafu {
                    stage: "test-history",
                    url: format!("/chat/history/{room}"),
                    status: 500_u16,
                }
                .fail()
            })
        }
    }

    fn record(id: &str, timestamp: &str) -> HistoryRecord {
        WireMessage {
            id: id.into(),
            user_id: "u1".into(),
            content: format!("body-{id}"),
            timestamp: timestamp.into(),
            room_id: None,
        }
    }

    #[tokio::test]
    async fn sorts_and_tags_records_as_history() {
        let source = FixedHistory(vec![
            record("2", "2024-01-15T10:00:02Z"),
            record("1", "2024-01-15T10:00:01Z"),
            record("bad", "??"),
        ]);

        let messages = load_history(&source, &RoomId::default_room())
            .await
            .expect("history loads");

        let ids = messages.iter().map(|message| message.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, ["1", "2"]);
        assert!(messages.iter().all(|message| message.origin == Origin::History));
    }

    #[tokio::test]
    async fn transport_failure_is_returned() {
        assert!(load_history(&BrokenHistory, &RoomId::default_room()).await.is_err());
    }
}
