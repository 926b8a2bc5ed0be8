use std::sync::Arc;

use crate::backend::HttpBackend;
use crate::error::ClientResult;
use crate::identity::IdentityResolver;
use crate::reconnect::policy_from_settings;
use crate::settings::ClientSettings;
use crate::view::{RoomView, SessionIdentity, ViewContext};

/// Owns at most one room view at a time.
pub struct ChatClient {
    context: ViewContext,
    identity: SessionIdentity,
    current: Option<RoomView>,
}

impl ChatClient {
    pub fn new(context: ViewContext, identity: SessionIdentity) -> Self {
        Self {
            context,
            identity,
            current: None,
        }
    }

    /// Wires the HTTP backend and a shared identity cache from settings.
    pub fn connect(settings: Arc<ClientSettings>, identity: SessionIdentity) -> ClientResult<Self> {
        let backend = Arc::new(HttpBackend::new(&settings)?);
        let context = ViewContext {
            history: backend.clone(),
            identities: Arc::new(IdentityResolver::new(backend)),
            reconnect: policy_from_settings(settings.reconnect),
            settings,
        };
        Ok(Self::new(context, identity))
    }

    /// Tears down the current view, then opens `room`.
    pub async fn enter_room(&mut self, room: &str) -> &RoomView {
        self.leave().await;
        self.current.insert(RoomView::open(&self.context, room, &self.identity))
    }

    pub async fn leave(&mut self) {
        if let Some(view) = self.current.take() {
            view.close().await;
        }
    }

    pub fn current(&self) -> Option<&RoomView> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use chatorbit_core::{RoomId, SenderId};

    use super::*;
    use crate::settings::ClientSettings;

    fn client() -> ChatClient {
        let settings = ClientSettings {
            api_base: "http://127.0.0.1:9".into(),
            ..ClientSettings::default()
        };
        ChatClient::connect(
            Arc::new(settings),
            SessionIdentity {
                user_id: SenderId::new("me"),
                token: None,
            },
        )
        .expect("client builds")
    }

    #[tokio::test]
    async fn entering_a_room_closes_the_previous_view() {
        let mut client = client();

        let first = client.enter_room("General").await.subscribe();
        assert_eq!(client.current().map(RoomView::room), Some(&RoomId::default_room()));

        client.enter_room("tech").await;
        assert_eq!(
            client.current().map(RoomView::room),
            Some(&RoomId::normalize("tech"))
        );
        assert!(first.has_changed().is_err());

        client.leave().await;
        assert!(client.current().is_none());
    }
}
