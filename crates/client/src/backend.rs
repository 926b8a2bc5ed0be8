use std::future::Future;
use std::pin::Pin;

use chatorbit_core::{RoomId, SenderId};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use snafu::{OptionExt, ResultExt};

use crate::error::{
    BuildHttpClientSnafu, ClientResult, DecodeBodySnafu, HttpRequestSnafu, HttpStatusSnafu,
    MissingDisplayNameSnafu,
};
use crate::history::{HistoryRecord, HistorySource};
use crate::identity::IdentityLookup;
use crate::settings::ClientSettings;
use crate::urls::endpoint;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// `GET /user/{id}` body; either field is an acceptable display name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl IdentityRecord {
    pub fn display_name(&self) -> Option<&str> {
        [self.name.as_deref(), self.username.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|name| !name.is_empty())
    }
}

/// REST side of the chat server.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    api_base: String,
}

impl HttpBackend {
    pub fn new(settings: &ClientSettings) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .context(BuildHttpClientSnafu {
                stage: "build-http-backend",
            })?;

        Ok(Self {
            client,
            api_base: settings.api_base.clone(),
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    async fn get_json<T>(&self, segments: &[&str]) -> ClientResult<T>
    where
        T: DeserializeOwned,
    {
        let url = endpoint(&self.api_base, segments)?;
        let url_text = url.to_string();

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context(HttpRequestSnafu {
                stage: "send-get-request",
                url: url_text.clone(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return HttpStatusSnafu {
                stage: "get-http-status",
                url: url_text,
                status: status.as_u16(),
            }
            .fail();
        }

        response.json::<T>().await.context(DecodeBodySnafu {
            stage: "decode-get-response",
            url: url_text,
        })
    }
}

impl HistorySource for HttpBackend {
    fn fetch_history<'a>(
        &'a self,
        room: &'a RoomId,
    ) -> BoxFuture<'a, ClientResult<Vec<HistoryRecord>>> {
        Box::pin(async move { self.get_json(&["chat", "history", room.as_str()]).await })
    }
}

impl IdentityLookup for HttpBackend {
    fn lookup<'a>(&'a self, sender_id: &'a SenderId) -> BoxFuture<'a, ClientResult<String>> {
        Box::pin(async move {
            let record: IdentityRecord = self.get_json(&["user", sender_id.as_str()]).await?;
            record
                .display_name()
                .map(str::to_string)
                .context(MissingDisplayNameSnafu {
                    stage: "pick-display-name",
                    sender_id: sender_id.to_string(),
                })
        })
    }
}
