use chatorbit_core::CoreError;
use snafu::Snafu;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ClientError {
    #[snafu(display("invalid url '{raw}' on `{stage}`: {source}"))]
    InvalidUrl {
        stage: &'static str,
        raw: String,
        source: url::ParseError,
    },
    #[snafu(display("url '{raw}' cannot carry a path on `{stage}`"))]
    UrlCannotBeBase { stage: &'static str, raw: String },
    #[snafu(display("unsupported url scheme '{scheme}' on `{stage}`"))]
    UnsupportedScheme {
        stage: &'static str,
        scheme: String,
    },
    #[snafu(display("failed to build http client on `{stage}`: {source}"))]
    BuildHttpClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("http request to {url} failed on `{stage}`: {source}"))]
    HttpRequest {
        stage: &'static str,
        url: String,
        source: reqwest::Error,
    },
    #[snafu(display("http request to {url} returned status {status} on `{stage}`"))]
    HttpStatus {
        stage: &'static str,
        url: String,
        status: u16,
    },
    #[snafu(display("failed to decode response from {url} on `{stage}`: {source}"))]
    DecodeBody {
        stage: &'static str,
        url: String,
        source: reqwest::Error,
    },
    #[snafu(display("identity response for '{sender_id}' has neither name nor username"))]
    MissingDisplayName {
        stage: &'static str,
        sender_id: String,
    },
    #[snafu(display("malformed message record on `{stage}`: {source}"))]
    InvalidRecord {
        stage: &'static str,
        source: CoreError,
    },
    #[snafu(display("failed to decode push frame on `{stage}`: {source}"))]
    DecodeFrame {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to encode push frame on `{stage}`: {source}"))]
    EncodeFrame {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("websocket connect to {url} failed on `{stage}`: {source}"))]
    WebSocketConnect {
        stage: &'static str,
        url: String,
        source: Box<tungstenite::Error>,
    },
    #[snafu(display("room view is no longer running on `{stage}`"))]
    ViewClosed { stage: &'static str },
}

pub type ClientResult<T> = Result<T, ClientError>;
