use chatorbit_core::{
    ConnectionState, ConnectionTransition, Message, Origin, Outbound, SubscriptionTarget,
};
use futures::{SinkExt, StreamExt};
use snafu::ResultExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{
    ClientError, ClientResult, DecodeFrameSnafu, EncodeFrameSnafu, WebSocketConnectSnafu,
};
use crate::urls::build_websocket_url;
use crate::wire::{OutboundFrame, WireMessage};

pub const PUSH_PATH: &[&str] = &["ws", "chat"];

/// Why the push subscription ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    ConnectFailed(String),
    ServerClosed,
    Transport(String),
    LocalShutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEventKind {
    Opened,
    Message(Message),
    Closed(CloseReason),
}

/// Event emitted by a connection worker, tagged for stale-event rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub target: SubscriptionTarget,
    pub kind: SessionEventKind,
}

/// The single push-stream subscription of one room view.
///
/// Without a session token the connection never opens and stays `Idle`.
/// A closed connection is never reopened by this type. The worker stops when
/// `cancel` (usually a child of the owning view's token) is cancelled.
pub struct SessionConnection {
    target: SubscriptionTarget,
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<String>>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl SessionConnection {
    /// Starts connecting in the background; lifecycle events arrive on `events`.
    pub fn open(
        api_base: &str,
        target: SubscriptionTarget,
        token: Option<&str>,
        events: mpsc::UnboundedSender<SessionEvent>,
        cancel: CancellationToken,
    ) -> ClientResult<Self> {
        let Some(token) = token.map(str::trim).filter(|token| !token.is_empty()) else {
            tracing::info!(subscription = %target, "no session token; push subscription stays inert");
            return Ok(Self::inert(target));
        };

        let mut url = build_websocket_url(api_base, PUSH_PATH)?;
        url.query_pairs_mut().append_pair("token", token);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(
            url,
            target.clone(),
            events,
            outbound_rx,
            cancel.clone(),
        ));

        let mut connection = Self {
            target,
            state: ConnectionState::Idle,
            outbound: Some(outbound_tx),
            cancel,
            worker: Some(worker),
        };
        connection.transition(ConnectionTransition::Begin);
        Ok(connection)
    }

    pub fn inert(target: SubscriptionTarget) -> Self {
        Self {
            target,
            state: ConnectionState::Idle,
            outbound: None,
            cancel: CancellationToken::new(),
            worker: None,
        }
    }

    /// Already-open connection whose outbound frames land in the returned receiver.
    #[cfg(test)]
    pub(crate) fn open_for_test(
        target: SubscriptionTarget,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let connection = Self {
            target,
            state: ConnectionState::Open,
            outbound: Some(outbound_tx),
            cancel: CancellationToken::new(),
            worker: None,
        };
        (connection, outbound_rx)
    }

    pub fn target(&self) -> &SubscriptionTarget {
        &self.target
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Folds a worker event into the connection state.
    ///
    /// Events for another target are ignored and leave the state untouched.
    pub fn apply(&mut self, event: &SessionEvent) -> ConnectionState {
        if event.target != self.target {
            return self.state;
        }

        match &event.kind {
            SessionEventKind::Opened => {
                self.transition(ConnectionTransition::Established);
            }
            SessionEventKind::Closed(reason) => {
                tracing::info!(subscription = %self.target, ?reason, "push subscription closed");
                self.transition(ConnectionTransition::Close);
                self.outbound = None;
            }
            SessionEventKind::Message(_) => {}
        }
        self.state
    }

    /// Stops the worker and waits for it, so no event from it can follow.
    pub async fn close(mut self) {
        let worker = self.begin_shutdown();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }

    fn begin_shutdown(&mut self) -> Option<JoinHandle<()>> {
        self.cancel.cancel();
        self.outbound = None;
        if self.state != ConnectionState::Idle {
            self.transition(ConnectionTransition::Close);
        }
        self.worker.take()
    }

    fn transition(&mut self, transition: ConnectionTransition) {
        match self.state.apply(transition) {
            Ok(next) => self.state = next,
            Err(rejection) => {
                tracing::debug!(
                    subscription = %self.target,
                    ?rejection,
                    "ignored connection transition"
                );
            }
        }
    }

    fn encode(&self, content: &str) -> ClientResult<String> {
        serde_json::to_string(&OutboundFrame {
            room_id: self.target.room.as_str(),
            content,
        })
        .context(EncodeFrameSnafu {
            stage: "encode-outbound-frame",
        })
    }
}

impl Outbound for SessionConnection {
    fn connection_state(&self) -> ConnectionState {
        self.state
    }

    fn transmit(&mut self, content: &str) -> bool {
        if !self.state.is_open() {
            return false;
        }
        let Some(outbound) = &self.outbound else {
            return false;
        };

        match self.encode(content) {
            Ok(frame) => outbound.send(frame).is_ok(),
            Err(error) => {
                tracing::error!(
                    subscription = %self.target,
                    error = %error,
                    "failed to encode outbound frame"
                );
                false
            }
        }
    }
}

impl Drop for SessionConnection {
    fn drop(&mut self) {
        if let Some(worker) = self.begin_shutdown() {
            worker.abort();
        }
    }
}

/// Parses one inbound text frame; `Ok(None)` means it belongs to another room.
pub fn decode_frame(text: &str, target: &SubscriptionTarget) -> ClientResult<Option<Message>> {
    let frame: WireMessage = serde_json::from_str(text).context(DecodeFrameSnafu {
        stage: "decode-inbound-frame",
    })?;
    if !frame.belongs_to(&target.room) {
        return Ok(None);
    }
    frame.into_message(Origin::Live).map(Some)
}

fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

async fn run_worker(
    url: Url,
    target: SubscriptionTarget,
    events: mpsc::UnboundedSender<SessionEvent>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    let emit = |kind: SessionEventKind| {
        let _ = events.send(SessionEvent {
            target: target.clone(),
            kind,
        });
    };

    let connected = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            emit(SessionEventKind::Closed(CloseReason::LocalShutdown));
            return;
        }
        result = connect_async(url.as_str()) => result
            .map_err(Box::new)
            .context(WebSocketConnectSnafu {
                stage: "connect-push-stream",
                url: redacted(&url),
            }),
    };

    let socket = match connected {
        Ok((socket, _response)) => socket,
        Err(error) => {
            tracing::warn!(subscription = %target, error = %error, "push subscription failed to open");
            emit(SessionEventKind::Closed(CloseReason::ConnectFailed(error.to_string())));
            return;
        }
    };

    tracing::info!(subscription = %target, url = %redacted(&url), "push subscription open");
    emit(SessionEventKind::Opened);
    let (mut sink, mut stream) = socket.split();

    let reason = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break CloseReason::LocalShutdown;
            }
            frame = outbound_rx.recv() => match frame {
                Some(text) => {
                    if let Err(error) = sink.send(WsMessage::text(text)).await {
                        break CloseReason::Transport(error.to_string());
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break CloseReason::LocalShutdown;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => match decode_frame(text.as_str(), &target) {
                    Ok(Some(message)) => emit(SessionEventKind::Message(message)),
                    Ok(None) => {
                        tracing::debug!(subscription = %target, "ignoring frame for another room");
                    }
                    Err(error) => log_malformed(&target, &error),
                },
                Some(Ok(WsMessage::Close(_))) | None => break CloseReason::ServerClosed,
                Some(Ok(_)) => {}
                Some(Err(error)) => break CloseReason::Transport(error.to_string()),
            },
        }
    };

    emit(SessionEventKind::Closed(reason));
}

fn log_malformed(target: &SubscriptionTarget, error: &ClientError) {
    tracing::warn!(subscription = %target, error = %error, "dropping malformed push frame");
}
