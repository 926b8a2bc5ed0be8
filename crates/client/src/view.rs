use std::collections::HashSet;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use chatorbit_core::{
    ConnectionState, Message, ModerationFlags, PinState, Reconciler, RenderedMessage, RoomId,
    ScrollAction, ScrollMetrics, SendGate, SendRejection, SenderId, SessionSerial,
    SubscriptionTarget, ViewportController, decorate,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{ClientResult, ViewClosedSnafu};
use crate::history::{HistorySource, load_history};
use crate::identity::IdentityResolver;
use crate::reconnect::ReconnectPolicy;
use crate::session::{SessionConnection, SessionEvent, SessionEventKind};
use crate::settings::ClientSettings;

/// Services shared by every room view of one client process.
#[derive(Clone)]
pub struct ViewContext {
    pub settings: Arc<ClientSettings>,
    pub history: Arc<dyn HistorySource>,
    pub identities: Arc<IdentityResolver>,
    pub reconnect: Arc<dyn ReconnectPolicy>,
}

/// Who is looking at the room; supplied by the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub user_id: SenderId,
    pub token: Option<String>,
}

/// Renderable state published after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineSnapshot {
    pub room: RoomId,
    pub revision: u64,
    pub messages: Vec<RenderedMessage>,
    pub connection: ConnectionState,
    pub pin: PinState,
    /// What the surface should do for this revision.
    pub scroll: ScrollAction,
}

impl TimelineSnapshot {
    fn empty(room: RoomId) -> Self {
        Self {
            room,
            revision: 0,
            messages: Vec::new(),
            connection: ConnectionState::Idle,
            pin: PinState::Pinned,
            scroll: ScrollAction::Stay,
        }
    }
}

/// Follow-up work requested by a state change.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reaction {
    pub republish: bool,
    pub lookups: Vec<SenderId>,
    pub reconnect_after: Option<Duration>,
}

/// Everything one room view owns. Mutated only by its actor task.
pub struct RoomState {
    room: RoomId,
    reconciler: Reconciler,
    gate: SendGate,
    viewport: ViewportController,
    connection: SessionConnection,
    requested: HashSet<SenderId>,
    revision: u64,
    scroll: ScrollAction,
    reconnect_attempts: u32,
}

impl RoomState {
    pub fn new(
        room: RoomId,
        user_id: SenderId,
        gate: SendGate,
        viewport: ViewportController,
        connection: SessionConnection,
    ) -> Self {
        Self {
            room,
            reconciler: Reconciler::new(user_id),
            gate,
            viewport,
            connection,
            requested: HashSet::new(),
            revision: 0,
            scroll: ScrollAction::Stay,
            reconnect_attempts: 0,
        }
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn timeline(&self) -> &[Message] {
        self.reconciler.entries()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection_target(&self) -> &SubscriptionTarget {
        self.connection.target()
    }

    pub fn apply_history(
        &mut self,
        messages: Vec<Message>,
        identities: &IdentityResolver,
    ) -> Reaction {
        let lookups = self.wanted_lookups(messages.iter().map(|m| &m.sender_id), identities);
        let outcome = self.reconciler.merge(messages);
        tracing::debug!(
            room_id = %self.room,
            inserted = outcome.inserted,
            duplicates = outcome.duplicates,
            "history merged"
        );

        Reaction {
            republish: self.timeline_changed(outcome.changed()),
            lookups,
            reconnect_after: None,
        }
    }

    pub fn apply_session(
        &mut self,
        event: SessionEvent,
        identities: &IdentityResolver,
        policy: &dyn ReconnectPolicy,
    ) -> Reaction {
        if &event.target != self.connection.target() {
            tracing::debug!(
                room_id = %self.room,
                stale = %event.target,
                "dropping event from superseded subscription"
            );
            return Reaction::default();
        }

        let before = self.connection.state();
        let after = self.connection.apply(&event);
        let mut reaction = Reaction {
            republish: before != after,
            ..Reaction::default()
        };

        match event.kind {
            SessionEventKind::Opened => self.reconnect_attempts = 0,
            SessionEventKind::Message(message) => {
                let sender_id = message.sender_id.clone();
                match self.reconciler.insert(message) {
                    Ok(()) => {
                        reaction.lookups = self.wanted_lookups([&sender_id], identities);
                        reaction.republish |= self.timeline_changed(true);
                    }
                    Err(rejection) => {
                        tracing::trace!(
                            room_id = %self.room,
                            ?rejection,
                            "live message not inserted"
                        );
                    }
                }
            }
            SessionEventKind::Closed(_) => {
                self.reconnect_attempts += 1;
                reaction.reconnect_after = policy.next_delay(self.reconnect_attempts);
            }
        }
        reaction
    }

    /// Runs the send gate against the live connection and the timeline.
    pub fn submit(
        &mut self,
        text: &str,
        flags: &ModerationFlags,
        identities: &IdentityResolver,
    ) -> (Result<Message, SendRejection>, Reaction) {
        let result = self
            .gate
            .submit(text, flags, &mut self.connection, &mut self.reconciler);

        let reaction = match &result {
            Ok(echo) => Reaction {
                lookups: self.wanted_lookups([&echo.sender_id], identities),
                republish: self.timeline_changed(true),
                reconnect_after: None,
            },
            Err(rejection) => {
                tracing::debug!(room_id = %self.room, %rejection, "send rejected by gate");
                Reaction::default()
            }
        };
        (result, reaction)
    }

    pub fn scrolled(&mut self, metrics: ScrollMetrics) -> Reaction {
        let before = self.viewport.state();
        let after = self.viewport.on_user_scroll(metrics);
        Reaction {
            republish: before != after,
            ..Reaction::default()
        }
    }

    pub fn jump_to_latest(&mut self) -> Reaction {
        self.scroll = self.viewport.jump_to_latest();
        Reaction {
            republish: true,
            ..Reaction::default()
        }
    }

    pub fn identity_resolved(&mut self, sender_id: &SenderId) -> Reaction {
        self.requested.remove(sender_id);
        Reaction {
            republish: true,
            ..Reaction::default()
        }
    }

    /// Replaces a closed subscription with a fresh one for the next serial.
    pub fn replace_connection(&mut self, connection: SessionConnection) -> SessionConnection {
        mem::replace(&mut self.connection, connection)
    }

    pub fn next_target(&self) -> Option<SubscriptionTarget> {
        (self.connection.state() == ConnectionState::Closed).then(|| {
            SubscriptionTarget::new(self.room.clone(), self.connection.target().session.next())
        })
    }

    pub fn snapshot(&mut self, identities: &IdentityResolver) -> TimelineSnapshot {
        self.revision += 1;
        TimelineSnapshot {
            room: self.room.clone(),
            revision: self.revision,
            messages: decorate(
                self.reconciler.entries(),
                self.reconciler.current_user(),
                |sender| identities.cached(sender),
            ),
            connection: self.connection.state(),
            pin: self.viewport.state(),
            scroll: mem::replace(&mut self.scroll, ScrollAction::Stay),
        }
    }

    pub fn into_connection(self) -> SessionConnection {
        self.connection
    }

    fn timeline_changed(&mut self, changed: bool) -> bool {
        if changed && self.viewport.on_timeline_changed() == ScrollAction::ScrollToLatest {
            self.scroll = ScrollAction::ScrollToLatest;
        }
        changed
    }

    fn wanted_lookups<'a, I>(&mut self, senders: I, identities: &IdentityResolver) -> Vec<SenderId>
    where
        I: IntoIterator<Item = &'a SenderId>,
    {
        senders
            .into_iter()
            .filter(|sender| identities.cached(sender).is_none())
            .filter(|sender| self.requested.insert((*sender).clone()))
            .cloned()
            .collect()
    }
}

enum ViewCommand {
    Send {
        text: String,
        flags: ModerationFlags,
        reply: oneshot::Sender<Result<Message, SendRejection>>,
    },
    Scrolled(ScrollMetrics),
    JumpToLatest,
}

enum ViewInput {
    History(Vec<Message>),
    IdentityResolved(SenderId),
    Reconnect(SessionSerial),
}

/// Handle to one running room view.
///
/// Dropping or closing the handle tears the view down: the view's cancellation
/// token is cancelled, the push subscription is closed, and history or identity
/// results that complete later are discarded.
pub struct RoomView {
    room: RoomId,
    commands: mpsc::UnboundedSender<ViewCommand>,
    snapshots: watch::Receiver<TimelineSnapshot>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RoomView {
    pub fn open(context: &ViewContext, room: &str, identity: &SessionIdentity) -> Self {
        let api_base = context.settings.api_base.clone();
        let token = identity.token.clone();
        Self::launch(
            context,
            RoomId::normalize(room),
            identity,
            move |target, events, cancel| {
                open_connection(&api_base, target, token.as_deref(), events, cancel)
            },
        )
    }

    fn launch<F>(
        context: &ViewContext,
        room: RoomId,
        identity: &SessionIdentity,
        connect: F,
    ) -> Self
    where
        F: FnOnce(
            SubscriptionTarget,
            mpsc::UnboundedSender<SessionEvent>,
            CancellationToken,
        ) -> SessionConnection,
    {
        let cancel = CancellationToken::new();
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(TimelineSnapshot::empty(room.clone()));

        let target = SubscriptionTarget::new(room.clone(), SessionSerial::new(1));
        let connection = connect(target, session_tx.clone(), cancel.child_token());
        let state = RoomState::new(
            room.clone(),
            identity.user_id.clone(),
            SendGate::new(context.settings.max_message_length),
            ViewportController::new(context.settings.pin_threshold_px),
            connection,
        );

        spawn_history(context, &room, &cancel, &input_tx);

        let actor = RoomActor {
            context: context.clone(),
            token: identity.token.clone(),
            cancel: cancel.clone(),
            state,
            snapshot_tx,
            input_tx,
            session_tx,
        };
        let task = tokio::spawn(actor.run(commands_rx, input_rx, session_rx));
        tracing::info!(room_id = %room, user_id = %identity.user_id, "room view opened");

        Self {
            room,
            commands: commands_tx,
            snapshots: snapshot_rx,
            cancel,
            task: Some(task),
        }
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn snapshot(&self) -> TimelineSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TimelineSnapshot> {
        self.snapshots.clone()
    }

    /// Gate outcome for the send; `Err` only when the view is gone.
    pub async fn send(
        &self,
        text: impl Into<String>,
        flags: ModerationFlags,
    ) -> ClientResult<Result<Message, SendRejection>> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(ViewCommand::Send {
                text: text.into(),
                flags,
                reply,
            })
            .ok()
            .ok_or_else(|| ViewClosedSnafu { stage: "queue-send" }.build())?;

        outcome
            .await
            .ok()
            .ok_or_else(|| ViewClosedSnafu { stage: "await-send" }.build())
    }

    pub fn scrolled(&self, metrics: ScrollMetrics) {
        let _ = self.commands.send(ViewCommand::Scrolled(metrics));
    }

    pub fn jump_to_latest(&self) {
        let _ = self.commands.send(ViewCommand::JumpToLatest);
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Tears the view down and waits until its subscription is closed.
    pub async fn close(mut self) {
        if let Some(task) = self.begin_teardown() {
            let _ = task.await;
        }
    }

    fn begin_teardown(&mut self) -> Option<JoinHandle<()>> {
        self.cancel.cancel();
        self.task.take()
    }
}

impl Drop for RoomView {
    fn drop(&mut self) {
        if let Some(task) = self.begin_teardown() {
            task.abort();
        }
    }
}

fn open_connection(
    api_base: &str,
    target: SubscriptionTarget,
    token: Option<&str>,
    events: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
) -> SessionConnection {
    match SessionConnection::open(api_base, target.clone(), token, events, cancel) {
        Ok(connection) => connection,
        Err(error) => {
            tracing::error!(
                subscription = %target,
                error = %error,
                "cannot start push subscription"
            );
            SessionConnection::inert(target)
        }
    }
}

fn spawn_history(
    context: &ViewContext,
    room: &RoomId,
    cancel: &CancellationToken,
    input_tx: &mpsc::UnboundedSender<ViewInput>,
) {
    let history = Arc::clone(&context.history);
    let room = room.clone();
    let cancel = cancel.clone();
    let input_tx = input_tx.clone();

    tokio::spawn(async move {
        match load_history(history.as_ref(), &room).await {
            Ok(messages) if !cancel.is_cancelled() => {
                let _ = input_tx.send(ViewInput::History(messages));
            }
            Ok(_) => tracing::debug!(room_id = %room, "history arrived after teardown"),
            Err(error) => {
                tracing::warn!(
                    room_id = %room,
                    error = %error,
                    "history fetch failed; timeline stays empty"
                );
            }
        }
    });
}

struct RoomActor {
    context: ViewContext,
    token: Option<String>,
    cancel: CancellationToken,
    state: RoomState,
    snapshot_tx: watch::Sender<TimelineSnapshot>,
    input_tx: mpsc::UnboundedSender<ViewInput>,
    session_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl RoomActor {
    async fn run(
        mut self,
        mut commands_rx: mpsc::UnboundedReceiver<ViewCommand>,
        mut input_rx: mpsc::UnboundedReceiver<ViewInput>,
        mut session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        self.publish();
        let cancel = self.cancel.clone();

        loop {
            // Teardown wins over anything already queued.
            let reaction = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(command) = commands_rx.recv() => self.handle_command(command),
                Some(input) = input_rx.recv() => self.handle_input(input),
                Some(event) = session_rx.recv() => self.state.apply_session(
                    event,
                    &self.context.identities,
                    self.context.reconnect.as_ref(),
                ),
                else => break,
            };
            self.react(reaction);
        }

        let room = self.state.room().clone();
        self.state.into_connection().close().await;
        tracing::info!(room_id = %room, "room view closed");
    }

    fn handle_command(&mut self, command: ViewCommand) -> Reaction {
        match command {
            ViewCommand::Send { text, flags, reply } => {
                let (result, reaction) = self.state.submit(&text, &flags, &self.context.identities);
                let _ = reply.send(result);
                reaction
            }
            ViewCommand::Scrolled(metrics) => self.state.scrolled(metrics),
            ViewCommand::JumpToLatest => self.state.jump_to_latest(),
        }
    }

    fn handle_input(&mut self, input: ViewInput) -> Reaction {
        if self.cancel.is_cancelled() {
            tracing::debug!(
                room_id = %self.state.room(),
                "dropping result delivered after teardown"
            );
            return Reaction::default();
        }

        match input {
            ViewInput::History(messages) => {
                self.state.apply_history(messages, &self.context.identities)
            }
            ViewInput::IdentityResolved(sender_id) => self.state.identity_resolved(&sender_id),
            ViewInput::Reconnect(serial) => {
                let Some(target) = self.state.next_target().filter(|next| next.session == serial)
                else {
                    return Reaction::default();
                };
                tracing::info!(subscription = %target, "reopening push subscription");
                let connection = open_connection(
                    &self.context.settings.api_base,
                    target,
                    self.token.as_deref(),
                    self.session_tx.clone(),
                    self.cancel.child_token(),
                );
                drop(self.state.replace_connection(connection));
                Reaction {
                    republish: true,
                    ..Reaction::default()
                }
            }
        }
    }

    fn react(&mut self, reaction: Reaction) {
        for sender_id in reaction.lookups {
            self.spawn_lookup(sender_id);
        }

        if let Some(delay) = reaction.reconnect_after {
            self.schedule_reconnect(delay);
        }

        if reaction.republish {
            self.publish();
        }
    }

    fn schedule_reconnect(&self, delay: Duration) {
        let Some(next) = self.state.next_target() else {
            return;
        };
        tracing::debug!(subscription = %next, ?delay, "scheduling reconnect");
        let input_tx = self.input_tx.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = input_tx.send(ViewInput::Reconnect(next.session));
                }
            }
        });
    }

    fn spawn_lookup(&self, sender_id: SenderId) {
        let identities = Arc::clone(&self.context.identities);
        let input_tx = self.input_tx.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let _name = identities.resolve(&sender_id).await;
            if !cancel.is_cancelled() {
                let _ = input_tx.send(ViewInput::IdentityResolved(sender_id));
            }
        });
    }

    fn publish(&mut self) {
        let snapshot = self.state.snapshot(&self.context.identities);
        self.snapshot_tx.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use chatorbit_core::{Origin, SessionSerial};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use tokio::sync::Notify;

    use super::*;
    use crate::backend::BoxFuture;
    use crate::error::{ClientResult, HttpStatusSnafu};
    use crate::history::HistoryRecord;
    use crate::identity::IdentityLookup;
    use crate::reconnect::{FixedDelay, NeverReconnect};
    use crate::wire::WireMessage;

    const OPAQUE: &str = "65a1f0c2b3d4e5f6a7b8c9d0";

    struct NoLookup;

    impl IdentityLookup for NoLookup {
        fn lookup<'a>(&'a self, sender_id: &'a SenderId) -> BoxFuture<'a, ClientResult<String>> {
            Box::pin(async move { Ok(format!("resolved-{sender_id}")) })
        }
    }

    fn identities() -> IdentityResolver {
        IdentityResolver::new(Arc::new(NoLookup))
    }

    fn message(id: &str, sender: &str, seconds: i64, origin: Origin) -> Message {
        let base = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        Message::new(
            id.into(),
            sender.into(),
            format!("body-{id}"),
            base + ChronoDuration::seconds(seconds),
            origin,
        )
    }

    fn open_state() -> (RoomState, mpsc::UnboundedReceiver<String>) {
        let target = SubscriptionTarget::new(RoomId::default_room(), SessionSerial::new(1));
        let (connection, frames) = SessionConnection::open_for_test(target);
        let state = RoomState::new(
            RoomId::default_room(),
            SenderId::new("me"),
            SendGate::default(),
            ViewportController::default(),
            connection,
        );
        (state, frames)
    }

    fn live(state: &RoomState, message: Message) -> SessionEvent {
        SessionEvent {
            target: state.connection_target().clone(),
            kind: SessionEventKind::Message(message),
        }
    }

    fn contents(state: &RoomState) -> Vec<&str> {
        state.timeline().iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn history_then_live_frame_is_ordered() {
        let (mut state, _frames) = open_state();
        let identities = identities();

        state.apply_history(vec![message("1", "u1", 0, Origin::History)], &identities);
        let event = live(&state, message("2", "u2", 1, Origin::Live));
        let reaction = state.apply_session(event, &identities, &NeverReconnect);

        assert!(reaction.republish);
        let ids = state.timeline().iter().map(|m| m.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, ["1", "2"]);
    }

    #[test]
    fn own_send_is_echoed_once_and_live_copy_suppressed() {
        let (mut state, mut frames) = open_state();
        let identities = identities();

        let (result, reaction) = state.submit("hello", &ModerationFlags::default(), &identities);
        let echo = result.expect("gate permits");
        assert!(reaction.republish);
        assert_eq!(
            frames.try_recv().ok().as_deref(),
            Some(r#"{"room_id":"general","content":"hello"}"#)
        );

        let mut duplicate = message("9", "me", 5, Origin::Live);
        duplicate.content = "hello".into();
        let event = live(&state, duplicate);
        let reaction = state.apply_session(event, &identities, &NeverReconnect);

        assert!(!reaction.republish);
        assert_eq!(contents(&state), ["hello"]);
        assert_eq!(state.timeline()[0].id, echo.id);
    }

    #[test]
    fn rejected_send_changes_nothing() {
        let (mut state, mut frames) = open_state();
        let identities = identities();

        let (result, reaction) = state.submit("hi", &ModerationFlags::blocked(), &identities);

        assert_eq!(result, Err(SendRejection::Blocked));
        assert_eq!(reaction, Reaction::default());
        assert!(frames.try_recv().is_err());
        assert!(state.timeline().is_empty());
    }

    #[test]
    fn stale_subscription_events_are_dropped() {
        let (mut state, _frames) = open_state();
        let identities = identities();
        let stale = SessionEvent {
            target: SubscriptionTarget::new(RoomId::normalize("tech"), SessionSerial::new(1)),
            kind: SessionEventKind::Message(message("x", "u9", 0, Origin::Live)),
        };

        let reaction = state.apply_session(stale, &identities, &NeverReconnect);

        assert_eq!(reaction, Reaction::default());
        assert!(state.timeline().is_empty());
    }

    #[test]
    fn snapshots_follow_pin_state() {
        let (mut state, _frames) = open_state();
        let identities = identities();

        state.apply_history(vec![message("1", "u1", 0, Origin::History)], &identities);
        assert_eq!(state.snapshot(&identities).scroll, ScrollAction::ScrollToLatest);
        assert_eq!(state.snapshot(&identities).scroll, ScrollAction::Stay);

        state.scrolled(ScrollMetrics::new(0.0, 2_000.0, 400.0));
        let event = live(&state, message("2", "u2", 1, Origin::Live));
        state.apply_session(event, &identities, &NeverReconnect);
        let snapshot = state.snapshot(&identities);
        assert_eq!(snapshot.pin, PinState::Unpinned);
        assert_eq!(snapshot.scroll, ScrollAction::Stay);

        state.jump_to_latest();
        let snapshot = state.snapshot(&identities);
        assert_eq!(snapshot.pin, PinState::Pinned);
        assert_eq!(snapshot.scroll, ScrollAction::ScrollToLatest);
    }

    #[test]
    fn unresolved_senders_are_requested_once_per_view() {
        let (mut state, _frames) = open_state();
        let identities = identities();

        let reaction = state.apply_history(
            vec![
                message("1", OPAQUE, 0, Origin::History),
                message("2", OPAQUE, 1, Origin::History),
                message("3", "plainname", 2, Origin::History),
            ],
            &identities,
        );
        assert_eq!(reaction.lookups, [SenderId::new(OPAQUE)]);

        let event = live(&state, message("4", OPAQUE, 3, Origin::Live));
        let reaction = state.apply_session(event, &identities, &NeverReconnect);
        assert!(reaction.lookups.is_empty());

        state.identity_resolved(&SenderId::new(OPAQUE));
        let event = live(&state, message("5", OPAQUE, 4, Origin::Live));
        let reaction = state.apply_session(event, &identities, &NeverReconnect);
        assert_eq!(reaction.lookups, [SenderId::new(OPAQUE)]);
    }

    #[test]
    fn close_consults_reconnect_policy() {
        let identities = identities();
        let policy = FixedDelay {
            delay: Duration::from_millis(10),
            max_attempts: 1,
        };

        let (mut state, _frames) = open_state();
        let closed = SessionEvent {
            target: state.connection_target().clone(),
            kind: SessionEventKind::Closed(crate::session::CloseReason::ServerClosed),
        };
        let reaction = state.apply_session(closed.clone(), &identities, &NeverReconnect);
        assert_eq!(state.connection_state(), ConnectionState::Closed);
        assert_eq!(reaction.reconnect_after, None);

        let (mut state, _frames) = open_state();
        let reaction = state.apply_session(closed, &identities, &policy);
        assert_eq!(reaction.reconnect_after, Some(Duration::from_millis(10)));
        assert_eq!(
            state.next_target().map(|target| target.session),
            Some(SessionSerial::new(2))
        );
    }

    #[test]
    fn suppressed_own_frames_schedule_no_lookup() {
        let target = SubscriptionTarget::new(RoomId::default_room(), SessionSerial::new(1));
        let (connection, _frames) = SessionConnection::open_for_test(target);
        let mut state = RoomState::new(
            RoomId::default_room(),
            SenderId::new(OPAQUE),
            SendGate::default(),
            ViewportController::default(),
            connection,
        );
        let identities = identities();

        let event = live(&state, message("9", OPAQUE, 0, Origin::Live));
        let reaction = state.apply_session(event, &identities, &NeverReconnect);

        assert_eq!(reaction, Reaction::default());
        assert!(state.timeline().is_empty());

        state.apply_history(vec![message("1", "u1", 0, Origin::History)], &identities);
        let duplicate = live(&state, message("1", "stranger", 0, Origin::Live));
        let reaction = state.apply_session(duplicate, &identities, &NeverReconnect);

        assert!(reaction.lookups.is_empty());
        assert_eq!(state.timeline().len(), 1);
    }

    fn record(id: &str, sender: &str) -> HistoryRecord {
        WireMessage {
            id: id.into(),
            user_id: sender.into(),
            content: "hi".into(),
            timestamp: "2024-01-15T10:00:00Z".into(),
            room_id: None,
        }
    }

    struct SlowHistory {
        release: Notify,
    }

    impl HistorySource for SlowHistory {
        fn fetch_history<'a>(
            &'a self,
            _room: &'a RoomId,
        ) -> BoxFuture<'a, ClientResult<Vec<HistoryRecord>>> {
            Box::pin(async move {
                self.release.notified().await;
                Ok(vec![record("1", OPAQUE)])
            })
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
                    status: 503_u16,
                }
                .fail()
            })
        }
    }

    struct ReadyHistory(Vec<HistoryRecord>);

    impl HistorySource for ReadyHistory {
        fn fetch_history<'a>(
            &'a self,
            _room: &'a RoomId,
        ) -> BoxFuture<'a, ClientResult<Vec<HistoryRecord>>> {
            Box::pin(async move { Ok(self.0.clone()) })
        }
    }

    #[derive(Default)]
    struct HeldLookup {
        started: Notify,
        release: Notify,
    }

    impl IdentityLookup for HeldLookup {
        fn lookup<'a>(&'a self, _sender_id: &'a SenderId) -> BoxFuture<'a, ClientResult<String>> {
            Box::pin(async move {
                self.started.notify_one();
                self.release.notified().await;
                Ok("Ada".to_string())
            })
        }
    }

    fn context(history: Arc<dyn HistorySource>, identities: Arc<IdentityResolver>) -> ViewContext {
        ViewContext {
            settings: Arc::new(ClientSettings::default()),
            history,
            identities,
            reconnect: Arc::new(NeverReconnect),
        }
    }

    fn viewer() -> SessionIdentity {
        SessionIdentity {
            user_id: SenderId::new("me"),
            token: None,
        }
    }

    async fn wait_for<F>(
        snapshots: &mut watch::Receiver<TimelineSnapshot>,
        done: F,
    ) -> TimelineSnapshot
    where
        F: Fn(&TimelineSnapshot) -> bool,
    {
        tokio::time::timeout(STEP, async {
            loop {
                {
                    let snapshot = snapshots.borrow_and_update();
                    if done(&snapshot) {
                        return snapshot.clone();
                    }
                }
                if snapshots.changed().await.is_err() {
                    panic!("view stopped publishing");
                }
            }
        })
        .await
        .expect("snapshot within timeout")
    }

    const STEP: std::time::Duration = std::time::Duration::from_secs(5);

    #[tokio::test]
    async fn view_publishes_history_with_resolved_names() {
        let history = Arc::new(SlowHistory {
            release: Notify::new(),
        });
        let context = context(history.clone(), Arc::new(identities()));
        let view = RoomView::open(&context, "General", &viewer());
        let mut snapshots = view.subscribe();
        history.release.notify_one();

        let resolved = wait_for(&mut snapshots, |snapshot| {
            snapshot
                .messages
                .first()
                .is_some_and(|m| m.display_name == format!("resolved-{OPAQUE}"))
        })
        .await;

        assert_eq!(resolved.room, RoomId::default_room());
        assert_eq!(resolved.connection, ConnectionState::Idle);
        assert_eq!(
            view.send("hello", ModerationFlags::default())
                .await
                .expect("view running"),
            Err(SendRejection::NotConnected {
                state: ConnectionState::Idle
            })
        );
        view.close().await;
    }

    #[tokio::test]
    async fn history_after_teardown_is_discarded() {
        let history = Arc::new(SlowHistory {
            release: Notify::new(),
        });
        let context = context(history.clone(), Arc::new(identities()));
        let view = RoomView::open(&context, "tech", &viewer());
        let snapshots = view.subscribe();
        view.close().await;

        history.release.notify_one();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(snapshots.borrow().messages.is_empty());
    }

    #[tokio::test]
    async fn failed_history_leaves_timeline_empty_and_live_frames_still_land() {
        let context = context(Arc::new(BrokenHistory), Arc::new(identities()));
        let mut wiring = None;
        let connect = |target: SubscriptionTarget, events: mpsc::UnboundedSender<SessionEvent>, _| {
            wiring = Some((target.clone(), events));
            SessionConnection::open_for_test(target).0
        };
        let view = RoomView::launch(&context, RoomId::default_room(), &viewer(), connect);
        let (target, events) = wiring.expect("connection requested");
        let mut snapshots = view.subscribe();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(view.snapshot().messages.is_empty());

        events
            .send(SessionEvent {
                target,
                kind: SessionEventKind::Message(message("2", "u2", 1, Origin::Live)),
            })
            .expect("view listening");
        let snapshot = wait_for(&mut snapshots, |snapshot| !snapshot.messages.is_empty()).await;

        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].id.as_str(), "2");
        assert_eq!(snapshot.connection, ConnectionState::Open);
        view.close().await;
    }

    #[tokio::test]
    async fn identity_resolved_after_teardown_is_not_delivered() {
        let lookup = Arc::new(HeldLookup::default());
        let identities = Arc::new(IdentityResolver::new(lookup.clone()));
        let history = Arc::new(ReadyHistory(vec![record("1", OPAQUE)]));
        let view = RoomView::open(&context(history, identities.clone()), "general", &viewer());
        let snapshots = view.subscribe();

        tokio::time::timeout(STEP, lookup.started.notified())
            .await
            .expect("lookup started");
        view.close().await;
        lookup.release.notify_one();

        let sender = SenderId::new(OPAQUE);
        tokio::time::timeout(STEP, async {
            while identities.cached(&sender).is_none() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("shared cache filled");

        let snapshot = snapshots.borrow();
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].display_name, OPAQUE);
    }

    #[tokio::test]
    async fn cancelled_view_ignores_results_already_queued() {
        let (state, _frames) = open_state();
        let cancel = CancellationToken::new();
        let (snapshot_tx, snapshots) =
            watch::channel(TimelineSnapshot::empty(RoomId::default_room()));
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (_commands_tx, commands_rx) = mpsc::unbounded_channel();

        let history = vec![message("1", "u1", 0, Origin::History)];
        input_tx
            .send(ViewInput::History(history.clone()))
            .unwrap_or_else(|_| panic!("actor input open"));
        session_tx
            .send(SessionEvent {
                target: state.connection_target().clone(),
                kind: SessionEventKind::Message(message("2", "u2", 1, Origin::Live)),
            })
            .expect("session input open");

        let mut actor = RoomActor {
            context: context(Arc::new(BrokenHistory), Arc::new(identities())),
            token: None,
            cancel: cancel.clone(),
            state,
            snapshot_tx,
            input_tx,
            session_tx,
        };
        cancel.cancel();

        assert_eq!(actor.handle_input(ViewInput::History(history)), Reaction::default());
        assert!(actor.state.timeline().is_empty());

        actor.run(commands_rx, input_rx, session_rx).await;
        let snapshot = snapshots.borrow();
        assert_eq!(snapshot.revision, 1);
        assert!(snapshot.messages.is_empty());
    }
}
