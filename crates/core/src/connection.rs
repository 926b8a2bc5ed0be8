use std::fmt;

use crate::room::RoomId;

/// Serial number of one push subscription attempt.
///
/// This must change on every open so events from a superseded socket can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionSerial(pub u64);

impl SessionSerial {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Routing key for stale-event rejection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionTarget {
    pub room: RoomId,
    pub session: SessionSerial,
}

impl SubscriptionTarget {
    pub fn new(room: RoomId, session: SessionSerial) -> Self {
        Self { room, session }
    }
}

impl fmt::Display for SubscriptionTarget {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}#{}", self.room, self.session.0)
    }
}

/// Lifecycle of the single push subscription owned by a room view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Applies one transition deterministically.
    ///
    /// `Close` is accepted from every started state so terminal network events
    /// never get lost; closing twice is a no-op.
    pub fn apply(self, transition: ConnectionTransition) -> ConnectionTransitionResult {
        match (self, transition) {
            (Self::Idle, ConnectionTransition::Begin) => Ok(Self::Connecting),
            (Self::Connecting, ConnectionTransition::Established) => Ok(Self::Open),
            (Self::Connecting | Self::Open | Self::Closed, ConnectionTransition::Close) => {
                Ok(Self::Closed)
            }
            (Self::Closed, ConnectionTransition::Rearm) => Ok(Self::Idle),
            (from, transition) => Err(ConnectionTransitionRejection { from, transition }),
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        };
        formatter.write_str(label)
    }
}

/// State transition input for the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionTransition {
    Begin,
    Established,
    Close,
    /// Returns a closed connection to idle; only used by an opt-in reconnect policy.
    Rearm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTransitionRejection {
    pub from: ConnectionState,
    pub transition: ConnectionTransition,
}

pub type ConnectionTransitionResult = Result<ConnectionState, ConnectionTransitionRejection>;
