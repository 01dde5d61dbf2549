//! Session connection state.

use std::fmt;

use serde::Serialize;

/// Connection state of a session.
///
/// `Reconnecting` is "disconnected with a reconnect timer armed"; an
/// explicit disconnect always lands in `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and no pending retry.
    #[default]
    Disconnected,
    /// A handshake is in flight.
    Connecting,
    /// Handshake complete, subscriptions live.
    Connected,
    /// Connection lost, waiting for the backoff timer.
    Reconnecting,
}

impl ConnectionState {
    /// Returns `true` if a new connect attempt may start from this state.
    #[must_use]
    pub const fn can_start_attempt(self) -> bool {
        matches!(self, Self::Disconnected | Self::Reconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::Reconnecting => write!(f, "RECONNECTING"),
        }
    }
}
