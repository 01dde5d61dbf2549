//! Lifecycle events emitted by a session.
//!
//! Every state transition publishes a [`SessionEvent`] through the
//! [`super::EventBus`]. Observers use them the way the connect / error
//! callbacks of a browser client are used: they fire again on every
//! automatic reconnect, not only on the first `connect`.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Why a live connection ended without being asked to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CloseReason {
    /// The broker closed the socket or the stream ended.
    RemoteClosed,
    /// The broker sent an ERROR frame on an established connection.
    BrokerError {
        /// Value of the ERROR frame's `message` header.
        message: String,
    },
    /// Nothing was received within the heartbeat window.
    HeartbeatTimeout {
        /// Window that elapsed, in milliseconds.
        window_ms: u64,
    },
    /// Socket-level failure.
    Transport {
        /// Error description.
        message: String,
    },
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RemoteClosed => write!(f, "remote closed"),
            Self::BrokerError { message } => write!(f, "broker error: {message}"),
            Self::HeartbeatTimeout { window_ms } => {
                write!(f, "heartbeat timeout after {window_ms} ms")
            }
            Self::Transport { message } => write!(f, "transport: {message}"),
        }
    }
}

/// Session lifecycle event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A connect attempt started.
    Connecting {
        /// Reconnection attempt number (0 for a fresh connect).
        attempt: u32,
        /// Timestamp of the attempt.
        timestamp: DateTime<Utc>,
    },

    /// The handshake completed and subscriptions were replayed.
    Connected {
        /// Number of topics re-registered against the new connection.
        replayed: usize,
        /// Timestamp of the handshake.
        timestamp: DateTime<Utc>,
    },

    /// A connect attempt failed.
    ConnectFailed {
        /// Error description.
        error: String,
        /// Timestamp of the failure.
        timestamp: DateTime<Utc>,
    },

    /// An established connection dropped.
    ConnectionLost {
        /// Why it dropped.
        reason: CloseReason,
        /// Timestamp of the drop.
        timestamp: DateTime<Utc>,
    },

    /// A reconnect timer was armed.
    ReconnectScheduled {
        /// Attempt number the timer belongs to (starts at 1).
        attempt: u32,
        /// Delay before the attempt, in milliseconds.
        delay_ms: u64,
        /// Timestamp of scheduling.
        timestamp: DateTime<Utc>,
    },

    /// The session was disconnected on request.
    Disconnected {
        /// Timestamp of the disconnect.
        timestamp: DateTime<Utc>,
    },
}

impl SessionEvent {
    /// Returns the event timestamp.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Connecting { timestamp, .. }
            | Self::Connected { timestamp, .. }
            | Self::ConnectFailed { timestamp, .. }
            | Self::ConnectionLost { timestamp, .. }
            | Self::ReconnectScheduled { timestamp, .. }
            | Self::Disconnected { timestamp } => *timestamp,
        }
    }

    /// Returns the event type name as used in serialized output.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Connecting { .. } => "connecting",
            Self::Connected { .. } => "connected",
            Self::ConnectFailed { .. } => "connect_failed",
            Self::ConnectionLost { .. } => "connection_lost",
            Self::ReconnectScheduled { .. } => "reconnect_scheduled",
            Self::Disconnected { .. } => "disconnected",
        }
    }
}
