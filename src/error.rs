//! Session error types.
//!
//! [`SessionError`] is the central error type of the crate. Nothing in the
//! session layer is fatal: every variant ends up either in a caller-visible
//! [`crate::service::ConnectAttempt`] outcome, a lifecycle event, or a log
//! line.

/// Error enum for every failure the session layer can observe.
///
/// The type is `Clone` because one connect attempt may have several
/// waiters, and each of them receives the same outcome.
///
/// # Categories
///
/// | Variant              | Raised by             | Recovery                |
/// |----------------------|-----------------------|-------------------------|
/// | `InvalidEndpoint`    | configuration         | fix configuration       |
/// | `Transport`          | WebSocket I/O         | automatic reconnect     |
/// | `HandshakeRejected`  | broker ERROR frame    | automatic reconnect     |
/// | `HandshakeTimeout`   | connect deadline      | automatic reconnect     |
/// | `MalformedFrame`     | STOMP decoder         | frame dropped           |
/// | `Payload`            | JSON encode / decode  | frame dropped           |
/// | `NotConnected`       | outbound send         | caller retries later    |
/// | `Shutdown`           | explicit disconnect   | none                    |
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The configured origin or endpoint path does not form a usable URL.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The underlying WebSocket failed to open or broke while open.
    #[error("transport error: {0}")]
    Transport(String),

    /// The broker answered the handshake with an ERROR frame.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// No CONNECTED frame arrived before the configured deadline.
    #[error("handshake timed out after {timeout_ms} ms")]
    HandshakeTimeout {
        /// Deadline that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// An inbound frame could not be decoded.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A payload could not be encoded to or decoded from JSON.
    #[error("payload error: {0}")]
    Payload(String),

    /// An operation required a live connection and none exists.
    #[error("session is not connected")]
    NotConnected,

    /// The attempt was abandoned because the session was disconnected.
    #[error("session was disconnected")]
    Shutdown,
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Payload(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<url::ParseError> for SessionError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidEndpoint(err.to_string())
    }
}
