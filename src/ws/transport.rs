//! Transport abstraction used by the session layer.
//!
//! A [`Connector`] opens one connection attempt and returns the
//! [`TransportLink`] used to talk to it. Everything the attempt observes is
//! reported back as [`TransportEvent`]s on a channel, in arrival order:
//!
//! - exactly one of `Connected` / `Failed` per attempt;
//! - after `Connected`, any number of `Message`s, then at most one
//!   `Closed` when the connection drops without being asked to.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use url::Url;

use super::heartbeat::NegotiatedHeartbeat;
use crate::domain::{CloseReason, LiveHandle};
use crate::error::SessionError;

/// Everything needed to open one connection attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct OpenRequest {
    /// WebSocket endpoint.
    pub url: Url,
    /// Extra CONNECT headers, `Authorization` included when a credential
    /// is available.
    pub headers: Vec<(String, String)>,
    /// Symmetric heartbeat interval to offer.
    pub heartbeat: Duration,
    /// Deadline for the whole handshake.
    pub connect_timeout: Duration,
}

impl OpenRequest {
    /// Returns the first value of the CONNECT header `key`.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Debug for OpenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Header values may carry the bearer token.
        let header_names: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("OpenRequest")
            .field("url", &self.url.as_str())
            .field("headers", &header_names)
            .field("heartbeat", &self.heartbeat)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Event reported by a connection attempt.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The handshake completed.
    Connected {
        /// Value of the broker's `server` header, if any.
        server: Option<String>,
        /// Heartbeat intervals in force.
        heartbeat: NegotiatedHeartbeat,
    },
    /// The attempt failed before the handshake completed.
    Failed(SessionError),
    /// A message arrived for a registered subscription.
    Message {
        /// Subscription the broker routed the message to.
        handle: LiveHandle,
        /// Raw message body.
        body: String,
    },
    /// An established connection dropped.
    Closed(CloseReason),
}

/// Sending half of an attempt's event channel.
pub type TransportEvents = mpsc::UnboundedSender<TransportEvent>;

/// Live side of one connection attempt.
///
/// All methods are non-blocking: they enqueue work for the connection
/// task and return immediately.
pub trait TransportLink: Send + Sync + fmt::Debug {
    /// Sends a payload to `destination`. Only meaningful once the attempt
    /// reported `Connected`.
    fn publish(&self, destination: &str, payload: String);

    /// Registers interest in `topic` and returns the new live-handle.
    fn register_topic(&self, topic: &str) -> LiveHandle;

    /// Drops a registration. Cancelling an unknown or already cancelled
    /// handle is a no-op.
    fn cancel(&self, handle: LiveHandle);

    /// Closes the connection. No further events are reported afterwards
    /// except a possible `Failed(Shutdown)` for an unfinished handshake.
    fn close(&self);
}

/// Opens connection attempts.
///
/// Implementations spawn their I/O on the ambient tokio runtime, so
/// [`Connector::open`] must be called from within one.
pub trait Connector: Send + Sync + fmt::Debug {
    /// Starts one attempt, reporting its progress on `events`.
    fn open(&self, request: OpenRequest, events: TransportEvents) -> Arc<dyn TransportLink>;
}
