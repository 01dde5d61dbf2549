//! WebSocket transport layer: STOMP framing, heartbeats, and the
//! connection task behind [`Connector`].
//!
//! The session layer only sees the [`Connector`] / [`TransportLink`]
//! traits; [`StompConnector`] is the production implementation.

pub mod connection;
pub mod connector;
pub mod frame;
pub mod heartbeat;
pub mod transport;

pub use connector::{StompConnector, StompLink};
pub use frame::{Command, Frame};
pub use heartbeat::NegotiatedHeartbeat;
pub use transport::{Connector, OpenRequest, TransportEvent, TransportEvents, TransportLink};
