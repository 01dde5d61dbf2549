//! # stomp-session
//!
//! Client-side session for a STOMP 1.2 message broker reached over
//! WebSocket.
//!
//! One [`Session`](service::Session) multiplexes any number of topic
//! subscriptions over a single connection. Subscriptions are remembered
//! independently of the connection: they are registered when the session
//! connects and replayed automatically after every reconnect. Dropped
//! connections are retried on a linear, capped backoff until the caller
//! disconnects.
//!
//! ## Architecture
//!
//! ```text
//! Caller
//!     │
//!     ├── Session (service/)
//!     │     ├── SubscriptionRegistry (domain/)
//!     │     ├── ReconnectionScheduler (service/)
//!     │     └── EventBus (domain/)
//!     │
//!     ├── Connector / TransportLink (ws/)
//!     │
//!     └── STOMP over WebSocket (tokio-tungstenite)
//! ```

pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod ws;

#[cfg(test)]
mod testing;
