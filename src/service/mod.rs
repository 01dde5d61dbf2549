//! Service layer: session orchestration.
//!
//! [`Session`] drives the domain types in response to caller operations
//! and transport events, delegating retry timing to the
//! [`ReconnectionScheduler`] and publishing lifecycle changes on the
//! [`super::domain::EventBus`].

pub mod reconnect;
pub mod session;

pub use reconnect::{BackoffPolicy, ReconnectionScheduler, ScheduledRetry, TimerTicket};
pub use session::{ConnectAttempt, Session};
