//! Domain layer: connection state, live-handles, lifecycle events and the
//! subscription registry.
//!
//! Nothing here performs I/O; the session layer in [`crate::service`]
//! drives these types in response to transport events.

pub mod connection_state;
pub mod endpoint;
pub mod event_bus;
pub mod live_handle;
pub mod session_event;
pub mod subscription_registry;

pub use connection_state::ConnectionState;
pub use event_bus::{EventBus, EventStream};
pub use live_handle::LiveHandle;
pub use session_event::{CloseReason, SessionEvent};
pub use subscription_registry::{MessageCallback, SubscriptionRegistry};
