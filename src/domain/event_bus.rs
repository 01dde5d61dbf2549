//! Lifecycle event fan-out.
//!
//! The session publishes a [`SessionEvent`] on every state transition.
//! Observers hold an [`EventStream`]; a slow observer loses the oldest
//! events rather than holding the session back.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::SessionEvent;

/// Publishing side, owned by the session.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per observer.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes `event` to every current observer. Without observers the
    /// event is dropped.
    pub fn publish(&self, event: SessionEvent) {
        let kind = event.event_type();
        let observers = self.sender.send(event).unwrap_or(0);
        tracing::trace!(kind, observers, "lifecycle event published");
    }

    /// Starts observing events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Observer side of an [`EventBus`].
///
/// Overflow is logged and skipped, so a stream only ends when the session
/// itself is gone.
#[derive(Debug)]
pub struct EventStream {
    receiver: broadcast::Receiver<SessionEvent>,
}

impl EventStream {
    /// Waits for the next event. Returns `None` once the session is
    /// dropped.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "lifecycle observer lagged, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next buffered event without waiting.
    pub fn try_next(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "lifecycle observer lagged, events dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}
