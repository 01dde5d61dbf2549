//! Scripted transport for unit tests.
//!
//! [`MockConnector`] records every attempt; tests then play the broker's
//! part by pushing [`TransportEvent`]s into an attempt's channel.
#![allow(clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::domain::{CloseReason, LiveHandle};
use crate::error::SessionError;
use crate::ws::{
    Connector, NegotiatedHeartbeat, OpenRequest, TransportEvent, TransportEvents, TransportLink,
};

#[derive(Debug)]
struct MockAttempt {
    request: OpenRequest,
    events: TransportEvents,
    link: Arc<MockLink>,
}

/// Connector whose attempts are driven by the test.
#[derive(Debug, Default)]
pub(crate) struct MockConnector {
    attempts: Mutex<Vec<MockAttempt>>,
}

impl Connector for MockConnector {
    fn open(&self, request: OpenRequest, events: TransportEvents) -> Arc<dyn TransportLink> {
        let link = Arc::new(MockLink::default());
        self.attempts.lock().push(MockAttempt {
            request,
            events,
            link: Arc::clone(&link),
        });
        link
    }
}

impl MockConnector {
    /// Number of attempts opened so far.
    pub(crate) fn attempts(&self) -> usize {
        self.attempts.lock().len()
    }

    pub(crate) fn link(&self, attempt: usize) -> Arc<MockLink> {
        match self.attempts.lock().get(attempt) {
            Some(a) => Arc::clone(&a.link),
            None => panic!("no attempt #{attempt}"),
        }
    }

    pub(crate) fn request(&self, attempt: usize) -> OpenRequest {
        match self.attempts.lock().get(attempt) {
            Some(a) => a.request.clone(),
            None => panic!("no attempt #{attempt}"),
        }
    }

    pub(crate) fn emit(&self, attempt: usize, event: TransportEvent) {
        match self.attempts.lock().get(attempt) {
            Some(a) => {
                let _ = a.events.send(event);
            }
            None => panic!("no attempt #{attempt}"),
        }
    }

    pub(crate) fn succeed(&self, attempt: usize) {
        self.emit(
            attempt,
            TransportEvent::Connected {
                server: Some("mock".to_string()),
                heartbeat: NegotiatedHeartbeat::default(),
            },
        );
    }

    pub(crate) fn fail(&self, attempt: usize) {
        self.emit(
            attempt,
            TransportEvent::Failed(SessionError::Transport("connection refused".to_string())),
        );
    }

    pub(crate) fn drop_connection(&self, attempt: usize) {
        self.emit(attempt, TransportEvent::Closed(CloseReason::RemoteClosed));
    }

    pub(crate) fn deliver(&self, attempt: usize, handle: LiveHandle, body: &str) {
        self.emit(
            attempt,
            TransportEvent::Message {
                handle,
                body: body.to_string(),
            },
        );
    }
}

/// Link that records what the session asked of it.
#[derive(Debug, Default)]
pub(crate) struct MockLink {
    registered: Mutex<Vec<(String, LiveHandle)>>,
    cancelled: Mutex<Vec<LiveHandle>>,
    published: Mutex<Vec<(String, String)>>,
    closed: AtomicBool,
}

impl TransportLink for MockLink {
    fn publish(&self, destination: &str, payload: String) {
        self.published.lock().push((destination.to_string(), payload));
    }

    fn register_topic(&self, topic: &str) -> LiveHandle {
        let handle = LiveHandle::new();
        self.registered.lock().push((topic.to_string(), handle));
        handle
    }

    fn cancel(&self, handle: LiveHandle) {
        let known = self.registered.lock().iter().any(|(_, h)| *h == handle);
        let mut cancelled = self.cancelled.lock();
        if known && !cancelled.contains(&handle) {
            cancelled.push(handle);
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl MockLink {
    pub(crate) fn registered_topics(&self) -> Vec<String> {
        self.registered
            .lock()
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    /// Most recent handle registered for `topic`.
    pub(crate) fn handle_for(&self, topic: &str) -> LiveHandle {
        let registered = self.registered.lock();
        match registered.iter().rev().find(|(t, _)| t == topic) {
            Some((_, handle)) => *handle,
            None => panic!("{topic} was never registered"),
        }
    }

    pub(crate) fn cancelled(&self) -> Vec<LiveHandle> {
        self.cancelled.lock().clone()
    }

    pub(crate) fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Lets spawned tasks (event pumps, fired timers) run to quiescence on the
/// current-thread test runtime.
pub(crate) async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
