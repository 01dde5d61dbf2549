//! Session facade: connection lifecycle, subscriptions and outbound sends.
//!
//! [`Session`] composes a [`Connector`], the [`SubscriptionRegistry`] and
//! the [`ReconnectionScheduler`] behind one state lock. Every transition
//! (caller operations, transport events, fired timers) takes that lock, so
//! transitions are serialized; subscription callbacks always run with the
//! lock released.
//!
//! ```text
//!                connect()                handshake ok
//! Disconnected ───────────▶ Connecting ─────────────▶ Connected
//!                            │      ▲                    │
//!                   failed   │      │ timer fires        │ abnormal close
//!                            ▼      │                    │
//!                          Reconnecting ◀────────────────┘
//!
//! disconnect() returns to Disconnected from any state.
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};
use url::Url;

use super::reconnect::{BackoffPolicy, ReconnectionScheduler, TimerTicket};
use crate::auth::{self, CredentialProvider};
use crate::config::SessionConfig;
use crate::domain::{
    ConnectionState, EventBus, EventStream, LiveHandle, MessageCallback, SessionEvent,
    SubscriptionRegistry,
};
use crate::error::SessionError;
use crate::ws::{Connector, OpenRequest, StompConnector, TransportEvent, TransportLink};

/// Outcome of one connect request.
///
/// Resolves once the attempt it joined has either completed the handshake
/// or failed. Dropping it does not cancel the attempt.
#[derive(Debug)]
pub struct ConnectAttempt {
    rx: oneshot::Receiver<Result<(), SessionError>>,
}

impl Future for ConnectAttempt {
    type Output = Result<(), SessionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(SessionError::Shutdown)))
    }
}

/// Client session over one multiplexed STOMP connection.
///
/// Cheap to clone; clones share the same session. When the last clone is
/// dropped the connection is closed and any pending retry is cancelled.
#[derive(Debug, Clone)]
pub struct Session {
    core: Arc<SessionCore>,
}

#[derive(Debug)]
struct SessionCore {
    endpoint: Url,
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialProvider>,
    events: EventBus,
    state: Mutex<SessionState>,
}

#[derive(Debug)]
struct SessionState {
    phase: ConnectionState,
    link: Option<Arc<dyn TransportLink>>,
    /// Bumped on every attempt and on disconnect; events tagged with an
    /// older value belong to a dead link and are ignored.
    generation: u64,
    registry: SubscriptionRegistry,
    scheduler: ReconnectionScheduler,
    waiters: Vec<oneshot::Sender<Result<(), SessionError>>>,
}

impl Session {
    /// Creates a disconnected session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidEndpoint`] if the configured origin
    /// and path do not form a WebSocket URL.
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, SessionError> {
        let endpoint = config.endpoint_url()?;
        let policy = BackoffPolicy::new(config.reconnect_base, config.reconnect_max);
        let core = SessionCore {
            endpoint,
            events: EventBus::new(config.event_capacity),
            config,
            connector,
            credentials,
            state: Mutex::new(SessionState {
                phase: ConnectionState::Disconnected,
                link: None,
                generation: 0,
                registry: SubscriptionRegistry::new(),
                scheduler: ReconnectionScheduler::new(policy),
                waiters: Vec::new(),
            }),
        };
        Ok(Self {
            core: Arc::new(core),
        })
    }

    /// Creates a session backed by [`StompConnector`].
    ///
    /// # Errors
    ///
    /// Same as [`Session::new`].
    pub fn stomp(
        config: SessionConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, SessionError> {
        Self::new(config, Arc::new(StompConnector::new()), credentials)
    }

    /// Starts connecting, or joins the attempt already in flight.
    ///
    /// When already connected the returned future resolves immediately
    /// with success. Otherwise it resolves with the outcome of the
    /// attempt; a failure also arms the reconnect timer, whose attempts
    /// are reported through [`Session::events`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) -> ConnectAttempt {
        let (tx, rx) = oneshot::channel();
        let mut state = self.core.state.lock();
        match state.phase {
            ConnectionState::Connected => {
                tracing::debug!("already connected, skipping connect");
                let _ = tx.send(Ok(()));
            }
            ConnectionState::Connecting => state.waiters.push(tx),
            ConnectionState::Disconnected | ConnectionState::Reconnecting => {
                state.waiters.push(tx);
                self.core.start_attempt(&mut state);
            }
        }
        ConnectAttempt { rx }
    }

    /// Disconnects and stops automatic reconnection.
    ///
    /// Safe in any state, including mid-handshake; calling it twice is a
    /// no-op. Subscriptions are kept and replayed on the next `connect`.
    pub fn disconnect(&self) {
        let mut state = self.core.state.lock();
        state.scheduler.cancel();
        state.generation = state.generation.wrapping_add(1);
        if let Some(link) = state.link.take() {
            link.close();
        }
        state.registry.clear_live_handles();
        for waiter in state.waiters.drain(..) {
            let _ = waiter.send(Err(SessionError::Shutdown));
        }

        let previous = std::mem::replace(&mut state.phase, ConnectionState::Disconnected);
        if previous == ConnectionState::Disconnected {
            tracing::debug!("already disconnected");
            return;
        }
        tracing::info!(from = %previous, "session disconnected");
        self.core.events.publish(SessionEvent::Disconnected {
            timestamp: Utc::now(),
        });
    }

    /// Subscribes `callback` to `topic`.
    ///
    /// Re-subscribing an existing topic replaces its callback and keeps its
    /// registration. While connected the topic is registered immediately
    /// and its live-handle returned; otherwise `None` is returned and the
    /// topic activates on the next successful connect.
    pub fn subscribe<F>(&self, topic: impl Into<String>, callback: F) -> Option<LiveHandle>
    where
        F: Fn(serde_json::Value) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let callback: MessageCallback = Arc::new(callback);
        let mut guard = self.core.state.lock();
        let state = &mut *guard;

        if let Some(handle) = state.registry.add(topic.clone(), callback) {
            tracing::debug!(%topic, %handle, "subscription callback replaced");
            return Some(handle);
        }

        let link = match (&state.phase, &state.link) {
            (ConnectionState::Connected, Some(link)) => Arc::clone(link),
            _ => {
                tracing::debug!(%topic, "not connected, subscription deferred");
                return None;
            }
        };
        let handle = link.register_topic(&topic);
        state.registry.attach(&topic, handle);
        tracing::debug!(%topic, %handle, "subscribed");
        Some(handle)
    }

    /// Subscribes with payloads decoded into `T`.
    ///
    /// Payloads that do not match `T` are logged and dropped, like
    /// malformed JSON.
    pub fn subscribe_as<T, F>(&self, topic: impl Into<String>, callback: F) -> Option<LiveHandle>
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let label = topic.clone();
        self.subscribe(topic, move |value| {
            match serde_json::from_value::<T>(value) {
                Ok(message) => callback(message),
                Err(err) => {
                    tracing::warn!(topic = %label, error = %err, "dropping payload of unexpected shape");
                }
            }
        })
    }

    /// Removes the subscription for `topic`, whatever the connection
    /// state. Returns `false` if the topic was not subscribed.
    pub fn unsubscribe(&self, topic: &str) -> bool {
        let mut guard = self.core.state.lock();
        let state = &mut *guard;
        let removed = state.registry.remove(topic, state.link.as_deref());
        if removed {
            tracing::debug!(%topic, "unsubscribed");
        }
        removed
    }

    /// Serializes `body` to JSON and sends it to `destination`.
    ///
    /// Returns `false` without queueing anything when the session is not
    /// connected or `body` does not serialize.
    pub fn send<T>(&self, destination: &str, body: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        match self.try_send(destination, body) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(destination, error = %err, "send rejected");
                false
            }
        }
    }

    /// Like [`Session::send`], reporting why a send was rejected.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] unless connected, or
    /// [`SessionError::Payload`] if `body` does not serialize.
    pub fn try_send<T>(&self, destination: &str, body: &T) -> Result<(), SessionError>
    where
        T: Serialize + ?Sized,
    {
        let link = {
            let state = self.core.state.lock();
            match (&state.phase, &state.link) {
                (ConnectionState::Connected, Some(link)) => Arc::clone(link),
                _ => return Err(SessionError::NotConnected),
            }
        };
        let payload = serde_json::to_string(body)?;
        link.publish(destination, payload);
        Ok(())
    }

    /// Returns `true` while the handshake is complete and the connection
    /// has not dropped.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.core.state.lock().phase
    }

    /// Receiver for lifecycle events from now on.
    #[must_use]
    pub fn events(&self) -> EventStream {
        self.core.events.subscribe()
    }

    /// Number of subscribed topics, live or not.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.core.state.lock().registry.count()
    }

    /// Number of topics registered on the current connection.
    #[must_use]
    pub fn live_subscription_count(&self) -> usize {
        self.core.state.lock().registry.live_count()
    }

    /// Live-handle of `topic` on the current connection.
    #[must_use]
    pub fn live_handle(&self, topic: &str) -> Option<LiveHandle> {
        self.core.state.lock().registry.live_handle(topic)
    }

    /// Consecutive failed attempts since the last success.
    #[must_use]
    pub fn reconnect_attempt(&self) -> u32 {
        self.core.state.lock().scheduler.attempt()
    }

    /// Delay of the armed reconnect timer, if any.
    #[must_use]
    pub fn pending_reconnect_delay(&self) -> Option<Duration> {
        self.core.state.lock().scheduler.pending_delay()
    }

    /// WebSocket endpoint this session connects to.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.core.endpoint
    }
}

impl SessionCore {
    /// Opens a new attempt. Caller holds the state lock and has checked
    /// that no attempt is in flight.
    fn start_attempt(self: &Arc<Self>, state: &mut SessionState) {
        state.scheduler.cancel_timer();
        state.generation = state.generation.wrapping_add(1);
        state.phase = ConnectionState::Connecting;

        // Read per attempt so a rotated token is picked up on reconnect.
        let request = OpenRequest {
            url: self.endpoint.clone(),
            headers: auth::connect_headers(self.credentials.as_ref()),
            heartbeat: self.config.heartbeat,
            connect_timeout: self.config.connect_timeout,
        };
        let attempt = state.scheduler.attempt();
        tracing::info!(
            url = %self.endpoint,
            attempt,
            authenticated = request.header("Authorization").is_some(),
            "connecting"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        state.link = Some(self.connector.open(request, tx));
        self.events.publish(SessionEvent::Connecting {
            attempt,
            timestamp: Utc::now(),
        });
        tokio::spawn(pump_events(Arc::downgrade(self), state.generation, rx));
    }

    /// Applies one transport event. Returns `false` once the attempt is
    /// over and its pump should stop.
    fn on_transport_event(self: &Arc<Self>, generation: u64, event: TransportEvent) -> bool {
        if let TransportEvent::Message { handle, body } = event {
            let route = {
                let state = self.state.lock();
                if state.generation != generation {
                    return false;
                }
                state
                    .registry
                    .route(handle)
                    .map(|(topic, callback)| (topic.to_string(), callback))
            };
            match route {
                Some((topic, callback)) => dispatch(&topic, &callback, &body),
                None => tracing::debug!(%handle, "message for unknown subscription dropped"),
            }
            return true;
        }

        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }

        match event {
            TransportEvent::Connected { server, .. } => {
                if state.phase != ConnectionState::Connecting {
                    return false;
                }
                let Some(link) = state.link.as_ref().map(Arc::clone) else {
                    return false;
                };
                state.phase = ConnectionState::Connected;
                let replayed = state.registry.replay_all(link.as_ref());
                state.scheduler.on_success();
                for waiter in state.waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                tracing::info!(
                    server = server.as_deref().unwrap_or("unknown"),
                    replayed,
                    "session connected"
                );
                self.events.publish(SessionEvent::Connected {
                    replayed,
                    timestamp: Utc::now(),
                });
                true
            }
            TransportEvent::Failed(error) => {
                tracing::warn!(error = %error, "connect attempt failed");
                state.link = None;
                state.registry.clear_live_handles();
                for waiter in state.waiters.drain(..) {
                    let _ = waiter.send(Err(error.clone()));
                }
                self.events.publish(SessionEvent::ConnectFailed {
                    error: error.to_string(),
                    timestamp: Utc::now(),
                });
                self.schedule_reconnect(&mut state);
                false
            }
            TransportEvent::Closed(reason) => {
                tracing::warn!(%reason, "connection lost");
                if let Some(link) = state.link.take() {
                    link.close();
                }
                state.registry.clear_live_handles();
                self.events.publish(SessionEvent::ConnectionLost {
                    reason,
                    timestamp: Utc::now(),
                });
                self.schedule_reconnect(&mut state);
                false
            }
            TransportEvent::Message { .. } => true,
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, state: &mut SessionState) {
        state.phase = ConnectionState::Reconnecting;
        let weak = Arc::downgrade(self);
        let retry = state.scheduler.on_failure(move |ticket| {
            if let Some(core) = weak.upgrade() {
                core.fire_reconnect(ticket);
            }
        });
        let delay_ms = u64::try_from(retry.delay.as_millis()).unwrap_or(u64::MAX);
        tracing::info!(attempt = retry.attempt, delay_ms, "reconnect scheduled");
        self.events.publish(SessionEvent::ReconnectScheduled {
            attempt: retry.attempt,
            delay_ms,
            timestamp: Utc::now(),
        });
    }

    fn fire_reconnect(self: &Arc<Self>, ticket: TimerTicket) {
        let mut state = self.state.lock();
        if !state.scheduler.claim(ticket) {
            tracing::debug!("stale reconnect timer ignored");
            return;
        }
        if !state.phase.can_start_attempt() {
            return;
        }
        tracing::debug!(attempt = state.scheduler.attempt(), "reconnecting");
        self.start_attempt(&mut state);
    }
}

/// Forwards one attempt's events to the session, in arrival order.
async fn pump_events(
    core: Weak<SessionCore>,
    generation: u64,
    mut rx: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = rx.recv().await {
        let Some(core) = core.upgrade() else {
            break;
        };
        if !core.on_transport_event(generation, event) {
            break;
        }
    }
}

/// Decodes a payload and hands it to the topic's callback.
fn dispatch(topic: &str, callback: &MessageCallback, body: &str) {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => {
            tracing::trace!(topic, "message received");
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(value))) {
                tracing::warn!(
                    topic,
                    panic = panic_message(payload.as_ref()),
                    "subscription callback panicked"
                );
            }
        }
        Err(err) => tracing::warn!(topic, error = %err, "dropping malformed message payload"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
