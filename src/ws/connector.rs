//! STOMP-over-WebSocket implementation of [`Connector`].

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::connection::{Outbound, run_connection};
use super::frame::{Command, Frame};
use super::transport::{Connector, OpenRequest, TransportEvents, TransportLink};
use crate::domain::LiveHandle;

/// Opens STOMP 1.2 sessions over `tokio-tungstenite`.
///
/// Each [`Connector::open`] spawns one connection task on the ambient
/// runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct StompConnector;

impl StompConnector {
    /// Creates a connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Connector for StompConnector {
    fn open(&self, request: OpenRequest, events: TransportEvents) -> Arc<dyn TransportLink> {
        if request.url.scheme() == "wss" {
            // rustls 0.23 needs a process-wide provider; a second install is a no-op.
            let _ = rustls::crypto::ring::default_provider().install_default();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        tracing::debug!(url = %request.url, "opening stomp connection");
        tokio::spawn(run_connection(request, rx, events));
        Arc::new(StompLink::new(tx))
    }
}

/// Handle to one running connection task.
///
/// Dropping the last reference closes the connection.
#[derive(Debug)]
pub struct StompLink {
    outbound: mpsc::UnboundedSender<Outbound>,
    active: Mutex<HashSet<LiveHandle>>,
}

impl StompLink {
    fn new(outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            outbound,
            active: Mutex::new(HashSet::new()),
        }
    }

    fn enqueue(&self, frame: Frame) {
        if self.outbound.send(Outbound::Frame(frame)).is_err() {
            tracing::debug!("connection task gone, frame dropped");
        }
    }
}

impl TransportLink for StompLink {
    fn publish(&self, destination: &str, payload: String) {
        self.enqueue(
            Frame::new(Command::Send)
                .header("destination", destination)
                .header("content-type", "application/json")
                .with_body(payload),
        );
    }

    fn register_topic(&self, topic: &str) -> LiveHandle {
        let handle = LiveHandle::new();
        self.active.lock().insert(handle);
        self.enqueue(
            Frame::new(Command::Subscribe)
                .header("id", handle.to_string())
                .header("destination", topic),
        );
        handle
    }

    fn cancel(&self, handle: LiveHandle) {
        if !self.active.lock().remove(&handle) {
            return;
        }
        self.enqueue(Frame::new(Command::Unsubscribe).header("id", handle.to_string()));
    }

    fn close(&self) {
        self.active.lock().clear();
        let _ = self.outbound.send(Outbound::Close);
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn link() -> (StompLink, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (StompLink::new(tx), rx)
    }

    fn next_frame(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Frame {
        match rx.try_recv() {
            Ok(Outbound::Frame(frame)) => frame,
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[test]
    fn register_sends_subscribe_with_handle_id() {
        let (link, mut rx) = link();
        let handle = link.register_topic("/topic/rooms/1");

        let frame = next_frame(&mut rx);
        assert_eq!(frame.command, Command::Subscribe);
        assert_eq!(frame.get("id"), Some(handle.to_string().as_str()));
        assert_eq!(frame.get("destination"), Some("/topic/rooms/1"));
    }

    #[test]
    fn cancel_is_idempotent() {
        let (link, mut rx) = link();
        let handle = link.register_topic("/topic/a");
        let _ = next_frame(&mut rx);

        link.cancel(handle);
        let frame = next_frame(&mut rx);
        assert_eq!(frame.command, Command::Unsubscribe);

        link.cancel(handle);
        link.cancel(LiveHandle::new());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn publish_sends_json_frame() {
        let (link, mut rx) = link();
        link.publish("/app/ping", "{\"n\":1}".to_string());

        let frame = next_frame(&mut rx);
        assert_eq!(frame.command, Command::Send);
        assert_eq!(frame.get("content-type"), Some("application/json"));
        assert_eq!(frame.body, "{\"n\":1}");
    }

    #[test]
    fn close_queues_close_and_forgets_handles() {
        let (link, mut rx) = link();
        let handle = link.register_topic("/topic/a");
        let _ = next_frame(&mut rx);

        link.close();
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close)));

        link.cancel(handle);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn frames_after_task_exit_are_dropped_quietly() {
        let (link, rx) = link();
        drop(rx);
        link.publish("/app/ping", "{}".to_string());
        let _ = link.register_topic("/topic/a");
    }
}
