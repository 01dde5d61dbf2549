//! WebSocket connection task.
//!
//! Drives one STOMP connection attempt from socket open to close: the
//! handshake, the read/write loop, outgoing heartbeats and the incoming
//! liveness watchdog. Progress is reported as [`TransportEvent`]s.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::frame::{Command, Frame};
use super::heartbeat::{self, NegotiatedHeartbeat};
use super::transport::{OpenRequest, TransportEvent, TransportEvents};
use crate::domain::{CloseReason, LiveHandle};
use crate::error::SessionError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Work queued by a [`super::connector::StompLink`] for the connection task.
#[derive(Debug)]
pub enum Outbound {
    /// Send this frame.
    Frame(Frame),
    /// Send DISCONNECT and close the socket.
    Close,
}

enum Handshake {
    Established {
        ws: Box<WsStream>,
        server: Option<String>,
        heartbeat: NegotiatedHeartbeat,
        queued: Vec<Frame>,
    },
    Failed(SessionError),
}

/// Runs one connection attempt to completion.
///
/// Emits exactly one of `Connected` / `Failed`, then, if connected, every
/// routed `Message` and at most one `Closed`. A requested close emits
/// nothing further.
pub async fn run_connection(
    request: OpenRequest,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: TransportEvents,
) {
    let timeout_ms = u64::try_from(request.connect_timeout.as_millis()).unwrap_or(u64::MAX);
    let outcome =
        match tokio::time::timeout(request.connect_timeout, handshake(&request, &mut outbound))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => Handshake::Failed(SessionError::HandshakeTimeout { timeout_ms }),
        };

    let (ws, heartbeat, queued) = match outcome {
        Handshake::Established {
            ws,
            server,
            heartbeat,
            queued,
        } => {
            tracing::debug!(
                url = %request.url,
                server = server.as_deref().unwrap_or("unknown"),
                outgoing = ?heartbeat.outgoing,
                incoming = ?heartbeat.incoming,
                "stomp handshake complete"
            );
            let _ = events.send(TransportEvent::Connected { server, heartbeat });
            (ws, heartbeat, queued)
        }
        Handshake::Failed(err) => {
            tracing::debug!(url = %request.url, error = %err, "stomp handshake failed");
            let _ = events.send(TransportEvent::Failed(err));
            return;
        }
    };

    let (mut ws_tx, mut ws_rx) = (*ws).split();

    for frame in queued {
        if let Err(err) = ws_tx.send(Message::text(frame.encode())).await {
            let _ = events.send(TransportEvent::Closed(CloseReason::Transport {
                message: err.to_string(),
            }));
            return;
        }
    }

    let mut last_seen = Instant::now();
    let mut send_tick = ticker(heartbeat.outgoing);
    let mut watch_tick = ticker(heartbeat.incoming);
    let window = heartbeat.liveness_window();

    let reason = loop {
        tokio::select! {
            // Frame or heartbeat from the broker
            msg = ws_rx.next() => {
                last_seen = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reason) = handle_inbound(text.as_str(), &events) {
                            break Some(reason);
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        if let Some(text) = binary_text(&bytes)
                            && let Some(reason) = handle_inbound(text, &events)
                        {
                            break Some(reason);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break Some(CloseReason::RemoteClosed),
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        break Some(CloseReason::Transport { message: err.to_string() });
                    }
                }
            }
            // Work from the session
            cmd = outbound.recv() => {
                match cmd {
                    Some(Outbound::Frame(frame)) => {
                        tracing::trace!(command = %frame.command, "sending frame");
                        if let Err(err) = ws_tx.send(Message::text(frame.encode())).await {
                            break Some(CloseReason::Transport { message: err.to_string() });
                        }
                    }
                    Some(Outbound::Close) | None => break None,
                }
            }
            // Session dropped its event receiver
            () = events.closed() => break None,
            _ = send_tick.tick(), if !heartbeat.outgoing.is_zero() => {
                tracing::trace!("sending heartbeat");
                if let Err(err) = ws_tx.send(Message::text("\n".to_string())).await {
                    break Some(CloseReason::Transport { message: err.to_string() });
                }
            }
            _ = watch_tick.tick(), if window.is_some() => {
                if let Some(window) = window
                    && last_seen.elapsed() > window
                {
                    let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
                    break Some(CloseReason::HeartbeatTimeout { window_ms });
                }
            }
        }
    };

    match reason {
        Some(reason) => {
            tracing::debug!(url = %request.url, %reason, "stomp connection lost");
            let _ = events.send(TransportEvent::Closed(reason));
        }
        None => {
            let disconnect = Frame::new(Command::Disconnect).encode();
            let _ = ws_tx.send(Message::text(disconnect)).await;
            let _ = ws_tx.close().await;
            tracing::debug!(url = %request.url, "stomp connection closed");
        }
    }
}

/// Opens the socket, sends CONNECT and waits for CONNECTED.
///
/// Frames queued by the session meanwhile are kept for after the
/// handshake; a close request aborts the attempt.
async fn handshake(
    request: &OpenRequest,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
) -> Handshake {
    let mut queued = Vec::new();

    let connecting = tokio_tungstenite::connect_async(request.url.as_str());
    tokio::pin!(connecting);
    let mut ws = loop {
        tokio::select! {
            result = &mut connecting => match result {
                Ok((ws, _response)) => break ws,
                Err(err) => return Handshake::Failed(err.into()),
            },
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Frame(frame)) => queued.push(frame),
                Some(Outbound::Close) | None => return Handshake::Failed(SessionError::Shutdown),
            },
        }
    };

    if let Err(err) = ws.send(Message::text(connect_frame(request).encode())).await {
        return Handshake::Failed(err.into());
    }

    loop {
        tokio::select! {
            msg = ws.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                    Some(Ok(Message::Binary(bytes))) => match binary_text(&bytes) {
                        Some(text) => text.to_string(),
                        None => continue,
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        return Handshake::Failed(SessionError::Transport(
                            "connection closed during handshake".to_string(),
                        ));
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => return Handshake::Failed(err.into()),
                };
                match Frame::decode(&text) {
                    Ok(None) => {}
                    Ok(Some(frame)) if frame.command == Command::Connected => {
                        let heartbeat = heartbeat::negotiate(request.heartbeat, frame.get("heart-beat"));
                        return Handshake::Established {
                            ws: Box::new(ws),
                            server: frame.get("server").map(str::to_string),
                            heartbeat,
                            queued,
                        };
                    }
                    Ok(Some(frame)) if frame.command == Command::Error => {
                        return Handshake::Failed(SessionError::HandshakeRejected(error_text(&frame)));
                    }
                    Ok(Some(frame)) => {
                        tracing::debug!(command = %frame.command, "ignoring frame before CONNECTED");
                    }
                    Err(err) => return Handshake::Failed(err),
                }
            }
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Frame(frame)) => queued.push(frame),
                Some(Outbound::Close) | None => {
                    let _ = ws.close(None).await;
                    return Handshake::Failed(SessionError::Shutdown);
                }
            },
        }
    }
}

/// Builds the CONNECT frame for `request`.
#[must_use]
pub fn connect_frame(request: &OpenRequest) -> Frame {
    let host = request.url.host_str().unwrap_or("localhost").to_string();
    let mut frame = Frame::new(Command::Connect)
        .header("accept-version", "1.2")
        .header("host", host)
        .header("heart-beat", heartbeat::offer(request.heartbeat));
    for (key, value) in &request.headers {
        frame = frame.header(key.clone(), value.clone());
    }
    frame
}

/// Routes one inbound text message. Returns a close reason when the
/// broker ended the session with an ERROR frame.
fn handle_inbound(text: &str, events: &TransportEvents) -> Option<CloseReason> {
    let frame = match Frame::decode(text) {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            tracing::trace!("heartbeat received");
            return None;
        }
        Err(err) => {
            tracing::warn!(error = %err, "dropping undecodable frame");
            return None;
        }
    };

    match frame.command {
        Command::Message => {
            let handle = frame
                .get("subscription")
                .and_then(|id| id.parse::<LiveHandle>().ok());
            match handle {
                Some(handle) => {
                    let _ = events.send(TransportEvent::Message {
                        handle,
                        body: frame.body,
                    });
                }
                None => tracing::warn!(
                    destination = frame.get("destination").unwrap_or_default(),
                    "dropping MESSAGE without a known subscription id"
                ),
            }
            None
        }
        Command::Error => Some(CloseReason::BrokerError {
            message: error_text(&frame),
        }),
        Command::Receipt => {
            tracing::debug!(receipt = frame.get("receipt-id").unwrap_or_default(), "receipt");
            None
        }
        other => {
            tracing::debug!(command = %other, "ignoring unexpected frame");
            None
        }
    }
}

fn error_text(frame: &Frame) -> String {
    frame
        .get("message")
        .map(str::to_string)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| frame.body.trim().to_string())
}

/// Text of a binary WebSocket message, or `None` (logged) if it is not
/// UTF-8. STOMP frames are text whichever message type carries them.
fn binary_text(bytes: &[u8]) -> Option<&str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Some(text),
        Err(err) => {
            tracing::warn!(error = %err, "dropping non-utf8 frame");
            None
        }
    }
}

fn ticker(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn request(headers: Vec<(String, String)>) -> OpenRequest {
        let Ok(url) = url::Url::parse("ws://broker.local:8080/ws") else {
            panic!("valid url");
        };
        OpenRequest {
            url,
            headers,
            heartbeat: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn connect_frame_carries_version_host_heartbeat_and_auth() {
        let frame = connect_frame(&request(vec![(
            "Authorization".to_string(),
            "Bearer abc.def".to_string(),
        )]));
        assert_eq!(frame.command, Command::Connect);
        assert_eq!(frame.get("accept-version"), Some("1.2"));
        assert_eq!(frame.get("host"), Some("broker.local"));
        assert_eq!(frame.get("heart-beat"), Some("20000,20000"));
        assert_eq!(frame.get("Authorization"), Some("Bearer abc.def"));
    }

    #[test]
    fn anonymous_connect_has_no_authorization() {
        let frame = connect_frame(&request(Vec::new()));
        assert_eq!(frame.get("Authorization"), None);
    }

    #[test]
    fn inbound_message_is_routed_by_subscription() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = LiveHandle::new();
        let text = format!("MESSAGE\nsubscription:{handle}\ndestination:/topic/a\n\n{{}}\0");

        assert!(handle_inbound(&text, &tx).is_none());
        let Ok(TransportEvent::Message { handle: got, body }) = rx.try_recv() else {
            panic!("expected a routed message");
        };
        assert_eq!(got, handle);
        assert_eq!(body, "{}");
    }

    #[test]
    fn inbound_error_closes() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let reason = handle_inbound("ERROR\nmessage:token expired\n\n\0", &tx);
        assert_eq!(
            reason,
            Some(CloseReason::BrokerError {
                message: "token expired".to_string()
            })
        );
    }

    #[test]
    fn inbound_garbage_and_heartbeats_are_ignored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(handle_inbound("\n", &tx).is_none());
        assert!(handle_inbound("NOPE\n\n\0", &tx).is_none());
        assert!(handle_inbound("MESSAGE\nsubscription:sub-0\n\n{}\0", &tx).is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn binary_frames_must_be_utf8() {
        let frame = "CONNECTED\nversion:1.2\n\n\0";
        assert_eq!(binary_text(frame.as_bytes()), Some(frame));
        assert_eq!(binary_text(&[b'C', 0xff, 0xfe]), None);
    }

    #[test]
    fn error_text_falls_back_to_body() {
        let frame = Frame::new(Command::Error).with_body("  bad credentials \n");
        assert_eq!(error_text(&frame), "bad credentials");
    }
}
