//! End-to-end tests against a loopback STOMP broker.

#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use stomp_session::auth::{Anonymous, TokenStore};
use stomp_session::config::SessionConfig;
use stomp_session::domain::{CloseReason, ConnectionState, SessionEvent};
use stomp_session::error::SessionError;
use stomp_session::service::Session;
use stomp_session::ws::{Command, Frame};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default)]
struct BrokerOptions {
    /// Answer CONNECT with ERROR.
    reject: bool,
    /// Close the first connection as soon as it subscribes.
    drop_first: bool,
    /// Promise 100 ms heartbeats in CONNECTED, then never send any.
    silent_heartbeat: bool,
}

struct Broker {
    port: u16,
    frames: mpsc::UnboundedReceiver<(usize, Frame)>,
}

impl Broker {
    async fn start(options: BrokerOptions) -> Self {
        let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
            panic!("cannot bind loopback listener");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("listener has no address");
        };
        let (tx, frames) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut conn = 0;
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, conn, options, tx.clone()));
                conn += 1;
            }
        });
        Self {
            port: addr.port(),
            frames,
        }
    }

    fn config(&self) -> SessionConfig {
        SessionConfig {
            origin: format!("http://127.0.0.1:{}", self.port),
            heartbeat: Duration::ZERO,
            reconnect_base: Duration::from_millis(50),
            reconnect_max: Duration::from_millis(200),
            connect_timeout: Duration::from_secs(2),
            ..SessionConfig::default()
        }
    }

    /// Waits for the next frame with `command`, skipping others.
    async fn expect(&mut self, command: Command) -> (usize, Frame) {
        loop {
            match tokio::time::timeout(WAIT, self.frames.recv()).await {
                Ok(Some((conn, frame))) if frame.command == command => return (conn, frame),
                Ok(Some(_)) => {}
                Ok(None) => panic!("broker stopped"),
                Err(_) => panic!("timed out waiting for {command}"),
            }
        }
    }
}

async fn serve(
    stream: TcpStream,
    conn: usize,
    options: BrokerOptions,
    seen: mpsc::UnboundedSender<(usize, Frame)>,
) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let mut next_id = 0_u32;

    while let Some(Ok(msg)) = ws.next().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let Ok(Some(frame)) = Frame::decode(text.as_str()) else {
            continue;
        };
        let _ = seen.send((conn, frame.clone()));

        let reply = match frame.command {
            Command::Connect if options.reject => {
                Frame::new(Command::Error).header("message", "bad credentials")
            }
            Command::Connect => Frame::new(Command::Connected)
                .header("version", "1.2")
                .header(
                    "heart-beat",
                    if options.silent_heartbeat { "100,100" } else { "0,0" },
                )
                .header("server", "loopback/1.0"),
            Command::Subscribe if options.drop_first && conn == 0 => {
                let _ = ws.close(None).await;
                return;
            }
            Command::Subscribe => {
                next_id += 1;
                let destination = frame.get("destination").unwrap_or_default();
                Frame::new(Command::Message)
                    .header("destination", destination)
                    .header("subscription", frame.get("id").unwrap_or_default())
                    .header("message-id", format!("{conn}-{next_id}"))
                    .header("content-type", "application/json")
                    .with_body(json!({ "conn": conn, "topic": destination }).to_string())
            }
            _ => continue,
        };
        if ws.send(Message::text(reply.encode())).await.is_err() {
            return;
        }
    }
}

fn collector() -> (
    impl Fn(Value) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<Value>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |value| {
            let _ = tx.send(value);
        },
        rx,
    )
}

async fn next_value(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    match tokio::time::timeout(WAIT, rx.recv()).await {
        Ok(Some(value)) => value,
        _ => panic!("no message delivered"),
    }
}

#[tokio::test]
async fn subscribe_receive_send_and_disconnect() {
    let mut broker = Broker::start(BrokerOptions::default()).await;
    let tokens = TokenStore::with_token("secret");
    let Ok(session) = Session::stomp(broker.config(), Arc::new(tokens)) else {
        panic!("session construction failed");
    };

    let (callback, mut values) = collector();
    assert!(session.subscribe("/topic/rooms/1", callback).is_none());

    let connected = tokio::time::timeout(WAIT, session.connect()).await;
    assert!(matches!(connected, Ok(Ok(()))));
    assert!(session.is_connected());

    let (_, connect) = broker.expect(Command::Connect).await;
    assert_eq!(connect.get("accept-version"), Some("1.2"));
    assert_eq!(connect.get("Authorization"), Some("Bearer secret"));

    let (_, subscribe) = broker.expect(Command::Subscribe).await;
    assert_eq!(subscribe.get("destination"), Some("/topic/rooms/1"));
    assert_eq!(
        next_value(&mut values).await,
        json!({ "conn": 0, "topic": "/topic/rooms/1" })
    );

    assert!(session.send("/app/chat", &json!({ "text": "hi" })));
    let (_, send) = broker.expect(Command::Send).await;
    assert_eq!(send.get("destination"), Some("/app/chat"));
    assert_eq!(send.body, r#"{"text":"hi"}"#);

    session.disconnect();
    assert_eq!(session.state(), ConnectionState::Disconnected);
    broker.expect(Command::Disconnect).await;
}

#[tokio::test]
async fn dropped_connection_is_restored_with_subscriptions() {
    let mut broker = Broker::start(BrokerOptions {
        drop_first: true,
        ..BrokerOptions::default()
    })
    .await;
    let Ok(session) = Session::stomp(broker.config(), Arc::new(Anonymous)) else {
        panic!("session construction failed");
    };

    let (callback, mut values) = collector();
    session.subscribe("/topic/progress", callback);
    assert!(matches!(
        tokio::time::timeout(WAIT, session.connect()).await,
        Ok(Ok(()))
    ));

    let (first, _) = broker.expect(Command::Subscribe).await;
    assert_eq!(first, 0);
    let (second, frame) = broker.expect(Command::Subscribe).await;
    assert_eq!(second, 1);
    assert_eq!(frame.get("destination"), Some("/topic/progress"));

    assert_eq!(
        next_value(&mut values).await,
        json!({ "conn": 1, "topic": "/topic/progress" })
    );
    assert!(session.is_connected());
    assert_eq!(session.reconnect_attempt(), 0);
    session.disconnect();
}

#[tokio::test]
async fn rejected_handshake_fails_the_attempt() {
    let broker = Broker::start(BrokerOptions {
        reject: true,
        ..BrokerOptions::default()
    })
    .await;
    let Ok(session) = Session::stomp(broker.config(), Arc::new(Anonymous)) else {
        panic!("session construction failed");
    };

    let outcome = tokio::time::timeout(WAIT, session.connect()).await;
    let message = match outcome {
        Ok(Err(SessionError::HandshakeRejected(message))) => message,
        other => panic!("expected a rejected handshake, got {other:?}"),
    };
    assert!(message.contains("bad credentials"));
    assert_eq!(session.state(), ConnectionState::Reconnecting);

    session.disconnect();
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn unreachable_broker_reports_transport_error() {
    let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
        panic!("cannot bind loopback listener");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("listener has no address");
    };
    drop(listener);

    let config = SessionConfig {
        origin: format!("http://{addr}"),
        ..SessionConfig::default()
    };
    let Ok(session) = Session::stomp(config, Arc::new(Anonymous)) else {
        panic!("session construction failed");
    };

    let outcome = tokio::time::timeout(WAIT, session.connect()).await;
    assert!(matches!(outcome, Ok(Err(SessionError::Transport(_)))));
    assert!(session.pending_reconnect_delay().is_some());
    session.disconnect();
}

#[tokio::test]
async fn silent_broker_trips_the_heartbeat_watchdog() {
    let broker = Broker::start(BrokerOptions {
        silent_heartbeat: true,
        ..BrokerOptions::default()
    })
    .await;
    let config = SessionConfig {
        heartbeat: Duration::from_millis(100),
        reconnect_base: Duration::from_secs(30),
        reconnect_max: Duration::from_secs(30),
        ..broker.config()
    };
    let Ok(session) = Session::stomp(config, Arc::new(Anonymous)) else {
        panic!("session construction failed");
    };
    let mut events = session.events();

    assert!(matches!(
        tokio::time::timeout(WAIT, session.connect()).await,
        Ok(Ok(()))
    ));

    let lost = tokio::time::timeout(WAIT, async {
        while let Some(event) = events.next().await {
            if let SessionEvent::ConnectionLost { reason, .. } = event {
                return Some(reason);
            }
        }
        None
    })
    .await;
    let Ok(Some(CloseReason::HeartbeatTimeout { window_ms })) = lost else {
        panic!("expected a heartbeat timeout");
    };
    assert_eq!(window_ms, 200);
    assert_eq!(session.state(), ConnectionState::Reconnecting);
    session.disconnect();
}

#[tokio::test]
async fn secure_origin_reaches_the_tls_handshake() {
    let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
        panic!("cannot bind loopback listener");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("listener has no address");
    };
    // Accepts the TCP connection, then hangs up on the TLS hello.
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });

    let config = SessionConfig {
        origin: format!("https://{addr}"),
        ..SessionConfig::default()
    };
    let Ok(session) = Session::stomp(config, Arc::new(Anonymous)) else {
        panic!("session construction failed");
    };
    assert_eq!(session.endpoint().scheme(), "wss");

    let outcome = tokio::time::timeout(WAIT, session.connect()).await;
    let message = match outcome {
        Ok(Err(SessionError::Transport(message))) => message,
        other => panic!("expected a transport failure, got {other:?}"),
    };
    assert!(!message.contains("TLS support not compiled in"), "{message}");
    assert!(!message.contains("URL error"), "{message}");
    session.disconnect();
}
