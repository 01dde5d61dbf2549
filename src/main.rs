//! stomp-session demo client.
//!
//! Connects to the configured broker, subscribes to every topic listed in
//! `SESSION_TOPICS` (comma separated), logs what arrives and the session's
//! lifecycle events, and disconnects on Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use stomp_session::auth::TokenStore;
use stomp_session::config::SessionConfig;
use stomp_session::service::Session;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = SessionConfig::from_env().context("invalid session configuration")?;

    let tokens = TokenStore::new();
    if let Ok(token) = std::env::var("SESSION_TOKEN") {
        tokens.set(token);
    }

    let session = Session::stomp(config, Arc::new(tokens)).context("cannot build session")?;
    tracing::info!(endpoint = %session.endpoint(), "starting stomp-session demo");

    let mut events = session.events();
    let watcher = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            tracing::info!(kind = event.event_type(), ?event, "session event");
        }
    });

    let topics = std::env::var("SESSION_TOPICS").unwrap_or_default();
    for topic in topics.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let label = topic.to_string();
        session.subscribe(topic, move |payload| {
            tracing::info!(topic = %label, %payload, "message");
        });
    }

    // A failed first attempt is retried in the background.
    if let Err(err) = session.connect().await {
        tracing::warn!(error = %err, "initial connect failed, retrying in background");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    session.disconnect();
    drop(session);
    watcher.abort();
    tracing::info!("stomp-session demo stopped");

    Ok(())
}
