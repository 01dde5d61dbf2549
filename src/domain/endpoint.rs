//! Messaging endpoint derivation.
//!
//! The endpoint lives on the same host as the page that hosts the client:
//! a secure page talks to `wss://`, a plain page to `ws://`, and the path
//! is a fixed suffix such as `/ws`.

use url::Url;

use crate::error::SessionError;

/// Maps a page origin scheme to its WebSocket counterpart.
fn websocket_scheme(scheme: &str) -> Option<&'static str> {
    match scheme {
        "https" | "wss" => Some("wss"),
        "http" | "ws" => Some("ws"),
        _ => None,
    }
}

/// Builds the WebSocket endpoint URL from a page origin and a path suffix.
///
/// Only the scheme, host and port of `origin` are used; any path, query or
/// fragment on the origin is ignored.
///
/// # Errors
///
/// Returns [`SessionError::InvalidEndpoint`] if `origin` does not parse,
/// has no host, or uses a scheme with no WebSocket counterpart.
pub fn derive_endpoint(origin: &str, path: &str) -> Result<Url, SessionError> {
    let origin = Url::parse(origin)?;
    let scheme = websocket_scheme(origin.scheme()).ok_or_else(|| {
        SessionError::InvalidEndpoint(format!("unsupported scheme `{}`", origin.scheme()))
    })?;
    let host = origin
        .host_str()
        .ok_or_else(|| SessionError::InvalidEndpoint("origin has no host".to_string()))?;

    let authority = match origin.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let path = path.trim_start_matches('/');

    Ok(Url::parse(&format!("{scheme}://{authority}/{path}"))?)
}
