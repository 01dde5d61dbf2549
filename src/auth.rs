//! Bearer credential providers.
//!
//! The session reads the credential once per connect attempt and never
//! caches it, so a token rotated between attempts is picked up by the next
//! reconnect.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

/// Synchronous read of the current bearer credential.
pub trait CredentialProvider: Send + Sync + fmt::Debug {
    /// Current token, or `None` to connect anonymously.
    fn bearer_token(&self) -> Option<String>;
}

/// Provider that never has a credential.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl CredentialProvider for Anonymous {
    fn bearer_token(&self) -> Option<String> {
        None
    }
}

/// Shared, updatable token slot.
///
/// Clones share the same slot: the authentication flow keeps one clone to
/// [`TokenStore::set`] / [`TokenStore::clear`] the token, the session
/// keeps another to read it.
#[derive(Clone, Default)]
pub struct TokenStore {
    token: Arc<RwLock<Option<String>>>,
}

impl TokenStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `token`.
    #[must_use]
    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.set(token);
        store
    }

    /// Replaces the stored token.
    pub fn set(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    /// Removes the stored token.
    pub fn clear(&self) {
        *self.token.write() = None;
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.token.read().is_some() {
            "<redacted>"
        } else {
            "<none>"
        };
        f.debug_struct("TokenStore").field("token", &state).finish()
    }
}

impl CredentialProvider for TokenStore {
    fn bearer_token(&self) -> Option<String> {
        self.token.read().clone().filter(|t| !t.is_empty())
    }
}

/// Builds the CONNECT headers for one attempt from `provider`.
#[must_use]
pub fn connect_headers(provider: &dyn CredentialProvider) -> Vec<(String, String)> {
    provider
        .bearer_token()
        .map(|token| vec![("Authorization".to_string(), format!("Bearer {token}"))])
        .unwrap_or_default()
}
