//! Type-safe subscription live-handle.
//!
//! [`LiveHandle`] is a newtype wrapper around [`uuid::Uuid`] (v4). It is
//! what the broker knows a subscription by: the value travels as the `id`
//! header of SUBSCRIBE / UNSUBSCRIBE and comes back as the `subscription`
//! header of every MESSAGE.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Transport-level token for one active subscription registration.
///
/// Minted by the transport on every registration, so a handle never
/// outlives the connection it was created on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LiveHandle(uuid::Uuid);

impl LiveHandle {
    /// Creates a new random `LiveHandle` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Creates a `LiveHandle` from an existing [`uuid::Uuid`].
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner [`uuid::Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for LiveHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LiveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LiveHandle {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl From<uuid::Uuid> for LiveHandle {
    fn from(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }
}
