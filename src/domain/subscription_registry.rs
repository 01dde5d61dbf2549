//! Durable topic subscriptions.
//!
//! [`SubscriptionRegistry`] maps each topic to the caller's callback and,
//! while a connection is up, to the live-handle the transport assigned.
//! Entries survive any number of reconnects; only an explicit
//! [`SubscriptionRegistry::remove`] deletes one.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::LiveHandle;
use crate::ws::TransportLink;

/// Callback invoked with each decoded message payload of a topic.
pub type MessageCallback = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

struct SubscriptionEntry {
    callback: MessageCallback,
    live: Option<LiveHandle>,
}

impl fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("live", &self.live)
            .finish_non_exhaustive()
    }
}

/// Topic → (callback, live-handle) store.
///
/// Not synchronized on its own; the session keeps it behind its state
/// lock.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<String, SubscriptionEntry>,
    by_handle: HashMap<LiveHandle, String>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for `topic`.
    ///
    /// If the topic is already present its callback is replaced and its
    /// live-handle kept, so re-subscribing never creates a second
    /// registration. Returns the existing live-handle, if any.
    pub fn add(&mut self, topic: impl Into<String>, callback: MessageCallback) -> Option<LiveHandle> {
        let topic = topic.into();
        match self.entries.get_mut(&topic) {
            Some(entry) => {
                entry.callback = callback;
                entry.live
            }
            None => {
                self.entries.insert(
                    topic,
                    SubscriptionEntry {
                        callback,
                        live: None,
                    },
                );
                None
            }
        }
    }

    /// Records the live-handle of a registration made for `topic`.
    ///
    /// Returns `false` (and records nothing) if the topic is unknown.
    pub fn attach(&mut self, topic: &str, handle: LiveHandle) -> bool {
        let Some(entry) = self.entries.get_mut(topic) else {
            return false;
        };
        if let Some(stale) = entry.live.replace(handle) {
            self.by_handle.remove(&stale);
        }
        self.by_handle.insert(handle, topic.to_string());
        true
    }

    /// Deletes `topic`, cancelling its live-handle on `link` first.
    ///
    /// Returns `false` if the topic was not registered.
    pub fn remove(&mut self, topic: &str, link: Option<&dyn TransportLink>) -> bool {
        let Some(entry) = self.entries.remove(topic) else {
            return false;
        };
        if let Some(handle) = entry.live {
            self.by_handle.remove(&handle);
            if let Some(link) = link {
                link.cancel(handle);
            }
        }
        true
    }

    /// Snapshot of every registered topic, in no particular order.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Registers every topic on `link`, overwriting stale live-handles.
    ///
    /// The topic list is snapshotted before any registration is made.
    /// Returns the number of topics registered.
    pub fn replay_all(&mut self, link: &dyn TransportLink) -> usize {
        let topics = self.topics();
        for topic in &topics {
            let handle = link.register_topic(topic);
            self.attach(topic, handle);
            tracing::debug!(%topic, %handle, "subscription replayed");
        }
        topics.len()
    }

    /// Forgets every live-handle without deleting any entry.
    pub fn clear_live_handles(&mut self) {
        for entry in self.entries.values_mut() {
            entry.live = None;
        }
        self.by_handle.clear();
    }

    /// Resolves a live-handle to its topic and current callback.
    #[must_use]
    pub fn route(&self, handle: LiveHandle) -> Option<(&str, MessageCallback)> {
        let topic = self.by_handle.get(&handle)?;
        let entry = self.entries.get(topic)?;
        Some((topic.as_str(), Arc::clone(&entry.callback)))
    }

    /// Returns the live-handle of `topic`, if it is registered and live.
    #[must_use]
    pub fn live_handle(&self, topic: &str) -> Option<LiveHandle> {
        self.entries.get(topic).and_then(|entry| entry.live)
    }

    /// Number of registered topics.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Number of topics with a live-handle.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.by_handle.len()
    }
}
