//! # Session Orchestration
//!
//! Upload and analysis orchestrators own per-operation session records and
//! drive them to a terminal state using the request engine, the streaming
//! channel, or both.

pub mod analysis_orchestrator;
pub mod upload_orchestrator;

pub use analysis_orchestrator::AnalysisOrchestrator;
pub use upload_orchestrator::UploadOrchestrator;

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::error::SessionError;
use crate::streaming::channel_client::WeakStreamingClient;
use crate::streaming::{StreamingClient, SubscriptionId};

/// Channel subscriptions held on behalf of an orchestrator. Dropping the
/// attachment unsubscribes every handler.
#[must_use = "dropping the attachment unsubscribes immediately"]
pub struct ChannelAttachment {
    channel: WeakStreamingClient,
    subscriptions: Vec<(String, SubscriptionId)>,
    /// Live attachments of the owning orchestrator
    live: Option<Arc<AtomicUsize>>,
}

impl ChannelAttachment {
    pub(crate) fn new(channel: &StreamingClient) -> Self {
        Self {
            channel: channel.downgrade(),
            subscriptions: Vec::new(),
            live: None,
        }
    }

    /// Count this attachment in `live` until it is dropped.
    pub(crate) fn counted(mut self, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        self.live = Some(live);
        self
    }

    pub(crate) fn push(&mut self, topic: &str, id: SubscriptionId) {
        self.subscriptions.push((topic.to_string(), id));
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.iter().map(|(topic, _)| topic.as_str())
    }

    /// Unsubscribe now; equivalent to dropping.
    pub fn detach(self) {}
}

impl std::fmt::Debug for ChannelAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelAttachment")
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

impl Drop for ChannelAttachment {
    fn drop(&mut self) {
        if let Some(live) = self.live.take() {
            live.fetch_sub(1, Ordering::SeqCst);
        }
        if let Some(channel) = self.channel.upgrade() {
            for (topic, id) in self.subscriptions.drain(..) {
                channel.unsubscribe(&topic, id);
            }
            debug!("Detached orchestrator from streaming channel");
        }
    }
}

/// Keys with an operation currently in flight.
#[derive(Debug, Default)]
pub(crate) struct InFlightSet {
    keys: Mutex<HashSet<String>>,
}

impl InFlightSet {
    /// Claim `key`, or fail if it is already claimed. The claim is released
    /// when the guard drops, on every exit path.
    pub(crate) fn claim(&self, key: &str) -> Result<InFlightGuard<'_>, SessionError> {
        if !self.keys.lock().insert(key.to_string()) {
            return Err(SessionError::AlreadyInFlight {
                key: key.to_string(),
            });
        }
        Ok(InFlightGuard {
            set: self,
            key: key.to_string(),
        })
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.keys.lock().contains(key)
    }
}

pub(crate) struct InFlightGuard<'a> {
    set: &'a InFlightSet,
    key: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.keys.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_claims_are_exclusive_and_released() {
        let set = InFlightSet::default();
        let guard = set.claim("p1").unwrap();
        assert!(matches!(set.claim("p1"), Err(SessionError::AlreadyInFlight { .. })));
        assert!(set.claim("p2").is_ok());

        drop(guard);
        assert!(!set.contains("p1"));
        assert!(set.claim("p1").is_ok());
    }
}
