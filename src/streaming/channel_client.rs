//! # Streaming Channel Client
//!
//! Keeps a duplex connection to the backend's push channel and fans inbound
//! messages out to per-topic subscribers.
//!
//! ## Reconnection
//!
//! An unexpected close schedules a reconnect after `reconnect_interval * n`,
//! where `n` counts consecutive failed or dropped connections. A successful
//! open resets `n`. Once `n` reaches `max_reconnect_attempts` the client stays
//! disconnected until [`StreamingClient::connect`] is called again.
//! [`StreamingClient::disconnect`] never triggers a reconnect.
//!
//! Each connect/disconnect bumps a generation counter; reader and timer tasks
//! from an older generation find themselves stale and exit without touching
//! state.
//!
//! Background tasks hold only a weak reference, so dropping the last client
//! handle tears everything down.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::connector::ChannelConnector;
use super::message::ChannelMessage;
use crate::config::StreamingConfig;
use crate::error::ChannelResult;
use crate::logging::log_channel_event;

pub type MessageHandler = Arc<dyn Fn(&ChannelMessage) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting for a scheduled reconnect
    Reconnecting,
}

struct ConnectionState {
    generation: u64,
    status: ConnectionStatus,
    attempts: u32,
    explicitly_closed: bool,
    outbound: Option<mpsc::UnboundedSender<String>>,
    reader: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl ConnectionState {
    fn abort_tasks(&mut self) {
        if let Some(handle) = self.reader.take() {
            handle.abort();
        }
        if let Some(handle) = self.reconnect.take() {
            handle.abort();
        }
    }
}

struct Inner {
    url: String,
    connector: Arc<dyn ChannelConnector>,
    reconnect_interval: Duration,
    max_reconnect_attempts: u32,
    handlers: RwLock<HashMap<String, Vec<(SubscriptionId, MessageHandler)>>>,
    next_subscription: AtomicU64,
    state: Mutex<ConnectionState>,
}

#[derive(Clone)]
pub struct StreamingClient {
    inner: Arc<Inner>,
}

impl fmt::Debug for StreamingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("StreamingClient")
            .field("url", &self.inner.url)
            .field("status", &state.status)
            .field("attempts", &state.attempts)
            .finish()
    }
}

impl StreamingClient {
    pub fn new(url: impl Into<String>, connector: Arc<dyn ChannelConnector>, config: &StreamingConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                connector,
                reconnect_interval: config.reconnect_interval(),
                max_reconnect_attempts: config.max_reconnect_attempts,
                handlers: RwLock::new(HashMap::new()),
                next_subscription: AtomicU64::new(1),
                state: Mutex::new(ConnectionState {
                    generation: 0,
                    status: ConnectionStatus::Disconnected,
                    attempts: 0,
                    explicitly_closed: false,
                    outbound: None,
                    reader: None,
                    reconnect: None,
                }),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Open the channel. A failed open is returned and also schedules the
    /// usual reconnect sequence.
    pub async fn connect(&self) -> ChannelResult<()> {
        let generation = {
            let mut state = self.inner.state.lock();
            if state.status == ConnectionStatus::Connected {
                return Ok(());
            }
            if let Some(handle) = state.reconnect.take() {
                handle.abort();
            }
            state.explicitly_closed = false;
            state.attempts = 0;
            state.generation += 1;
            state.status = ConnectionStatus::Connecting;
            state.generation
        };

        Inner::establish(Arc::clone(&self.inner), generation).await
    }

    /// Close the channel and cancel any pending reconnect.
    pub fn disconnect(&self) {
        let mut state = self.inner.state.lock();
        state.explicitly_closed = true;
        state.generation += 1;
        state.outbound = None;
        state.attempts = 0;
        state.status = ConnectionStatus::Disconnected;
        state.abort_tasks();
        drop(state);

        log_channel_event("disconnected", &self.inner.url, 0, Some("explicit"));
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.lock().status
    }

    /// Consecutive reconnect attempts since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.state.lock().attempts
    }

    pub fn subscribe(&self, topic: impl Into<String>, handler: MessageHandler) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.inner
            .handlers
            .write()
            .entry(topic.into())
            .or_default()
            .push((id, handler));
        id
    }

    pub fn subscribe_fn<F>(&self, topic: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&ChannelMessage) + Send + Sync + 'static,
    {
        self.subscribe(topic, Arc::new(handler))
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        let mut handlers = self.inner.handlers.write();
        let Some(list) = handlers.get_mut(topic) else {
            return false;
        };
        let before = list.len();
        list.retain(|(registered, _)| *registered != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(topic);
        }
        removed
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .handlers
            .read()
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Send a message if connected. Returns whether it was handed to the
    /// connection; sending while disconnected is a no-op.
    pub fn send(&self, message: &ChannelMessage) -> bool {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                warn!(topic = %message.topic, error = %e, "Unserializable channel message");
                return false;
            }
        };

        let state = self.inner.state.lock();
        match (&state.outbound, state.status) {
            (Some(outbound), ConnectionStatus::Connected) => outbound.send(text).is_ok(),
            _ => {
                debug!(topic = %message.topic, "Channel not connected; message dropped");
                false
            }
        }
    }

    /// Hand a raw frame to the subscribers, as if it had arrived on the wire.
    pub fn dispatch_frame(&self, text: &str) {
        self.inner.dispatch_text(text);
    }

    pub(crate) fn downgrade(&self) -> WeakStreamingClient {
        WeakStreamingClient(Arc::downgrade(&self.inner))
    }
}

/// Non-owning handle, for subscribers that must not keep the client alive.
#[derive(Clone)]
pub(crate) struct WeakStreamingClient(Weak<Inner>);

impl WeakStreamingClient {
    pub(crate) fn upgrade(&self) -> Option<StreamingClient> {
        self.0.upgrade().map(|inner| StreamingClient { inner })
    }
}

impl Inner {
    async fn establish(inner: Arc<Inner>, generation: u64) -> ChannelResult<()> {
        let attempt = inner.state.lock().attempts;
        log_channel_event("connecting", &inner.url, attempt, None);

        match inner.connector.connect(&inner.url).await {
            Ok(connection) => {
                let mut state = inner.state.lock();
                if state.generation != generation || state.explicitly_closed {
                    debug!(url = %inner.url, "Discarding connection from a stale attempt");
                    return Ok(());
                }

                state.outbound = Some(connection.outbound);
                state.attempts = 0;
                state.status = ConnectionStatus::Connected;
                state.reader = Some(tokio::spawn(read_loop(
                    Arc::downgrade(&inner),
                    connection.inbound,
                    generation,
                )));
                drop(state);

                log_channel_event("connected", &inner.url, attempt, None);
                Ok(())
            }
            Err(e) => {
                warn!(url = %inner.url, attempt, error = %e, "Channel connection failed");
                inner.schedule_reconnect(generation);
                Err(e)
            }
        }
    }

    fn handle_close(self: &Arc<Self>, generation: u64) {
        {
            let mut state = self.state.lock();
            if state.generation != generation || state.explicitly_closed {
                return;
            }
            state.outbound = None;
            state.reader = None;
            state.status = ConnectionStatus::Disconnected;
        }

        log_channel_event("closed", &self.url, 0, Some("unexpected"));
        self.schedule_reconnect(generation);
    }

    fn schedule_reconnect(self: &Arc<Self>, generation: u64) {
        let mut state = self.state.lock();
        if state.generation != generation || state.explicitly_closed {
            return;
        }
        if state.attempts >= self.max_reconnect_attempts {
            state.status = ConnectionStatus::Disconnected;
            error!(
                url = %self.url,
                attempts = state.attempts,
                "Reconnect attempts exhausted; channel stays closed until connect() is called"
            );
            return;
        }

        state.attempts += 1;
        let attempt = state.attempts;
        let delay = self.reconnect_interval.saturating_mul(attempt);
        state.status = ConnectionStatus::Reconnecting;

        let weak = Arc::downgrade(self);
        state.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                {
                    let mut state = inner.state.lock();
                    if state.generation != generation || state.explicitly_closed {
                        return;
                    }
                    state.status = ConnectionStatus::Connecting;
                }
                let _ = Inner::establish(inner, generation).await;
            }
        }));
        drop(state);

        log_channel_event(
            "reconnect_scheduled",
            &self.url,
            attempt,
            Some(&format!("in {}ms", delay.as_millis())),
        );
    }

    fn dispatch_text(&self, text: &str) {
        let message = match ChannelMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(url = %self.url, error = %e, "Dropping malformed channel frame");
                return;
            }
        };

        let handlers: Vec<(SubscriptionId, MessageHandler)> = self
            .handlers
            .read()
            .get(&message.topic)
            .map(|list| list.iter().map(|(id, h)| (*id, Arc::clone(h))).collect())
            .unwrap_or_default();

        if handlers.is_empty() {
            debug!(topic = %message.topic, "No subscribers for channel message");
        }
        for (id, handler) in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&message))).is_err() {
                error!(topic = %message.topic, subscription = id.0, "Channel subscriber panicked; continuing");
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.state.get_mut().abort_tasks();
    }
}

async fn read_loop(inner: Weak<Inner>, mut inbound: mpsc::UnboundedReceiver<String>, generation: u64) {
    while let Some(text) = inbound.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.dispatch_text(&text);
    }

    if let Some(inner) = inner.upgrade() {
        inner.handle_close(generation);
    }
}
