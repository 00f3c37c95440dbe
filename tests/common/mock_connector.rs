use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::mpsc;

use prepper_client::error::{ChannelError, ChannelResult};
use prepper_client::streaming::{ChannelConnection, ChannelConnector, ChannelMessage};

/// Server side of one accepted connection.
#[derive(Debug)]
pub struct ServerEnd {
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerEnd {
    pub fn push_raw(&self, text: &str) -> bool {
        self.to_client.send(text.to_string()).is_ok()
    }

    pub fn push(&self, topic: &str, session_id: &str, data: Value) -> bool {
        let message = ChannelMessage::new(topic, session_id, data);
        match serde_json::to_string(&message) {
            Ok(text) => self.push_raw(&text),
            Err(_) => false,
        }
    }

    /// Next frame the client sent, if any is waiting.
    pub fn try_received(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }
}

/// Connector that accepts or refuses connections from a script and hands the
/// server end of each accepted connection to the test.
#[derive(Debug, Default)]
pub struct MockConnector {
    /// `true` accepts, `false` refuses; an empty script accepts
    script: Mutex<VecDeque<bool>>,
    refuse_all: Mutex<bool>,
    attempts: Mutex<Vec<tokio::time::Instant>>,
    accepted: Mutex<VecDeque<ServerEnd>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing() -> Self {
        let connector = Self::default();
        *connector.refuse_all.lock() = true;
        connector
    }

    pub fn script(&self, outcomes: &[bool]) {
        self.script.lock().extend(outcomes.iter().copied());
    }

    pub fn set_refuse_all(&self, refuse: bool) {
        *self.refuse_all.lock() = refuse;
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().len()
    }

    pub fn attempt_times(&self) -> Vec<tokio::time::Instant> {
        self.attempts.lock().clone()
    }

    /// Server end of the oldest accepted connection not yet taken.
    pub fn take_server(&self) -> Option<ServerEnd> {
        self.accepted.lock().pop_front()
    }
}

#[async_trait]
impl ChannelConnector for MockConnector {
    async fn connect(&self, url: &str) -> ChannelResult<ChannelConnection> {
        self.attempts.lock().push(tokio::time::Instant::now());

        let accept = if *self.refuse_all.lock() {
            false
        } else {
            self.script.lock().pop_front().unwrap_or(true)
        };
        if !accept {
            return Err(ChannelError::ConnectionFailed(format!("{url} refused")));
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        self.accepted.lock().push_back(ServerEnd {
            to_client,
            from_client,
        });
        Ok(ChannelConnection { outbound, inbound })
    }
}
