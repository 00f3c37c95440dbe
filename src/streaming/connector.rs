use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

use crate::error::ChannelResult;

/// An open duplex connection as a pair of text-frame channels.
///
/// Dropping `outbound` closes the connection. `inbound` yields `None` once the
/// peer or the network closes it.
#[derive(Debug)]
pub struct ChannelConnection {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
pub trait ChannelConnector: Send + Sync + fmt::Debug {
    /// Open a connection; resolves once the handshake has completed.
    async fn connect(&self, url: &str) -> ChannelResult<ChannelConnection>;
}
