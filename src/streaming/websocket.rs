//! WebSocket [`ChannelConnector`] built on `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use super::connector::{ChannelConnection, ChannelConnector};
use crate::error::{ChannelError, ChannelResult};

#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChannelConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> ChannelResult<ChannelConnection> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let url = url.to_string();

        // Single pump per socket; exits on close from either side
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = outbound_rx.recv() => match outgoing {
                        Some(text) => {
                            if ws_sender.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = ws_sender.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    incoming = ws_receiver.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if inbound_tx.send(text).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                            Ok(text) => {
                                if inbound_tx.send(text).is_err() {
                                    break;
                                }
                            }
                            Err(_) => warn!(url = %url, "Dropping non-UTF-8 binary frame"),
                        },
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            warn!(url = %url, error = %e, "WebSocket read failed");
                            break;
                        }
                        Some(Ok(_)) => {}
                    },
                }
            }
            debug!(url = %url, "WebSocket pump finished");
        });

        Ok(ChannelConnection {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
