//! # Streaming Channel
//!
//! Push updates from the backend over a reconnecting duplex connection.

pub mod channel_client;
pub mod connector;
pub mod message;
pub mod websocket;

pub use channel_client::{ConnectionStatus, MessageHandler, StreamingClient, SubscriptionId};
pub use connector::{ChannelConnection, ChannelConnector};
pub use message::{ChannelMessage, ErrorPayload, ProgressPayload};
pub use websocket::WebSocketConnector;
