//! # HTTP Transport
//!
//! The seam between the request engine and the network. The engine owns retry,
//! timeout and classification policy; a transport only performs one exchange and
//! reports what happened. Tests substitute scripted transports here.

pub mod reqwest_transport;

pub use reqwest_transport::ReqwestTransport;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::models::UploadFile;

/// Receives upload progress as a whole percentage (0-100).
pub type ProgressSink = Arc<dyn Fn(u8) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Reads are the only requests eligible for caching.
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Get)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub url: String,
    pub field: String,
    pub file: UploadFile,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            status_text: String::new(),
            body: body.into(),
        }
    }

    pub fn json(status: u16, value: &Value) -> Self {
        Self::new(status, value.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

/// Failures below the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    #[error("Host not found: {0}")]
    HostNotFound(String),

    #[error("Network failure: {0}")]
    Other(String),
}

impl TransportError {
    /// The backend could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync + fmt::Debug {
    /// Perform one request/response exchange. Non-2xx statuses are responses,
    /// not errors.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Send a multipart upload, reporting progress as bytes leave the client.
    async fn upload(
        &self,
        request: UploadRequest,
        progress: ProgressSink,
    ) -> Result<HttpResponse, TransportError>;
}
