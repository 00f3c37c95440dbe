//! `reqwest`-backed [`HttpTransport`].

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Method};
use std::error::Error as StdError;
use std::io::ErrorKind;
use tracing::{debug, info};

use super::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ProgressSink, TransportError, UploadRequest};

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a transport with no client-level timeout; the request engine
    /// bounds each attempt itself.
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(concat!("prepper-client-rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        info!("Created reqwest HTTP transport");
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn into_response(response: reqwest::Response) -> Result<HttpResponse, TransportError> {
        let status = response.status();
        let body = response.bytes().await.map_err(classify)?;
        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Delete => Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(method = %request.method, url = %request.url, "Sending request");
        let response = builder.send().await.map_err(classify)?;
        Self::into_response(response).await
    }

    async fn upload(
        &self,
        request: UploadRequest,
        progress: ProgressSink,
    ) -> Result<HttpResponse, TransportError> {
        let file = request.file;
        let total = file.bytes.len() as u64;
        let chunks = upload_chunks(&file.bytes);

        let mut sent = 0u64;
        let body_stream = stream::iter(chunks).map(move |chunk| {
            sent += chunk.len() as u64;
            if total > 0 {
                progress(((sent * 100) / total).min(100) as u8);
            }
            Ok::<Bytes, std::io::Error>(chunk)
        });

        let part = Part::stream_with_length(Body::wrap_stream(body_stream), total)
            .file_name(file.filename.clone())
            .mime_str(&file.mime_type)
            .map_err(|e| TransportError::Other(e.to_string()))?;
        let form = Form::new().part(request.field, part);

        debug!(url = %request.url, filename = %file.filename, bytes = total, "Uploading file");
        let response = self
            .client
            .post(&request.url)
            .multipart(form)
            .send()
            .await
            .map_err(classify)?;
        Self::into_response(response).await
    }
}

/// Map a reqwest failure onto the transport taxonomy by inspecting the
/// underlying I/O error, if any.
fn classify(err: reqwest::Error) -> TransportError {
    let message = err.to_string();
    let mut source: Option<&(dyn StdError + 'static)> = err.source();

    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            match io.kind() {
                ErrorKind::ConnectionRefused => return TransportError::ConnectionRefused(message),
                ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                    return TransportError::ConnectionReset(message)
                }
                _ => {}
            }
        }
        let text = cause.to_string();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return TransportError::HostNotFound(message);
        }
        source = cause.source();
    }

    TransportError::Other(message)
}

/// Split a file into upload chunks that share the file's buffer.
fn upload_chunks(bytes: &Bytes) -> Vec<Bytes> {
    (0..bytes.len())
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| bytes.slice(start..(start + UPLOAD_CHUNK_SIZE).min(bytes.len())))
        .collect()
}
