//! # Request Engine
//!
//! Issues backend calls through an [`HttpTransport`] and turns whatever happens
//! into a [`RequestOutcome`]:
//!
//! - reads with a cache directive are served from the [`ResponseCache`] when live;
//! - each attempt is bounded by the request timeout, dropping the in-flight
//!   future when it expires;
//! - 4xx responses fail immediately with `VALIDATION_FAILED`;
//! - timeouts, transport failures and 5xx responses are retried up to
//!   `max_retries` more times, attempt `n` followed by a `retry_delay * n` pause;
//! - success bodies are unwrapped from their envelopes, decoded, and cached.
//!
//! Malformed success bodies are protocol errors and are not retried.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::envelope::{unwrap_envelopes, EnvelopeFailure};
use crate::cache::ResponseCache;
use crate::config::ApiConfig;
use crate::error::{ErrorCode, RequestError, RequestOutcome};
use crate::logging::log_request_operation;
use crate::models::UploadFile;
use crate::transport::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, ProgressSink, TransportError,
    UploadRequest,
};

/// Cache participation for a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDirective {
    pub key: String,
    /// Lifetime of the stored value; the cache default when `None`
    pub ttl: Option<Duration>,
}

impl CacheDirective {
    pub fn new(key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            ttl: Some(ttl),
        }
    }
}

#[derive(Debug)]
enum AttemptFailure {
    Timeout,
    Transport(TransportError),
}

pub struct RequestEngine {
    transport: Arc<dyn HttpTransport>,
    cache: Arc<ResponseCache>,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
    slow_threshold: Duration,
    slow_requests: AtomicU64,
}

impl std::fmt::Debug for RequestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEngine")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

impl RequestEngine {
    pub fn new(config: &ApiConfig, transport: Arc<dyn HttpTransport>, cache: Arc<ResponseCache>) -> Self {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        info!(
            base_url = %base_url,
            timeout_ms = config.request_timeout_ms,
            max_retries = config.max_retries,
            "Created request engine"
        );

        Self {
            transport,
            cache,
            base_url,
            timeout: config.request_timeout(),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            slow_threshold: config.slow_request_threshold(),
            slow_requests: AtomicU64::new(0),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Requests that exceeded the slow-request threshold so far.
    pub fn slow_request_count(&self) -> u64 {
        self.slow_requests.load(Ordering::Relaxed)
    }

    /// Pause after failed attempt number `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(attempt)
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        cache: Option<CacheDirective>,
    ) -> RequestOutcome<T> {
        self.request(endpoint, HttpMethod::Get, None, cache).await
    }

    pub async fn post<T: DeserializeOwned>(&self, endpoint: &str, body: Value) -> RequestOutcome<T> {
        self.request(endpoint, HttpMethod::Post, Some(body), None).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> RequestOutcome<T> {
        self.request(endpoint, HttpMethod::Delete, None, None).await
    }

    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        method: HttpMethod,
        body: Option<Value>,
        cache: Option<CacheDirective>,
    ) -> RequestOutcome<T> {
        let cache = cache.filter(|_| method.is_read());

        if let Some(directive) = &cache {
            if let Some(hit) = self.cache.get(&directive.key) {
                match serde_json::from_value::<T>(hit) {
                    Ok(value) => {
                        debug!(endpoint = %endpoint, key = %directive.key, "Serving cached response");
                        return Ok(value);
                    }
                    Err(e) => {
                        warn!(key = %directive.key, error = %e, "Cached value no longer decodes; refetching");
                        self.cache.delete(&directive.key);
                    }
                }
            }
        }

        let request = HttpRequest {
            method,
            url: self.url_for(endpoint),
            body,
        };

        let started = Instant::now();
        let (result, attempts) = self.execute_with_retry(&request).await;
        let elapsed = started.elapsed();
        self.record_duration(method, endpoint, elapsed);

        let outcome = result.and_then(|payload| {
            let value = serde_json::from_value::<T>(payload.clone()).map_err(|e| {
                RequestError::new(ErrorCode::NetworkError, format!("Malformed response body: {e}"))
            })?;
            if let Some(directive) = &cache {
                self.cache.set(&directive.key, payload, directive.ttl);
            }
            Ok(value)
        });

        let outcome = outcome.map_err(|e| e.with_attempts(attempts));
        let label = match &outcome {
            Ok(_) => "success",
            Err(e) => e.code.as_str(),
        };
        log_request_operation(method.as_str(), endpoint, attempts, elapsed, label);
        outcome
    }

    /// Multipart upload. Never retried: the body stream is consumed by the
    /// first attempt.
    pub async fn upload<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        file: UploadFile,
        progress: ProgressSink,
    ) -> RequestOutcome<T> {
        let request = UploadRequest {
            url: self.url_for(endpoint),
            field: crate::constants::UPLOAD_FORM_FIELD.to_string(),
            file,
        };

        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.transport.upload(request, progress)).await;
        let elapsed = started.elapsed();
        self.record_duration(HttpMethod::Post, endpoint, elapsed);

        let outcome = match result {
            Err(_) => Err(RequestError::new(ErrorCode::TimeoutError, "Upload timeout")),
            Ok(Err(e)) => Err(RequestError::new(ErrorCode::NetworkError, format!("Upload failed: {e}"))),
            Ok(Ok(response)) if !response.is_success() => Err(RequestError::new(
                ErrorCode::UploadFailed,
                format!("Upload failed: {}", status_label(&response)),
            )
            .with_status(response.status)),
            Ok(Ok(response)) => parse_payload(&response)
                .and_then(|payload| {
                    serde_json::from_value::<T>(payload).map_err(|e| {
                        RequestError::new(ErrorCode::NetworkError, format!("Malformed response body: {e}"))
                    })
                })
                .map_err(|e| {
                    RequestError::new(ErrorCode::UploadFailed, format!("Invalid upload response: {}", e.message))
                        .with_status(response.status)
                }),
        };

        let outcome = outcome.map_err(|e| e.with_attempts(1));
        let label = match &outcome {
            Ok(_) => "success",
            Err(e) => e.code.as_str(),
        };
        log_request_operation("UPLOAD", endpoint, 1, elapsed, label);
        outcome
    }

    async fn execute_with_retry(&self, request: &HttpRequest) -> (RequestOutcome<Value>, u32) {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let failure = match self.attempt(request).await {
                Ok(response) if response.is_success() => return (parse_payload(&response), attempt),
                Ok(response) if response.is_client_error() => {
                    let error = RequestError::new(ErrorCode::ValidationFailed, http_message(&response))
                        .with_status(response.status);
                    return (Err(error), attempt);
                }
                Ok(response) => {
                    let code = if response.is_server_error() {
                        ErrorCode::ServiceError
                    } else {
                        ErrorCode::NetworkError
                    };
                    RequestError::new(code, http_message(&response)).with_status(response.status)
                }
                Err(AttemptFailure::Timeout) => RequestError::new(
                    ErrorCode::TimeoutError,
                    format!("Request timed out after {}ms", self.timeout.as_millis()),
                ),
                Err(AttemptFailure::Transport(e)) => {
                    let code = if e.is_unreachable() {
                        ErrorCode::ServiceUnavailable
                    } else {
                        ErrorCode::NetworkError
                    };
                    RequestError::new(code, e.to_string())
                }
            };

            if attempt > self.max_retries {
                return (Err(failure), attempt);
            }

            let delay = self.backoff_delay(attempt);
            warn!(
                method = %request.method,
                url = %request.url,
                retry = attempt,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                code = %failure.code,
                error = %failure.message,
                "Request failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(&self, request: &HttpRequest) -> Result<HttpResponse, AttemptFailure> {
        match tokio::time::timeout(self.timeout, self.transport.execute(request.clone())).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(AttemptFailure::Transport(e)),
            Err(_) => Err(AttemptFailure::Timeout),
        }
    }

    fn url_for(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn record_duration(&self, method: HttpMethod, endpoint: &str, elapsed: Duration) {
        if elapsed > self.slow_threshold {
            self.slow_requests.fetch_add(1, Ordering::Relaxed);
            warn!(
                method = %method,
                endpoint = %endpoint,
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = self.slow_threshold.as_millis() as u64,
                "Slow request"
            );
        }
    }
}

/// Parse and unwrap a 2xx body. An empty body is `null`.
fn parse_payload(response: &HttpResponse) -> RequestOutcome<Value> {
    let raw = if response.body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(&response.body).map_err(|e| {
            RequestError::new(ErrorCode::NetworkError, format!("Malformed response body: {e}"))
                .with_status(response.status)
        })?
    };

    unwrap_envelopes(raw).map_err(|EnvelopeFailure { message, code }| {
        let code = code
            .and_then(|code| code.parse::<ErrorCode>().ok())
            .unwrap_or(ErrorCode::ServiceError);
        RequestError::new(code, message).with_status(response.status)
    })
}

fn status_label(response: &HttpResponse) -> String {
    if response.status_text.is_empty() {
        response.status.to_string()
    } else {
        response.status_text.clone()
    }
}

/// `HTTP 404: Not Found`, with the server's own error text appended when the
/// body carries one.
fn http_message(response: &HttpResponse) -> String {
    let mut message = format!("HTTP {}: {}", response.status, response.status_text);
    let detail = serde_json::from_slice::<Value>(&response.body).ok().and_then(|body| {
        ["error", "message"]
            .iter()
            .find_map(|field| body.get(*field).and_then(Value::as_str).map(str::to_string))
    });
    if let Some(detail) = detail {
        message.push_str(" - ");
        message.push_str(&detail);
    }
    message
}
