//! # Structured Logging
//!
//! Environment-aware `tracing` subscriber setup plus helpers that emit uniform
//! structured records for requests, session transitions and channel events.

use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process.
///
/// `PREPPER_CLIENT_LOG` takes an `EnvFilter` directive and wins over the
/// environment default. `PREPPER_CLIENT_LOG_FORMAT=json` switches to JSON lines.
/// An already-installed global subscriber is left in place.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = std::env::var("PREPPER_CLIENT_LOG")
            .unwrap_or_else(|_| get_log_level(&environment).to_string());
        let json = std::env::var("PREPPER_CLIENT_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .json()
                .with_filter(EnvFilter::new(&filter))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_filter(EnvFilter::new(&filter))
                .boxed()
        };

        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            environment = %environment,
            filter = %filter,
            json = json,
            "Structured logging initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var("PREPPER_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Record the end of a logical request.
pub fn log_request_operation(
    method: &str,
    endpoint: &str,
    attempts: u32,
    elapsed: Duration,
    outcome: &str,
) {
    tracing::debug!(
        method = %method,
        endpoint = %endpoint,
        attempts = attempts,
        elapsed_ms = elapsed.as_millis() as u64,
        outcome = %outcome,
        "REQUEST"
    );
}

/// Record an applied session transition.
pub fn log_session_transition(
    kind: &str,
    session_id: &str,
    from: &str,
    to: &str,
    progress: u8,
) {
    tracing::info!(
        kind = %kind,
        session_id = %session_id,
        from = %from,
        to = %to,
        progress = progress,
        "SESSION_TRANSITION"
    );
}

/// Record a streaming channel lifecycle event.
pub fn log_channel_event(event: &str, url: &str, attempt: u32, details: Option<&str>) {
    tracing::info!(
        event = %event,
        url = %url,
        attempt = attempt,
        details = details,
        "CHANNEL"
    );
}
