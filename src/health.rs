//! # Availability Gate
//!
//! Caches the result of the backend health check for a short window so that
//! orchestrators can check availability before every expensive operation
//! without hammering `/api/health`. Failed checks count as unhealthy and are
//! cached the same way.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::AnalysisApiClient;
use crate::config::HealthConfig;
use crate::error::RequestOutcome;
use crate::models::{HealthResponse, ServiceStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub checked_at: Instant,
    pub healthy: bool,
}

#[derive(Debug)]
pub struct AvailabilityGate {
    api: AnalysisApiClient,
    ttl: Duration,
    wait_interval: Duration,
    snapshot: Mutex<Option<HealthSnapshot>>,
    last_checked: Mutex<Option<DateTime<Utc>>>,
}

impl AvailabilityGate {
    pub fn new(api: AnalysisApiClient, config: &HealthConfig) -> Self {
        Self {
            api,
            ttl: config.cache_ttl(),
            wait_interval: config.wait_check_interval(),
            snapshot: Mutex::new(None),
            last_checked: Mutex::new(None),
        }
    }

    /// Healthy or degraded within the last `ttl`; checks again when the snapshot is
    /// missing or stale.
    pub async fn is_service_healthy(&self) -> bool {
        if let Some(snapshot) = self.fresh_snapshot() {
            debug!(healthy = snapshot.healthy, "Using cached health snapshot");
            return snapshot.healthy;
        }

        match self.health_check().await {
            Ok(response) => response.is_usable(),
            Err(_) => false,
        }
    }

    /// Check the backend now and record the result.
    pub async fn health_check(&self) -> RequestOutcome<HealthResponse> {
        let result = self.api.health_check().await;
        let healthy = match &result {
            Ok(response) => response.is_usable(),
            Err(e) => {
                warn!(code = %e.code, error = %e.message, "Health check failed");
                false
            }
        };
        self.record(healthy);
        result
    }

    /// Poll until the backend is usable or `timeout` elapses.
    pub async fn wait_for_service(&self, timeout: Duration) -> bool {
        // An unrepresentable deadline means wait indefinitely
        let deadline = Instant::now().checked_add(timeout);
        loop {
            self.invalidate();
            if self.is_service_healthy().await {
                info!("Analysis service is available");
                return true;
            }
            let out_of_time = deadline.is_some_and(|deadline| {
                Instant::now()
                    .checked_add(self.wait_interval)
                    .map_or(true, |next| next > deadline)
            });
            if out_of_time {
                warn!(timeout_ms = timeout.as_millis() as u64, "Gave up waiting for analysis service");
                return false;
            }
            tokio::time::sleep(self.wait_interval).await;
        }
    }

    /// Fresh check, reported as a diagnostic summary.
    pub async fn service_status(&self) -> ServiceStatus {
        let result = self.health_check().await;
        let last_checked = *self.last_checked.lock();
        let base_url = self.api.base_url().to_string();

        match result {
            Ok(response) => ServiceStatus {
                healthy: response.is_usable(),
                base_url,
                status: Some(response.status),
                version: response.version,
                checks: response.checks,
                last_checked,
                error: None,
            },
            Err(e) => ServiceStatus {
                healthy: false,
                base_url,
                status: None,
                version: None,
                checks: None,
                last_checked,
                error: Some(e.message),
            },
        }
    }

    pub fn snapshot(&self) -> Option<HealthSnapshot> {
        *self.snapshot.lock()
    }

    /// Forget the cached snapshot so the next check goes to the backend.
    pub fn invalidate(&self) {
        self.snapshot.lock().take();
    }

    fn fresh_snapshot(&self) -> Option<HealthSnapshot> {
        let snapshot = (*self.snapshot.lock())?;
        (snapshot.checked_at.elapsed() < self.ttl).then_some(snapshot)
    }

    fn record(&self, healthy: bool) {
        *self.snapshot.lock() = Some(HealthSnapshot {
            checked_at: Instant::now(),
            healthy,
        });
        *self.last_checked.lock() = Some(Utc::now());
    }
}
