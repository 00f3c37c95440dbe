//! # Client Runtime
//!
//! One place that builds every component from a [`RuntimeConfig`] and wires
//! them together: response cache, request engine, availability gate, both
//! orchestrators and, when enabled, the streaming channel.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use prepper_client::models::AnalysisRequest;
//! use prepper_client::runtime::ClientRuntime;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = ClientRuntime::new()?;
//! runtime.connect_realtime().await;
//!
//! let session = runtime
//!     .analysis()
//!     .start_analysis(AnalysisRequest::new("proposal-42").with_document("doc-7"))
//!     .await?;
//! println!("analysis {} is {}", session.id, session.status);
//! # Ok(())
//! # }
//! ```

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::ResponseCache;
use crate::client::{AnalysisApiClient, RequestEngine};
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::health::AvailabilityGate;
use crate::orchestration::{AnalysisOrchestrator, ChannelAttachment, UploadOrchestrator};
use crate::streaming::{ChannelConnector, StreamingClient, WebSocketConnector};
use crate::transport::{HttpTransport, ReqwestTransport};

/// Every client component, built from one configuration.
pub struct ClientRuntime {
    /// Validated configuration the components were built from
    config: RuntimeConfig,

    /// Shared response cache
    cache: Arc<ResponseCache>,

    /// Retrying HTTP engine used by every endpoint call
    engine: Arc<RequestEngine>,

    api: AnalysisApiClient,

    /// Health snapshot consulted before analyses start
    gate: Arc<AvailabilityGate>,

    uploads: UploadOrchestrator,

    analysis: AnalysisOrchestrator,

    /// Present only when streaming is enabled
    channel: Option<StreamingClient>,

    /// Orchestrator subscriptions on `channel`, held until shutdown
    attachments: Mutex<Vec<ChannelAttachment>>,
}

impl std::fmt::Debug for ClientRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRuntime")
            .field("base_url", &self.config.api.base_url)
            .field("channel", &self.channel)
            .field("uploads", &self.uploads)
            .field("analysis", &self.analysis)
            .finish()
    }
}

impl ClientRuntime {
    /// Load configuration from the usual file locations and the environment,
    /// then build the runtime on the production transports.
    pub fn new() -> Result<Self, RuntimeError> {
        let config = RuntimeConfig::load()?;
        Self::from_config(config)
    }

    /// Build on the production transports: reqwest for HTTP and a WebSocket
    /// connector for the streaming channel.
    pub fn from_config(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new()?);
        let connector: Arc<dyn ChannelConnector> = Arc::new(WebSocketConnector::new());
        Self::with_transports(config, transport, Some(connector))
    }

    /// Build on caller-supplied transports. Passing no connector disables the
    /// streaming channel regardless of configuration.
    pub fn with_transports(
        config: RuntimeConfig,
        transport: Arc<dyn HttpTransport>,
        connector: Option<Arc<dyn ChannelConnector>>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        info!(base_url = %config.api.base_url, "🔧 Initializing client runtime");

        let cache = Arc::new(ResponseCache::from_config(&config.cache));
        let engine = Arc::new(RequestEngine::new(&config.api, transport, Arc::clone(&cache)));
        let api = AnalysisApiClient::new(Arc::clone(&engine));
        let gate = Arc::new(AvailabilityGate::new(api.clone(), &config.health));
        let uploads = UploadOrchestrator::new(api.clone(), config.upload.clone());
        let analysis = AnalysisOrchestrator::new(
            api.clone(),
            Arc::clone(&gate),
            uploads.clone(),
            config.analysis.clone(),
        );

        let channel = match connector {
            Some(connector) if config.streaming.enabled => {
                let url = config.channel_url()?;
                Some(StreamingClient::new(url, connector, &config.streaming))
            }
            _ => None,
        };

        let attachments = match &channel {
            Some(channel) => vec![uploads.attach_channel(channel), analysis.attach_channel(channel)],
            None => Vec::new(),
        };

        info!(
            streaming = channel.is_some(),
            poll_with_streaming = config.analysis.poll_with_streaming,
            "✅ Client runtime ready"
        );

        Ok(Self {
            config,
            cache,
            engine,
            api,
            gate,
            uploads,
            analysis,
            channel,
            attachments: Mutex::new(attachments),
        })
    }

    /// Open the streaming channel. Returns whether it is connected; a failed
    /// open keeps retrying in the background and analyses fall back to
    /// polling meanwhile.
    pub async fn connect_realtime(&self) -> bool {
        let Some(channel) = &self.channel else {
            return false;
        };
        match channel.connect().await {
            Ok(()) => true,
            Err(e) => {
                warn!(url = %channel.url(), error = %e, "Streaming channel unavailable; relying on polling");
                false
            }
        }
    }

    /// Stop pollers, detach push handlers and close the channel.
    pub fn shutdown(&self) {
        self.analysis.shutdown();
        self.attachments.lock().clear();
        if let Some(channel) = &self.channel {
            channel.disconnect();
        }
        info!("Client runtime shut down");
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn engine(&self) -> &Arc<RequestEngine> {
        &self.engine
    }

    pub fn api(&self) -> &AnalysisApiClient {
        &self.api
    }

    pub fn gate(&self) -> &Arc<AvailabilityGate> {
        &self.gate
    }

    pub fn uploads(&self) -> &UploadOrchestrator {
        &self.uploads
    }

    pub fn analysis(&self) -> &AnalysisOrchestrator {
        &self.analysis
    }

    pub fn channel(&self) -> Option<&StreamingClient> {
        self.channel.as_ref()
    }
}

impl Drop for ClientRuntime {
    fn drop(&mut self) {
        self.analysis.shutdown();
    }
}
