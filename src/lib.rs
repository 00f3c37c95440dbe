#![allow(clippy::doc_markdown)] // Allow technical terms like WebSocket, DFARS in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Prepper Client
//!
//! Resilient client runtime for the proposal compliance analysis backend.
//!
//! ## Overview
//!
//! The backend accepts proposal documents, analyzes them against federal
//! acquisition regulations (FAR, DFARS) and reports progress while it works.
//! This crate is everything a front end needs between its views and that
//! backend: retrying requests, a short-lived response cache, a reconnecting
//! push channel, a health gate, and orchestrators that turn uploads and
//! analyses into observable sessions.
//!
//! ## Architecture
//!
//! - **Request engine**: per-attempt timeout, linear backoff retries, error
//!   classification into stable codes and unwrapping of nested
//!   `{success, data}` envelopes. Reads may be served from the response cache.
//! - **Streaming channel**: JSON frames `{type, sessionId, data}` dispatched to
//!   per-topic subscribers, with bounded reconnection.
//! - **Availability gate**: caches the health check so starts do not hammer
//!   `/api/health`.
//! - **Orchestrators**: own session records, apply updates monotonically and
//!   notify observers once per applied transition.
//!
//! ## Module Organization
//!
//! - [`cache`] - In-memory response cache with an optional durable tier
//! - [`client`] - Envelopes, request engine and typed endpoints
//! - [`config`] - Layered configuration
//! - [`error`] - Error codes and error types
//! - [`events`] - Session events and observer registries
//! - [`health`] - Availability gate
//! - [`models`] - Wire DTOs and session records
//! - [`orchestration`] - Upload and analysis orchestrators
//! - [`runtime`] - Wires every component from one configuration
//! - [`state_machine`] - Session lifecycles and monotonic update rules
//! - [`streaming`] - Reconnecting push channel
//! - [`transport`] - HTTP transport seam
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit, integration and property tests
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod health;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod runtime;
pub mod state_machine;
pub mod streaming;
pub mod transport;
pub mod validation;

pub use cache::ResponseCache;
pub use client::{AnalysisApiClient, ReadPolicy, RequestEngine};
pub use config::RuntimeConfig;
pub use error::{
    ChannelError, ConfigurationError, ErrorCode, RequestError, RequestOutcome, RuntimeError,
    SessionError, SessionResult,
};
pub use events::{AnalysisEvent, ObserverHandle, UploadEvent};
pub use health::AvailabilityGate;
pub use models::{AnalysisRequest, AnalysisSession, UploadFile, UploadSession};
pub use orchestration::{AnalysisOrchestrator, ChannelAttachment, UploadOrchestrator};
pub use runtime::ClientRuntime;
pub use state_machine::{AnalysisStatus, UploadStatus};
pub use streaming::{ChannelMessage, StreamingClient};
