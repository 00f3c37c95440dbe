//! # Backend Client
//!
//! Envelope normalization, the retrying request engine, and typed endpoint
//! methods on top of it.

pub mod api_client;
pub mod envelope;
pub mod request_engine;

pub use api_client::{AnalysisApiClient, ReadPolicy};
pub use envelope::{unwrap_envelopes, Envelope, EnvelopeFailure};
pub use request_engine::{CacheDirective, RequestEngine};
