//! # Session Events
//!
//! Typed notifications for applied session transitions and the registries that
//! deliver them.

pub mod observers;
pub mod types;

pub use observers::{ObserverHandle, ObserverRegistry, SessionObserver};
pub use types::{AnalysisEvent, UploadEvent};

/// Broadcast buffer for session event streams
pub const DEFAULT_EVENT_CAPACITY: usize = 256;
