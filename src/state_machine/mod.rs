//! # Session Lifecycles
//!
//! Status enums for analysis and upload sessions, the transition rules that keep
//! them monotonic, and the update application used by the orchestrators.

pub mod session_machine;
pub mod states;
pub mod transitions;

pub use session_machine::{AnalysisUpdate, AppliedChange, UploadUpdate};
pub use states::{AnalysisStatus, UploadStatus};
pub use transitions::{evaluate_transition, merge_progress, LifecycleState, TransitionDecision};
