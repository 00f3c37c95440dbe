//! Transition rules shared by the analysis and upload lifecycles.
//!
//! Both lifecycles are a forward chain ending in `completed`, with `failed`
//! reachable from every non-terminal state. Observations arrive out of order
//! (push and poll race each other, polls can miss intermediate states), so:
//!
//! - forward moves may skip states,
//! - backward moves are ignored,
//! - terminal states never change.

use std::fmt;

pub trait LifecycleState: Copy + Eq + fmt::Display {
    /// Position along the forward chain. Terminal states share the top rank.
    fn rank(&self) -> u8;
    fn is_terminal(&self) -> bool;
    fn is_failure(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionDecision {
    /// Move to the new state
    Advance,
    /// Same state; only progress or step text may change
    Stay,
    /// Current state is terminal
    IgnoreTerminal,
    /// Observation is behind the current state
    IgnoreRegression,
}

pub fn evaluate_transition<S: LifecycleState>(from: S, to: S) -> TransitionDecision {
    if from.is_terminal() {
        return TransitionDecision::IgnoreTerminal;
    }
    if from == to {
        return TransitionDecision::Stay;
    }
    if to.is_failure() || to.rank() > from.rank() {
        return TransitionDecision::Advance;
    }
    TransitionDecision::IgnoreRegression
}

/// Progress never moves backwards; completion pins it at 100.
pub fn merge_progress(current: u8, observed: Option<u8>, completed: bool) -> u8 {
    if completed {
        return 100;
    }
    observed.map_or(current, |observed| current.max(observed.min(100)))
}
