use proptest::prelude::*;
use serde_json::{json, Value};

use prepper_client::state_machine::{AnalysisStatus, AnalysisUpdate};

/// Leaf payloads that are never mistaken for an envelope.
pub fn leaf_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z]{0,12}".prop_map(Value::from),
        ("[a-z]{1,8}", any::<u32>()).prop_map(|(key, value)| json!({ key: value })),
        prop::collection::vec(any::<u16>(), 0..4).prop_map(|items| json!(items)),
    ]
}

/// `depth` layers of `{success: true, data: ...}` around `leaf`.
pub fn wrap(leaf: Value, depth: usize) -> Value {
    (0..depth).fold(leaf, |inner, _| json!({"success": true, "data": inner}))
}

pub fn analysis_status_strategy() -> impl Strategy<Value = AnalysisStatus> {
    prop_oneof![
        Just(AnalysisStatus::Queued),
        Just(AnalysisStatus::Extracting),
        Just(AnalysisStatus::Analyzing),
        Just(AnalysisStatus::Validating),
        Just(AnalysisStatus::Completed),
        Just(AnalysisStatus::Failed),
    ]
}

/// An update as either delivery path could report it.
pub fn analysis_update_strategy() -> impl Strategy<Value = AnalysisUpdate> {
    (
        proptest::option::of(analysis_status_strategy()),
        proptest::option::of(0u8..=100),
    )
        .prop_map(|(status, progress)| AnalysisUpdate {
            status,
            progress,
            ..AnalysisUpdate::default()
        })
}

/// Two delivery streams and a shuffle deciding how they interleave.
pub fn interleaving_strategy() -> impl Strategy<Value = Vec<AnalysisUpdate>> {
    (
        prop::collection::vec(analysis_update_strategy(), 0..12),
        prop::collection::vec(analysis_update_strategy(), 0..12),
        prop::collection::vec(any::<bool>(), 24),
    )
        .prop_map(|(push, poll, picks)| {
            let mut push = push.into_iter();
            let mut poll = poll.into_iter();
            let mut merged = Vec::new();
            for take_push in picks {
                let next = if take_push {
                    push.next().or_else(|| poll.next())
                } else {
                    poll.next().or_else(|| push.next())
                };
                match next {
                    Some(update) => merged.push(update),
                    None => break,
                }
            }
            merged
        })
}
