//! Response envelope normalization.
//!
//! The backend and the proxies in front of it each wrap payloads in
//! `{"success": true, "data": ...}`, sometimes several layers deep. Only an
//! object whose `success` is the boolean `true` and which has a `data` key
//! counts as a wrapper; everything else is payload. An explicit
//! `{"success": false, "error": "..."}` is a reported failure.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// A success wrapper around `data`
    Success(Value),
    /// A failure report from the server
    Failure {
        message: String,
        code: Option<String>,
    },
    /// Payload
    Leaf(Value),
}

impl Envelope {
    pub fn classify(value: Value) -> Self {
        let Value::Object(mut map) = value else {
            return Self::Leaf(value);
        };

        match map.get("success") {
            Some(Value::Bool(true)) if map.contains_key("data") => {
                Self::Success(map.remove("data").unwrap_or(Value::Null))
            }
            Some(Value::Bool(false)) => match map.get("error") {
                Some(Value::String(message)) => Self::Failure {
                    message: message.clone(),
                    code: map.get("code").and_then(Value::as_str).map(str::to_string),
                },
                _ => Self::Leaf(Value::Object(map)),
            },
            _ => Self::Leaf(Value::Object(map)),
        }
    }
}

/// Failure reported inside an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeFailure {
    pub message: String,
    pub code: Option<String>,
}

/// Strip success wrappers until the payload is reached.
pub fn unwrap_envelopes(mut value: Value) -> Result<Value, EnvelopeFailure> {
    loop {
        match Envelope::classify(value) {
            Envelope::Success(inner) => value = inner,
            Envelope::Leaf(leaf) => return Ok(leaf),
            Envelope::Failure { message, code } => return Err(EnvelopeFailure { message, code }),
        }
    }
}
