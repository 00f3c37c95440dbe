use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::normalize_progress;

/// One frame on the streaming channel.
///
/// Wire form: `{"type": "...", "sessionId": "...", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    #[serde(rename = "type")]
    pub topic: String,
    #[serde(rename = "sessionId", alias = "session_id", default)]
    pub session_id: String,
    #[serde(rename = "data", default)]
    pub payload: Value,
}

impl ChannelMessage {
    pub fn new(topic: impl Into<String>, session_id: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            session_id: session_id.into(),
            payload,
        }
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

/// Payload of `analysis_progress` and `upload_progress`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressPayload {
    pub progress: Option<f64>,
    #[serde(alias = "current_step")]
    pub current_step: Option<String>,
    pub status: Option<String>,
}

impl ProgressPayload {
    pub fn normalized_progress(&self) -> Option<u8> {
        self.progress.map(normalize_progress)
    }
}

/// Payload of `error`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorPayload {
    pub error: Option<String>,
    pub code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_wire_frame() {
        let message = ChannelMessage::parse(
            r#"{"type":"analysis_progress","sessionId":"a1","data":{"progress":55,"currentStep":"Analyzing"}}"#,
        )
        .unwrap();
        assert_eq!(message.topic, "analysis_progress");
        assert_eq!(message.session_id, "a1");

        let payload: ProgressPayload = message.payload_as().unwrap();
        assert_eq!(payload.normalized_progress(), Some(55));
        assert_eq!(payload.current_step.as_deref(), Some("Analyzing"));
    }

    #[test]
    fn test_missing_type_is_rejected() {
        assert!(ChannelMessage::parse(r#"{"sessionId":"a1"}"#).is_err());
        assert!(ChannelMessage::parse("not json").is_err());
    }

    #[test]
    fn test_serializes_to_wire_names() {
        let message = ChannelMessage::new("error", "a1", json!({"error": "boom"}));
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value, json!({"type": "error", "sessionId": "a1", "data": {"error": "boom"}}));
    }
}
