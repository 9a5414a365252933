//! Wire types for the extraction service
//!
//! Inbound text frames are UTF-8 JSON objects of the shape
//! `{ attributes?: {..}, final_results?: bool, corrected_audio?: string }`.
//! The keys may co-occur; classification dispatches one result message per
//! key present. Outbound control frames carry an `action` discriminant; the
//! only one defined is `stop_recording`, which requests the final
//! authoritative sweep.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A unit of extraction output, classified from one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultMessage {
    /// In-progress field values; may revise earlier partials.
    PartialAttributes { mapping: HashMap<String, String> },
    /// The authoritative end-of-session sweep.
    FinalAttributes { mapping: HashMap<String, String> },
    /// Cleaned-up transcript text for display.
    CorrectedText { text: String },
}

/// Raw inbound frame. Unknown keys are ignored so the service can grow its
/// vocabulary without breaking older clients.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerFrame {
    #[serde(default)]
    pub attributes: Option<HashMap<String, String>>,
    #[serde(default)]
    pub final_results: Option<bool>,
    #[serde(default)]
    pub corrected_audio: Option<String>,
    /// Older service builds send the end-of-connection transcript under this
    /// key; treated the same as `corrected_audio`.
    #[serde(default)]
    pub transcription: Option<String>,
}

impl ServerFrame {
    /// Classify this frame into result messages, in dispatch order.
    pub fn into_messages(self) -> Vec<ResultMessage> {
        let mut messages = Vec::new();

        if let Some(text) = self.corrected_audio.or(self.transcription) {
            messages.push(ResultMessage::CorrectedText { text });
        }

        if let Some(mapping) = self.attributes {
            if self.final_results.unwrap_or(false) {
                messages.push(ResultMessage::FinalAttributes { mapping });
            } else {
                messages.push(ResultMessage::PartialAttributes { mapping });
            }
        }

        messages
    }
}

/// Parse one inbound text frame. A parse error means the frame is malformed
/// and should be logged and dropped; it is never fatal to the channel.
pub fn parse_frame(text: &str) -> Result<Vec<ResultMessage>, serde_json::Error> {
    let frame: ServerFrame = serde_json::from_str(text)?;
    Ok(frame.into_messages())
}

/// Control frames sent to the service as text.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlMessage {
    /// End-of-stream: no more audio will follow, run the final sweep.
    StopRecording,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_without_final_marker_are_partial() {
        let messages = parse_frame(r#"{"attributes": {"name": "Jane"}}"#).unwrap();
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            ResultMessage::PartialAttributes { mapping } => {
                assert_eq!(mapping["name"], "Jane");
            }
            other => panic!("expected partial, got {:?}", other),
        }
    }

    #[test]
    fn final_marker_promotes_attributes_to_final() {
        let messages =
            parse_frame(r#"{"attributes": {"name": "Jane Doe"}, "final_results": true}"#).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(matches!(
            &messages[0],
            ResultMessage::FinalAttributes { mapping } if mapping["name"] == "Jane Doe"
        ));
    }

    #[test]
    fn false_final_marker_stays_partial() {
        let messages =
            parse_frame(r#"{"attributes": {"name": "Jane"}, "final_results": false}"#).unwrap();
        assert!(matches!(&messages[0], ResultMessage::PartialAttributes { .. }));
    }

    #[test]
    fn co_occurring_keys_all_dispatch() {
        let messages = parse_frame(
            r#"{"corrected_audio": "my name is Jane", "attributes": {"name": "Jane"}}"#,
        )
        .unwrap();
        assert_eq!(messages.len(), 2);
        assert!(matches!(
            &messages[0],
            ResultMessage::CorrectedText { text } if text == "my name is Jane"
        ));
        assert!(matches!(&messages[1], ResultMessage::PartialAttributes { .. }));
    }

    #[test]
    fn transcription_key_is_treated_as_corrected_text() {
        let messages = parse_frame(r#"{"transcription": "hello"}"#).unwrap();
        assert_eq!(
            messages,
            vec![ResultMessage::CorrectedText {
                text: "hello".to_string()
            }]
        );
    }

    #[test]
    fn unknown_keys_are_tolerated() {
        let messages =
            parse_frame(r#"{"attributes": {"a": "1"}, "confidence": 0.93, "extra": [1, 2]}"#)
                .unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn frame_with_no_known_keys_yields_nothing() {
        let messages = parse_frame(r#"{"heartbeat": true}"#).unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_frame("not json").is_err());
        assert!(parse_frame(r#"{"attributes": "not a map"}"#).is_err());
    }

    #[test]
    fn stop_recording_serializes_to_action_frame() {
        let json = serde_json::to_string(&ControlMessage::StopRecording).unwrap();
        assert_eq!(json, r#"{"action":"stop_recording"}"#);
    }
}
