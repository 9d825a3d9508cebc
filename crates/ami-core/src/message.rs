//! Parsed manager frames: responses and events.
//!
//! A frame is an opaque key/value record. The bridge only interprets a small
//! set of well-known keys (`Response`, `Event`, `ActionID`, `Message`); all
//! other fields are carried through untouched.

use serde_json::{Map, Value};

use crate::action::ActionId;
use crate::error::{Error, Result};
use crate::parser;

/// An ordered key/value record read off the manager session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AmiFrame {
    fields: Vec<(String, String)>,
}

impl AmiFrame {
    /// Parse a complete frame from its wire text.
    pub fn parse(input: &str) -> Result<AmiFrame> {
        match parser::frame(input) {
            Ok((_, fields)) => Ok(AmiFrame { fields }),
            Err(error) => Err(Error::parse(error.to_string())),
        }
    }

    /// Build a frame from key/value pairs (mostly useful in tests).
    pub fn from_pairs<K, V, I>(pairs: I) -> AmiFrame
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        AmiFrame {
            fields: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    /// Append a field.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    /// Look up a field by key, case-insensitively. Returns the first match.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Replace the first field with the given key, or append it.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        for (k, v) in &mut self.fields {
            if k.eq_ignore_ascii_case(key) {
                *v = value;
                return;
            }
        }
        self.fields.push((key.to_string(), value));
    }

    /// All fields in arrival order.
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Whether the frame has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serialize to a JSON object. Later duplicates of a key overwrite
    /// earlier ones.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        for (key, value) in &self.fields {
            object.insert(key.clone(), Value::String(value.clone()));
        }
        Value::Object(object)
    }
}

/// A classified manager frame.
#[derive(Debug, Clone, PartialEq)]
pub enum AmiMessage {
    /// Direct reply to an issued action.
    Response(AmiResponse),
    /// Asynchronous event from the event stream.
    Event(AmiEvent),
    /// Anything else (not expected in normal operation).
    Raw(AmiFrame),
}

impl AmiMessage {
    /// Classify a frame by its leading well-known key.
    pub fn from_frame(frame: AmiFrame) -> AmiMessage {
        if frame.get("Response").is_some() {
            AmiMessage::Response(AmiResponse { frame })
        } else if frame.get("Event").is_some() {
            AmiMessage::Event(AmiEvent { frame })
        } else {
            AmiMessage::Raw(frame)
        }
    }
}

/// Direct reply to an issued action.
#[derive(Debug, Clone, PartialEq)]
pub struct AmiResponse {
    frame: AmiFrame,
}

impl AmiResponse {
    /// Wrap a frame carrying a `Response` field.
    pub fn from_frame(frame: AmiFrame) -> AmiResponse {
        AmiResponse { frame }
    }

    /// Whether the manager reported success.
    pub fn success(&self) -> bool {
        self.frame
            .get("Response")
            .map(|value| value.eq_ignore_ascii_case("Success"))
            .unwrap_or(false)
    }

    /// The correlation identifier echoed back, if any.
    pub fn get_action_id(&self) -> Option<ActionId> {
        self.frame.get("ActionID").map(ActionId::from)
    }

    /// The human-readable `Message` field, if any.
    pub fn message(&self) -> Option<&str> {
        self.frame.get("Message")
    }

    /// Look up an arbitrary field.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.frame.get(key)
    }

    /// The underlying frame.
    pub fn frame(&self) -> &AmiFrame {
        &self.frame
    }
}

/// Asynchronous event surfaced by the manager session.
#[derive(Debug, Clone, PartialEq)]
pub struct AmiEvent {
    frame: AmiFrame,
}

impl AmiEvent {
    /// Wrap a frame carrying an `Event` field.
    pub fn from_frame(frame: AmiFrame) -> AmiEvent {
        AmiEvent { frame }
    }

    /// The event name.
    pub fn name(&self) -> &str {
        self.frame.get("Event").unwrap_or("")
    }

    /// The correlation identifier carried by the event, if any. Most events
    /// carry none.
    pub fn get_action_id(&self) -> Option<ActionId> {
        self.frame.get("ActionID").map(ActionId::from)
    }

    /// Look up an arbitrary field.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.frame.get(key)
    }

    /// Replace or attach a field (used to tag the originating host).
    pub fn set_field(&mut self, key: &str, value: impl Into<String>) {
        self.frame.set(key, value);
    }

    /// Serialize to a JSON object for publication.
    pub fn to_json(&self) -> Value {
        self.frame.to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_classify_response() {
        let frame =
            AmiFrame::parse("Response: Success\r\nActionID: abc-1\r\nMessage: Pong\r\n\r\n")
                .unwrap();
        match AmiMessage::from_frame(frame) {
            AmiMessage::Response(response) => {
                assert!(response.success());
                assert_eq!(response.get_action_id(), Some(ActionId::from("abc-1")));
                assert_eq!(response.message(), Some("Pong"));
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_and_classify_event() {
        let frame = AmiFrame::parse("Event: Newchannel\r\nChannel: SIP/100-0001\r\n\r\n").unwrap();
        match AmiMessage::from_frame(frame) {
            AmiMessage::Event(event) => {
                assert_eq!(event.name(), "Newchannel");
                assert_eq!(event.get_action_id(), None);
                assert_eq!(event.get("Channel"), Some("SIP/100-0001"));
            }
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_unclassified_frame_is_raw() {
        let frame = AmiFrame::from_pairs([("Ping", "Pong")]);
        assert!(matches!(AmiMessage::from_frame(frame), AmiMessage::Raw(_)));
    }

    #[test]
    fn test_error_response() {
        let frame = AmiFrame::from_pairs([
            ("Response", "Error"),
            ("Message", "Authentication failed"),
        ]);
        let response = AmiResponse::from_frame(frame);
        assert!(!response.success());
        assert_eq!(response.message(), Some("Authentication failed"));
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let frame = AmiFrame::from_pairs([("ActionId", "xyz")]);
        assert_eq!(frame.get("ActionID"), Some("xyz"));
    }

    #[test]
    fn test_set_field_replaces() {
        let mut event = AmiEvent::from_frame(AmiFrame::from_pairs([
            ("Event", "Newchannel"),
            ("srv", "old-host"),
        ]));
        event.set_field("srv", "pbx-01");
        assert_eq!(event.get("srv"), Some("pbx-01"));
        assert_eq!(event.frame.fields().len(), 2);
    }

    #[test]
    fn test_to_json() {
        let event = AmiEvent::from_frame(AmiFrame::from_pairs([
            ("Event", "Hangup"),
            ("Cause", "16"),
        ]));
        let json = event.to_json();
        assert_eq!(json["Event"], "Hangup");
        assert_eq!(json["Cause"], "16");
    }
}
