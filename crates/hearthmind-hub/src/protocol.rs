//! Typed frames for the hub WebSocket protocol.
//!
//! The hub speaks JSON text frames. Outbound frames are either the auth
//! handshake or id-tagged commands; inbound frames are discriminated by their
//! `type` field. Unknown frame types are preserved so the reader can log and
//! drop them instead of erroring.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// A request/response command sent to the hub, before id assignment.
///
/// ```
/// use hearthmind_hub::HubCommand;
///
/// let cmd = HubCommand::new("subscribe_events").with_field("event_type", "state_changed");
/// let frame = cmd.to_frame(7);
/// assert_eq!(frame["id"], 7);
/// assert_eq!(frame["type"], "subscribe_events");
/// ```
#[derive(Debug, Clone)]
pub struct HubCommand {
    msg_type: String,
    fields: Map<String, Value>,
}

impl HubCommand {
    /// Create a command with the given frame type.
    pub fn new(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            fields: Map::new(),
        }
    }

    /// Attach an extra field to the frame.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// The frame type.
    pub fn msg_type(&self) -> &str {
        &self.msg_type
    }

    /// Render the wire frame with the assigned correlation id.
    pub fn to_frame(&self, id: u64) -> Value {
        let mut frame = Map::new();
        frame.insert("id".to_string(), json!(id));
        frame.insert("type".to_string(), json!(self.msg_type));
        for (key, value) in &self.fields {
            frame.insert(key.clone(), value.clone());
        }
        Value::Object(frame)
    }
}

/// Error detail attached to a failed result frame.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FrameError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Event payload carried by an `event` frame.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HubEvent {
    /// Named event type, e.g. `device_registry_updated`.
    pub event_type: String,
    /// Event-specific data.
    #[serde(default)]
    pub data: Value,
}

/// Inbound frames, discriminated by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Server greeting; the client must answer with an `auth` frame.
    AuthRequired {
        #[serde(default)]
        version: Option<String>,
    },
    /// Credentials accepted.
    AuthOk {
        #[serde(default)]
        version: Option<String>,
    },
    /// Credentials rejected. Terminal for the handshake.
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    /// Reply to an id-tagged command.
    Result {
        id: u64,
        success: bool,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<FrameError>,
    },
    /// Pushed event for an active subscription.
    Event { id: u64, event: HubEvent },
    /// Keep-alive reply.
    Pong { id: u64 },
    /// Anything the hub sends that we do not model. Logged and dropped.
    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    /// Parse a text frame. `None` means the payload was not valid JSON of
    /// any known or unknown frame shape.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// The client half of the auth handshake.
pub fn auth_frame(access_token: &str) -> Value {
    json!({ "type": "auth", "access_token": access_token })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_frame_carries_id_type_and_fields() {
        let frame = HubCommand::new("config/device_registry/list").to_frame(3);
        assert_eq!(frame["id"], 3);
        assert_eq!(frame["type"], "config/device_registry/list");

        let frame = HubCommand::new("subscribe_events")
            .with_field("event_type", "entity_registry_updated")
            .to_frame(4);
        assert_eq!(frame["event_type"], "entity_registry_updated");
    }

    #[test]
    fn parse_auth_handshake_frames() {
        let frame = InboundFrame::parse(r#"{"type":"auth_required","version":"2026.1"}"#).unwrap();
        assert!(matches!(frame, InboundFrame::AuthRequired { .. }));

        let frame = InboundFrame::parse(r#"{"type":"auth_ok"}"#).unwrap();
        assert!(matches!(frame, InboundFrame::AuthOk { .. }));

        let frame =
            InboundFrame::parse(r#"{"type":"auth_invalid","message":"bad token"}"#).unwrap();
        match frame {
            InboundFrame::AuthInvalid { message } => {
                assert_eq!(message.as_deref(), Some("bad token"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn parse_result_frame() {
        let frame = InboundFrame::parse(
            r#"{"id":12,"type":"result","success":true,"result":[{"id":"dev-1"}]}"#,
        )
        .unwrap();
        match frame {
            InboundFrame::Result {
                id,
                success,
                result,
                error,
            } => {
                assert_eq!(id, 12);
                assert!(success);
                assert!(result.unwrap().is_array());
                assert!(error.is_none());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn parse_failed_result_frame() {
        let frame = InboundFrame::parse(
            r#"{"id":5,"type":"result","success":false,"error":{"code":"unknown_command","message":"nope"}}"#,
        )
        .unwrap();
        match frame {
            InboundFrame::Result { success, error, .. } => {
                assert!(!success);
                assert_eq!(error.unwrap().code, "unknown_command");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn parse_event_frame() {
        let frame = InboundFrame::parse(
            r#"{"id":2,"type":"event","event":{"event_type":"device_registry_updated","data":{"action":"update","device_id":"dev-9"}}}"#,
        )
        .unwrap();
        match frame {
            InboundFrame::Event { id, event } => {
                assert_eq!(id, 2);
                assert_eq!(event.event_type, "device_registry_updated");
                assert_eq!(event.data["device_id"], "dev-9");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn unknown_frame_type_is_preserved_not_error() {
        let frame = InboundFrame::parse(r#"{"type":"zones/list_response"}"#).unwrap();
        assert!(matches!(frame, InboundFrame::Unknown));
    }

    #[test]
    fn garbage_is_none() {
        assert!(InboundFrame::parse("not json").is_none());
    }
}
