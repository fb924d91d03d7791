use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ids::RequestId;

/// Wire protocol version sent on every outgoing frame.
pub const PROTOCOL_VERSION: u32 = 1;

// Message purposes (header.messagePurpose)
pub const PURPOSE_COMMAND_REQUEST: &str = "commandRequest";
pub const PURPOSE_COMMAND_RESPONSE: &str = "commandResponse";
pub const PURPOSE_SUBSCRIBE: &str = "subscribe";
pub const PURPOSE_EVENT: &str = "event";
pub const PURPOSE_ERROR: &str = "error";

/// Event emitted by the game client whenever a script finishes loading.
pub const EVENT_SCRIPT_LOADED: &str = "ScriptLoaded";

/// Command the client answers with its own player name.
pub const LOCAL_PLAYER_NAME_COMMAND: &str = "getlocalplayername";
const LOCAL_PLAYER_NAME_FIELD: &str = "localplayername";

/// Human-readable result field most command responses carry.
pub const STATUS_MESSAGE_FIELD: &str = "statusMessage";

/// Frame header shared by every message in both directions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub message_purpose: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
}

/// One JSON text frame on the game-client socket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub header: Header,
    #[serde(default)]
    pub body: Value,
}

/// What an incoming frame means to the relay.
#[derive(Clone, Debug, PartialEq)]
pub enum Incoming {
    /// Reply (or error) for a request we issued.
    Reply { request_id: RequestId, body: Value },
    /// Subscribed event notification.
    Event { name: String, body: Value },
    /// Anything else; carried for logging only.
    Other { purpose: String },
}

impl Frame {
    /// Build a command request frame.
    pub fn command(request_id: RequestId, command_line: &str) -> Self {
        Self {
            header: Header {
                request_id: Some(request_id.to_string()),
                message_purpose: PURPOSE_COMMAND_REQUEST.to_string(),
                version: Some(PROTOCOL_VERSION),
                message_type: Some(PURPOSE_COMMAND_REQUEST.to_string()),
                event_name: None,
            },
            body: json!({
                "version": PROTOCOL_VERSION,
                "commandLine": command_line,
                "origin": { "type": "player" },
            }),
        }
    }

    /// Build an event subscription frame.
    pub fn subscribe(request_id: RequestId, event_name: &str) -> Self {
        Self {
            header: Header {
                request_id: Some(request_id.to_string()),
                message_purpose: PURPOSE_SUBSCRIBE.to_string(),
                version: Some(PROTOCOL_VERSION),
                message_type: Some(PURPOSE_COMMAND_REQUEST.to_string()),
                event_name: None,
            },
            body: json!({ "eventName": event_name }),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Classify an incoming frame. Replies without a parseable request id
    /// cannot be correlated and are reported as `Other`.
    pub fn classify(self) -> Incoming {
        let purpose = self.header.message_purpose;
        if purpose == PURPOSE_COMMAND_RESPONSE || purpose == PURPOSE_ERROR {
            return match self.header.request_id.as_deref().map(str::parse::<RequestId>) {
                Some(Ok(request_id)) => Incoming::Reply {
                    request_id,
                    body: self.body,
                },
                _ => Incoming::Other { purpose },
            };
        }
        if purpose != PURPOSE_EVENT {
            return Incoming::Other { purpose };
        }

        let name = self
            .header
            .event_name
            .or_else(|| {
                self.body
                    .get("eventName")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_default();
        Incoming::Event {
            name,
            body: self.body,
        }
    }
}

/// `tellraw` command that shows `message` in the target player's chat.
pub fn tellraw_command(message: &str) -> String {
    let raw = json!({ "rawtext": [{ "text": message }] });
    format!("tellraw @s {raw}")
}

/// Extract the player name from a `getlocalplayername` reply body.
pub fn local_player_name(body: &Value) -> Option<&str> {
    body.get(LOCAL_PLAYER_NAME_FIELD)
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
}

/// Extract the script name from a `ScriptLoaded` event body.
pub fn script_name(body: &Value) -> Option<&str> {
    body.get("properties")
        .and_then(|p| p.get("ScriptName"))
        .or_else(|| body.get("scriptName"))
        .and_then(Value::as_str)
}

/// The payload's human-readable status line, when it carries one.
pub fn status_message(body: &Value) -> Option<&str> {
    body.get(STATUS_MESSAGE_FIELD).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_frame_shape() {
        let id = RequestId::new();
        let json = serde_json::to_value(Frame::command(id, "list")).unwrap();
        assert_eq!(json["header"]["messagePurpose"], "commandRequest");
        assert_eq!(json["header"]["requestId"], id.to_string());
        assert_eq!(json["header"]["version"], 1);
        assert_eq!(json["body"]["commandLine"], "list");
        assert_eq!(json["body"]["origin"]["type"], "player");
        assert!(json["header"].get("eventName").is_none());
    }

    #[test]
    fn subscribe_frame_shape() {
        let json = serde_json::to_value(Frame::subscribe(RequestId::new(), EVENT_SCRIPT_LOADED)).unwrap();
        assert_eq!(json["header"]["messagePurpose"], "subscribe");
        assert_eq!(json["body"]["eventName"], "ScriptLoaded");
    }

    #[test]
    fn classify_command_response() {
        let id = RequestId::new();
        let raw = format!(
            r#"{{"header":{{"requestId":"{id}","messagePurpose":"commandResponse","version":1}},"body":{{"statusCode":0,"statusMessage":"OK"}}}}"#
        );
        match Frame::parse(&raw).unwrap().classify() {
            Incoming::Reply { request_id, body } => {
                assert_eq!(request_id, id);
                assert_eq!(status_message(&body), Some("OK"));
            }
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[test]
    fn classify_error_frame_is_reply() {
        let id = RequestId::new();
        let raw = format!(
            r#"{{"header":{{"requestId":"{id}","messagePurpose":"error"}},"body":{{"statusCode":-2147483648,"statusMessage":"Syntax error"}}}}"#
        );
        assert!(matches!(Frame::parse(&raw).unwrap().classify(), Incoming::Reply { .. }));
    }

    #[test]
    fn classify_reply_without_valid_id() {
        let raw = r#"{"header":{"requestId":"nope","messagePurpose":"commandResponse"},"body":{}}"#;
        assert_eq!(
            Frame::parse(raw).unwrap().classify(),
            Incoming::Other {
                purpose: "commandResponse".into()
            }
        );
    }

    #[test]
    fn classify_event_from_header_or_body() {
        let header_form = r#"{"header":{"messagePurpose":"event","eventName":"ScriptLoaded"},"body":{"properties":{"ScriptName":"hello.js"}}}"#;
        match Frame::parse(header_form).unwrap().classify() {
            Incoming::Event { name, body } => {
                assert_eq!(name, "ScriptLoaded");
                assert_eq!(script_name(&body), Some("hello.js"));
            }
            other => panic!("expected event, got {other:?}"),
        }

        let body_form = r#"{"header":{"messagePurpose":"event"},"body":{"eventName":"ScriptLoaded","scriptName":"x.js"}}"#;
        match Frame::parse(body_form).unwrap().classify() {
            Incoming::Event { name, body } => {
                assert_eq!(name, "ScriptLoaded");
                assert_eq!(script_name(&body), Some("x.js"));
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn missing_body_defaults_to_null() {
        let frame = Frame::parse(r#"{"header":{"messagePurpose":"subscribe"}}"#).unwrap();
        assert!(frame.body.is_null());
    }

    #[test]
    fn tellraw_escapes_message() {
        let cmd = tellraw_command(r#"say "hi""#);
        assert!(cmd.starts_with("tellraw @s "));
        let raw: Value = serde_json::from_str(cmd.trim_start_matches("tellraw @s ")).unwrap();
        assert_eq!(raw["rawtext"][0]["text"], r#"say "hi""#);
    }

    #[test]
    fn local_player_name_extraction() {
        assert_eq!(local_player_name(&json!({"localplayername": "Steve"})), Some("Steve"));
        assert_eq!(local_player_name(&json!({"localplayername": ""})), None);
        assert_eq!(local_player_name(&json!({})), None);
    }

    #[test]
    fn status_message_only_when_string() {
        assert_eq!(status_message(&json!({"statusMessage": "OK"})), Some("OK"));
        assert_eq!(status_message(&json!({"statusMessage": 3})), None);
        assert_eq!(status_message(&json!({"statusCode": 0})), None);
    }
}
