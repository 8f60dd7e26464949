//! Control Protocol Messages
//!
//! Shapes of the JSON values exchanged with wayvnc over its control socket.
//!
//! - [`Command`]: client → service, `{"method", "id", "params"?}`
//! - [`Reply`]: service → client, `{"id", "code", "data"?}`
//! - [`Event`]: service → client, unsolicited, `{"method", "params"?}`

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Method that attaches the service to a Wayland display
pub const METHOD_ATTACH: &str = "attach";

/// Method that subscribes this client to the event stream
pub const METHOD_EVENT_RECEIVE: &str = "event-receive";

/// Code given to replies whose `code` is not an integer
pub const INVALID_CODE: i64 = -1;

/// A command sent to the service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Command name
    pub method: String,
    /// Correlation id, unique per connection
    pub id: u64,
    /// Optional parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Command {
    /// Params for an `attach` command
    #[must_use]
    pub fn attach_params(display: &str) -> Value {
        json!({ "display": display })
    }
}

/// A reply to a previously sent command
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Id of the command this answers (absent on very old services)
    #[serde(default)]
    pub id: Option<u64>,
    /// Zero on success, an errno-style value otherwise
    pub code: i64,
    /// Optional payload; carries `{"error": "..."}` on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Reply {
    /// Build a reply from any value carrying a `code` key
    ///
    /// Lenient about field types: an `id` that is not an unsigned integer
    /// reads as absent, and a `code` that is not an integer reads as
    /// [`INVALID_CODE`] (a failure), except for numbers equal to zero.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let code = value.get("code").map_or(INVALID_CODE, |code| {
            code.as_i64().unwrap_or_else(|| match code.as_f64() {
                Some(f) if f == 0.0 => 0,
                _ => INVALID_CODE,
            })
        });

        Self {
            id: value.get("id").and_then(Value::as_u64),
            code,
            data: value.get("data").filter(|d| !d.is_null()).cloned(),
        }
    }

    /// Whether the command succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Error text supplied by the service, if any
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.data.as_ref()?.get("error")?.as_str()
    }
}

/// An unsolicited notification from the service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name
    pub method: String,
    /// Optional parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Event {
    /// Interpret the event name and params
    #[must_use]
    pub fn kind(&self) -> EventKind {
        let param = |key: &str| self.params.as_ref().and_then(|p| p.get(key));
        let client = || ClientInfo {
            id: param("id").and_then(Value::as_u64),
            connection_count: param("connection_count").and_then(Value::as_u64),
            hostname: param("hostname").and_then(Value::as_str).map(str::to_string),
            username: param("username").and_then(Value::as_str).map(str::to_string),
        };

        match self.method.as_str() {
            "detached" => EventKind::Detached,
            "capture-changed" => EventKind::CaptureChanged {
                output: param("output-name")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            "client-connected" => EventKind::ClientConnected(client()),
            "client-disconnected" => EventKind::ClientDisconnected(client()),
            other => EventKind::Unknown(other.to_string()),
        }
    }
}

/// VNC client details carried by connect/disconnect events
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientInfo {
    /// Service-assigned client id
    pub id: Option<u64>,
    /// Number of connected VNC clients after this change
    pub connection_count: Option<u64>,
    /// Remote host name or address
    pub hostname: Option<String>,
    /// Authenticated user name
    pub username: Option<String>,
}

/// Known event types
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// The service lost its Wayland display
    Detached,
    /// The captured output changed
    CaptureChanged {
        /// Name of the output now captured
        output: Option<String>,
    },
    /// A VNC client connected
    ClientConnected(ClientInfo),
    /// A VNC client disconnected
    ClientDisconnected(ClientInfo),
    /// Any event this client does not understand
    Unknown(String),
}

/// A decoded message, classified by shape
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Has a `method` key
    Event(Event),
    /// Has a `code` key and no `method` key
    Reply(Reply),
    /// Matches neither shape
    Unrecognized(Value),
}

impl Message {
    /// Classify a raw JSON value by which keys it has
    ///
    /// A `method` key always wins, so a value carrying both `method` and
    /// `code` is an event. Field types are not checked here: a reply with a
    /// malformed `code` is still a reply (and a failed one).
    #[must_use]
    pub fn classify(value: Value) -> Self {
        if let Some(method) = value.get("method") {
            let method = match method {
                Value::String(name) => name.clone(),
                other => other.to_string(),
            };
            let params = value.get("params").filter(|p| !p.is_null()).cloned();
            Self::Event(Event { method, params })
        } else if value.get("code").is_some() {
            Self::Reply(Reply::from_value(&value))
        } else {
            Self::Unrecognized(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_command_serialization_omits_missing_params() {
        let cmd = Command {
            method: METHOD_EVENT_RECEIVE.to_string(),
            id: 1,
            params: None,
        };
        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            json!({"method": "event-receive", "id": 1})
        );
    }

    #[test]
    fn test_attach_command_shape() {
        let cmd = Command {
            method: METHOD_ATTACH.to_string(),
            id: 0,
            params: Some(Command::attach_params("/run/user/1000/wayland-1")),
        };
        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            json!({"method": "attach", "id": 0, "params": {"display": "/run/user/1000/wayland-1"}})
        );
    }

    #[test]
    fn test_classify_event() {
        let msg = Message::classify(json!({"method": "detached"}));
        assert_eq!(
            msg,
            Message::Event(Event {
                method: "detached".to_string(),
                params: None
            })
        );
    }

    #[test]
    fn test_classify_reply() {
        let msg = Message::classify(json!({"id": 4, "code": 0}));
        assert!(matches!(msg, Message::Reply(Reply { id: Some(4), code: 0, .. })));
    }

    #[test]
    fn test_classify_method_wins_over_code() {
        let msg = Message::classify(json!({"method": "detached", "code": 1}));
        assert!(matches!(msg, Message::Event(_)));
    }

    #[test]
    fn test_classify_unrecognized() {
        assert!(matches!(
            Message::classify(json!({"id": 1})),
            Message::Unrecognized(_)
        ));
        assert!(matches!(
            Message::classify(json!([1, 2, 3])),
            Message::Unrecognized(_)
        ));
    }

    #[test]
    fn test_classify_by_key_presence_not_type() {
        let msg = Message::classify(json!({"id": 0, "code": "0"}));
        assert_eq!(
            msg,
            Message::Reply(Reply {
                id: Some(0),
                code: INVALID_CODE,
                data: None
            })
        );

        let msg = Message::classify(json!({"id": "0", "code": 0}));
        assert!(matches!(msg, Message::Reply(Reply { id: None, code: 0, .. })));

        let msg = Message::classify(json!({"method": 7}));
        assert!(matches!(msg, Message::Event(Event { ref method, .. }) if method == "7"));
    }

    #[test]
    fn test_reply_code_leniency() {
        assert!(Reply::from_value(&json!({"id": 1, "code": 0.0})).is_success());
        assert!(!Reply::from_value(&json!({"id": 1, "code": 1.0})).is_success());
        assert!(!Reply::from_value(&json!({"id": 1, "code": null})).is_success());
        assert!(!Reply::from_value(&json!({"id": 1, "code": "0"})).is_success());
    }

    #[test]
    fn test_reply_error_message() {
        let reply = Reply {
            id: Some(0),
            code: 2,
            data: Some(json!({"error": "Failed to attach"})),
        };
        assert!(!reply.is_success());
        assert_eq!(reply.error_message(), Some("Failed to attach"));
    }

    #[test]
    fn test_event_kinds() {
        let connected = Event {
            method: "client-connected".to_string(),
            params: Some(json!({
                "id": 3,
                "connection_count": 2,
                "hostname": "10.0.0.2",
                "username": null
            })),
        };
        assert_eq!(
            connected.kind(),
            EventKind::ClientConnected(ClientInfo {
                id: Some(3),
                connection_count: Some(2),
                hostname: Some("10.0.0.2".to_string()),
                username: None,
            })
        );

        let capture = Event {
            method: "capture-changed".to_string(),
            params: Some(json!({"output-name": "HDMI-A-1"})),
        };
        assert_eq!(
            capture.kind(),
            EventKind::CaptureChanged {
                output: Some("HDMI-A-1".to_string())
            }
        );

        let unknown = Event {
            method: "output-added".to_string(),
            params: None,
        };
        assert_eq!(unknown.kind(), EventKind::Unknown("output-added".to_string()));
    }
}
