//! Bridge wire protocol types.
//!
//! The bridge speaks line-delimited JSON, one object per line, in both
//! directions. Outbound lines are commands tagged with a fresh request id;
//! inbound lines are either correlated responses (carrying `request_id`) or
//! unsolicited events (carrying `event`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An outbound command envelope.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Correlation token, unique per request.
    pub request_id: Uuid,
    /// Command name.
    pub command: String,
    /// Command parameters.
    pub params: serde_json::Value,
}

impl Request {
    /// Create a request with a freshly generated correlation id.
    pub fn new(command: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            command: command.into(),
            params,
        }
    }
}

/// An inbound line, demultiplexed by shape: responses carry `request_id`,
/// events carry `event`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Inbound {
    Response(Response),
    Event(InboundEvent),
}

/// A correlated response to an outbound request.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    pub request_id: Uuid,
    pub success: bool,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// An unsolicited event from the bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEvent {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl InboundEvent {
    /// Event emitted locally when the bridge channel terminates.
    pub const DISCONNECTED: &'static str = "disconnected";

    /// Synthesize the terminal disconnect event.
    pub fn disconnected() -> Self {
        Self {
            event: Self::DISCONNECTED.to_string(),
            data: serde_json::Value::Null,
        }
    }
}

/// A message as reported by the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// Sender address.
    pub from: String,
    pub chat_id: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_group: bool,
    /// Author within a group chat, when distinct from the chat address.
    #[serde(default)]
    pub author: Option<String>,
    /// True when the account itself sent this message.
    #[serde(default, rename = "fromMe")]
    pub from_me: bool,
}

/// A chat as reported by the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub name: String,
    pub is_group: bool,
    #[serde(default)]
    pub last_message_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: u32,
}

/// A contact as reported by the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub phone_number: String,
    pub name: String,
    #[serde(default)]
    pub is_business: bool,
    #[serde(default)]
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_and_event_shapes_demultiplex() {
        let line = r#"{"request_id":"7f1d5fb2-34a1-4f5e-bc9a-111111111111","success":true,"data":{"ok":1}}"#;
        match serde_json::from_str::<Inbound>(line).unwrap() {
            Inbound::Response(r) => {
                assert!(r.success);
                assert_eq!(r.data.unwrap()["ok"], 1);
            }
            Inbound::Event(_) => panic!("parsed response as event"),
        }

        let line = r#"{"event":"message_received","data":{"body":"hi"}}"#;
        match serde_json::from_str::<Inbound>(line).unwrap() {
            Inbound::Event(e) => {
                assert_eq!(e.event, "message_received");
                assert_eq!(e.data["body"], "hi");
            }
            Inbound::Response(_) => panic!("parsed event as response"),
        }
    }

    #[test]
    fn error_response_field_order_is_irrelevant() {
        let line = r#"{"success":false,"request_id":"7f1d5fb2-34a1-4f5e-bc9a-111111111111","error":"no such chat"}"#;
        match serde_json::from_str::<Inbound>(line).unwrap() {
            Inbound::Response(r) => {
                assert!(!r.success);
                assert_eq!(r.error.as_deref(), Some("no such chat"));
            }
            Inbound::Event(_) => panic!("parsed response as event"),
        }
    }

    #[test]
    fn message_accepts_bridge_field_names() {
        let raw = r#"{
            "id": "m1",
            "from": "15550001111",
            "chat_id": "15550001111@c.us",
            "body": "hello",
            "timestamp": "2026-03-01T09:00:00Z",
            "fromMe": true
        }"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert!(msg.from_me);
        assert!(!msg.is_group);
        assert_eq!(msg.author, None);
    }
}
