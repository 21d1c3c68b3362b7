use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single DAP message: a request, a response, or an event.
///
/// The wire representation is a flat JSON object with a `type` discriminator
/// sitting alongside the rest of the fields, so this is modeled as an
/// internally-tagged enum rather than nesting a separate envelope struct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Request(RequestMessage),
    Response(ResponseMessage),
    Event(EventMessage),
}

impl Message {
    pub fn seq(&self) -> u64 {
        match self {
            Message::Request(r) => r.seq,
            Message::Response(r) => r.seq,
            Message::Event(e) => e.seq,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request(_) => "request",
            Message::Response(_) => "response",
            Message::Event(_) => "event",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestMessage {
    pub seq: u64,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseMessage {
    pub seq: u64,
    pub request_seq: u64,
    pub success: bool,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventMessage {
    pub seq: u64,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}
