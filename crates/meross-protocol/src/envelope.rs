//! The `{header, payload}` envelope carried over MQTT and LAN HTTP.
//!
//! Wire shape is fixed by the Meross cloud protocol — field names and
//! casing must match exactly or the broker/device silently drops the
//! message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request/response method carried in `header.method`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    GET,
    SET,
    PUSH,
    GETACK,
    SETACK,
    DELETEACK,
    ERROR,
}

impl Method {
    /// True for methods that represent a successful reply to a call.
    pub fn is_ack(self) -> bool {
        matches!(self, Method::GETACK | Method::SETACK | Method::DELETEACK)
    }
}

/// `{header, payload}` envelope, exactly as specified by §3/§6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub header: Header,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub from: String,
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub method: Method,
    pub namespace: String,
    #[serde(rename = "payloadVersion")]
    pub payload_version: u32,
    pub sign: String,
    pub timestamp: i64,
    #[serde(rename = "triggerSrc")]
    pub trigger_src: String,
    pub uuid: String,
}

impl Header {
    pub const TRIGGER_SRC: &'static str = "Android";
    pub const PAYLOAD_VERSION: u32 = 1;
}
