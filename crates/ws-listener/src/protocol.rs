//! JSON message envelope exchanged with the event server.
//!
//! ## Wire Format
//!
//! UTF-8 text frames carrying one JSON object each:
//!
//! ```text
//! {"type": string, "message": string, "client"?: string, "data"?: any}
//! ```
//!
//! | Direction | type   | message                | client   |
//! |-----------|--------|------------------------|----------|
//! | S→C       | `ping` | `hey are u there`      |          |
//! | C→S       | `pong` | `yes i am here solana` | `solana` |
//! | C→S       | `data` | free text              |          |
//!
//! The ping/pong phrases are fixed by the server and matched exactly.

use serde::{Deserialize, Serialize};

use crate::Error;

pub const SIGNAL_TYPE: &str = "ping";
pub const SIGNAL_PHRASE: &str = "hey are u there";
pub const ACK_TYPE: &str = "pong";
pub const ACK_PHRASE: &str = "yes i am here solana";
pub const CLIENT_ID: &str = "solana";
pub const DATA_TYPE: &str = "data";

/// One application-level message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ProtocolMessage {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            client: None,
            data: None,
        }
    }

    /// The server's "are you there" signal.
    pub fn signal() -> Self {
        Self::new(SIGNAL_TYPE, SIGNAL_PHRASE)
    }

    /// The reply the server expects to a [`signal`](Self::signal).
    pub fn acknowledgment() -> Self {
        Self {
            client: Some(CLIENT_ID.to_string()),
            ..Self::new(ACK_TYPE, ACK_PHRASE)
        }
    }

    /// A `data` envelope carrying an arbitrary JSON payload.
    pub fn data(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Self::new(DATA_TYPE, message)
        }
    }

    /// `true` only for the exact signal type and phrase.
    pub fn is_signal(&self) -> bool {
        self.kind == SIGNAL_TYPE && self.message == SIGNAL_PHRASE
    }
}

/// Parse one text frame. Fails on invalid JSON or a missing `type`/`message`.
pub fn decode(text: &str) -> Result<ProtocolMessage, Error> {
    serde_json::from_str(text).map_err(Error::Decode)
}

/// Serialise a message. Field order is fixed and absent optionals are omitted.
pub fn encode(msg: &ProtocolMessage) -> Result<String, Error> {
    serde_json::to_string(msg).map_err(Error::Encode)
}
