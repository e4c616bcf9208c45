//! Normalises inbound payload representations into text.

use std::borrow::Cow;

use bytes::Bytes;
use tokio_tungstenite::tungstenite::Message;

/// A payload as handed over by the transport.
///
/// Every variant converts to text without failing: binary forms are decoded
/// as UTF-8 with invalid sequences replaced, and anything outside the data
/// frame kinds falls back to the transport's own string rendering. Whether
/// the text is a valid message is for the protocol layer to decide.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Reference-counted byte buffer (binary WebSocket frame).
    Bytes(Bytes),
    /// Fixed-size binary buffer.
    Fixed(Box<[u8]>),
    /// Growable byte array.
    Growable(Vec<u8>),
    /// Already-decoded text frame.
    Text(String),
    /// Any other transport message (control frames, raw frames).
    Other(Message),
}

impl Payload {
    /// Decode the payload to UTF-8 text.
    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            Payload::Bytes(b) => String::from_utf8_lossy(b),
            Payload::Fixed(b) => String::from_utf8_lossy(b),
            Payload::Growable(b) => String::from_utf8_lossy(b),
            Payload::Text(s) => Cow::Borrowed(s),
            Payload::Other(msg) => Cow::Owned(msg.to_string()),
        }
    }

    /// Decode the payload to an owned string.
    pub fn into_text(self) -> String {
        match self {
            Payload::Growable(b) => match String::from_utf8(b) {
                Ok(s) => s,
                Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
            },
            Payload::Text(s) => s,
            other => other.to_text().into_owned(),
        }
    }
}

impl From<Message> for Payload {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(text) => Payload::Text(text.as_str().to_owned()),
            Message::Binary(data) => Payload::Bytes(data),
            other => Payload::Other(other),
        }
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Payload::Bytes(b)
    }
}

impl From<Box<[u8]>> for Payload {
    fn from(b: Box<[u8]>) -> Self {
        Payload::Fixed(b)
    }
}

impl<const N: usize> From<[u8; N]> for Payload {
    fn from(b: [u8; N]) -> Self {
        Payload::Fixed(Box::new(b))
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self {
        Payload::Growable(b)
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_owned())
    }
}
