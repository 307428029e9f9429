//! Relayed message
//!
//! `Message` is what an upstream subscription yields and what the
//! broadcaster fans out. The payload is opaque: text frames stay text,
//! binary frames stay binary, nothing is re-encoded.
//!
//! Notes on fields:
//! - `topic`: display key of the topic the frame arrived on
//! - `payload`: the frame body, untouched
//! - `received_at`: milliseconds since UNIX epoch, stamped on arrival

use tungstenite::protocol::Message as WsMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Payload,
    pub received_at: i64,
}

impl Message {
    pub fn text(topic: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(topic, Payload::Text(text.into()))
    }

    pub fn binary(topic: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self::new(topic, Payload::Binary(data.into()))
    }

    fn new(topic: impl Into<String>, payload: Payload) -> Self {
        Self {
            topic: topic.into(),
            payload,
            received_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Converts an upstream frame. Control frames carry no payload and
    /// yield `None`.
    pub fn from_frame(topic: &str, frame: WsMessage) -> Option<Self> {
        match frame {
            WsMessage::Text(text) => Some(Self::text(topic, text.as_str())),
            WsMessage::Binary(data) => Some(Self::binary(topic, data.to_vec())),
            _ => None,
        }
    }

    /// The frame sent downstream, identical in kind and body to the one
    /// received.
    pub fn to_frame(&self) -> WsMessage {
        match &self.payload {
            Payload::Text(text) => WsMessage::text(text.clone()),
            Payload::Binary(data) => WsMessage::binary(data.clone()),
        }
    }

    /// Lossy text view used for logs and console output.
    pub fn payload_text(&self) -> std::borrow::Cow<'_, str> {
        match &self.payload {
            Payload::Text(text) => std::borrow::Cow::Borrowed(text),
            Payload::Binary(data) => String::from_utf8_lossy(data),
        }
    }
}
