//! Downstream endpoint
//!
//! `Endpoint` models one connected downstream client and holds the sending
//! side of its per-connection channel. The transport drains the channel into
//! the websocket, so frames reach the client in the order they were queued.

use tokio::sync::mpsc::UnboundedSender;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::utils::{RelayError, Result};

pub type EndpointId = String;

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub id: EndpointId,
    pub sender: UnboundedSender<WsMessage>,
    pub connected_at: i64,
}

impl Endpoint {
    /// Create an endpoint with a fresh `endpoint-<uuid>` id.
    pub fn new(sender: UnboundedSender<WsMessage>) -> Self {
        Self {
            id: format!("endpoint-{}", Uuid::new_v4()),
            sender,
            connected_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Queue a frame for this endpoint. Fails once the connection's writer
    /// has gone away.
    pub fn send(&self, frame: WsMessage) -> Result<()> {
        self.sender
            .send(frame)
            .map_err(|_| RelayError::SendFailure {
                endpoint: self.id.clone(),
            })
    }

    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
