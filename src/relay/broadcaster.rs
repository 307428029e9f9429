//! Relay broadcaster
//!
//! Fans every upstream message out to the endpoints in the downstream
//! registry. Delivery is best effort: the frame is built once, queued on each
//! endpoint's channel, and an endpoint whose channel is closed is evicted
//! without affecting the rest. Nothing is raised to the caller; the outcome
//! comes back as a `DeliveryReport` and goes to the log.
//!
//! Ordering: each endpoint drains its own FIFO channel, and each subscription
//! is pumped by a single task, so messages from one subscription reach a
//! given endpoint in arrival order. No order is promised across endpoints.

use tracing::{debug, info, warn};

use crate::registry::{EndpointId, Registry};
use crate::upstream::{CloseReason, Message, Topic, UpstreamHandler};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Endpoints that refused the frame and were evicted.
    pub failed: Vec<EndpointId>,
}

impl DeliveryReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Broadcaster {
    registry: Registry,
}

impl Broadcaster {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Deliver `message` unmodified to every endpoint registered right now.
    pub fn on_upstream_message(&self, message: &Message) -> DeliveryReport {
        let frame = message.to_frame();
        let mut report = DeliveryReport::default();

        self.registry.for_each(|endpoint| match endpoint.send(frame.clone()) {
            Ok(()) => {
                debug!("Relayed {} message to {}", message.topic, endpoint.id);
                report.delivered += 1;
            }
            Err(e) => {
                warn!("{e}, evicting");
                self.registry.remove(&endpoint.id);
                report.failed.push(endpoint.id.clone());
            }
        });

        if report.delivered == 0 && report.failed.is_empty() {
            debug!("No endpoints connected, dropped {} message", message.topic);
        }
        report
    }
}

impl UpstreamHandler for Broadcaster {
    fn on_open(&self, topic: &Topic) {
        info!("Connected to upstream {topic}");
    }

    fn on_message(&self, topic: &Topic, message: Message) {
        debug!("{}: {}", topic.display_key(), message.payload_text());
        self.on_upstream_message(&message);
    }

    fn on_close(&self, topic: &Topic, reason: &CloseReason) {
        match reason {
            CloseReason::Local => info!("Disconnected from upstream {topic}"),
            CloseReason::Remote(Some(why)) => {
                warn!("Upstream {topic} closed the connection: {why}")
            }
            CloseReason::Remote(None) => warn!("Upstream {topic} closed the connection"),
            CloseReason::Error(e) => warn!("Lost connection to upstream {topic}: {e}"),
        }
    }
}
