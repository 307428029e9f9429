//! The `upstream` module owns the outbound side of the relay: topic
//! addressing, the relayed `Message`, and the websocket `Subscription` that
//! turns an upstream feed into a stream of events.

pub mod handler;
pub mod message;
pub mod subscription;
pub mod topic;

pub use handler::UpstreamHandler;
pub use message::{Message, Payload};
pub use subscription::{CloseReason, ConnectionState, Subscription, UpstreamEvent};
pub use topic::Topic;
