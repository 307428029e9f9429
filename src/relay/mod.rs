//! The `relay` module forwards upstream messages to downstream clients.
//!
//! `Broadcaster` is the only public type worth knowing: it is the
//! `UpstreamHandler` the relay binary hands to the multiplexer.

pub mod broadcaster;

pub use broadcaster::{Broadcaster, DeliveryReport};
