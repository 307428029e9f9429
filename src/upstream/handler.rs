//! Lifecycle callbacks for upstream subscriptions.
//!
//! The multiplexer pumps every subscription's events into an
//! `UpstreamHandler`. Callbacks run on the subscription's pump task and must
//! not block; hand long work off to another task.

use std::sync::Arc;

use crate::upstream::message::Message;
use crate::upstream::subscription::CloseReason;
use crate::upstream::topic::Topic;

pub trait UpstreamHandler: Send + Sync + 'static {
    fn on_open(&self, _topic: &Topic) {}

    fn on_message(&self, topic: &Topic, message: Message);

    fn on_close(&self, _topic: &Topic, _reason: &CloseReason) {}
}

impl<H: UpstreamHandler + ?Sized> UpstreamHandler for Arc<H> {
    fn on_open(&self, topic: &Topic) {
        (**self).on_open(topic)
    }

    fn on_message(&self, topic: &Topic, message: Message) {
        (**self).on_message(topic, message)
    }

    fn on_close(&self, topic: &Topic, reason: &CloseReason) {
        (**self).on_close(topic, reason)
    }
}
