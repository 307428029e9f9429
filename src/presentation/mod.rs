//! Presentation hooks
//!
//! Rendering is not the relay's business. Anything that shows subscription
//! activity to a person implements `Presenter`, which receives two kinds of
//! line: `status` for lifecycle changes and `content` for each payload,
//! both optionally tagged with the topic's display key.
//! `PresenterHandler` adapts a presenter to the multiplexer's callbacks.

use std::io::Write;
use std::sync::Mutex;

use crate::upstream::{CloseReason, Message, Topic, UpstreamHandler};

pub trait Presenter: Send + Sync + 'static {
    fn status(&self, message: &str, topic_key: Option<&str>);

    fn content(&self, message: &str, topic_key: Option<&str>);
}

#[derive(Debug)]
pub struct PresenterHandler<P> {
    presenter: P,
}

impl<P: Presenter> PresenterHandler<P> {
    pub fn new(presenter: P) -> Self {
        Self { presenter }
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }
}

impl<P: Presenter> UpstreamHandler for PresenterHandler<P> {
    fn on_open(&self, topic: &Topic) {
        self.presenter.status(
            &format!("Subscribed to {}", topic.resource_path()),
            Some(&topic.display_key()),
        );
    }

    fn on_message(&self, topic: &Topic, message: Message) {
        self.presenter
            .content(&message.payload_text(), Some(&topic.display_key()));
    }

    fn on_close(&self, topic: &Topic, reason: &CloseReason) {
        let line = match reason {
            CloseReason::Error(e) => {
                format!("Connection to {} closed: {e}", topic.resource_path())
            }
            _ => format!("Connection to {} closed.", topic.resource_path()),
        };
        self.presenter.status(&line, None);
    }
}

/// Writes status and content lines to a terminal or any other writer.
///
/// Status lines are indented; lines tagged with a topic key are prefixed
/// with it in brackets.
#[derive(Debug)]
pub struct ConsolePresenter<W = std::io::Stdout> {
    out: Mutex<W>,
}

impl ConsolePresenter {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send + 'static> ConsolePresenter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_line(&self, line: &str) {
        let mut out = self
            .out
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // a closed stdout is not worth failing a subscription over
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }
}

impl<W: Write + Send + 'static> Presenter for ConsolePresenter<W> {
    fn status(&self, message: &str, topic_key: Option<&str>) {
        self.write_line(&format!("    {}", tagged(message, topic_key)));
    }

    fn content(&self, message: &str, topic_key: Option<&str>) {
        self.write_line(&tagged(message, topic_key));
    }
}

fn tagged(message: &str, topic_key: Option<&str>) -> String {
    match topic_key {
        Some(key) => format!("[{key}] {message}"),
        None => message.to_string(),
    }
}
