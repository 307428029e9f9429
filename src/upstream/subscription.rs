//! Upstream subscription
//!
//! A `Subscription` owns one outbound websocket connection to
//! `<base>/<topic>[/<instance>]`. Opening it performs the handshake; after
//! that a reader task turns frames into `UpstreamEvent`s:
//!
//! - `Opened` first, exactly once
//! - `Message` for every text or binary frame, in arrival order
//! - `Closed` last, exactly once, after which the stream ends
//!
//! The state machine is `Connecting -> Open -> Closed` and never goes back.
//! A closed subscription is spent; resubscribing means opening a new one.
//!
//! Teardown happens when the upstream closes, when the connection errors, or
//! when the owner calls `close()` or drops the subscription. Ping/pong is
//! answered by tungstenite and never surfaces as an event.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;
use url::Url;

use crate::upstream::message::Message;
use crate::upstream::topic::Topic;
use crate::utils::{RelayError, Result};

type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Teardown requested on this side.
    Local,
    /// The upstream ended the connection, with its close reason if it gave one.
    Remote(Option<String>),
    /// The connection broke.
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    Opened,
    Message(Message),
    Closed(CloseReason),
}

#[derive(Debug)]
pub struct Subscription {
    topic: Topic,
    url: Url,
    state: watch::Receiver<ConnectionState>,
    events: mpsc::UnboundedReceiver<UpstreamEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    reader: JoinHandle<()>,
}

impl Subscription {
    /// Connect to `topic` under the upstream `base` URL.
    ///
    /// Fails with `RelayError::Connection` when the endpoint cannot be
    /// reached or rejects the handshake, and with `InvalidArgument` when the
    /// base URL is not a websocket URL.
    pub async fn open(topic: Topic, base: &Url) -> Result<Self> {
        let url = topic.url(base)?;
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        debug!("Connecting to {url}");
        let (ws_stream, _response) =
            connect_async(url.as_str())
                .await
                .map_err(|source| RelayError::Connection {
                    url: url.to_string(),
                    source,
                })?;

        state_tx.send_replace(ConnectionState::Open);
        info!("Subscribed to {}", topic.resource_path());

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let _ = events_tx.send(UpstreamEvent::Opened);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let reader = tokio::spawn(read_loop(
            ws_stream,
            topic.display_key(),
            events_tx,
            state_tx,
            shutdown_rx,
        ));

        Ok(Self {
            topic,
            url,
            state: state_rx,
            events: events_rx,
            shutdown: Some(shutdown_tx),
            reader,
        })
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Request teardown. A `Closed(Local)` event follows unless the
    /// connection was already closing for another reason.
    pub fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }

    /// Next lifecycle or message event; `None` once `Closed` was yielded.
    pub async fn next_event(&mut self) -> Option<UpstreamEvent> {
        self.events.recv().await
    }

    /// Next message, skipping lifecycle events.
    pub async fn next_message(&mut self) -> Option<Message> {
        while let Some(event) = self.next_event().await {
            if let UpstreamEvent::Message(message) = event {
                return Some(message);
            }
        }
        None
    }

    /// Close the connection and wait for the reader to finish. Returns the
    /// reason the subscription ended with, which is `Local` unless the
    /// upstream got there first.
    pub async fn shutdown(mut self) -> Option<CloseReason> {
        self.close();
        let mut reason = None;
        while let Some(event) = self.events.recv().await {
            if let UpstreamEvent::Closed(r) = event {
                reason = Some(r);
            }
        }
        if let Err(e) = self.reader.await {
            warn!("Reader for {} ended abnormally: {e}", self.topic);
        }
        reason
    }
}

impl Stream for Subscription {
    type Item = UpstreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

async fn read_loop(
    ws_stream: UpstreamStream,
    topic_key: String,
    events: mpsc::UnboundedSender<UpstreamEvent>,
    state: watch::Sender<ConnectionState>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            // Fires on close() and also when the Subscription is dropped.
            _ = &mut shutdown => break CloseReason::Local,
            frame = ws_receiver.next() => match frame {
                Some(Ok(WsMessage::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_owned())
                        .filter(|r| !r.is_empty());
                    break CloseReason::Remote(reason);
                }
                Some(Ok(frame)) => {
                    if let Some(message) = Message::from_frame(&topic_key, frame) {
                        if events.send(UpstreamEvent::Message(message)).is_err() {
                            break CloseReason::Local;
                        }
                    }
                }
                Some(Err(e)) => break CloseReason::Error(e.to_string()),
                None => break CloseReason::Remote(None),
            }
        }
    };

    if reason == CloseReason::Local {
        if let Err(e) = ws_sender.close().await {
            debug!("Close handshake with {topic_key} failed: {e}");
        }
    }

    state.send_replace(ConnectionState::Closed);
    debug!("Subscription {topic_key} closed: {reason:?}");
    let _ = events.send(UpstreamEvent::Closed(reason));
}
