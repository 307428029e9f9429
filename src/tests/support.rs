//! Shared test fixtures: an in-process upstream feed and small helpers.

use std::future::Future;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::protocol::Message as WsMessage;
use url::Url;

pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}

/// Poll `cond` until it holds, failing the test after five seconds.
pub async fn wait_until<F: FnMut() -> bool>(mut cond: F) {
    within(async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
}

/// A websocket server standing in for the upstream `/subscribe/...` service.
/// Every accepted connection is handed to the test as an `UpstreamPeer`.
pub struct FakeUpstream {
    pub base_url: Url,
    peers: mpsc::UnboundedReceiver<UpstreamPeer>,
}

pub struct UpstreamPeer {
    pub path: String,
    pub query: Option<String>,
    ws: WebSocketStream<TcpStream>,
}

impl FakeUpstream {
    pub async fn start() -> Self {
        Self::start_at("127.0.0.1:0").await
    }

    /// Serve on a fixed address, e.g. one a subscriber is already retrying.
    pub async fn start_at(addr: &str) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, peers) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut uri = None;
                    let callback =
                        |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                            uri = Some(req.uri().clone());
                            Ok(resp)
                        };
                    let Ok(ws) = accept_hdr_async(stream, callback).await else {
                        return;
                    };
                    let uri = uri.expect("handshake saw a request");
                    let _ = tx.send(UpstreamPeer {
                        path: uri.path().to_string(),
                        query: uri.query().map(str::to_string),
                        ws,
                    });
                });
            }
        });

        Self {
            base_url: Url::parse(&format!("ws://{addr}/subscribe/")).unwrap(),
            peers,
        }
    }

    /// Wait for the next subscriber to connect.
    pub async fn accept(&mut self) -> UpstreamPeer {
        within(self.peers.recv()).await.expect("fake upstream stopped")
    }
}

impl UpstreamPeer {
    pub async fn send_text(&mut self, text: &str) {
        self.ws.send(WsMessage::text(text.to_string())).await.unwrap();
    }

    pub async fn send_binary(&mut self, data: &[u8]) {
        self.ws.send(WsMessage::binary(data.to_vec())).await.unwrap();
    }

    /// Close from the upstream side and wait for the peer to acknowledge.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
        while let Some(Ok(_)) = self.ws.next().await {}
    }

    /// Next frame from the subscriber; `None` once the connection is gone.
    pub async fn next_frame(&mut self) -> Option<WsMessage> {
        match within(self.ws.next()).await {
            Some(Ok(frame)) => Some(frame),
            _ => None,
        }
    }
}

/// A base URL nothing is listening on.
pub async fn unreachable_base_url() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    Url::parse(&format!("ws://{addr}/subscribe/")).unwrap()
}
