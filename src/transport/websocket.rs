use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::registry::{Endpoint, Registry};
use crate::utils::{RelayError, Result};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| RelayError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Source of downstream connections. `TcpListener` is the real one.
pub trait Acceptor: Send + 'static {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Acceptor for TcpListener {
    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Bind `addr` and serve downstream clients. Only binding can fail.
pub async fn start_downstream_server(addr: &str, registry: Registry) -> Result<()> {
    let listener = bind(addr).await?;
    serve(listener, registry).await;
    Ok(())
}

/// Accept downstream clients forever. Accept errors are logged and the
/// listener is kept; errors other than a peer aborting mid-handshake
/// (out of file descriptors, mostly) back off briefly first.
pub async fn serve<A: Acceptor>(mut acceptor: A, registry: Registry) {
    if let Ok(local) = acceptor.local_addr() {
        info!("Downstream server listening on ws://{}", local);
    }

    loop {
        match acceptor.accept().await {
            Ok((stream, peer)) => {
                debug!("Accepted downstream connection from {}", peer);
                spawn(handle_connection(stream, registry.clone()));
            }
            Err(e) if is_peer_error(&e) => {
                debug!("Downstream connection dropped before accept: {}", e);
            }
            Err(e) => {
                warn!("Failed to accept downstream connection: {}", e);
                sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

fn is_peer_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}

async fn handle_connection(stream: TcpStream, registry: Registry) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake error: {}", e);
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

    let endpoint = Endpoint::new(tx);
    let endpoint_id = endpoint.id.clone();
    let connected_at = endpoint.connected_at;
    registry.add(endpoint);
    info!("{} connected ({} total)", endpoint_id, registry.len());

    // Relayed frames -> client. A write failure drops the endpoint so the
    // broadcaster stops queuing for it.
    let writer_registry = registry.clone();
    let writer_id = endpoint_id.clone();
    spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = ws_sender.send(frame).await {
                warn!("Failed to send to {}: {}", writer_id, e);
                writer_registry.remove(&writer_id);
                break;
            }
        }
        let _ = ws_sender.close().await;
        debug!("Send loop closed for {}", writer_id);
    });

    while let Some(Ok(frame)) = ws_receiver.next().await {
        match frame {
            WsMessage::Text(text) => info!("received: {}", text.as_str()),
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    // Dropping the registry's sender ends the writer task.
    registry.remove(&endpoint_id);
    let connected_ms = chrono::Utc::now().timestamp_millis() - connected_at;
    info!(
        "{} disconnected after {} ms ({} remaining)",
        endpoint_id,
        connected_ms,
        registry.len()
    );
}
