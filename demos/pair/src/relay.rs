//! Forwarding relay.
//!
//! Every text frame received on one connection is forwarded to every other
//! open connection. The relay never looks inside the frames; authentication
//! happens end to end between the device and the driver.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

/// A frame and the connection it came from.
type Frame = (u64, String);

pub async fn run(listener: TcpListener) -> anyhow::Result<()> {
    let (broadcast_tx, _) = broadcast::channel::<Frame>(100);
    let next_id = AtomicU64::new(1);
    tracing::info!("Relay listening on ws://{}", listener.local_addr()?);

    loop {
        let (stream, client_addr) = listener.accept().await?;
        let id = next_id.fetch_add(1, Ordering::Relaxed);
        let broadcast_tx = broadcast_tx.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, client_addr, id, broadcast_tx).await {
                tracing::warn!("Connection error from {}: {}", client_addr, e);
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    id: u64,
    broadcast_tx: broadcast::Sender<Frame>,
) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();
    let mut broadcast_rx = broadcast_tx.subscribe();
    tracing::debug!(id, "New connection from {}", addr);

    loop {
        tokio::select! {
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::debug!(id, "WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };
                match msg {
                    Message::Text(text) => {
                        let _ = broadcast_tx.send((id, text.as_str().to_owned()));
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }

            frame = broadcast_rx.recv() => {
                match frame {
                    Ok((from, text)) if from != id => {
                        sink.send(Message::Text(text.into())).await?;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(id, skipped, "Relay fell behind, frames dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::debug!(id, "Connection closed: {}", addr);
    Ok(())
}
