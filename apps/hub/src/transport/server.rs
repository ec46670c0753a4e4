use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::HubError;
use crate::hub::{ConnectionId, Hub, TransportHandle};

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Accept validator connections until `shutdown` flips to true
pub async fn serve(listener: TcpListener, hub: Arc<Hub>, mut shutdown: watch::Receiver<bool>) -> Result<(), HubError> {
    info!("Accepting validators on {}", listener.local_addr()?);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {e}");
                        continue;
                    }
                };
                let connection = ConnectionId(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed));
                tokio::spawn(handle_connection(stream, peer, connection, hub.clone(), shutdown.clone()));
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Stopped accepting validators");
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    connection: ConnectionId,
    hub: Arc<Hub>,
    mut shutdown: watch::Receiver<bool>,
) {
    let socket = match tokio_tungstenite::accept_async(stream).await {
        Ok(socket) => socket,
        Err(e) => {
            debug!(%peer, "WebSocket handshake failed: {e}");
            return;
        }
    };
    debug!(%peer, %connection, "Validator connected");

    let (mut sink, mut frames) = socket.split();
    let (tx, mut rx) = mpsc::channel(hub.settings().outbound_buffer);
    let transport = TransportHandle::new(connection, tx);

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match vigil::encode(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode outbound message: {e}");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text)).await {
                debug!("Writer stopping: {e}");
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(Message::Text(text))) => hub.dispatch(&transport, &text).await,
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => hub.dispatch(&transport, text).await,
                    Err(_) => debug!(%connection, "Dropping non UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(%connection, "Read error: {e}");
                    break;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    hub.connection_closed(connection).await;
    drop(transport);
    writer.abort();
}
