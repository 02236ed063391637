//! WebSocket server and connection handling
//!
//! Accepts inbound peers, dials outbound ones, and runs the same
//! per-connection loop for both once the WebSocket handshake is done.

use crate::network::message::Message;
use crate::network::peer::{PeerError, PeerHandle, PeerManager, PeerState};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Outbound WebSocket stream
pub type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// TCP listener for peer connections
pub struct Server {
    listener: TcpListener,
    port: u16,
}

impl Server {
    /// Bind to a port and create the server
    pub async fn bind(port: u16) -> Result<Self, std::io::Error> {
        let addr = format!("0.0.0.0:{}", port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        log::info!("Peer server listening on ws://0.0.0.0:{}", port);

        Ok(Self { listener, port })
    }

    /// Get the listening port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accept incoming connections
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), std::io::Error> {
        self.listener.accept().await
    }
}

/// Complete the server side of the WebSocket handshake
pub async fn upgrade(stream: TcpStream) -> Result<WebSocketStream<TcpStream>, PeerError> {
    Ok(tokio_tungstenite::accept_async(stream).await?)
}

/// Dial a peer at a `ws://host:port` URL
pub async fn connect_to_peer(url: &str) -> Result<(ClientStream, SocketAddr), PeerError> {
    let (ws, _) = connect_async(url)
        .await
        .map_err(|e| PeerError::ConnectionFailed(format!("{}: {}", url, e)))?;

    let addr = match ws.get_ref() {
        MaybeTlsStream::Plain(stream) => stream.peer_addr()?,
        _ => {
            return Err(PeerError::ConnectionFailed(format!(
                "{}: unsupported transport",
                url
            )))
        }
    };

    Ok((ws, addr))
}

/// Handle a peer connection (both inbound and outbound)
///
/// Decoded messages are forwarded on `message_tx`; malformed frames are
/// logged and dropped without closing the connection.
pub async fn handle_connection<S>(
    ws: WebSocketStream<S>,
    addr: SocketAddr,
    peer_manager: Arc<PeerManager>,
    message_tx: mpsc::Sender<(SocketAddr, Message)>,
    outbound: bool,
) -> Result<(), PeerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut writer, mut reader) = ws.split();

    let (handle, mut rx) = PeerHandle::channel(addr);
    peer_manager.add_peer(handle, outbound).await;

    // Ask for the peer's head and pool before anything else
    for opening in [Message::QueryLatest, Message::QueryTransactionPool] {
        let text = opening.to_json()?;
        if let Err(e) = writer.send(WsMessage::Text(text.into())).await {
            peer_manager.remove_peer(&addr).await;
            return Err(e.into());
        }
    }
    peer_manager.set_state(&addr, PeerState::Open).await;

    // Spawn writer task
    let write_handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match msg.to_json() {
                Ok(text) => text,
                Err(e) => {
                    log::error!("Failed to encode {} for {}: {}", msg.type_name(), addr, e);
                    continue;
                }
            };
            log::debug!("Sending {} to {}", msg.type_name(), addr);
            if writer.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    peer_manager.set_state(&addr, PeerState::Established).await;

    // Read messages
    loop {
        match reader.next().await {
            Some(Ok(WsMessage::Text(text))) => match Message::from_json(text.as_str()) {
                Ok(msg) => {
                    log::debug!("Received {} from {}", msg.type_name(), addr);
                    if message_tx.send((addr, msg)).await.is_err() {
                        break;
                    }
                }
                Err(e) => log::warn!("Dropping malformed frame from {}: {}", addr, e),
            },
            Some(Ok(WsMessage::Close(_))) | None => {
                log::info!("Peer {} disconnected", addr);
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                log::warn!("Error reading from {}: {}", addr, e);
                break;
            }
        }
    }

    // Cleanup
    write_handle.abort();
    peer_manager.set_state(&addr, PeerState::Closed).await;
    peer_manager.remove_peer(&addr).await;

    Ok(())
}
