//! Peer management for P2P networking
//!
//! Tracks the active peer set and routes outbound messages. Every peer has
//! a bounded queue drained by its own writer task; broadcasts never wait on
//! a full queue.

use crate::network::message::{Message, MessageError};
use std::collections::HashMap;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;

/// Outbound messages buffered per peer
pub const PEER_QUEUE_SIZE: usize = 100;

/// Peer connection errors
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Peer disconnected")]
    Disconnected,
    #[error("Outbound queue full")]
    QueueFull,
    #[error("Message error: {0}")]
    Message(#[from] MessageError),
}

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Transport up, handshake not finished
    Connecting,
    /// Handshake done, `QUERY_LATEST` sent
    Open,
    /// Receiving messages
    Established,
    Closed,
}

/// Information about a connected peer
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub addr: SocketAddr,
    pub state: PeerState,
    /// Whether we dialed this peer
    pub outbound: bool,
}

/// Handle for sending messages to a peer
#[derive(Clone, Debug)]
pub struct PeerHandle {
    pub addr: SocketAddr,
    pub tx: mpsc::Sender<Message>,
}

impl PeerHandle {
    /// A handle and the receiving end its writer task drains
    pub fn channel(addr: SocketAddr) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(PEER_QUEUE_SIZE);
        (Self { addr, tx }, rx)
    }

    /// Queue a message without waiting
    pub fn try_send(&self, msg: Message) -> Result<(), PeerError> {
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => PeerError::QueueFull,
            TrySendError::Closed(_) => PeerError::Disconnected,
        })
    }
}

/// Manages all peer connections
#[derive(Default)]
pub struct PeerManager {
    /// Connected peers info
    peers: RwLock<HashMap<SocketAddr, PeerInfo>>,
    /// Peer message senders
    handles: RwLock<HashMap<SocketAddr, PeerHandle>>,
}

impl PeerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new peer
    pub async fn add_peer(&self, handle: PeerHandle, outbound: bool) {
        let addr = handle.addr;
        self.peers.write().await.insert(
            addr,
            PeerInfo {
                addr,
                state: PeerState::Connecting,
                outbound,
            },
        );
        self.handles.write().await.insert(addr, handle);

        log::info!("Added peer: {} (outbound: {})", addr, outbound);
    }

    /// Move a peer to `state`
    pub async fn set_state(&self, addr: &SocketAddr, state: PeerState) {
        if let Some(peer) = self.peers.write().await.get_mut(addr) {
            log::debug!("Peer {}: {:?} -> {:?}", addr, peer.state, state);
            peer.state = state;
        }
    }

    /// Remove a peer
    pub async fn remove_peer(&self, addr: &SocketAddr) {
        self.peers.write().await.remove(addr);
        self.handles.write().await.remove(addr);

        log::info!("Removed peer: {}", addr);
    }

    /// Get all connected peer addresses
    pub async fn get_peers(&self) -> Vec<SocketAddr> {
        let mut addrs: Vec<SocketAddr> = self.peers.read().await.keys().cloned().collect();
        addrs.sort();
        addrs
    }

    /// Get peer info
    pub async fn get_peer_info(&self, addr: &SocketAddr) -> Option<PeerInfo> {
        self.peers.read().await.get(addr).cloned()
    }

    /// Get peer count
    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Queue `msg` for every peer.
    ///
    /// A full or closed queue only loses this message for that peer.
    pub async fn broadcast(&self, msg: Message) {
        let handles = self.handles.read().await;
        for (addr, handle) in handles.iter() {
            if let Err(e) = handle.try_send(msg.clone()) {
                log::warn!("Failed to send {} to {}: {}", msg.type_name(), addr, e);
            }
        }
    }

    /// Queue a message for one peer without waiting
    pub async fn send_to(&self, addr: &SocketAddr, msg: Message) -> Result<(), PeerError> {
        match self.handles.read().await.get(addr) {
            Some(handle) => handle.try_send(msg),
            None => Err(PeerError::Disconnected),
        }
    }
}
