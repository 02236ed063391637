//! P2P Networking module
//!
//! Peers speak a five-message JSON protocol over WebSocket text frames.
//!
//! # Features
//! - Inbound and outbound WebSocket connections
//! - Head and pool gossip
//! - Chain catch-up and heaviest-chain replacement

pub mod message;
pub mod node;
pub mod peer;
pub mod server;
pub mod sync;

pub use message::{
    Message, MessageError, QUERY_ALL, QUERY_LATEST, QUERY_TRANSACTION_POOL, RESPONSE_BLOCKCHAIN,
    RESPONSE_TRANSACTION_POOL,
};
pub use node::{Node, NodeConfig, NodeError};
pub use peer::{PeerError, PeerHandle, PeerInfo, PeerManager, PeerState, PEER_QUEUE_SIZE};
pub use server::{connect_to_peer, handle_connection, upgrade, Server};
pub use sync::{plan_blockchain_response, ChainAction, ChainSync, SyncOutcome};
