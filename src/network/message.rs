//! Network message types for P2P communication
//!
//! Every frame carries one JSON envelope `{"type": n, "data": ...}`. The two
//! response kinds carry their list as a JSON-encoded string inside `data`;
//! the query kinds carry `null`.

use crate::core::{Block, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Wire discriminants
pub const QUERY_LATEST: u8 = 0;
pub const QUERY_ALL: u8 = 1;
pub const RESPONSE_BLOCKCHAIN: u8 = 2;
pub const QUERY_TRANSACTION_POOL: u8 = 3;
pub const RESPONSE_TRANSACTION_POOL: u8 = 4;

/// Errors decoding or encoding a frame
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("Unknown message type {0}")]
    UnknownType(u64),
    #[error("Message type {0} requires a string payload")]
    MissingPayload(u8),
    #[error("Malformed payload for message type {0}: {1}")]
    Payload(u8, #[source] serde_json::Error),
    #[error("Serialization error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Peer protocol messages
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Ask for the peer's latest block
    QueryLatest,
    /// Ask for the peer's whole chain
    QueryAll,
    /// Blocks: a single tip or a whole chain
    ResponseBlockchain(Vec<Block>),
    /// Ask for the peer's pending transactions
    QueryTransactionPool,
    /// Pending transactions
    ResponseTransactionPool(Vec<Transaction>),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: u64,
    #[serde(default)]
    data: Value,
}

impl Message {
    /// Wire discriminant
    pub fn kind(&self) -> u8 {
        match self {
            Message::QueryLatest => QUERY_LATEST,
            Message::QueryAll => QUERY_ALL,
            Message::ResponseBlockchain(_) => RESPONSE_BLOCKCHAIN,
            Message::QueryTransactionPool => QUERY_TRANSACTION_POOL,
            Message::ResponseTransactionPool(_) => RESPONSE_TRANSACTION_POOL,
        }
    }

    /// Encode as one JSON envelope
    pub fn to_json(&self) -> Result<String, MessageError> {
        let data = match self {
            Message::ResponseBlockchain(blocks) => Value::String(serde_json::to_string(blocks)?),
            Message::ResponseTransactionPool(txs) => Value::String(serde_json::to_string(txs)?),
            _ => Value::Null,
        };
        let envelope = Envelope {
            kind: u64::from(self.kind()),
            data,
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Decode one JSON envelope; unknown discriminants are rejected
    pub fn from_json(text: &str) -> Result<Self, MessageError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(MessageError::Envelope)?;
        let kind = u8::try_from(envelope.kind)
            .map_err(|_| MessageError::UnknownType(envelope.kind))?;

        match kind {
            QUERY_LATEST => Ok(Message::QueryLatest),
            QUERY_ALL => Ok(Message::QueryAll),
            QUERY_TRANSACTION_POOL => Ok(Message::QueryTransactionPool),
            RESPONSE_BLOCKCHAIN => {
                decode_payload(kind, &envelope.data).map(Message::ResponseBlockchain)
            }
            RESPONSE_TRANSACTION_POOL => {
                decode_payload(kind, &envelope.data).map(Message::ResponseTransactionPool)
            }
            _ => Err(MessageError::UnknownType(envelope.kind)),
        }
    }

    /// Get message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::QueryLatest => "QUERY_LATEST",
            Message::QueryAll => "QUERY_ALL",
            Message::ResponseBlockchain(_) => "RESPONSE_BLOCKCHAIN",
            Message::QueryTransactionPool => "QUERY_TRANSACTION_POOL",
            Message::ResponseTransactionPool(_) => "RESPONSE_TRANSACTION_POOL",
        }
    }
}

fn decode_payload<T: for<'de> Deserialize<'de>>(kind: u8, data: &Value) -> Result<T, MessageError> {
    let Value::String(inner) = data else {
        return Err(MessageError::MissingPayload(kind));
    };
    serde_json::from_str(inner).map_err(|e| MessageError::Payload(kind, e))
}
