//! REST API handlers for node operations

use crate::core::{Block, Transaction, UnspentTxOut};
use crate::network::{Node, NodeError};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub node: Arc<Node>,
}

impl ApiState {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize, Deserialize, Debug)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    fn bad_request(e: impl std::fmt::Display) -> (StatusCode, Json<ApiError>) {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                error: e.to_string(),
            }),
        )
    }
}

impl From<NodeError> for (StatusCode, Json<ApiError>) {
    fn from(e: NodeError) -> Self {
        ApiError::bad_request(e)
    }
}

#[derive(Deserialize)]
pub struct MintRawRequest {
    pub data: Option<Vec<Transaction>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTransactionRequest {
    pub address: Option<String>,
    pub amount: Option<u64>,
    pub private_key: Option<String>,
}

#[derive(Deserialize)]
pub struct AddPeerRequest {
    pub peer: String,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UnspentResponse {
    pub unspent_tx_outs: Vec<UnspentTxOut>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: u64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AddressResponse {
    pub address: String,
}

// ============================================================================
// Chain
// ============================================================================

/// GET /blocks - The full chain
pub async fn get_blocks(State(state): State<ApiState>) -> Json<Vec<Block>> {
    Json(state.node.get_blockchain().await)
}

/// GET /transaction/{id} - A confirmed transaction
pub async fn get_transaction(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Transaction> {
    match state.node.find_transaction(&id).await {
        Some(tx) => Ok(Json(tx)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ApiError {
                error: format!("Transaction {} not found", id),
            }),
        )),
    }
}

/// GET /unspent-transaction-outputs
pub async fn get_unspent_tx_outs(State(state): State<ApiState>) -> Json<Vec<UnspentTxOut>> {
    Json(state.node.get_unspent_tx_outs().await)
}

/// GET /my-unspent-transaction-outputs
pub async fn get_my_unspent_tx_outs(State(state): State<ApiState>) -> Json<Vec<UnspentTxOut>> {
    Json(state.node.get_my_unspent_tx_outs().await)
}

/// GET /address/{address} - Unspent outputs owned by an address
pub async fn get_address(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> Json<UnspentResponse> {
    Json(UnspentResponse {
        unspent_tx_outs: state.node.unspent_for_address(&address).await,
    })
}

/// GET /address - The node's own address
pub async fn get_own_address(State(state): State<ApiState>) -> Json<AddressResponse> {
    Json(AddressResponse {
        address: state.node.address(),
    })
}

/// GET /balance/{address}
pub async fn get_balance(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> Json<BalanceResponse> {
    let balance = state.node.get_account_balance(Some(address.as_str())).await;
    Json(BalanceResponse { address, balance })
}

/// GET /balance - The node wallet's balance
pub async fn get_own_balance(State(state): State<ApiState>) -> Json<BalanceResponse> {
    Json(BalanceResponse {
        address: state.node.address(),
        balance: state.node.get_account_balance(None).await,
    })
}

// ============================================================================
// Minting and transactions
// ============================================================================

/// POST /mint-block - Mint a block from the pool
pub async fn mint_block(State(state): State<ApiState>) -> ApiResult<Block> {
    Ok(Json(state.node.generate_next_block().await?))
}

/// POST /mint-raw-block - Mint a block with caller-supplied transactions
pub async fn mint_raw_block(
    State(state): State<ApiState>,
    Json(req): Json<MintRawRequest>,
) -> ApiResult<Block> {
    let data = req
        .data
        .ok_or_else(|| ApiError::bad_request("data parameter is missing"))?;
    Ok(Json(state.node.generate_raw_next_block(data).await?))
}

/// GET /transaction-pool
pub async fn get_transaction_pool(State(state): State<ApiState>) -> Json<Vec<Transaction>> {
    Json(state.node.get_transaction_pool().await)
}

/// POST /send-transaction - Pool a signed transfer
pub async fn send_transaction(
    State(state): State<ApiState>,
    Json(req): Json<SendTransactionRequest>,
) -> ApiResult<Transaction> {
    let (address, amount) = match (req.address, req.amount) {
        (Some(address), Some(amount)) => (address, amount),
        _ => return Err(ApiError::bad_request("invalid address or amount")),
    };

    let tx = state
        .node
        .send_transaction(&address, amount, req.private_key.as_deref())
        .await?;
    Ok(Json(tx))
}

// ============================================================================
// Peers
// ============================================================================

/// GET /peers - Connected peer addresses
pub async fn get_peers(State(state): State<ApiState>) -> Json<Vec<String>> {
    Json(state.node.get_sockets().await)
}

/// POST /add-peer - Dial a peer
pub async fn add_peer(
    State(state): State<ApiState>,
    Json(req): Json<AddPeerRequest>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    state.node.connect_to_peers(&req.peer).await?;
    Ok(StatusCode::OK)
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}
