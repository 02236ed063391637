//! REST API module
//!
//! HTTP control plane for a running node.
//!
//! # Endpoints
//!
//! ## Chain
//! - `GET /blocks` - Full chain
//! - `GET /transaction/{id}` - Confirmed transaction
//! - `GET /unspent-transaction-outputs` - Every unspent output
//! - `GET /my-unspent-transaction-outputs` - Outputs the node wallet owns
//! - `GET /address/{address}` - Unspent outputs of an address
//! - `GET /balance/{address}` - Balance of an address
//!
//! ## Minting
//! - `POST /mint-block` - Mint a block from the pool
//! - `POST /mint-raw-block` - Mint a block with `{data: [tx]}`
//!
//! ## Transactions
//! - `GET /transaction-pool` - Pending transactions
//! - `POST /send-transaction` - `{address, amount, privateKey?}`
//!
//! ## Peers
//! - `GET /peers` - Connected peers
//! - `POST /add-peer` - `{peer: "ws://host:port"}`

pub mod handlers;
pub mod routes;

pub use handlers::ApiState;
pub use routes::create_router;
