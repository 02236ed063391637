//! Block minting and transaction pooling

pub mod mempool;
pub mod minter;

pub use mempool::{Mempool, MempoolError};
pub use minter::{Clock, ManualClock, Minter, Payload, SystemClock};
