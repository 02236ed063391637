//! Chain synchronization with peers
//!
//! Decides what to do with blocks and transactions a peer sends, then does
//! it through the ledger. Decisions are made under the write lock so two
//! peers cannot both act on the same stale head.

use crate::core::{Block, Ledger, Transaction};
use crate::network::message::Message;
use crate::network::peer::PeerManager;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// What a `RESPONSE_BLOCKCHAIN` calls for, given our head
#[derive(Debug, Clone, PartialEq)]
pub enum ChainAction {
    /// Nothing to do, with the reason
    Ignore(String),
    /// The peer's tip directly extends our head
    Append(Block),
    /// The peer is ahead but only sent its tip
    QueryAll,
    /// The peer sent a whole chain that may replace ours
    Replace(Vec<Block>),
}

/// What handling a `RESPONSE_BLOCKCHAIN` did
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Ignored,
    Appended(u64),
    RequestedFullChain,
    Replaced(u64),
    Rejected(String),
}

/// Choose the action for `blocks` received while our head is `local`
pub fn plan_blockchain_response(blocks: Vec<Block>, local: &Block) -> ChainAction {
    let Some(received) = blocks.last() else {
        return ChainAction::Ignore("empty block list".to_string());
    };

    if let Err(e) = received.validate_structure() {
        return ChainAction::Ignore(format!("malformed tip: {}", e));
    }

    if received.index <= local.index {
        return ChainAction::Ignore(format!(
            "received tip {} is not ahead of local {}",
            received.index, local.index
        ));
    }

    if received.prev_hash == local.hash {
        let mut blocks = blocks;
        return match blocks.pop() {
            Some(block) => ChainAction::Append(block),
            None => ChainAction::Ignore("empty block list".to_string()),
        };
    }

    if blocks.len() == 1 {
        ChainAction::QueryAll
    } else {
        ChainAction::Replace(blocks)
    }
}

/// Chain synchronization manager
pub struct ChainSync {
    ledger: Arc<RwLock<Ledger>>,
    peer_manager: Arc<PeerManager>,
}

impl ChainSync {
    pub fn new(ledger: Arc<RwLock<Ledger>>, peer_manager: Arc<PeerManager>) -> Self {
        Self {
            ledger,
            peer_manager,
        }
    }

    /// `RESPONSE_BLOCKCHAIN` carrying just our latest block
    pub async fn latest_message(&self) -> Message {
        let ledger = self.ledger.read().await;
        Message::ResponseBlockchain(vec![ledger.latest().clone()])
    }

    /// `RESPONSE_BLOCKCHAIN` carrying our whole chain
    pub async fn chain_message(&self) -> Message {
        Message::ResponseBlockchain(self.ledger.read().await.blocks_snapshot())
    }

    /// `RESPONSE_TRANSACTION_POOL` carrying our pool
    pub async fn pool_message(&self) -> Message {
        Message::ResponseTransactionPool(self.ledger.read().await.pool_snapshot())
    }

    /// Handle blocks sent by `from`
    pub async fn handle_blockchain_response(
        &self,
        blocks: Vec<Block>,
        from: SocketAddr,
    ) -> SyncOutcome {
        let outcome = {
            let mut ledger = self.ledger.write().await;
            match plan_blockchain_response(blocks, ledger.latest()) {
                ChainAction::Ignore(reason) => {
                    log::debug!("Ignoring blocks from {}: {}", from, reason);
                    SyncOutcome::Ignored
                }
                ChainAction::Append(block) => {
                    let index = block.index;
                    match ledger.append_block(block) {
                        Ok(()) => SyncOutcome::Appended(index),
                        Err(e) => {
                            log::warn!("Rejected block {} from {}: {}", index, from, e);
                            SyncOutcome::Rejected(e.to_string())
                        }
                    }
                }
                ChainAction::QueryAll => SyncOutcome::RequestedFullChain,
                ChainAction::Replace(candidate) => match ledger.replace_chain(candidate) {
                    Ok(()) => SyncOutcome::Replaced(ledger.chain().height()),
                    Err(e) => {
                        log::info!("Chain from {} not adopted: {}", from, e);
                        SyncOutcome::Rejected(e.to_string())
                    }
                },
            }
        };

        match outcome {
            SyncOutcome::Appended(_) | SyncOutcome::Replaced(_) => {
                let latest = self.latest_message().await;
                self.peer_manager.broadcast(latest).await;
            }
            SyncOutcome::RequestedFullChain => {
                log::info!("Peer {} is ahead, requesting its full chain", from);
                if let Err(e) = self.peer_manager.send_to(&from, Message::QueryAll).await {
                    log::warn!("Failed to query chain from {}: {}", from, e);
                }
            }
            SyncOutcome::Ignored | SyncOutcome::Rejected(_) => {}
        }

        outcome
    }

    /// Pool every valid transaction sent by `from`.
    ///
    /// Returns how many were added; the pool is rebroadcast if any were.
    pub async fn handle_pool_response(&self, txs: Vec<Transaction>, from: SocketAddr) -> usize {
        let added = {
            let mut ledger = self.ledger.write().await;
            let mut added = 0;
            for tx in txs {
                let id = tx.id.clone();
                match ledger.add_transaction(tx) {
                    Ok(()) => added += 1,
                    Err(e) => log::debug!("Transaction {} from {} not pooled: {}", id, from, e),
                }
            }
            added
        };

        if added > 0 {
            log::info!("Pooled {} transaction(s) from {}", added, from);
            let pool = self.pool_message().await;
            self.peer_manager.broadcast(pool).await;
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{sign_tx_in, ConsensusParams, TxIn, TxOut};
    use crate::crypto::KeyPair;
    use crate::network::peer::PeerHandle;

    fn unchecked_ledger() -> Ledger {
        Ledger::new(ConsensusParams {
            verify_minting: false,
        })
    }

    /// Extend `ledger` by `count` blocks at `difficulty`
    fn grow(ledger: &mut Ledger, minter: &str, count: u64, difficulty: u32) {
        for _ in 0..count {
            let mut template = ledger.block_template(minter, vec![]);
            template.difficulty = difficulty;
            let ts = ledger.latest().timestamp + 10;
            ledger.append_block(template.at(ts)).unwrap();
        }
    }

    fn peer_addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 6002))
    }

    #[test]
    fn test_plan_ignores_empty_and_stale() {
        let genesis = Block::genesis();
        assert!(matches!(
            plan_blockchain_response(vec![], &genesis),
            ChainAction::Ignore(_)
        ));
        assert!(matches!(
            plan_blockchain_response(vec![genesis.clone()], &genesis),
            ChainAction::Ignore(_)
        ));
    }

    #[test]
    fn test_plan_ignores_malformed_tip() {
        let mut ledger = unchecked_ledger();
        grow(&mut ledger, "a", 1, 0);
        let mut tip = ledger.latest().clone();
        tip.transactions.clear();

        assert!(matches!(
            plan_blockchain_response(vec![tip], &Block::genesis()),
            ChainAction::Ignore(_)
        ));
    }

    #[test]
    fn test_plan_appends_direct_extension() {
        let mut ledger = unchecked_ledger();
        grow(&mut ledger, "a", 1, 0);
        let tip = ledger.latest().clone();

        assert_eq!(
            plan_blockchain_response(vec![tip.clone()], &Block::genesis()),
            ChainAction::Append(tip)
        );
    }

    #[test]
    fn test_plan_queries_all_for_unlinked_tip() {
        // local at length 5, peer's tip at index 6 that does not link
        let mut local = unchecked_ledger();
        grow(&mut local, "local", 4, 0);
        let mut remote = unchecked_ledger();
        grow(&mut remote, "remote", 6, 0);

        let tip = remote.latest().clone();
        assert_eq!(tip.index, 6);
        assert_eq!(
            plan_blockchain_response(vec![tip], local.latest()),
            ChainAction::QueryAll
        );
    }

    #[test]
    fn test_plan_replaces_with_full_chain() {
        let mut remote = unchecked_ledger();
        grow(&mut remote, "remote", 3, 0);
        let mut local = unchecked_ledger();
        grow(&mut local, "local", 1, 0);

        let blocks = remote.blocks_snapshot();
        assert_eq!(
            plan_blockchain_response(blocks.clone(), local.latest()),
            ChainAction::Replace(blocks)
        );
    }

    #[tokio::test]
    async fn test_unlinked_tip_sends_query_all_to_origin() {
        let mut local = unchecked_ledger();
        grow(&mut local, "local", 4, 0);
        let mut remote = unchecked_ledger();
        grow(&mut remote, "remote", 6, 0);

        let peers = Arc::new(PeerManager::new());
        let (handle, mut rx) = PeerHandle::channel(peer_addr());
        peers.add_peer(handle, false).await;

        let ledger = Arc::new(RwLock::new(local));
        let sync = ChainSync::new(ledger.clone(), peers);
        let outcome = sync
            .handle_blockchain_response(vec![remote.latest().clone()], peer_addr())
            .await;

        assert_eq!(outcome, SyncOutcome::RequestedFullChain);
        assert_eq!(rx.recv().await, Some(Message::QueryAll));
        assert_eq!(ledger.read().await.chain().height(), 4);
    }

    #[tokio::test]
    async fn test_heavier_chain_adopted_and_announced() {
        let mut remote = unchecked_ledger();
        grow(&mut remote, "remote", 3, 2);
        let mut local = unchecked_ledger();
        grow(&mut local, "local", 1, 0);

        let peers = Arc::new(PeerManager::new());
        let (handle, mut rx) = PeerHandle::channel(peer_addr());
        peers.add_peer(handle, false).await;

        let ledger = Arc::new(RwLock::new(local));
        let sync = ChainSync::new(ledger.clone(), peers);
        let outcome = sync
            .handle_blockchain_response(remote.blocks_snapshot(), peer_addr())
            .await;

        assert_eq!(outcome, SyncOutcome::Replaced(3));
        assert_eq!(
            rx.recv().await,
            Some(Message::ResponseBlockchain(vec![remote.latest().clone()]))
        );
        assert_eq!(ledger.read().await.latest(), remote.latest());
    }

    #[tokio::test]
    async fn test_lighter_chain_rejected() {
        let mut remote = unchecked_ledger();
        grow(&mut remote, "remote", 6, 0);
        let mut local = unchecked_ledger();
        grow(&mut local, "local", 4, 3);
        let head = local.latest().clone();

        let ledger = Arc::new(RwLock::new(local));
        let sync = ChainSync::new(ledger.clone(), Arc::new(PeerManager::new()));
        let outcome = sync
            .handle_blockchain_response(remote.blocks_snapshot(), peer_addr())
            .await;

        assert!(matches!(outcome, SyncOutcome::Rejected(_)));
        assert_eq!(ledger.read().await.latest(), &head);
    }

    #[tokio::test]
    async fn test_pool_response_keeps_going_after_failures() {
        let alice = KeyPair::generate();
        let mut state = unchecked_ledger();
        grow(&mut state, &alice.address(), 1, 0);
        let reward = state.latest().transactions[0].clone();

        let mut valid = Transaction::new(
            vec![TxIn {
                tx_out_id: reward.id.clone(),
                tx_out_index: 0,
                signature: String::new(),
            }],
            vec![TxOut {
                address: "bob".to_string(),
                amount: 50,
            }],
        );
        valid.tx_ins[0].signature = sign_tx_in(&valid, 0, &alice, state.utxo_set()).unwrap();

        let peers = Arc::new(PeerManager::new());
        let (handle, mut rx) = PeerHandle::channel(peer_addr());
        peers.add_peer(handle, false).await;

        let ledger = Arc::new(RwLock::new(state));
        let sync = ChainSync::new(ledger.clone(), peers);

        // the first spends nothing that exists
        let txs = vec![Transaction::coinbase("a", 7), valid.clone()];
        assert_eq!(sync.handle_pool_response(txs, peer_addr()).await, 1);
        assert_eq!(ledger.read().await.pool_snapshot(), vec![valid.clone()]);
        assert_eq!(
            rx.recv().await,
            Some(Message::ResponseTransactionPool(vec![valid]))
        );
    }
}
