//! Stake-weighted block minting
//!
//! Minting is not proof of work: for a fixed head and minter the only
//! thing that changes the outcome is the timestamp. The minter wakes on a
//! timer, reads the clock, and runs the eligibility test once for every
//! second it has not tried yet.

use crate::core::block::Block;
use crate::core::blockchain::BlockchainError;
use crate::core::consensus::{current_timestamp, is_eligible};
use crate::core::ledger::{BlockTemplate, Ledger};
use crate::core::transaction::Transaction;
use log::info;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;

/// Default wake-up period; shorter than a second so no second is skipped
pub const DEFAULT_TICK: Duration = Duration::from_millis(250);

/// Source of block timestamps
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch
    fn now(&self) -> u64;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        current_timestamp()
    }
}

/// A clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Which transactions follow the coinbase in minted blocks
#[derive(Debug, Clone)]
pub enum Payload {
    /// Whatever is pooled when the attempt is made
    Pool,
    /// A fixed list supplied by the caller
    Raw(Vec<Transaction>),
}

/// Minter for creating new blocks
pub struct Minter {
    /// Receives the coinbase reward and stakes its balance
    address: String,
    clock: Arc<dyn Clock>,
    tick: Duration,
    /// Eligibility tests run so far
    attempts: AtomicU64,
}

impl Minter {
    /// Create a minter on the system clock
    pub fn new(address: &str) -> Self {
        Self::with_clock(address, Arc::new(SystemClock), DEFAULT_TICK)
    }

    pub fn with_clock(address: &str, clock: Arc<dyn Clock>, tick: Duration) -> Self {
        Self {
            address: address.to_string(),
            clock,
            tick,
            attempts: AtomicU64::new(0),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// One eligibility test at `timestamp`
    pub fn try_mint(&self, template: &BlockTemplate, timestamp: u64) -> Option<Block> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let block = template.at(timestamp);
        is_eligible(&block).then_some(block)
    }

    /// Mint the next block and append it through `ledger`.
    ///
    /// Keeps trying until a block is accepted. If another block lands
    /// first the attempt restarts on the new head; any other rejection is
    /// returned.
    pub async fn mint(
        &self,
        ledger: &RwLock<Ledger>,
        payload: Payload,
    ) -> Result<Block, BlockchainError> {
        let start = Instant::now();
        let first_attempt = self.attempts();

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_tried: Option<(u64, String)> = None;

        loop {
            ticker.tick().await;

            let template = {
                let ledger = ledger.read().await;
                let transactions = match &payload {
                    Payload::Pool => ledger.pool_snapshot(),
                    Payload::Raw(txs) => txs.clone(),
                };
                ledger.block_template(&self.address, transactions)
            };

            // a new head resets the search
            let now = self.clock.now();
            if last_tried == Some((now, template.prev_hash.clone())) {
                continue;
            }
            last_tried = Some((now, template.prev_hash.clone()));

            let Some(block) = self.try_mint(&template, now) else {
                continue;
            };

            let mut ledger = ledger.write().await;
            match ledger.append_block(block.clone()) {
                Ok(()) => {
                    info!(
                        "Block {} minted in {}ms ({} attempts, difficulty {}, stake {})",
                        block.index,
                        start.elapsed().as_millis(),
                        self.attempts() - first_attempt,
                        block.difficulty,
                        block.minter_balance
                    );
                    return Ok(block);
                }
                Err(e) if ledger.latest().hash != template.prev_hash => {
                    log::debug!("Head moved while minting block {}: {}", block.index, e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::GENESIS_TIMESTAMP;
    use crate::core::consensus::{ConsensusParams, MINTING_WITHOUT_COIN_INDEX};

    /// Repeats every second `repeat` times, starting at `base`
    struct SteppingClock {
        base: u64,
        repeat: u64,
        calls: AtomicU64,
    }

    impl SteppingClock {
        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Clock for SteppingClock {
        fn now(&self) -> u64 {
            self.base + self.calls.fetch_add(1, Ordering::SeqCst) / self.repeat
        }
    }

    fn fast_minter(address: &str, clock: Arc<dyn Clock>) -> Minter {
        Minter::with_clock(address, clock, Duration::from_millis(1))
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100);
        clock.advance(5);
        assert_eq!(clock.now(), 105);
        clock.set(7);
        assert_eq!(clock.now(), 7);
    }

    #[test]
    fn test_try_mint_bootstrap() {
        let ledger = Ledger::default();
        let minter = Minter::new("minter");
        let template = ledger.block_template(minter.address(), vec![]);

        let block = minter.try_mint(&template, current_timestamp()).unwrap();
        assert_eq!(block.index, 1);
        assert_eq!(minter.attempts(), 1);
    }

    #[tokio::test]
    async fn test_mint_appends_block() {
        let ledger = RwLock::new(Ledger::default());
        let clock = Arc::new(ManualClock::new(current_timestamp()));
        let minter = fast_minter("minter", clock.clone());

        let block = minter.mint(&ledger, Payload::Pool).await.unwrap();

        let ledger = ledger.read().await;
        assert_eq!(ledger.latest(), &block);
        assert_eq!(block.timestamp, clock.now());
        assert_eq!(ledger.balance("minter"), 50);
    }

    #[tokio::test]
    async fn test_mint_raw_payload_rejected() {
        let ledger = RwLock::new(Ledger::default());
        let minter = fast_minter("minter", Arc::new(ManualClock::new(current_timestamp())));

        // a second reward transaction spends an output that does not exist
        let bogus = Transaction::coinbase("someone", 99);
        let result = minter.mint(&ledger, Payload::Raw(vec![bogus])).await;

        assert!(matches!(result, Err(BlockchainError::Transaction(_))));
        assert_eq!(ledger.read().await.chain().height(), 0);
    }

    #[tokio::test]
    async fn test_one_attempt_per_distinct_second() {
        // past the bootstrap window a minter without coins is never eligible
        let mut state = Ledger::new(ConsensusParams {
            verify_minting: false,
        });
        for i in 0..=MINTING_WITHOUT_COIN_INDEX {
            let template = state.block_template("filler", vec![]);
            state
                .append_block(template.at(GENESIS_TIMESTAMP + (i + 1) * 10))
                .unwrap();
        }
        let ledger = RwLock::new(state);

        let clock = Arc::new(SteppingClock {
            base: current_timestamp(),
            repeat: 3,
            calls: AtomicU64::new(0),
        });
        let minter = fast_minter("nobody", clock.clone());

        let outcome = tokio::time::timeout(
            Duration::from_millis(100),
            minter.mint(&ledger, Payload::Pool),
        )
        .await;

        assert!(outcome.is_err());
        let calls = clock.calls();
        assert!(calls > 0);
        assert_eq!(minter.attempts(), (calls + 2) / 3);
    }
}
