//! Stake-weighted consensus rules
//!
//! Difficulty adjustment, the stake-eligibility test a minter must pass,
//! accumulated difficulty for fork choice, and the minting checks applied
//! to blocks received from peers.
//!
//! Eligibility is not proof of work: for a given predecessor and minter the
//! only free variable is the timestamp, so a minter gets one try per second.

use crate::core::block::Block;
use crate::core::transaction::UtxoSet;
use crate::crypto::sha256_parts;
use chrono::Utc;
use primitive_types::{U256, U512};
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Target seconds between blocks
pub const BLOCK_GENERATION_INTERVAL: u64 = 10;

/// Number of blocks between difficulty adjustments
pub const DIFFICULTY_ADJUSTMENT_INTERVAL: u64 = 10;

/// Blocks up to this index may be minted by accounts holding no coins
pub const MINTING_WITHOUT_COIN_INDEX: u64 = 100;

/// Allowed clock skew, in seconds, for block timestamps
pub const MAX_TIMESTAMP_DRIFT: u64 = 60;

/// Consensus rule violations
#[derive(Error, Debug, PartialEq)]
pub enum ConsensusError {
    #[error("Wrong difficulty at block {index}: expected {expected}, got {actual}")]
    WrongDifficulty {
        index: u64,
        expected: u32,
        actual: u32,
    },
    #[error("Minter balance overstated: claimed {claimed}, holds {actual}")]
    OverstatedBalance { claimed: u64, actual: u64 },
    #[error("Minter {0} is not eligible to mint block {1}")]
    NotEligible(String, u64),
    #[error("Timestamp {0} outside the allowed window")]
    TimestampOutOfWindow(u64),
}

/// Switches for the checks that go beyond linkage and transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusParams {
    /// Check difficulty, stake eligibility, minter balance and timestamp
    /// of every appended or replayed block
    pub verify_minting: bool,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            verify_minting: true,
        }
    }
}

/// Current wall-clock time in whole seconds
pub fn current_timestamp() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

// =============================================================================
// Difficulty
// =============================================================================

/// Difficulty of the block that would follow `chain`.
///
/// Only blocks whose index is a multiple of the adjustment interval get a
/// new difficulty; the window is read from `chain` itself, so a candidate
/// chain is judged by its own history.
pub fn next_difficulty(chain: &[Block]) -> u32 {
    let Some(latest) = chain.last() else {
        return 0;
    };

    let next_index = latest.index + 1;
    let interval = DIFFICULTY_ADJUSTMENT_INTERVAL as usize;
    if next_index % DIFFICULTY_ADJUSTMENT_INTERVAL == 0 && chain.len() >= interval {
        let base = &chain[chain.len() - interval];
        return adjusted_difficulty(base, latest);
    }

    latest.difficulty
}

/// New difficulty from the time the last window took
fn adjusted_difficulty(base: &Block, latest: &Block) -> u32 {
    let expected = BLOCK_GENERATION_INTERVAL * DIFFICULTY_ADJUSTMENT_INTERVAL;
    let taken = latest.timestamp.saturating_sub(base.timestamp);

    let adjusted = if taken < expected / 2 {
        base.difficulty.saturating_add(1)
    } else if taken > expected * 2 {
        base.difficulty.saturating_sub(1)
    } else {
        base.difficulty
    };

    log::debug!(
        "Difficulty for block {}: {} -> {} (time taken: {}s, expected: {}s)",
        latest.index + 1,
        base.difficulty,
        adjusted,
        taken,
        expected
    );

    adjusted
}

// =============================================================================
// Stake Eligibility
// =============================================================================

/// SHA-256(prevHash ∥ minterAddress ∥ timestamp×1000) as an integer
pub fn staking_hash(prev_hash: &str, minter_address: &str, timestamp: u64) -> U256 {
    let millis = timestamp.saturating_mul(1000).to_string();
    let digest = sha256_parts(&[
        prev_hash.as_bytes(),
        minter_address.as_bytes(),
        millis.as_bytes(),
    ]);
    U256::from_big_endian(&digest)
}

/// Balance that weighs a minter's chances at `index`
pub fn effective_balance(index: u64, minter_balance: u64) -> u64 {
    if index <= MINTING_WITHOUT_COIN_INDEX {
        minter_balance.saturating_add(1)
    } else {
        minter_balance
    }
}

/// Whether `block`'s minter may mint it:
/// `stakingHash <= 2^256 × effectiveBalance / (difficulty + 1)`.
///
/// Evaluated as `stakingHash × (difficulty + 1) <= effectiveBalance × 2^256`
/// in 512-bit arithmetic so nothing is truncated.
pub fn is_eligible(block: &Block) -> bool {
    let hash = staking_hash(&block.prev_hash, &block.minter_address, block.timestamp);
    let balance = effective_balance(block.index, block.minter_balance);

    let lhs = U512::from(hash) * U512::from(u64::from(block.difficulty) + 1);
    let rhs = U512::from(balance) << 256usize;
    lhs <= rhs
}

// =============================================================================
// Fork Choice
// =============================================================================

/// Σ 2^difficulty over every block
pub fn accumulated_difficulty(chain: &[Block]) -> U256 {
    chain.iter().fold(U256::zero(), |acc, block| {
        let weight = if block.difficulty < 256 {
            U256::one() << block.difficulty as usize
        } else {
            U256::MAX
        };
        acc.saturating_add(weight)
    })
}

/// Whether `candidate` outweighs `local`. Ties keep the local chain.
pub fn is_heavier(candidate: &[Block], local: &[Block]) -> bool {
    accumulated_difficulty(candidate) > accumulated_difficulty(local)
}

// =============================================================================
// Minting Validation
// =============================================================================

/// Timestamp must be after `prev - drift` and before `now + drift`
pub fn validate_timestamp(block: &Block, prev: &Block, now: u64) -> Result<(), ConsensusError> {
    let after_prev = prev.timestamp < block.timestamp.saturating_add(MAX_TIMESTAMP_DRIFT);
    let not_future = block.timestamp < now.saturating_add(MAX_TIMESTAMP_DRIFT);
    if after_prev && not_future {
        Ok(())
    } else {
        Err(ConsensusError::TimestampOutOfWindow(block.timestamp))
    }
}

/// Check a block's minting metadata against the chain it extends.
///
/// `predecessors` is the chain up to and including the block's parent and
/// `utxos` the set at that parent.
pub fn validate_minting(
    block: &Block,
    predecessors: &[Block],
    utxos: &UtxoSet,
    now: u64,
) -> Result<(), ConsensusError> {
    let expected = next_difficulty(predecessors);
    if block.difficulty != expected {
        return Err(ConsensusError::WrongDifficulty {
            index: block.index,
            expected,
            actual: block.difficulty,
        });
    }

    let actual = utxos.balance_of(&block.minter_address);
    if block.minter_balance > actual {
        return Err(ConsensusError::OverstatedBalance {
            claimed: block.minter_balance,
            actual,
        });
    }

    if let Some(prev) = predecessors.last() {
        validate_timestamp(block, prev, now)?;
    }

    if !is_eligible(block) {
        return Err(ConsensusError::NotEligible(
            block.minter_address.clone(),
            block.index,
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::Transaction;

    /// A linked chain of `len` blocks with the given timestamps and difficulty
    fn chain_with(timestamps: &[u64], difficulty: u32) -> Vec<Block> {
        let mut chain = vec![Block::genesis()];
        for (i, ts) in timestamps.iter().enumerate() {
            let index = i as u64 + 1;
            let prev = chain.last().unwrap().hash.clone();
            chain.push(Block::new(
                index,
                prev,
                *ts,
                vec![Transaction::coinbase("minter", index)],
                difficulty,
                0,
                "minter".to_string(),
            ));
        }
        chain
    }

    #[test]
    fn test_difficulty_inherited_between_adjustments() {
        let chain = chain_with(&[100, 101, 102], 3);
        assert_eq!(next_difficulty(&chain), 3);
    }

    #[test]
    fn test_difficulty_rises_when_blocks_are_fast() {
        // blocks 1..=9, one second apart: the window takes far less than 50s
        let timestamps: Vec<u64> = (1..=9).map(|i| 1_000 + i).collect();
        let mut chain = chain_with(&timestamps, 2);
        chain[0].difficulty = 2;
        chain[0].timestamp = 1_000;
        assert_eq!(next_difficulty(&chain), 3);
    }

    #[test]
    fn test_difficulty_falls_when_blocks_are_slow() {
        let timestamps: Vec<u64> = (1..=9).map(|i| 1_000 + i * 30).collect();
        let mut chain = chain_with(&timestamps, 2);
        chain[0].difficulty = 2;
        chain[0].timestamp = 1_000;
        assert_eq!(next_difficulty(&chain), 1);
    }

    #[test]
    fn test_difficulty_unchanged_on_target() {
        let timestamps: Vec<u64> = (1..=9).map(|i| 1_000 + i * 10).collect();
        let mut chain = chain_with(&timestamps, 2);
        chain[0].difficulty = 2;
        chain[0].timestamp = 1_000;
        assert_eq!(next_difficulty(&chain), 2);
    }

    #[test]
    fn test_difficulty_never_negative() {
        let timestamps: Vec<u64> = (1..=9).map(|i| GENESIS_TS + i * 1_000).collect();
        let chain = chain_with(&timestamps, 0);
        assert_eq!(next_difficulty(&chain), 0);
    }

    const GENESIS_TS: u64 = crate::core::block::GENESIS_TIMESTAMP;

    #[test]
    fn test_difficulty_changes_only_at_interval() {
        let timestamps: Vec<u64> = (1..=14).map(|i| 1_000 + i).collect();
        let chain = chain_with(&timestamps, 4);
        for len in 1..=chain.len() {
            let next_index = len as u64;
            if next_index % DIFFICULTY_ADJUSTMENT_INTERVAL != 0 {
                assert_eq!(next_difficulty(&chain[..len]), chain[len - 1].difficulty);
            }
        }
    }

    #[test]
    fn test_bootstrap_minting_without_coins() {
        let block = Block::new(
            1,
            "ab".repeat(32),
            2_000,
            vec![Transaction::coinbase("minter", 1)],
            0,
            0,
            "minter".to_string(),
        );
        // balance 0 + 1 at difficulty 0 gives a threshold of 2^256
        assert!(is_eligible(&block));
    }

    #[test]
    fn test_zero_stake_after_bootstrap_never_eligible() {
        for ts in 0..50 {
            let block = Block::new(
                MINTING_WITHOUT_COIN_INDEX + 1,
                "ab".repeat(32),
                ts,
                vec![Transaction::coinbase("minter", MINTING_WITHOUT_COIN_INDEX + 1)],
                0,
                0,
                "minter".to_string(),
            );
            assert!(!is_eligible(&block));
        }
    }

    #[test]
    fn test_effective_balance() {
        assert_eq!(effective_balance(0, 0), 1);
        assert_eq!(effective_balance(MINTING_WITHOUT_COIN_INDEX, 5), 6);
        assert_eq!(effective_balance(MINTING_WITHOUT_COIN_INDEX + 1, 5), 5);
    }

    #[test]
    fn test_staking_hash_depends_on_inputs() {
        let a = staking_hash("prev", "addr", 10);
        assert_eq!(a, staking_hash("prev", "addr", 10));
        assert_ne!(a, staking_hash("prev", "addr", 11));
        assert_ne!(a, staking_hash("prev", "other", 10));
    }

    #[test]
    fn test_accumulated_difficulty() {
        let chain = chain_with(&[1, 2], 3);
        // genesis 2^0 + two blocks at 2^3
        assert_eq!(accumulated_difficulty(&chain), U256::from(17u64));
    }

    #[test]
    fn test_heavier_chain_wins_regardless_of_length() {
        let short_heavy = chain_with(&[1, 2, 3, 4], 3);
        let long_light = chain_with(&[1, 2, 3, 4, 5, 6], 1);
        assert!(is_heavier(&short_heavy, &long_light));
        assert!(!is_heavier(&long_light, &short_heavy));
        assert!(!is_heavier(&short_heavy, &short_heavy.clone()));
    }

    #[test]
    fn test_timestamp_window() {
        let chain = chain_with(&[5_000], 0);
        let prev = &chain[1];
        let mut block = chain[1].clone();

        block.timestamp = 5_000 - 59;
        assert!(validate_timestamp(&block, prev, 10_000).is_ok());

        block.timestamp = 5_000 - 60;
        assert!(validate_timestamp(&block, prev, 10_000).is_err());

        block.timestamp = 10_059;
        assert!(validate_timestamp(&block, prev, 10_000).is_ok());

        block.timestamp = 10_060;
        assert!(validate_timestamp(&block, prev, 10_000).is_err());
    }

    #[test]
    fn test_minting_rejects_wrong_difficulty() {
        let chain = chain_with(&[], 0);
        let utxos = UtxoSet::new().apply(&chain[0].transactions);
        let block = Block::new(
            1,
            chain[0].hash.clone(),
            current_timestamp(),
            vec![Transaction::coinbase("minter", 1)],
            5,
            0,
            "minter".to_string(),
        );
        assert!(matches!(
            validate_minting(&block, &chain, &utxos, current_timestamp()),
            Err(ConsensusError::WrongDifficulty { expected: 0, actual: 5, .. })
        ));
    }

    #[test]
    fn test_minting_rejects_overstated_balance() {
        let chain = chain_with(&[], 0);
        let utxos = UtxoSet::new().apply(&chain[0].transactions);
        let block = Block::new(
            1,
            chain[0].hash.clone(),
            current_timestamp(),
            vec![Transaction::coinbase("minter", 1)],
            0,
            1_000,
            "minter".to_string(),
        );
        assert!(matches!(
            validate_minting(&block, &chain, &utxos, current_timestamp()),
            Err(ConsensusError::OverstatedBalance { claimed: 1_000, actual: 0 })
        ));
    }
}
