// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Testing utilities for dbft-core.
//!
//! Deterministic validator keys and in-memory implementations of the
//! collaborator traits, so rounds can be driven without a node.

mod mock_balances;
mod mock_ledger;

pub use mock_balances::MockGasBalances;
pub use mock_ledger::{MockLedgerStore, MockValidatorRegistry};

use dbft_traits::{KeyPair, PublicKey, UInt160, UInt256};

use crate::context::{ConsensusContext, ResetParams};
use crate::error::Result;
use crate::transaction::Transaction;
use crate::types::BlockIndex;

/// Network magic used throughout the tests.
pub const TEST_MAGIC: u32 = 0x4e45_4f33;

/// Create `n` deterministic validator key pairs.
///
/// Validator `i` is derived from the secret `[i + 1; 32]`, so the same index
/// always yields the same key across tests.
///
/// # Parameters
///
/// * `n` - Number of validators
///
/// # Returns
///
/// * The key pairs, in validator order
///
/// # Example
///
/// ```ignore
/// use dbft_core::testing::validator_keys;
///
/// let keys = validator_keys(7);
/// assert_eq!(keys.len(), 7);
/// ```
pub fn validator_keys(n: u8) -> Vec<KeyPair> {
    (0..n).map(|i| KeyPair::from_secret(&[i + 1; 32])).collect()
}

/// Public keys of [`validator_keys`].
pub fn validator_public_keys(n: u8) -> Vec<PublicKey> {
    validator_keys(n).iter().map(KeyPair::public_key).collect()
}

/// Start a round agreeing on block `current_index + 1` among `n`
/// [`validator_keys`].
///
/// # Parameters
///
/// * `n` - Number of validators
/// * `my_index` - Local validator, or `None` for a watch-only node
/// * `current_index` - Height of the last persisted block
///
/// # Returns
///
/// * A view-0 context whose builder carries a fixed previous hash and next
///   consensus address
pub fn make_round_context(n: u8, my_index: Option<u8>, current_index: BlockIndex) -> Result<ConsensusContext> {
    let validators = validator_public_keys(n);
    let my_key = match my_index {
        Some(index) => validators[usize::from(index)],
        None => KeyPair::from_secret(&[0xee; 32]).public_key(),
    };
    ConsensusContext::new(Default::default()).reset(ResetParams {
        validators,
        current_index,
        previous_hash: UInt256::new([0xaa; 32]),
        next_consensus: UInt160::new([0xbb; 20]),
        my_key,
        validators_changed: false,
        block_received_time_ms: 0,
    })
}

/// A transaction from account `[sender; 20]`, distinguished by `nonce`.
pub fn sample_transaction(sender: u8, nonce: u32, system_fee: u64) -> Transaction {
    Transaction {
        nonce,
        sender: UInt160::new([sender; 20]),
        system_fee,
        network_fee: 1,
        script: vec![0x40],
        ..Default::default()
    }
}

/// Install a test logger; repeated calls are ignored.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbft_traits::{GasBalanceLookup, HashOrIndex, Header, LedgerStore, ValidatorRegistry};

    #[test]
    fn test_validator_keys_are_deterministic_and_distinct() {
        let first = validator_public_keys(4);
        let second = validator_public_keys(4);
        assert_eq!(first, second);

        let mut sorted = first.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 4);
    }

    #[test]
    fn test_make_round_context() {
        let context = make_round_context(7, Some(4), 20).unwrap();
        assert_eq!(context.block_index(), 21);
        assert_eq!(context.primary_index(), Some(0));
        assert_eq!(context.my_index(), Some(4));

        let watcher = make_round_context(4, None, 0).unwrap();
        assert!(watcher.watch_only());
    }

    #[test]
    fn test_sample_transactions_differ_by_nonce() {
        assert_ne!(sample_transaction(1, 0, 5).hash(), sample_transaction(1, 1, 5).hash());
    }

    #[tokio::test]
    async fn test_mock_ledger_chains_headers() {
        let ledger = MockLedgerStore::new(Header::default());
        let genesis = ledger.current_hash().await.unwrap();
        let hash = ledger.push(Header {
            timestamp: 7,
            ..Default::default()
        });

        assert_eq!(ledger.current_index().await.unwrap(), 1);
        assert_eq!(ledger.current_hash().await.unwrap(), hash);
        let header = ledger.header(HashOrIndex::Index(1)).await.unwrap().unwrap();
        assert_eq!(header.previous_hash, genesis);
        assert!(ledger.trimmed_block(hash).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_mock_registry_and_balances() {
        let keys = validator_public_keys(3);
        let registry = MockValidatorRegistry::rotating(keys.clone(), keys[..2].to_vec());
        assert_eq!(registry.validators().await.unwrap().len(), 3);
        assert_eq!(registry.next_block_validators().await.unwrap().len(), 2);

        let balances = MockGasBalances::new();
        balances.set_balance(UInt160::new([1; 20]), 9);
        assert_eq!(balances.gas_balance(&UInt160::new([1; 20])).await.unwrap(), 9);
        balances.fail_lookups(true);
        assert!(balances.gas_balance(&UInt160::ZERO).await.is_err());
    }
}
