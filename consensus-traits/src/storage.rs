// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Storage traits consumed by the consensus core.
//!
//! The ledger and the native token contract live outside the core; consensus
//! only reads from them through these narrow, asynchronous interfaces.

use crate::block::{HashOrIndex, Header, TrimmedBlock};
use crate::core::{UInt160, UInt256};
use crate::Result;
use async_trait::async_trait;

/// Read access to the persisted chain.
///
/// # Requirements
///
/// Implementations must be:
/// - Thread-safe (Send + Sync)
/// - Asynchronous (using async/await)
///
/// # Example
///
/// ```text
/// use dbft_traits::storage::LedgerStore;
/// use async_trait::async_trait;
///
/// struct MyLedger { /* database handle */ }
///
/// #[async_trait]
/// impl LedgerStore for MyLedger {
///     async fn header(&self, key: HashOrIndex) -> Result<Option<Header>> {
///         // Look the header up by hash or height
///         Ok(None)
///     }
///
///     // ... other methods
/// }
/// ```
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Fetch a header by hash or height.
    async fn header(&self, key: HashOrIndex) -> Result<Option<Header>>;

    /// Fetch a trimmed block by hash.
    async fn trimmed_block(&self, hash: UInt256) -> Result<Option<TrimmedBlock>>;

    /// Height of the last persisted block.
    async fn current_index(&self) -> Result<u32>;

    /// Hash of the last persisted block.
    async fn current_hash(&self) -> Result<UInt256>;
}

/// Spendable GAS lookup against a storage snapshot.
///
/// The implementor is bound to one snapshot; the core never mixes snapshots
/// within a single admission decision.
#[async_trait]
pub trait GasBalanceLookup: Send + Sync {
    /// Balance of `account`, in the token's smallest unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be read.
    async fn gas_balance(&self, account: &UInt160) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapBalances(HashMap<UInt160, u64>);

    #[async_trait]
    impl GasBalanceLookup for MapBalances {
        async fn gas_balance(&self, account: &UInt160) -> Result<u64> {
            Ok(self.0.get(account).copied().unwrap_or(0))
        }
    }

    #[tokio::test]
    async fn test_balance_lookup_object_safe() {
        let account = UInt160::new([1; 20]);
        let lookup: Box<dyn GasBalanceLookup> =
            Box::new(MapBalances(HashMap::from([(account, 50)])));
        assert_eq!(lookup.gas_balance(&account).await.unwrap(), 50);
        assert_eq!(lookup.gas_balance(&UInt160::ZERO).await.unwrap(), 0);
    }
}
