// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Validator registry trait.
//!
//! The validator list is native-contract state. Consensus resolves it at the
//! start of each round and then treats the returned order as fixed: position
//! in the list is the validator index used by every message of the round.

use crate::crypto::PublicKey;
use crate::Result;
use async_trait::async_trait;

/// Resolves the current and upcoming validator sets.
///
/// # Example
///
/// ```text
/// use dbft_traits::network::ValidatorRegistry;
/// use async_trait::async_trait;
///
/// struct StaticRegistry(Vec<PublicKey>);
///
/// #[async_trait]
/// impl ValidatorRegistry for StaticRegistry {
///     async fn validators(&self) -> Result<Vec<PublicKey>> {
///         Ok(self.0.clone())
///     }
///
///     async fn next_block_validators(&self) -> Result<Vec<PublicKey>> {
///         Ok(self.0.clone())
///     }
/// }
/// ```
#[async_trait]
pub trait ValidatorRegistry: Send + Sync {
    /// Validators of the current committee.
    async fn validators(&self) -> Result<Vec<PublicKey>>;

    /// Validators responsible for the next block.
    async fn next_block_validators(&self) -> Result<Vec<PublicKey>>;
}
