// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Per-round transaction admission bookkeeping.
//!
//! While a block is assembled, every accepted transaction reserves its fees
//! against the sender's GAS balance, and at most one transaction may answer
//! each oracle request. This context keeps the running totals. It is owned by
//! one round and mutated in place.

use dbft_traits::{GasBalanceLookup, UInt160, UInt256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{ConsensusError, Result};
use crate::transaction::Transaction;

/// Why a transaction could not be admitted
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckFailure {
    /// The sender cannot cover this transaction on top of those already admitted
    InsufficientBalance {
        sender: UInt160,
        balance: u64,
        required: u64,
    },

    /// Another admitted transaction already answers this oracle request
    DuplicateOracleResponse { id: u64, existing: UInt256 },

    /// The balance could not be read
    BalanceLookup(String),
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckFailure::InsufficientBalance {
                sender,
                balance,
                required,
            } => write!(f, "sender {} has {} GAS, needs {}", sender, balance, required),
            CheckFailure::DuplicateOracleResponse { id, existing } => {
                write!(f, "oracle request {} already answered by {}", id, existing)
            }
            CheckFailure::BalanceLookup(err) => write!(f, "balance lookup failed: {}", err),
        }
    }
}

/// Outcome of [`TransactionVerificationContext::check_transaction`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionCheck {
    pub result: bool,
    pub failure_reason: Option<CheckFailure>,
}

impl TransactionCheck {
    fn passed() -> Self {
        Self {
            result: true,
            failure_reason: None,
        }
    }

    fn failed(reason: CheckFailure) -> Self {
        Self {
            result: false,
            failure_reason: Some(reason),
        }
    }
}

/// Running fee totals and oracle-response claims for one block
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionVerificationContext {
    sender_fee: HashMap<UInt160, u64>,
    oracle_responses: HashMap<u64, UInt256>,
}

impl TransactionVerificationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an admitted transaction.
    pub fn add_transaction(&mut self, tx: &Transaction) {
        if let Some(id) = tx.oracle_response_id() {
            self.oracle_responses.insert(id, tx.hash());
        }
        let total = self.sender_fee.entry(tx.sender).or_insert(0);
        *total = total.saturating_add(tx.fee());
    }

    /// Check whether `tx` can be admitted next.
    ///
    /// Never fails: an unreadable balance is reported as a failed check.
    pub async fn check_transaction(
        &self,
        tx: &Transaction,
        balances: &dyn GasBalanceLookup,
    ) -> TransactionCheck {
        let balance = match balances.gas_balance(&tx.sender).await {
            Ok(balance) => balance,
            Err(err) => {
                log::warn!("GAS balance lookup for {} failed: {}", tx.sender, err);
                return TransactionCheck::failed(CheckFailure::BalanceLookup(err.to_string()));
            }
        };

        let running = self.sender_fee(&tx.sender);
        let required = running.saturating_add(tx.fee());
        if balance < required {
            return TransactionCheck::failed(CheckFailure::InsufficientBalance {
                sender: tx.sender,
                balance,
                required,
            });
        }

        if let Some(id) = tx.oracle_response_id() {
            if let Some(existing) = self.oracle_responses.get(&id) {
                return TransactionCheck::failed(CheckFailure::DuplicateOracleResponse {
                    id,
                    existing: *existing,
                });
            }
        }

        TransactionCheck::passed()
    }

    /// Release the fees reserved by `tx`.
    ///
    /// A sender whose total drops to zero is forgotten.
    ///
    /// # Errors
    ///
    /// Returns [`ConsensusError::UntrackedSender`] if no fee was ever
    /// recorded for the sender, and [`ConsensusError::FeeUnderflow`] if the
    /// fee exceeds the recorded total.
    pub fn remove_transaction(&mut self, tx: &Transaction) -> Result<()> {
        let total = self
            .sender_fee
            .get_mut(&tx.sender)
            .ok_or(ConsensusError::UntrackedSender(tx.sender))?;
        *total = total
            .checked_sub(tx.fee())
            .ok_or(ConsensusError::FeeUnderflow(tx.sender))?;
        if *total == 0 {
            self.sender_fee.remove(&tx.sender);
        }

        if let Some(id) = tx.oracle_response_id() {
            if self.oracle_responses.get(&id) == Some(&tx.hash()) {
                self.oracle_responses.remove(&id);
            }
        }
        Ok(())
    }

    /// Fees currently reserved by `sender`.
    pub fn sender_fee(&self, sender: &UInt160) -> u64 {
        self.sender_fee.get(sender).copied().unwrap_or(0)
    }

    /// Whether `sender` has an entry at all.
    pub fn is_tracked(&self, sender: &UInt160) -> bool {
        self.sender_fee.contains_key(sender)
    }

    pub fn is_empty(&self) -> bool {
        self.sender_fee.is_empty() && self.oracle_responses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockGasBalances;
    use crate::transaction::TransactionAttribute;

    fn tx(sender: u8, system_fee: u64, network_fee: u64) -> Transaction {
        Transaction {
            sender: UInt160::new([sender; 20]),
            system_fee,
            network_fee,
            ..Default::default()
        }
    }

    fn oracle_tx(sender: u8, id: u64, nonce: u32) -> Transaction {
        Transaction {
            nonce,
            attributes: vec![TransactionAttribute::OracleResponse {
                id,
                code: 0,
                result: vec![],
            }],
            ..tx(sender, 1, 1)
        }
    }

    #[test]
    fn test_add_then_remove_restores_state() {
        let mut context = TransactionVerificationContext::new();
        let before = context.clone();
        let t = oracle_tx(1, 3, 0);
        context.add_transaction(&t);
        assert_eq!(context.sender_fee(&t.sender), 2);
        context.remove_transaction(&t).unwrap();
        assert_eq!(context, before);
        assert!(!context.is_tracked(&t.sender));
    }

    #[test]
    fn test_partial_remove_keeps_entry() {
        let mut context = TransactionVerificationContext::new();
        context.add_transaction(&tx(1, 10, 5));
        context.add_transaction(&tx(1, 1, 1));
        context.remove_transaction(&tx(1, 10, 5)).unwrap();
        assert_eq!(context.sender_fee(&UInt160::new([1; 20])), 2);
    }

    #[test]
    fn test_remove_untracked_sender_fails() {
        let mut context = TransactionVerificationContext::new();
        assert!(matches!(
            context.remove_transaction(&tx(9, 1, 0)),
            Err(ConsensusError::UntrackedSender(_))
        ));
    }

    #[test]
    fn test_remove_more_than_reserved_fails() {
        let mut context = TransactionVerificationContext::new();
        context.add_transaction(&tx(1, 1, 0));
        assert!(matches!(
            context.remove_transaction(&tx(1, 5, 0)),
            Err(ConsensusError::FeeUnderflow(_))
        ));
    }

    #[tokio::test]
    async fn test_check_balance_includes_running_total() {
        let balances = MockGasBalances::new();
        balances.set_balance(UInt160::new([1; 20]), 100);

        let mut context = TransactionVerificationContext::new();
        assert!(context.check_transaction(&tx(1, 60, 0), &balances).await.result);
        context.add_transaction(&tx(1, 60, 0));

        let check = context.check_transaction(&tx(1, 30, 11), &balances).await;
        assert!(!check.result);
        assert_eq!(
            check.failure_reason,
            Some(CheckFailure::InsufficientBalance {
                sender: UInt160::new([1; 20]),
                balance: 100,
                required: 101,
            })
        );
        assert!(context.check_transaction(&tx(1, 30, 10), &balances).await.result);
    }

    #[tokio::test]
    async fn test_check_rejects_duplicate_oracle_response() {
        let balances = MockGasBalances::new();
        balances.set_balance(UInt160::new([1; 20]), 1_000);
        balances.set_balance(UInt160::new([2; 20]), 1_000);

        let mut context = TransactionVerificationContext::new();
        let first = oracle_tx(1, 7, 0);
        context.add_transaction(&first);

        let check = context.check_transaction(&oracle_tx(2, 7, 1), &balances).await;
        assert_eq!(
            check.failure_reason,
            Some(CheckFailure::DuplicateOracleResponse {
                id: 7,
                existing: first.hash(),
            })
        );
    }

    #[tokio::test]
    async fn test_lookup_failure_is_failed_check() {
        let balances = MockGasBalances::new();
        balances.fail_lookups(true);
        let context = TransactionVerificationContext::new();
        let check = context.check_transaction(&tx(1, 0, 0), &balances).await;
        assert!(!check.result);
        assert!(matches!(check.failure_reason, Some(CheckFailure::BalanceLookup(_))));
    }
}
