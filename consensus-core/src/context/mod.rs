// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Per-round consensus state
//!
//! [`ConsensusContext`] is the state machine at the centre of a round. It
//! holds the validator set, the block under construction and one payload
//! slot per validator for each phase (change view, preparation, commit, and
//! the change views carried over from the previous view).
//!
//! The context is an immutable value. Every transition returns a new context
//! built through [`ConsensusContext::clone_with`]; nothing is mutated in
//! place, so a context observed across an `.await` is never half-updated.
//! Quorum and progress queries are recomputed from the slots on every read.

mod snapshot;
mod transitions;

pub use snapshot::ContextSnapshot;
pub use transitions::ResetParams;

use dbft_traits::{PublicKey, UInt256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::block::{BlockBuilder, BlockOptions};
use crate::error::{ConsensusError, Result};
use crate::message::ConsensusMessage;
use crate::payload::ConsensusPayload;
use crate::transaction::Transaction;
use crate::types::{get_f, get_m, BlockIndex, ValidatorIndex, ViewNumber, MAX_VALIDATORS};
use crate::verification_context::TransactionVerificationContext;

/// One payload slot per validator; `None` until that validator is heard from
pub type PayloadSlots = Vec<Option<Arc<ConsensusPayload>>>;

fn empty_slots(validators: usize) -> PayloadSlots {
    vec![None; validators]
}

/// Arguments for [`ConsensusContext::new`]
#[derive(Clone, Debug, Default)]
pub struct ContextOptions {
    pub view_number: ViewNumber,

    /// Our position in `validators`; `None` for a watch-only node
    pub my_index: Option<ValidatorIndex>,

    pub validators: Vec<PublicKey>,
    pub block_received_time_ms: u64,
    pub verification_context: TransactionVerificationContext,
    pub block_options: BlockOptions,
    pub witness_size: usize,
}

/// Field overrides for [`ConsensusContext::clone_with`]
///
/// `None` keeps the current value. Fields that may themselves be cleared
/// (`my_index`, `transaction_hashes`) are doubly optional:
/// `Some(None)` clears them.
#[derive(Clone, Debug, Default)]
pub struct ContextUpdate {
    pub view_number: Option<ViewNumber>,
    pub my_index: Option<Option<ValidatorIndex>>,
    pub validators: Option<Vec<PublicKey>>,
    pub block_received_time_ms: Option<u64>,
    pub verification_context: Option<TransactionVerificationContext>,

    /// Replaces the builder wholesale, before `block_options` is merged
    pub block_builder: Option<BlockBuilder>,

    /// Merged into the builder, nested consensus data included
    pub block_options: Option<BlockOptions>,

    pub preparation_payloads: Option<PayloadSlots>,
    pub commit_payloads: Option<PayloadSlots>,
    pub change_view_payloads: Option<PayloadSlots>,
    pub last_change_view_payloads: Option<PayloadSlots>,
    pub last_seen_message: Option<BTreeMap<ValidatorIndex, BlockIndex>>,
    pub transactions: Option<HashMap<UInt256, Transaction>>,
    pub transaction_hashes: Option<Option<Vec<UInt256>>>,
    pub witness_size: Option<usize>,
}

/// State of one consensus round
#[derive(Clone, Debug)]
pub struct ConsensusContext {
    view_number: ViewNumber,
    my_index: Option<ValidatorIndex>,
    validators: Vec<PublicKey>,
    block_received_time_ms: u64,
    verification_context: TransactionVerificationContext,
    block_builder: BlockBuilder,
    preparation_payloads: PayloadSlots,
    commit_payloads: PayloadSlots,
    change_view_payloads: PayloadSlots,
    last_change_view_payloads: PayloadSlots,
    last_seen_message: BTreeMap<ValidatorIndex, BlockIndex>,
    transactions: HashMap<UInt256, Transaction>,
    transaction_hashes: Option<Vec<UInt256>>,
    witness_size: usize,
}

impl ConsensusContext {
    /// Create a context with empty payload slots.
    pub fn new(options: ContextOptions) -> Self {
        let validators = options.validators.len();
        Self {
            view_number: options.view_number,
            my_index: options.my_index,
            validators: options.validators,
            block_received_time_ms: options.block_received_time_ms,
            verification_context: options.verification_context,
            block_builder: BlockBuilder::new(options.block_options),
            preparation_payloads: empty_slots(validators),
            commit_payloads: empty_slots(validators),
            change_view_payloads: empty_slots(validators),
            last_change_view_payloads: empty_slots(validators),
            last_seen_message: BTreeMap::new(),
            transactions: HashMap::new(),
            transaction_hashes: None,
            witness_size: options.witness_size,
        }
    }

    /// Context for the first round after start-up.
    ///
    /// `current_index` is the height of the last persisted block; the round
    /// agrees on the next one, whose view-0 primary is
    /// `block_index mod validators.len()`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsensusError::Config`] for an empty or oversized validator
    /// set.
    pub fn initial(
        validators: Vec<PublicKey>,
        my_key: &PublicKey,
        current_index: BlockIndex,
        verification_context: TransactionVerificationContext,
    ) -> Result<Self> {
        check_validator_count(validators.len())?;
        let block_index = current_index
            .checked_add(1)
            .ok_or_else(|| ConsensusError::Config("block index overflow".into()))?;
        let primary_index = (block_index % validators.len() as u32) as ValidatorIndex;
        let my_index = position_of(&validators, my_key);

        Ok(Self::new(ContextOptions {
            view_number: 0,
            my_index,
            validators,
            verification_context,
            block_options: BlockOptions {
                version: Some(0),
                index: Some(block_index),
                consensus_data: Some(crate::block::ConsensusDataOptions {
                    primary_index: Some(primary_index),
                    nonce: None,
                }),
                ..Default::default()
            },
            ..Default::default()
        }))
    }

    /// Return a new context with `update` applied.
    ///
    /// This is the only way a context changes. Payload slots always hold one
    /// entry per validator: slots that no longer match the validator set
    /// are replaced with empty ones.
    pub fn clone_with(&self, update: ContextUpdate) -> Self {
        let builder = update
            .block_builder
            .unwrap_or_else(|| self.block_builder.clone());
        let block_builder = match update.block_options {
            Some(options) => builder.merge(options),
            None => builder,
        };
        let validators = update
            .validators
            .unwrap_or_else(|| self.validators.clone());
        let count = validators.len();
        Self {
            view_number: update.view_number.unwrap_or(self.view_number),
            my_index: update.my_index.unwrap_or(self.my_index),
            validators,
            block_received_time_ms: update
                .block_received_time_ms
                .unwrap_or(self.block_received_time_ms),
            verification_context: update
                .verification_context
                .unwrap_or_else(|| self.verification_context.clone()),
            block_builder,
            preparation_payloads: fit_slots(
                update
                    .preparation_payloads
                    .unwrap_or_else(|| self.preparation_payloads.clone()),
                count,
            ),
            commit_payloads: fit_slots(
                update
                    .commit_payloads
                    .unwrap_or_else(|| self.commit_payloads.clone()),
                count,
            ),
            change_view_payloads: fit_slots(
                update
                    .change_view_payloads
                    .unwrap_or_else(|| self.change_view_payloads.clone()),
                count,
            ),
            last_change_view_payloads: fit_slots(
                update
                    .last_change_view_payloads
                    .unwrap_or_else(|| self.last_change_view_payloads.clone()),
                count,
            ),
            last_seen_message: update
                .last_seen_message
                .unwrap_or_else(|| self.last_seen_message.clone()),
            transactions: update
                .transactions
                .unwrap_or_else(|| self.transactions.clone()),
            transaction_hashes: update
                .transaction_hashes
                .unwrap_or_else(|| self.transaction_hashes.clone()),
            witness_size: update.witness_size.unwrap_or(self.witness_size),
        }
    }

    // Accessors

    pub fn view_number(&self) -> ViewNumber {
        self.view_number
    }

    pub fn my_index(&self) -> Option<ValidatorIndex> {
        self.my_index
    }

    pub fn validators(&self) -> &[PublicKey] {
        &self.validators
    }

    pub fn block_received_time_ms(&self) -> u64 {
        self.block_received_time_ms
    }

    pub fn verification_context(&self) -> &TransactionVerificationContext {
        &self.verification_context
    }

    pub fn block_builder(&self) -> &BlockBuilder {
        &self.block_builder
    }

    /// Height of the block this round agrees on.
    pub fn block_index(&self) -> BlockIndex {
        self.block_builder.index.unwrap_or(0)
    }

    /// Primary of the current view, if assigned.
    pub fn primary_index(&self) -> Option<ValidatorIndex> {
        self.block_builder.primary_index()
    }

    pub fn preparation_payloads(&self) -> &[Option<Arc<ConsensusPayload>>] {
        &self.preparation_payloads
    }

    pub fn commit_payloads(&self) -> &[Option<Arc<ConsensusPayload>>] {
        &self.commit_payloads
    }

    pub fn change_view_payloads(&self) -> &[Option<Arc<ConsensusPayload>>] {
        &self.change_view_payloads
    }

    pub fn last_change_view_payloads(&self) -> &[Option<Arc<ConsensusPayload>>] {
        &self.last_change_view_payloads
    }

    /// Preparation payload from validator `index`, if any.
    pub fn preparation_payload(&self, index: ValidatorIndex) -> Option<&ConsensusPayload> {
        slot(&self.preparation_payloads, index)
    }

    pub fn commit_payload(&self, index: ValidatorIndex) -> Option<&ConsensusPayload> {
        slot(&self.commit_payloads, index)
    }

    pub fn change_view_payload(&self, index: ValidatorIndex) -> Option<&ConsensusPayload> {
        slot(&self.change_view_payloads, index)
    }

    /// Highest block index seen from each validator.
    pub fn last_seen_message(&self) -> &BTreeMap<ValidatorIndex, BlockIndex> {
        &self.last_seen_message
    }

    pub fn transactions(&self) -> &HashMap<UInt256, Transaction> {
        &self.transactions
    }

    /// Hashes proposed in the current view, once known.
    pub fn transaction_hashes(&self) -> Option<&[UInt256]> {
        self.transaction_hashes.as_deref()
    }

    /// Estimated size of the block's multi-signature witness.
    pub fn witness_size(&self) -> usize {
        self.witness_size
    }

    // Derived state

    /// Maximum number of faulty validators tolerated.
    pub fn f(&self) -> usize {
        get_f(self.validators.len())
    }

    /// Number of validators needed for agreement.
    pub fn m(&self) -> usize {
        get_m(self.validators.len())
    }

    pub fn is_primary(&self) -> bool {
        self.my_index.is_some() && self.my_index == self.primary_index()
    }

    pub fn is_backup(&self) -> bool {
        self.my_index.is_some() && !self.is_primary()
    }

    /// Whether this node observes without voting.
    pub fn watch_only(&self) -> bool {
        self.my_index.is_none()
    }

    /// Number of validators whose commit we hold.
    pub fn count_committed(&self) -> usize {
        self.commit_payloads.iter().filter(|p| p.is_some()).count()
    }

    /// Number of validators presumed lost.
    ///
    /// A validator counts as failed when we have never heard from it, or
    /// the last block index it was seen at is more than one behind the
    /// current block.
    pub fn count_failed(&self) -> usize {
        let block_index = u64::from(self.block_index());
        (0..self.validators.len())
            .filter(|&i| match self.last_seen_message.get(&(i as ValidatorIndex)) {
                None => true,
                Some(&seen) => u64::from(seen) + 1 < block_index,
            })
            .count()
    }

    /// `count_committed + count_failed > F`.
    ///
    /// Once this holds, leaving the current view could strand the validators
    /// that already committed, so the node keeps accepting payloads.
    pub fn more_than_f_nodes_committed_or_lost(&self) -> bool {
        self.count_committed() + self.count_failed() > self.f()
    }

    /// Whether we have asked to leave the current view.
    pub fn view_changing(&self) -> bool {
        let Some(my_index) = self.my_index else {
            return false;
        };
        match self.change_view_payload(my_index).map(ConsensusPayload::message) {
            Some(ConsensusMessage::ChangeView(message)) => message.new_view_number > self.view_number,
            _ => false,
        }
    }

    pub fn not_accepting_payloads_due_to_view_changing(&self) -> bool {
        self.view_changing() && !self.more_than_f_nodes_committed_or_lost()
    }

    /// Whether the primary's prepare request is in its slot.
    pub fn request_sent_or_received(&self) -> bool {
        self.primary_index()
            .map(|primary| self.preparation_payload(primary).is_some())
            .unwrap_or(false)
    }

    pub fn response_sent(&self) -> bool {
        self.my_index
            .map(|index| self.preparation_payload(index).is_some())
            .unwrap_or(false)
    }

    pub fn commit_sent(&self) -> bool {
        self.my_index
            .map(|index| self.commit_payload(index).is_some())
            .unwrap_or(false)
    }

    /// Whether the final block has been assembled.
    pub fn block_sent(&self) -> bool {
        self.block_builder.transactions.is_some()
    }

    /// View each validator is heading to, from its change-view slot.
    pub fn expected_view(&self) -> Vec<ViewNumber> {
        self.change_view_payloads
            .iter()
            .map(|slot| match slot.as_deref().map(ConsensusPayload::message) {
                Some(ConsensusMessage::ChangeView(message)) => message.new_view_number,
                _ => self.view_number,
            })
            .collect()
    }

    /// Diagnostic JSON view of the context.
    pub fn to_json(&self) -> serde_json::Value {
        let transactions: serde_json::Map<String, serde_json::Value> = self
            .transactions
            .iter()
            .map(|(hash, tx)| {
                (
                    hash.to_string(),
                    serde_json::to_value(tx).unwrap_or(serde_json::Value::Null),
                )
            })
            .collect();
        serde_json::json!({
            "block": {
                "version": self.block_builder.version,
                "index": self.block_builder.index,
                "previous_hash": self.block_builder.previous_hash.map(|h| h.to_string()),
                "merkle_root": self.block_builder.merkle_root.map(|h| h.to_string()),
                "timestamp": self.block_builder.timestamp,
                "next_consensus": self.block_builder.next_consensus.map(|h| h.to_string()),
                "primary_index": self.block_builder.consensus_data.primary_index,
                "nonce": self.block_builder.consensus_data.nonce,
            },
            "view_number": self.view_number,
            "my_index": self.my_index,
            "expected_view": self.expected_view(),
            "validators": self.validators.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
            "block_received_time_ms": self.block_received_time_ms,
            "transaction_hashes": self
                .transaction_hashes
                .as_ref()
                .map(|hashes| hashes.iter().map(|h| h.to_string()).collect::<Vec<_>>()),
            "transactions": transactions,
        })
    }
}

fn slot(slots: &[Option<Arc<ConsensusPayload>>], index: ValidatorIndex) -> Option<&ConsensusPayload> {
    slots.get(usize::from(index)).and_then(|p| p.as_deref())
}

fn fit_slots(slots: PayloadSlots, validators: usize) -> PayloadSlots {
    if slots.len() == validators {
        return slots;
    }
    log::warn!(
        "Discarding {} payload slots for a set of {} validators",
        slots.len(),
        validators
    );
    empty_slots(validators)
}

fn position_of(validators: &[PublicKey], key: &PublicKey) -> Option<ValidatorIndex> {
    validators
        .iter()
        .position(|validator| validator == key)
        .map(|i| i as ValidatorIndex)
}

fn check_validator_count(count: usize) -> Result<()> {
    if count == 0 || count > MAX_VALIDATORS {
        return Err(ConsensusError::Config(format!(
            "validator set size must be in 1..={}, got {}",
            MAX_VALIDATORS, count
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageHeader, PrepareResponse};
    use crate::testing::{make_round_context, validator_keys, validator_public_keys, TEST_MAGIC};

    fn context(n: u8, my_index: Option<ValidatorIndex>) -> ConsensusContext {
        ConsensusContext::new(ContextOptions {
            my_index,
            validators: validator_public_keys(n),
            block_options: BlockOptions {
                index: Some(10),
                consensus_data: Some(crate::block::ConsensusDataOptions {
                    primary_index: Some(1),
                    nonce: None,
                }),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[test]
    fn test_initial_primary_is_block_index_mod_n() {
        let keys = validator_public_keys(4);
        let context =
            ConsensusContext::initial(keys.clone(), &keys[2], 9, TransactionVerificationContext::new())
                .unwrap();
        assert_eq!(context.block_index(), 10);
        assert_eq!(context.primary_index(), Some(2));
        assert_eq!(context.my_index(), Some(2));
        assert!(context.is_primary());
        assert_eq!(context.preparation_payloads().len(), 4);
    }

    #[test]
    fn test_initial_rejects_empty_validator_set() {
        let key = validator_keys(1)[0].public_key();
        assert!(matches!(
            ConsensusContext::initial(vec![], &key, 0, TransactionVerificationContext::new()),
            Err(ConsensusError::Config(_))
        ));
    }

    #[test]
    fn test_roles() {
        let primary = context(4, Some(1));
        assert!(primary.is_primary() && !primary.is_backup() && !primary.watch_only());

        let backup = context(4, Some(0));
        assert!(backup.is_backup() && !backup.is_primary());

        let watcher = context(4, None);
        assert!(watcher.watch_only() && !watcher.is_backup() && !watcher.is_primary());
        assert!(!watcher.view_changing());
        assert!(!watcher.commit_sent());
    }

    #[test]
    fn test_count_failed_uses_last_seen() {
        let context = context(4, Some(0));
        // Nobody seen yet
        assert_eq!(context.count_failed(), 4);

        let context = context
            .with_last_seen(0, 10)
            .with_last_seen(1, 9)
            .with_last_seen(2, 8);
        // Validator 2 is two blocks behind, validator 3 never seen
        assert_eq!(context.count_failed(), 2);
    }

    #[test]
    fn test_clone_with_keeps_unspecified_fields() {
        let base = context(4, Some(0));
        let next = base.clone_with(ContextUpdate {
            view_number: Some(2),
            block_options: Some(BlockOptions {
                timestamp: Some(55),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(next.view_number(), 2);
        assert_eq!(next.block_builder().timestamp, Some(55));
        assert_eq!(next.primary_index(), Some(1));
        assert_eq!(next.my_index(), Some(0));
        assert_eq!(base.view_number(), 0);

        let cleared = next.clone_with(ContextUpdate {
            my_index: Some(None),
            ..Default::default()
        });
        assert!(cleared.watch_only());
    }

    #[test]
    fn test_clone_with_fits_slots_to_new_validator_set() {
        let keys = validator_keys(7);
        let base = make_round_context(4, Some(0), 9).unwrap();
        let grown = base.clone_with(ContextUpdate {
            validators: Some(validator_public_keys(7)),
            ..Default::default()
        });
        assert_eq!(grown.preparation_payloads().len(), 7);
        assert_eq!(grown.commit_payloads().len(), 7);
        assert_eq!(grown.change_view_payloads().len(), 7);
        assert_eq!(grown.last_change_view_payloads().len(), 7);

        let response = PrepareResponse {
            header: MessageHeader::new(0, grown.block_index(), 5),
            preparation_hash: UInt256::new([1; 32]),
        };
        let payload = grown.sign_payload(response.into(), &keys[5], TEST_MAGIC).unwrap();
        let next = grown.with_payload(payload).unwrap();
        assert!(next.preparation_payload(5).is_some());

        let shrunk = next.clone_with(ContextUpdate {
            validators: Some(validator_public_keys(4)),
            ..Default::default()
        });
        assert_eq!(shrunk.preparation_payloads().len(), 4);
        assert!(shrunk.preparation_payloads().iter().all(Option::is_none));
    }

    #[test]
    fn test_to_json_shape() {
        let json = context(4, Some(0)).to_json();
        assert_eq!(json["view_number"], 0);
        assert_eq!(json["block"]["index"], 10);
        assert_eq!(json["validators"].as_array().unwrap().len(), 4);
        assert_eq!(json["expected_view"], serde_json::json!([0, 0, 0, 0]));
    }
}
