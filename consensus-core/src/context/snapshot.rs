// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dbft_traits::{PublicKey, UInt256};
use serde::{Deserialize, Serialize};

use super::{ConsensusContext, PayloadSlots};
use crate::block::BlockBuilder;
use crate::error::{ConsensusError, Result};
use crate::payload::ConsensusPayload;
use crate::transaction::Transaction;
use crate::types::{BlockIndex, ValidatorIndex, ViewNumber};
use crate::verification_context::TransactionVerificationContext;

/// Persistent form of a [`ConsensusContext`]
///
/// Payloads are stored as their wire bytes and decoded again on restore, so
/// a restored payload passes the same checks as one from the network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub view_number: ViewNumber,
    pub my_index: Option<ValidatorIndex>,
    pub validators: Vec<PublicKey>,
    pub block_received_time_ms: u64,
    pub verification_context: TransactionVerificationContext,
    pub block_builder: BlockBuilder,
    pub preparation_payloads: Vec<Option<Vec<u8>>>,
    pub commit_payloads: Vec<Option<Vec<u8>>>,
    pub change_view_payloads: Vec<Option<Vec<u8>>>,
    pub last_change_view_payloads: Vec<Option<Vec<u8>>>,
    pub last_seen_message: BTreeMap<ValidatorIndex, BlockIndex>,
    pub transactions: Vec<Transaction>,
    pub transaction_hashes: Option<Vec<UInt256>>,
    pub witness_size: usize,
}

fn encode_slots(slots: &PayloadSlots) -> Vec<Option<Vec<u8>>> {
    slots
        .iter()
        .map(|slot| slot.as_ref().map(|payload| payload.to_bytes()))
        .collect()
}

fn decode_slots(slots: Vec<Option<Vec<u8>>>, validators: usize) -> Result<PayloadSlots> {
    if slots.len() != validators {
        return Err(ConsensusError::Snapshot(format!(
            "expected {} payload slots, found {}",
            validators,
            slots.len()
        )));
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            let Some(bytes) = slot else {
                return Ok(None);
            };
            let payload = ConsensusPayload::decode(&bytes, validators)?;
            if usize::from(payload.validator_index()) != i {
                return Err(ConsensusError::Snapshot(format!(
                    "payload from validator {} stored in slot {}",
                    payload.validator_index(),
                    i
                )));
            }
            Ok(Some(Arc::new(payload)))
        })
        .collect()
}

impl ConsensusContext {
    /// Capture the context in its persistent form.
    pub fn to_snapshot(&self) -> ContextSnapshot {
        let mut transactions: Vec<Transaction> = self.transactions.values().cloned().collect();
        transactions.sort_by_key(Transaction::hash);
        ContextSnapshot {
            view_number: self.view_number,
            my_index: self.my_index,
            validators: self.validators.clone(),
            block_received_time_ms: self.block_received_time_ms,
            verification_context: self.verification_context.clone(),
            block_builder: self.block_builder.clone(),
            preparation_payloads: encode_slots(&self.preparation_payloads),
            commit_payloads: encode_slots(&self.commit_payloads),
            change_view_payloads: encode_slots(&self.change_view_payloads),
            last_change_view_payloads: encode_slots(&self.last_change_view_payloads),
            last_seen_message: self.last_seen_message.clone(),
            transactions,
            transaction_hashes: self.transaction_hashes.clone(),
            witness_size: self.witness_size,
        }
    }

    /// Rebuild a context from its persistent form.
    ///
    /// # Errors
    ///
    /// Fails if a stored payload no longer decodes against the stored
    /// validator set, or sits in another validator's slot.
    pub fn from_snapshot(snapshot: ContextSnapshot) -> Result<Self> {
        let validators = snapshot.validators.len();
        if let Some(index) = snapshot.my_index {
            if usize::from(index) >= validators {
                return Err(ConsensusError::Snapshot(format!(
                    "my index {} outside {} validators",
                    index, validators
                )));
            }
        }
        let transactions: HashMap<UInt256, Transaction> = snapshot
            .transactions
            .into_iter()
            .map(|tx| (tx.hash(), tx))
            .collect();

        Ok(Self {
            view_number: snapshot.view_number,
            my_index: snapshot.my_index,
            block_received_time_ms: snapshot.block_received_time_ms,
            verification_context: snapshot.verification_context,
            block_builder: snapshot.block_builder,
            preparation_payloads: decode_slots(snapshot.preparation_payloads, validators)?,
            commit_payloads: decode_slots(snapshot.commit_payloads, validators)?,
            change_view_payloads: decode_slots(snapshot.change_view_payloads, validators)?,
            last_change_view_payloads: decode_slots(snapshot.last_change_view_payloads, validators)?,
            last_seen_message: snapshot.last_seen_message,
            transactions,
            transaction_hashes: snapshot.transaction_hashes,
            witness_size: snapshot.witness_size,
            validators: snapshot.validators,
        })
    }

    /// Encode the context with bincode, for persistence across restarts.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.to_snapshot())?)
    }

    /// Decode a context written by [`ConsensusContext::snapshot`].
    pub fn restore(bytes: &[u8]) -> Result<Self> {
        let snapshot: ContextSnapshot = bincode::deserialize(bytes)?;
        let context = Self::from_snapshot(snapshot)?;
        log::info!(
            "Restored consensus context for block {} view {}",
            context.block_index(),
            context.view_number
        );
        Ok(context)
    }
}
