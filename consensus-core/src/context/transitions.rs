// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dbft_traits::crypto::merkle_root;
use dbft_traits::io::var_int_size;
use dbft_traits::script::{bft_address, multi_invocation_script, multisig_redeem_script, signature_redeem_script};
use dbft_traits::{
    HashOrIndex, KeyPair, LedgerStore, PublicKey, Serializable, SignatureBytes, UInt160, UInt256,
    ValidatorRegistry, Witness,
};

use super::{check_validator_count, empty_slots, position_of, ConsensusContext, ContextUpdate, PayloadSlots};
use crate::block::{Block, BlockBuilder, BlockOptions, ConsensusDataOptions};
use crate::config::ConsensusConfig;
use crate::error::{ConsensusError, Result};
use crate::message::{ConsensusMessage, MessageHeader, Recovery};
use crate::payload::{
    ChangeViewPayloadCompact, CommitPayloadCompact, ConsensusPayload, PreparationPayloadCompact,
    UnsignedConsensusPayload,
};
use crate::transaction::Transaction;
use crate::types::{get_m, BlockIndex, ValidatorIndex, ViewNumber};
use crate::verification_context::TransactionVerificationContext;

/// Serialized size of a block header's unsigned fields
const HEADER_UNSIGNED_SIZE: usize = 4 + 32 + 32 + 8 + 4 + 20;

/// Serialized size of [`crate::block::ConsensusData`]
const CONSENSUS_DATA_SIZE: usize = 1 + 8;

/// Inputs for starting a new round at view 0
#[derive(Clone, Debug)]
pub struct ResetParams {
    /// Validators of the new round, in index order
    pub validators: Vec<PublicKey>,

    /// Height of the last persisted block
    pub current_index: BlockIndex,

    /// Hash of the last persisted block
    pub previous_hash: UInt256,

    /// Multi-signature address of the validators after this block
    pub next_consensus: UInt160,

    pub my_key: PublicKey,

    /// Whether the last persisted block changed the committee
    pub validators_changed: bool,

    pub block_received_time_ms: u64,
}

impl ConsensusContext {
    /// Primary for `view_number` of the current round.
    ///
    /// `(block_index - view_number) mod n`, always non-negative.
    pub fn primary_index_for_view(&self, view_number: ViewNumber) -> ValidatorIndex {
        primary_for(self.block_index(), view_number, self.validators.len())
    }

    /// Start a new round at view 0.
    ///
    /// Every slot is cleared and the builder starts over from the ledger tip.
    /// The witness-size estimate is recomputed when unknown or when the
    /// validator count changed. Last-seen heights are re-seeded when the
    /// committee changed (or nothing was seen yet); validators carried over
    /// keep their previous height.
    ///
    /// # Errors
    ///
    /// Returns [`ConsensusError::Config`] for an empty or oversized validator
    /// set, or a block index overflow.
    pub fn reset(&self, params: ResetParams) -> Result<Self> {
        let count = params.validators.len();
        check_validator_count(count)?;
        let block_index = params
            .current_index
            .checked_add(1)
            .ok_or_else(|| ConsensusError::Config("block index overflow".into()))?;

        let witness_size = if self.witness_size == 0 || self.validators.len() != count {
            estimate_witness_size(&params.validators)?
        } else {
            self.witness_size
        };

        let my_index = position_of(&params.validators, &params.my_key);

        let mut last_seen_message: BTreeMap<ValidatorIndex, BlockIndex> =
            if params.validators_changed || self.last_seen_message.is_empty() {
                let previous: HashMap<&PublicKey, BlockIndex> = self
                    .last_seen_message
                    .iter()
                    .filter_map(|(&index, &seen)| {
                        self.validators.get(usize::from(index)).map(|key| (key, seen))
                    })
                    .collect();
                params
                    .validators
                    .iter()
                    .enumerate()
                    .map(|(i, key)| {
                        let seen = previous.get(key).copied().unwrap_or(params.current_index);
                        (i as ValidatorIndex, seen)
                    })
                    .collect()
            } else {
                self.last_seen_message.clone()
            };
        if let Some(my_index) = my_index {
            last_seen_message.insert(my_index, block_index);
        }

        let block_builder = BlockBuilder::new(BlockOptions {
            version: Some(0),
            previous_hash: Some(params.previous_hash),
            index: Some(block_index),
            next_consensus: Some(params.next_consensus),
            consensus_data: Some(ConsensusDataOptions {
                primary_index: Some(primary_for(block_index, 0, count)),
                nonce: None,
            }),
            ..Default::default()
        });

        log::info!(
            "Reset consensus for block {} with {} validators (my index {:?})",
            block_index,
            count,
            my_index
        );

        Ok(self.clone_with(ContextUpdate {
            view_number: Some(0),
            my_index: Some(my_index),
            validators: Some(params.validators),
            block_received_time_ms: Some(params.block_received_time_ms),
            verification_context: Some(TransactionVerificationContext::new()),
            block_builder: Some(block_builder),
            preparation_payloads: Some(empty_slots(count)),
            commit_payloads: Some(empty_slots(count)),
            change_view_payloads: Some(empty_slots(count)),
            last_change_view_payloads: Some(empty_slots(count)),
            last_seen_message: Some(last_seen_message),
            transactions: Some(HashMap::new()),
            transaction_hashes: Some(None),
            witness_size: Some(witness_size),
            ..Default::default()
        }))
    }

    /// Start a new round from the ledger tip and the validator registry.
    ///
    /// Resolves the tip, both committees and whether the tip changed the
    /// committee, then delegates to [`ConsensusContext::reset`].
    ///
    /// # Errors
    ///
    /// Propagates collaborator failures, and fails if the tip or its parent
    /// cannot be found in the ledger.
    pub async fn reset_from_ledger(
        &self,
        ledger: &dyn LedgerStore,
        registry: &dyn ValidatorRegistry,
        my_key: &PublicKey,
        block_received_time_ms: u64,
    ) -> Result<Self> {
        let (current_index, current_hash, validators) = futures::try_join!(
            ledger.current_index(),
            ledger.current_hash(),
            registry.next_block_validators(),
        )?;
        let next_consensus = bft_address(&validators).map_err(|e| ConsensusError::Config(e.to_string()))?;
        let validators_changed = committee_changed(ledger, current_index, current_hash).await?;

        self.reset(ResetParams {
            validators,
            current_index,
            previous_hash: current_hash,
            next_consensus,
            my_key: *my_key,
            validators_changed,
            block_received_time_ms,
        })
    }

    /// Move to `view_number` within the current round.
    ///
    /// Change views already asking for `view_number` or later are kept as
    /// the last change views; preparations and the proposal are dropped;
    /// commits and change views persist.
    ///
    /// # Errors
    ///
    /// Returns [`ConsensusError::WrongView`] unless `view_number` is ahead of
    /// the current view.
    pub fn change_view(&self, view_number: ViewNumber) -> Result<Self> {
        if view_number <= self.view_number {
            return Err(ConsensusError::WrongView {
                expected: self.view_number.saturating_add(1),
                found: view_number,
            });
        }

        let last_change_view_payloads: PayloadSlots = self
            .change_view_payloads
            .iter()
            .map(|slot| {
                slot.as_ref()
                    .filter(|payload| match payload.message() {
                        ConsensusMessage::ChangeView(message) => message.new_view_number >= view_number,
                        _ => false,
                    })
                    .cloned()
            })
            .collect();

        let primary_index = self.primary_index_for_view(view_number);
        let block_builder = self.block_builder.without_proposal();

        let mut last_seen_message = self.last_seen_message.clone();
        if let Some(my_index) = self.my_index {
            last_seen_message.insert(my_index, self.block_index());
        }

        log::info!(
            "Changing view {} -> {} for block {}, primary {}",
            self.view_number,
            view_number,
            self.block_index(),
            primary_index
        );

        Ok(self.clone_with(ContextUpdate {
            view_number: Some(view_number),
            block_builder: Some(block_builder),
            block_options: Some(BlockOptions {
                consensus_data: Some(ConsensusDataOptions {
                    primary_index: Some(primary_index),
                    nonce: None,
                }),
                ..Default::default()
            }),
            preparation_payloads: Some(empty_slots(self.validators.len())),
            last_change_view_payloads: Some(last_change_view_payloads),
            last_seen_message: Some(last_seen_message),
            transactions: Some(HashMap::new()),
            transaction_hashes: Some(None),
            ..Default::default()
        }))
    }

    /// Record a received payload.
    ///
    /// The payload must belong to this round: same block index, block
    /// version and previous hash. It is stored in the slot for its kind and
    /// its sender's last-seen height is raised. Recovery and RecoveryRequest
    /// payloads only update last-seen.
    ///
    /// Some payloads are ignored rather than rejected: a stale change view
    /// (older than the one already held), a prepare response from the
    /// primary, and a prepare response endorsing something other than the
    /// held prepare request. A prepare request drops earlier responses that
    /// endorse a different hash.
    ///
    /// # Errors
    ///
    /// * [`ConsensusError::WrongRound`] - block index differs from the round's
    /// * [`ConsensusError::WrongVersion`] - block version differs
    /// * [`ConsensusError::WrongPreviousHash`] - payload extends another tip
    /// * [`ConsensusError::UnknownValidator`] - sender outside the validator set
    /// * [`ConsensusError::WrongView`] - preparation for another view
    /// * [`ConsensusError::NotPrimary`] - prepare request from a backup
    /// * [`ConsensusError::ConflictingPayload`] - slot already holds a
    ///   different payload
    pub fn with_payload(&self, payload: ConsensusPayload) -> Result<Self> {
        let block_index = self.block_index();
        if payload.block_index() != block_index {
            return Err(ConsensusError::WrongRound {
                expected: block_index,
                found: payload.block_index(),
            });
        }
        self.check_chain(payload.version(), payload.previous_hash())?;
        let index = payload.validator_index();
        let slot = usize::from(index);
        if slot >= self.validators.len() {
            return Err(ConsensusError::UnknownValidator {
                index: slot,
                count: self.validators.len(),
            });
        }

        let payload = Arc::new(payload);
        let mut update = ContextUpdate::default();
        match payload.message() {
            ConsensusMessage::ChangeView(message) => {
                if let Some(existing) = self.change_view_payload(index) {
                    if existing.hash() == payload.hash() {
                        return Ok(self.clone());
                    }
                    let held = match existing.message() {
                        ConsensusMessage::ChangeView(held) => held.new_view_number,
                        _ => 0,
                    };
                    if message.new_view_number == held {
                        return Err(self.conflict("change view", index, message.new_view_number));
                    }
                    if message.new_view_number < held {
                        log::debug!(
                            "Ignoring stale change view to {} from validator {}, holding {}",
                            message.new_view_number,
                            index,
                            held
                        );
                        return Ok(self.clone());
                    }
                }
                update.change_view_payloads = Some(with_slot(&self.change_view_payloads, slot, &payload));
            }
            ConsensusMessage::PrepareRequest(request) => {
                self.check_view(request.header.view_number)?;
                self.check_chain(request.version, &request.previous_hash)?;
                let primary = self.primary_index().ok_or(ConsensusError::MissingPrimaryIndex)?;
                if index != primary {
                    return Err(ConsensusError::NotPrimary {
                        expected: primary,
                        found: index,
                    });
                }
                if self.occupied(&self.preparation_payloads, &payload, "preparation")? {
                    return Ok(self.clone());
                }
                let endorsed: PayloadSlots = self
                    .preparation_payloads
                    .iter()
                    .map(|slot| {
                        slot.as_ref()
                            .filter(|held| match held.message() {
                                ConsensusMessage::PrepareResponse(response) => {
                                    response.preparation_hash == payload.hash()
                                }
                                _ => true,
                            })
                            .cloned()
                    })
                    .collect();
                let dropped = self.preparation_payloads.iter().flatten().count()
                    - endorsed.iter().flatten().count();
                if dropped > 0 {
                    log::debug!(
                        "Dropped {} prepare responses not endorsing request {}",
                        dropped,
                        payload.hash()
                    );
                }
                update.preparation_payloads = Some(with_slot(&endorsed, slot, &payload));
                update.block_options = Some(BlockOptions {
                    version: Some(request.version),
                    timestamp: Some(request.timestamp),
                    next_consensus: Some(request.next_consensus),
                    consensus_data: Some(ConsensusDataOptions {
                        primary_index: None,
                        nonce: Some(request.nonce),
                    }),
                    ..Default::default()
                });
                update.transaction_hashes = Some(Some(request.transaction_hashes.clone()));
                let mut transactions: HashMap<UInt256, Transaction> = self
                    .transactions
                    .iter()
                    .filter(|(hash, _)| request.transaction_hashes.contains(hash))
                    .map(|(hash, tx)| (*hash, tx.clone()))
                    .collect();
                transactions.insert(request.primary_transaction.hash(), request.primary_transaction.clone());
                update.transactions = Some(transactions);
            }
            ConsensusMessage::PrepareResponse(response) => {
                self.check_view(response.header.view_number)?;
                let primary = self.primary_index();
                if primary == Some(index) {
                    log::debug!("Ignoring prepare response from primary {}", index);
                    return Ok(self.clone());
                }
                if let Some(request) = primary.and_then(|primary| self.preparation_payload(primary)) {
                    if request.hash() != response.preparation_hash {
                        log::debug!(
                            "Ignoring prepare response from validator {} for {}, request is {}",
                            index,
                            response.preparation_hash,
                            request.hash()
                        );
                        return Ok(self.clone());
                    }
                }
                if self.occupied(&self.preparation_payloads, &payload, "preparation")? {
                    return Ok(self.clone());
                }
                update.preparation_payloads = Some(with_slot(&self.preparation_payloads, slot, &payload));
            }
            ConsensusMessage::Commit(_) => {
                if self.occupied(&self.commit_payloads, &payload, "commit")? {
                    return Ok(self.clone());
                }
                update.commit_payloads = Some(with_slot(&self.commit_payloads, slot, &payload));
            }
            ConsensusMessage::RecoveryRequest(_) | ConsensusMessage::Recovery(_) => {}
        }

        log::debug!(
            "Accepted {} from validator {} for block {} view {}",
            payload.message().message_type(),
            index,
            block_index,
            payload.message().view_number()
        );

        let next = self.clone_with(update);
        Ok(next.with_last_seen(index, block_index))
    }

    /// Add proposed transactions obtained from the local pool.
    ///
    /// Only transactions named by the current proposal are kept; each one is
    /// recorded in the verification context once.
    pub fn with_transactions<'a>(&self, candidates: impl IntoIterator<Item = &'a Transaction>) -> Self {
        let Some(hashes) = &self.transaction_hashes else {
            return self.clone();
        };
        let mut transactions = self.transactions.clone();
        let mut verification_context = self.verification_context.clone();
        for tx in candidates {
            let hash = tx.hash();
            if hashes.contains(&hash) && !transactions.contains_key(&hash) {
                verification_context.add_transaction(tx);
                transactions.insert(hash, tx.clone());
            }
        }
        self.clone_with(ContextUpdate {
            transactions: Some(transactions),
            verification_context: Some(verification_context),
            ..Default::default()
        })
    }

    /// Proposed hashes not yet held, in proposal order.
    pub fn missing_transactions(&self) -> Vec<UInt256> {
        self.transaction_hashes
            .iter()
            .flatten()
            .filter(|hash| !self.transactions.contains_key(*hash))
            .copied()
            .collect()
    }

    /// Raise the last-seen height of `validator_index` to `block_index`.
    ///
    /// Heights never move backwards.
    pub fn with_last_seen(&self, validator_index: ValidatorIndex, block_index: BlockIndex) -> Self {
        let current = self.last_seen_message.get(&validator_index).copied();
        if current.map_or(false, |seen| seen >= block_index) {
            return self.clone();
        }
        let mut last_seen_message = self.last_seen_message.clone();
        last_seen_message.insert(validator_index, block_index);
        self.clone_with(ContextUpdate {
            last_seen_message: Some(last_seen_message),
            ..Default::default()
        })
    }

    /// Wrap `message` in a payload for the current round.
    ///
    /// The witness pairs `invocation_script` with the signature contract of
    /// `validators[message.validator_index()]`.
    pub fn create_payload(&self, message: ConsensusMessage, invocation_script: Vec<u8>) -> Result<ConsensusPayload> {
        let key = self.validator_key(message.validator_index())?;
        let verification = signature_redeem_script(key);
        Ok(self
            .unsigned_payload(message)?
            .with_witness(Witness::new(invocation_script, verification)))
    }

    /// Wrap `message` in a payload signed by `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsensusError::NotValidator`] if this node has no index or
    /// `key` is not the key of the message's validator.
    pub fn sign_payload(&self, message: ConsensusMessage, key: &KeyPair, magic: u32) -> Result<ConsensusPayload> {
        if self.my_index.is_none() || self.validator_key(message.validator_index())? != &key.public_key() {
            return Err(ConsensusError::NotValidator);
        }
        Ok(self.unsigned_payload(message)?.sign(key, magic))
    }

    fn unsigned_payload(&self, message: ConsensusMessage) -> Result<UnsignedConsensusPayload> {
        Ok(UnsignedConsensusPayload {
            version: self.block_builder.version.unwrap_or(0),
            previous_hash: self
                .block_builder
                .previous_hash
                .ok_or(ConsensusError::MissingBlockField("previous_hash"))?,
            block_index: self
                .block_builder
                .index
                .ok_or(ConsensusError::MissingBlockField("index"))?,
            validator_index: message.validator_index(),
            message,
        })
    }

    /// Fill the merkle root from the proposed transaction hashes.
    ///
    /// Unchanged when the hashes are unknown or the root is already set.
    pub fn ensure_header(&self) -> Result<Self> {
        let Some(hashes) = &self.transaction_hashes else {
            return Ok(self.clone());
        };
        if self.block_builder.merkle_root.is_some() {
            return Ok(self.clone());
        }
        let consensus_data = self.block_builder.consensus_data()?;
        let leaves: Vec<UInt256> = std::iter::once(consensus_data.hash())
            .chain(hashes.iter().copied())
            .collect();
        Ok(self.clone_with(ContextUpdate {
            block_options: Some(BlockOptions {
                merkle_root: Some(merkle_root(&leaves)),
                ..Default::default()
            }),
            ..Default::default()
        }))
    }

    /// Select the proposal from `transactions`, in order, within the block
    /// limits of `config`.
    ///
    /// Selection stops at the first transaction that would exceed the block
    /// size or system-fee limit. Accepted transactions are recorded in
    /// `verification_context`, which becomes the round's context.
    pub fn ensure_max_block_limitation(
        &self,
        transactions: &[Transaction],
        config: &ConsensusConfig,
        mut verification_context: TransactionVerificationContext,
    ) -> Self {
        let candidates = &transactions[..transactions.len().min(config.max_transactions_per_block)];

        let mut hashes = Vec::with_capacity(candidates.len());
        let mut selected = HashMap::with_capacity(candidates.len());
        let mut block_size = self.expected_block_size_without_transactions(candidates.len());
        let mut system_fee = 0u64;
        for tx in candidates {
            block_size += tx.size();
            if block_size > config.max_block_size {
                log::debug!("Block size limit reached after {} transactions", hashes.len());
                break;
            }
            system_fee = system_fee.saturating_add(tx.system_fee);
            if system_fee > config.max_block_system_fee {
                log::debug!("Block system fee limit reached after {} transactions", hashes.len());
                break;
            }
            let hash = tx.hash();
            verification_context.add_transaction(tx);
            hashes.push(hash);
            selected.insert(hash, tx.clone());
        }

        if hashes.len() < transactions.len() {
            log::info!(
                "Proposal trimmed from {} to {} transactions",
                transactions.len(),
                hashes.len()
            );
        }

        self.clone_with(ContextUpdate {
            verification_context: Some(verification_context),
            transactions: Some(selected),
            transaction_hashes: Some(Some(hashes)),
            ..Default::default()
        })
    }

    /// Serialized size of the block with the transactions gathered so far.
    pub fn expected_block_size(&self) -> usize {
        self.expected_block_size_without_transactions(self.transactions.len())
            + self.transactions.values().map(Serializable::size).sum::<usize>()
    }

    fn expected_block_size_without_transactions(&self, transaction_count: usize) -> usize {
        HEADER_UNSIGNED_SIZE
            + 1
            + self.witness_size
            + var_int_size(transaction_count as u64 + 1)
            + CONSENSUS_DATA_SIZE
    }

    /// Total system fee of the transactions gathered so far.
    pub fn expected_block_system_fee(&self) -> u64 {
        self.transactions
            .values()
            .fold(0u64, |total, tx| total.saturating_add(tx.system_fee))
    }

    /// Assemble the final block from the commits of the current view.
    ///
    /// The first M commits found (in validator order) form the
    /// multi-signature witness; signatures are ordered by public key, as the
    /// redeem script orders its keys. Returns the updated context alongside
    /// the block.
    ///
    /// # Errors
    ///
    /// * [`ConsensusError::MissingBlockField`] - no proposal in this view
    /// * [`ConsensusError::InsufficientCommits`] - fewer than M commits
    /// * [`ConsensusError::MissingTransaction`] - a proposed transaction is
    ///   not held locally
    pub fn create_block(&self) -> Result<(Self, Block)> {
        let context = self.ensure_header()?;
        let hashes = context
            .transaction_hashes
            .as_ref()
            .ok_or(ConsensusError::MissingBlockField("transactions"))?;

        let m = context.m();
        let mut signers: Vec<(PublicKey, SignatureBytes)> = context
            .commit_payloads
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| match slot.as_deref().map(ConsensusPayload::message) {
                Some(ConsensusMessage::Commit(commit)) if commit.header.view_number == context.view_number => {
                    context.validators.get(i).map(|key| (*key, commit.signature))
                }
                _ => None,
            })
            .take(m)
            .collect();
        if signers.len() < m {
            return Err(ConsensusError::InsufficientCommits {
                found: signers.len(),
                required: m,
            });
        }
        signers.sort_by(|a, b| a.0.cmp(&b.0));
        let signatures: Vec<SignatureBytes> = signers.iter().map(|(_, signature)| *signature).collect();
        let verification = multisig_redeem_script(m, &context.validators)
            .map_err(|e| ConsensusError::Config(e.to_string()))?;
        let witness = Witness::new(multi_invocation_script(&signatures), verification);

        let transactions = hashes
            .iter()
            .map(|hash| {
                context
                    .transactions
                    .get(hash)
                    .cloned()
                    .ok_or(ConsensusError::MissingTransaction(*hash))
            })
            .collect::<Result<Vec<_>>>()?;

        let context = context.clone_with(ContextUpdate {
            block_options: Some(BlockOptions {
                witness: Some(witness),
                transactions: Some(transactions),
                ..Default::default()
            }),
            ..Default::default()
        });
        let block = context.block_builder.get_block()?;
        log::info!(
            "Created block {} at height {} with {} transactions in view {}",
            block.hash(),
            block.index(),
            block.transactions().len(),
            context.view_number
        );
        Ok((context, block))
    }

    /// Build a Recovery message describing this node's view of the round.
    ///
    /// # Errors
    ///
    /// Returns [`ConsensusError::NotValidator`] on a watch-only node.
    pub fn make_recovery_message(&self) -> Result<Recovery> {
        let my_index = self.my_index.ok_or(ConsensusError::NotValidator)?;

        let change_view_messages = self
            .last_change_view_payloads
            .iter()
            .flatten()
            .filter_map(|payload| ChangeViewPayloadCompact::from_payload(payload))
            .take(self.m())
            .collect();

        let prepare_request = match (&self.transaction_hashes, self.primary_index()) {
            (Some(_), Some(primary)) => match self.preparation_payload(primary).map(ConsensusPayload::message) {
                Some(ConsensusMessage::PrepareRequest(request)) => Some(request.clone()),
                _ => None,
            },
            _ => None,
        };
        let preparation_hash = if prepare_request.is_none() {
            self.majority_preparation_hash()
        } else {
            None
        };

        let preparation_messages = self
            .preparation_payloads
            .iter()
            .flatten()
            .filter_map(|payload| PreparationPayloadCompact::from_payload(payload))
            .collect();

        let commit_messages = if self.commit_sent() {
            self.commit_payloads
                .iter()
                .flatten()
                .filter_map(|payload| CommitPayloadCompact::from_payload(payload))
                .collect()
        } else {
            Vec::new()
        };

        Ok(Recovery {
            header: MessageHeader::new(self.view_number, self.block_index(), my_index),
            change_view_messages,
            prepare_request,
            preparation_hash,
            preparation_messages,
            commit_messages,
        })
    }

    /// Preparation hash endorsed by the most PrepareResponses; ties go to
    /// the hash seen first.
    fn majority_preparation_hash(&self) -> Option<UInt256> {
        let mut counts: Vec<(UInt256, usize)> = Vec::new();
        for payload in self.preparation_payloads.iter().flatten() {
            if let ConsensusMessage::PrepareResponse(response) = payload.message() {
                match counts.iter_mut().find(|(hash, _)| *hash == response.preparation_hash) {
                    Some((_, count)) => *count += 1,
                    None => counts.push((response.preparation_hash, 1)),
                }
            }
        }
        counts
            .iter()
            .fold(None, |best: Option<&(UInt256, usize)>, entry| match best {
                Some(b) if b.1 >= entry.1 => Some(b),
                _ => Some(entry),
            })
            .map(|(hash, _)| *hash)
    }

    fn validator_key(&self, index: ValidatorIndex) -> Result<&PublicKey> {
        self.validators
            .get(usize::from(index))
            .ok_or(ConsensusError::UnknownValidator {
                index: usize::from(index),
                count: self.validators.len(),
            })
    }

    /// Block version and previous hash must match the round's.
    fn check_chain(&self, version: u32, previous_hash: &UInt256) -> Result<()> {
        let expected_version = self.block_builder.version.unwrap_or(0);
        if version != expected_version {
            return Err(ConsensusError::WrongVersion {
                expected: expected_version,
                found: version,
            });
        }
        let expected_hash = self
            .block_builder
            .previous_hash
            .ok_or(ConsensusError::MissingBlockField("previous_hash"))?;
        if *previous_hash != expected_hash {
            return Err(ConsensusError::WrongPreviousHash {
                expected: expected_hash,
                found: *previous_hash,
            });
        }
        Ok(())
    }

    fn check_view(&self, view_number: ViewNumber) -> Result<()> {
        if view_number != self.view_number {
            return Err(ConsensusError::WrongView {
                expected: self.view_number,
                found: view_number,
            });
        }
        Ok(())
    }

    /// `Ok(true)` if the slot already holds this exact payload.
    fn occupied(&self, slots: &PayloadSlots, payload: &ConsensusPayload, kind: &'static str) -> Result<bool> {
        match slots.get(usize::from(payload.validator_index())).and_then(Option::as_ref) {
            None => Ok(false),
            Some(existing) if existing.hash() == payload.hash() => Ok(true),
            Some(_) => Err(self.conflict(kind, payload.validator_index(), payload.message().view_number())),
        }
    }

    fn conflict(&self, kind: &'static str, validator_index: ValidatorIndex, view_number: ViewNumber) -> ConsensusError {
        log::warn!(
            "Conflicting {} payload from validator {} in view {} for block {}",
            kind,
            validator_index,
            view_number,
            self.block_index()
        );
        ConsensusError::ConflictingPayload {
            kind,
            validator_index,
            view_number,
        }
    }
}

/// Copy of `slots` with `payload` stored at `index`.
fn with_slot(slots: &PayloadSlots, index: usize, payload: &Arc<ConsensusPayload>) -> PayloadSlots {
    let mut slots = slots.clone();
    if let Some(entry) = slots.get_mut(index) {
        *entry = Some(payload.clone());
    }
    slots
}

fn primary_for(block_index: BlockIndex, view_number: ViewNumber, validators: usize) -> ValidatorIndex {
    if validators == 0 {
        return 0;
    }
    (i64::from(block_index) - i64::from(view_number)).rem_euclid(validators as i64) as ValidatorIndex
}

fn estimate_witness_size(validators: &[PublicKey]) -> Result<usize> {
    let m = get_m(validators.len());
    let verification =
        multisig_redeem_script(m, validators).map_err(|e| ConsensusError::Config(e.to_string()))?;
    Ok(Witness::new(multi_invocation_script(&vec![[0u8; 64]; m]), verification).size())
}

async fn committee_changed(ledger: &dyn LedgerStore, current_index: BlockIndex, current_hash: UInt256) -> Result<bool> {
    if current_index == 0 {
        return Ok(false);
    }
    let current = ledger
        .trimmed_block(current_hash)
        .await?
        .ok_or_else(|| anyhow::anyhow!("ledger tip {} not found", current_hash))?;
    let previous = ledger
        .header(HashOrIndex::Hash(current.header.previous_hash))
        .await?
        .ok_or_else(|| anyhow::anyhow!("parent {} of ledger tip not found", current.header.previous_hash))?;
    Ok(current.header.next_consensus != previous.next_consensus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ChangeView, ChangeViewReason, Commit, PrepareRequest, PrepareResponse, RecoveryRequest};
    use crate::testing::{
        init_logger, sample_transaction, validator_keys, validator_public_keys, MockLedgerStore,
        MockValidatorRegistry, TEST_MAGIC,
    };
    use dbft_traits::{Header, SignatureWitnessVerifier};

    fn round(n: u8, my_index: usize) -> (Vec<KeyPair>, ConsensusContext) {
        let keys = validator_keys(n);
        let validators = validator_public_keys(n);
        let context = ConsensusContext::new(Default::default())
            .reset(ResetParams {
                my_key: validators[my_index],
                validators,
                current_index: 9,
                previous_hash: UInt256::new([3; 32]),
                next_consensus: UInt160::new([4; 20]),
                validators_changed: false,
                block_received_time_ms: 1_000,
            })
            .unwrap();
        (keys, context)
    }

    fn change_view(context: &ConsensusContext, keys: &[KeyPair], index: u8, view: u8, new_view: u8) -> ConsensusPayload {
        let message = ChangeView {
            header: MessageHeader::new(view, context.block_index(), index),
            new_view_number: new_view,
            timestamp: 5,
            reason: ChangeViewReason::Timeout,
        };
        context
            .sign_payload(message.into(), &keys[usize::from(index)], TEST_MAGIC)
            .unwrap()
    }

    fn prepare_request(context: &ConsensusContext, keys: &[KeyPair], tx: &Transaction) -> ConsensusPayload {
        let primary = context.primary_index().unwrap();
        let message = PrepareRequest {
            header: MessageHeader::new(context.view_number(), context.block_index(), primary),
            version: 0,
            previous_hash: UInt256::new([3; 32]),
            timestamp: 77,
            nonce: 42,
            next_consensus: UInt160::new([4; 20]),
            transaction_hashes: vec![tx.hash()],
            primary_transaction: tx.clone(),
            signature: [0; 64],
        };
        context
            .sign_payload(message.into(), &keys[usize::from(primary)], TEST_MAGIC)
            .unwrap()
    }

    fn response(context: &ConsensusContext, keys: &[KeyPair], index: u8, hash: UInt256) -> ConsensusPayload {
        let message = PrepareResponse {
            header: MessageHeader::new(context.view_number(), context.block_index(), index),
            preparation_hash: hash,
        };
        context
            .sign_payload(message.into(), &keys[usize::from(index)], TEST_MAGIC)
            .unwrap()
    }

    fn commit(context: &ConsensusContext, keys: &[KeyPair], index: u8) -> ConsensusPayload {
        let signature = match context
            .ensure_header()
            .and_then(|c| c.block_builder().header_hash_data(TEST_MAGIC))
        {
            Ok(hash_data) => keys[usize::from(index)].sign(&hash_data),
            // No proposal yet
            Err(_) => [0; 64],
        };
        let message = Commit {
            header: MessageHeader::new(context.view_number(), context.block_index(), index),
            signature,
        };
        context
            .sign_payload(message.into(), &keys[usize::from(index)], TEST_MAGIC)
            .unwrap()
    }

    #[test]
    fn test_primary_rotation_is_non_negative() {
        let (_, context) = round(4, 0);
        assert_eq!(context.block_index(), 10);
        assert_eq!(context.primary_index(), Some(2));
        assert_eq!(context.primary_index_for_view(1), 1);
        assert_eq!(context.primary_index_for_view(3), 3);
        assert_eq!(context.primary_index_for_view(11), 3);
    }

    #[test]
    fn test_reset_seeds_last_seen_and_witness_size() {
        let (_, context) = round(4, 1);
        assert_eq!(context.last_seen_message().len(), 4);
        assert_eq!(context.last_seen_message()[&1], 10);
        assert_eq!(context.last_seen_message()[&0], 9);
        assert_eq!(context.count_failed(), 0);
        assert!(context.witness_size() > 0);
        assert!(context.transaction_hashes().is_none());
    }

    #[test]
    fn test_reset_keeps_last_seen_of_remaining_validators() {
        let (_, context) = round(4, 0);
        let context = context.with_last_seen(3, 10);
        let mut validators = validator_public_keys(5);
        validators.swap(0, 3);
        let next = context
            .reset(ResetParams {
                my_key: validators[1],
                validators,
                current_index: 10,
                previous_hash: UInt256::new([5; 32]),
                next_consensus: UInt160::new([4; 20]),
                validators_changed: true,
                block_received_time_ms: 2_000,
            })
            .unwrap();
        // Old validator 3 now sits at index 0
        assert_eq!(next.last_seen_message()[&0], 10);
        // Old validator 4 was unknown before
        assert_eq!(next.last_seen_message()[&4], 10);
        assert_eq!(next.witness_size(), estimate_witness_size(next.validators()).unwrap());
    }

    #[test]
    fn test_change_view_clears_proposal_and_carries_change_views() {
        init_logger();
        let (keys, context) = round(4, 0);
        let tx = sample_transaction(1, 0, 10);
        let context = context
            .with_payload(prepare_request(&context, &keys, &tx))
            .unwrap();
        let context = context
            .with_payload(change_view(&context, &keys, 1, 0, 1))
            .unwrap()
            .with_payload(change_view(&context, &keys, 3, 0, 2))
            .unwrap();
        assert!(context.request_sent_or_received());

        let next = context.change_view(2).unwrap();
        assert_eq!(next.view_number(), 2);
        assert_eq!(next.primary_index(), Some(0));
        assert!(next.preparation_payloads().iter().all(Option::is_none));
        assert!(next.transaction_hashes().is_none());
        assert!(next.block_builder().timestamp.is_none());
        // Only the change view asking for view >= 2 is carried forward
        assert!(next.last_change_view_payloads()[1].is_none());
        assert!(next.last_change_view_payloads()[3].is_some());
        assert!(next.change_view_payloads()[1].is_some());

        assert!(matches!(next.change_view(2), Err(ConsensusError::WrongView { .. })));
    }

    #[test]
    fn test_with_payload_rejects_foreign_rounds_and_conflicts() {
        let (keys, context) = round(4, 0);
        let other = context.clone_with(ContextUpdate {
            block_options: Some(BlockOptions {
                index: Some(11),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert!(matches!(
            context.with_payload(commit(&other, &keys, 1)),
            Err(ConsensusError::WrongRound { expected: 10, found: 11 })
        ));

        let tx = sample_transaction(1, 0, 10);
        let context = context.with_payload(prepare_request(&context, &keys, &tx)).unwrap();
        let first = commit(&context, &keys, 1);
        let context = context.with_payload(first.clone()).unwrap();
        // Identical re-delivery is a no-op
        let again = context.with_payload(first).unwrap();
        assert_eq!(again.count_committed(), 1);

        let forged = context
            .create_payload(
                Commit {
                    header: MessageHeader::new(0, 10, 1),
                    signature: [9; 64],
                }
                .into(),
                vec![],
            )
            .unwrap();
        assert!(matches!(
            context.with_payload(forged),
            Err(ConsensusError::ConflictingPayload { kind: "commit", validator_index: 1, .. })
        ));
    }

    #[test]
    fn test_with_payload_rejects_other_chain() {
        let (keys, context) = round(4, 0);
        let fork = |version: u32, previous_hash: UInt256| {
            context.clone_with(ContextUpdate {
                block_options: Some(BlockOptions {
                    version: Some(version),
                    previous_hash: Some(previous_hash),
                    ..Default::default()
                }),
                ..Default::default()
            })
        };

        let other = fork(7, UInt256::new([0x11; 32]));
        let payload = response(&other, &keys, 1, UInt256::new([1; 32]));
        assert!(matches!(
            context.with_payload(payload),
            Err(ConsensusError::WrongVersion { expected: 0, found: 7 })
        ));

        let other = fork(0, UInt256::new([0x11; 32]));
        let payload = response(&other, &keys, 1, UInt256::new([1; 32]));
        assert!(matches!(
            context.with_payload(payload),
            Err(ConsensusError::WrongPreviousHash { .. })
        ));
        assert!(context.preparation_payloads().iter().all(Option::is_none));

        // The envelope matches but the proposed block extends another tip
        let tx = sample_transaction(1, 0, 10);
        let message = PrepareRequest {
            header: MessageHeader::new(0, 10, 2),
            version: 0,
            previous_hash: UInt256::new([0x11; 32]),
            timestamp: 1,
            nonce: 1,
            next_consensus: UInt160::ZERO,
            transaction_hashes: vec![tx.hash()],
            primary_transaction: tx,
            signature: [0; 64],
        };
        let payload = context.sign_payload(message.into(), &keys[2], TEST_MAGIC).unwrap();
        assert!(matches!(
            context.with_payload(payload),
            Err(ConsensusError::WrongPreviousHash { .. })
        ));
    }

    #[test]
    fn test_prepare_responses_must_endorse_request() {
        let (keys, context) = round(4, 0);
        let tx = sample_transaction(1, 0, 10);
        let bogus = UInt256::new([0x42; 32]);

        // Held before the request arrives, dropped once it does
        let context = context.with_payload(response(&context, &keys, 1, bogus)).unwrap();
        assert!(context.preparation_payload(1).is_some());
        let request = prepare_request(&context, &keys, &tx);
        let request_hash = request.hash();
        let context = context.with_payload(request).unwrap();
        assert!(context.preparation_payload(1).is_none());
        assert!(context.preparation_payload(2).is_some());

        let ignored = context.with_payload(response(&context, &keys, 3, bogus)).unwrap();
        assert!(ignored.preparation_payload(3).is_none());

        let context = context
            .with_payload(response(&context, &keys, 3, request_hash))
            .unwrap();
        assert!(context.preparation_payload(3).is_some());

        // The primary does not respond to its own request
        let context = context.with_payload(response(&context, &keys, 0, request_hash)).unwrap();
        let from_primary = response(&context, &keys, 2, request_hash);
        let unchanged = context.with_payload(from_primary).unwrap();
        assert_eq!(
            unchanged.preparation_payload(2).map(ConsensusPayload::hash),
            Some(request_hash)
        );
        assert_eq!(context.preparation_payloads().iter().flatten().count(), 3);
    }

    #[test]
    fn test_prepare_request_must_come_from_primary() {
        let (keys, context) = round(4, 0);
        let tx = sample_transaction(1, 0, 10);
        let message = PrepareRequest {
            header: MessageHeader::new(0, 10, 1),
            version: 0,
            previous_hash: UInt256::new([3; 32]),
            timestamp: 1,
            nonce: 1,
            next_consensus: UInt160::ZERO,
            transaction_hashes: vec![tx.hash()],
            primary_transaction: tx,
            signature: [0; 64],
        };
        let payload = context.sign_payload(message.into(), &keys[1], TEST_MAGIC).unwrap();
        assert!(matches!(
            context.with_payload(payload),
            Err(ConsensusError::NotPrimary { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn test_stale_change_view_is_ignored() {
        let (keys, context) = round(4, 0);
        let context = context.with_payload(change_view(&context, &keys, 1, 0, 3)).unwrap();
        let stale = context.with_payload(change_view(&context, &keys, 1, 0, 2)).unwrap();
        assert_eq!(stale.expected_view()[1], 3);
        assert!(matches!(
            context.with_payload(change_view(&context, &keys, 1, 1, 3)),
            Err(ConsensusError::ConflictingPayload { kind: "change view", .. })
        ));
    }

    fn recovery_request(context: &ConsensusContext, index: u8) -> ConsensusMessage {
        RecoveryRequest {
            header: MessageHeader::new(context.view_number(), context.block_index(), index),
            timestamp: 3,
        }
        .into()
    }

    #[test]
    fn test_sign_payload_requires_own_key() {
        let (keys, context) = round(4, 0);
        assert!(matches!(
            context.sign_payload(recovery_request(&context, 2), &keys[3], TEST_MAGIC),
            Err(ConsensusError::NotValidator)
        ));
    }

    #[test]
    fn test_recovery_request_only_updates_last_seen() {
        let (keys, context) = round(4, 0);
        let context = context.with_last_seen(2, 3);
        let payload = context
            .sign_payload(recovery_request(&context, 2), &keys[2], TEST_MAGIC)
            .unwrap();
        let next = context.with_payload(payload).unwrap();
        assert_eq!(next.last_seen_message()[&2], 10);
        assert_eq!(next.count_committed(), 0);
        assert!(next.preparation_payloads().iter().all(Option::is_none));
    }

    #[test]
    fn test_ensure_max_block_limitation_respects_limits() {
        let (_, context) = round(4, 2);
        let transactions: Vec<Transaction> = (0..5).map(|i| sample_transaction(1, i, 10)).collect();

        let config = ConsensusConfig {
            max_transactions_per_block: 4,
            max_block_system_fee: 25,
            ..Default::default()
        };
        let limited = context.ensure_max_block_limitation(&transactions, &config, TransactionVerificationContext::new());
        assert_eq!(limited.transaction_hashes().unwrap(), &[transactions[0].hash(), transactions[1].hash()]);
        assert_eq!(limited.expected_block_system_fee(), 20);
        assert_eq!(limited.verification_context().sender_fee(&UInt160::new([1; 20])), 22);

        let tiny = ConsensusConfig {
            max_block_size: context.expected_block_size_without_transactions(5) + transactions[0].size(),
            ..Default::default()
        };
        let limited = context.ensure_max_block_limitation(&transactions, &tiny, TransactionVerificationContext::new());
        assert_eq!(limited.transaction_hashes().unwrap().len(), 1);
    }

    #[test]
    fn test_expected_block_size_matches_block() {
        let (keys, context) = round(4, 2);
        let transactions = vec![sample_transaction(1, 0, 1), sample_transaction(2, 1, 1)];
        let context = context
            .ensure_max_block_limitation(&transactions, &ConsensusConfig::default(), TransactionVerificationContext::new())
            .clone_with(ContextUpdate {
                block_options: Some(BlockOptions {
                    timestamp: Some(1),
                    ..Default::default()
                }),
                ..Default::default()
            });
        let mut context = context;
        for i in [0u8, 1, 2] {
            let payload = commit(&context, &keys, i);
            context = context.with_payload(payload).unwrap();
        }
        let (_, block) = context.create_block().unwrap();
        assert_eq!(context.expected_block_size(), block.size());
    }

    #[tokio::test]
    async fn test_create_block_needs_m_commits_in_current_view() {
        let (keys, context) = round(4, 0);
        let tx = sample_transaction(1, 0, 10);
        let mut context = context.with_payload(prepare_request(&context, &keys, &tx)).unwrap();
        for i in [3u8, 1] {
            let payload = commit(&context, &keys, i);
            context = context.with_payload(payload).unwrap();
        }
        assert!(matches!(
            context.create_block(),
            Err(ConsensusError::InsufficientCommits { found: 2, required: 3 })
        ));

        let payload = commit(&context, &keys, 0);
        let context = context.with_payload(payload).unwrap();
        let (context, block) = context.create_block().unwrap();
        assert!(context.block_sent());
        assert_eq!(block.index(), 10);
        assert_eq!(block.transactions(), &[tx]);
        assert_eq!(block.consensus_data().nonce, 42);

        let outcome = SignatureWitnessVerifier.check(
            &block.header().witness.script_hash(),
            &block.header().witness,
            &block.header().hash_data(TEST_MAGIC),
        );
        assert!(outcome.valid);
    }

    #[test]
    fn test_create_block_reports_missing_transaction() {
        let (keys, context) = round(4, 0);
        let tx = sample_transaction(1, 0, 10);
        let mut context = context.with_payload(prepare_request(&context, &keys, &tx)).unwrap();
        let missing = UInt256::new([7; 32]);
        context = context.clone_with(ContextUpdate {
            transaction_hashes: Some(Some(vec![tx.hash(), missing])),
            ..Default::default()
        });
        for i in 0..3u8 {
            let payload = commit(&context, &keys, i);
            context = context.with_payload(payload).unwrap();
        }
        assert!(matches!(
            context.create_block(),
            Err(ConsensusError::MissingTransaction(hash)) if hash == missing
        ));
    }

    #[test]
    fn test_recovery_message_prefers_prepare_request() {
        let (keys, context) = round(4, 0);
        let tx = sample_transaction(1, 0, 10);
        let request = prepare_request(&context, &keys, &tx);
        let request_hash = request.hash();
        let context = context.with_payload(request).unwrap();
        let context = context
            .with_payload(response(&context, &keys, 1, request_hash))
            .unwrap();

        let recovery = context.make_recovery_message().unwrap();
        assert_eq!(recovery.header.validator_index, 0);
        assert!(recovery.prepare_request.is_some());
        assert!(recovery.preparation_hash.is_none());
        assert_eq!(recovery.preparation_messages.len(), 2);
        assert!(recovery.commit_messages.is_empty());
    }

    #[test]
    fn test_recovery_message_uses_majority_preparation_hash() {
        let (keys, context) = round(7, 0);
        let a = UInt256::new([1; 32]);
        let b = UInt256::new([2; 32]);
        let mut context = context;
        for (index, hash) in [(1u8, a), (2, b), (4, b), (5, a), (6, b)] {
            let payload = response(&context, &keys, index, hash);
            context = context.with_payload(payload).unwrap();
        }
        let recovery = context.make_recovery_message().unwrap();
        assert!(recovery.prepare_request.is_none());
        assert_eq!(recovery.preparation_hash, Some(b));

        let watcher = context.clone_with(ContextUpdate {
            my_index: Some(None),
            ..Default::default()
        });
        assert!(matches!(watcher.make_recovery_message(), Err(ConsensusError::NotValidator)));
    }

    #[test]
    fn test_recovery_message_includes_commits_once_committed() {
        let (keys, context) = round(4, 0);
        let tx = sample_transaction(1, 0, 10);
        let context = context.with_payload(prepare_request(&context, &keys, &tx)).unwrap();
        let context = context.with_payload(commit(&context, &keys, 1)).unwrap();
        assert!(context.make_recovery_message().unwrap().commit_messages.is_empty());

        let context = context.with_payload(commit(&context, &keys, 0)).unwrap();
        assert_eq!(context.make_recovery_message().unwrap().commit_messages.len(), 2);
    }

    #[tokio::test]
    async fn test_reset_from_ledger() {
        let validators = validator_public_keys(4);
        let ledger = MockLedgerStore::new(Header::default());
        let tip = ledger.push(Header {
            next_consensus: UInt160::new([1; 20]),
            ..Default::default()
        });
        let registry = MockValidatorRegistry::fixed(validators.clone());

        let context = ConsensusContext::new(Default::default())
            .reset_from_ledger(&ledger, &registry, &validators[3], 500)
            .await
            .unwrap();
        assert_eq!(context.block_index(), 2);
        assert_eq!(context.block_builder().previous_hash, Some(tip));
        assert_eq!(context.block_builder().next_consensus, Some(bft_address(&validators).unwrap()));
        assert_eq!(context.my_index(), Some(3));
        assert_eq!(context.primary_index(), Some(2));
        assert_eq!(context.block_received_time_ms(), 500);
    }
}
