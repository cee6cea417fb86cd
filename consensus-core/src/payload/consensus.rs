// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use dbft_traits::crypto::{hash256, hash_data};
use dbft_traits::script::{invocation_script, signature_redeem_script, signature_script_hash};
use dbft_traits::witness::{read_single_witness, write_single_witness};
use dbft_traits::{
    BinaryReader, BinaryWriter, FormatError, KeyPair, PublicKey, UInt256, Witness, WitnessVerifier,
};

use super::MAX_PAYLOAD_DATA;
use crate::error::{ConsensusError, Result};
use crate::message::{check_validator_index, ConsensusMessage};
use crate::types::{BlockIndex, ValidatorIndex};

/// A consensus message bound to a round, before it is witnessed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnsignedConsensusPayload {
    pub version: u32,
    pub previous_hash: UInt256,
    pub block_index: BlockIndex,
    pub validator_index: ValidatorIndex,
    pub message: ConsensusMessage,
}

fn write_unsigned(
    writer: &mut BinaryWriter,
    version: u32,
    previous_hash: &UInt256,
    block_index: BlockIndex,
    validator_index: ValidatorIndex,
    data: &[u8],
) {
    writer.write_u32(version);
    writer.write_uint256(previous_hash);
    writer.write_u32(block_index);
    writer.write_u8(validator_index);
    writer.write_var_bytes(data);
}

impl UnsignedConsensusPayload {
    /// Attach a witness, producing a complete payload.
    pub fn with_witness(self, witness: Witness) -> ConsensusPayload {
        let data = self.message.encode();
        let mut writer = BinaryWriter::new();
        write_unsigned(
            &mut writer,
            self.version,
            &self.previous_hash,
            self.block_index,
            self.validator_index,
            &data,
        );
        let hash = hash256(&writer.into_bytes());
        ConsensusPayload {
            version: self.version,
            previous_hash: self.previous_hash,
            block_index: self.block_index,
            validator_index: self.validator_index,
            data,
            message: self.message,
            witness,
            hash,
        }
    }

    /// Sign with `key` over the payload hash-data for network `magic`.
    pub fn sign(self, key: &KeyPair, magic: u32) -> ConsensusPayload {
        let verification = signature_redeem_script(&key.public_key());
        let mut payload = self.with_witness(Witness::new(Vec::new(), verification));
        let signature = key.sign(&payload.hash_data(magic));
        payload.witness.invocation = invocation_script(&signature);
        payload
    }
}

/// A witnessed consensus payload
///
/// The message is decoded and the hash computed once, when the payload is
/// built; both are read-only afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsensusPayload {
    version: u32,
    previous_hash: UInt256,
    block_index: BlockIndex,
    validator_index: ValidatorIndex,
    data: Vec<u8>,
    message: ConsensusMessage,
    witness: Witness,
    hash: UInt256,
}

impl ConsensusPayload {
    /// Decode a payload for a round with `validators_count` validators.
    ///
    /// # Errors
    ///
    /// Fails unless there is exactly one witness, the validator index is in
    /// range, the embedded message decodes, and the message's block and
    /// validator index agree with the envelope's.
    pub fn decode(bytes: &[u8], validators_count: usize) -> std::result::Result<Self, FormatError> {
        let mut reader = BinaryReader::new(bytes);
        let payload = Self::read(&mut reader, validators_count)?;
        reader.finish()?;
        Ok(payload)
    }

    pub(crate) fn read(
        reader: &mut BinaryReader<'_>,
        validators_count: usize,
    ) -> std::result::Result<Self, FormatError> {
        let start = reader.position();
        let version = reader.read_u32()?;
        let previous_hash = reader.read_uint256()?;
        let block_index = reader.read_u32()?;
        let validator_index = reader.read_u8()?;
        check_validator_index(validator_index, validators_count)?;
        let data = reader.read_var_bytes(MAX_PAYLOAD_DATA)?;
        let unsigned_len = reader.position() - start;
        let witness = read_single_witness(reader)?;

        let message = ConsensusMessage::decode(&data, validators_count)?;
        if message.block_index() != block_index {
            return Err(FormatError::PayloadMismatch("block index"));
        }
        if message.validator_index() != validator_index {
            return Err(FormatError::PayloadMismatch("validator index"));
        }

        // Re-encode the unsigned part rather than slicing the reader so the
        // hash always covers canonical bytes.
        let mut writer = BinaryWriter::with_capacity(unsigned_len);
        write_unsigned(&mut writer, version, &previous_hash, block_index, validator_index, &data);
        let hash = hash256(&writer.into_bytes());

        Ok(Self {
            version,
            previous_hash,
            block_index,
            validator_index,
            data,
            message,
            witness,
            hash,
        })
    }

    pub(crate) fn write(&self, writer: &mut BinaryWriter) {
        write_unsigned(
            writer,
            self.version,
            &self.previous_hash,
            self.block_index,
            self.validator_index,
            &self.data,
        );
        write_single_witness(writer, &self.witness);
    }

    /// Wire bytes of the payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::new();
        self.write(&mut writer);
        writer.into_bytes()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn previous_hash(&self) -> &UInt256 {
        &self.previous_hash
    }

    pub fn block_index(&self) -> BlockIndex {
        self.block_index
    }

    pub fn validator_index(&self) -> ValidatorIndex {
        self.validator_index
    }

    /// Encoded message bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn message(&self) -> &ConsensusMessage {
        &self.message
    }

    pub fn witness(&self) -> &Witness {
        &self.witness
    }

    /// Identity hash: double SHA-256 of the unsigned bytes.
    pub fn hash(&self) -> UInt256 {
        self.hash
    }

    /// Data the sender signs: `magic (u32 LE) || hash`.
    pub fn hash_data(&self, magic: u32) -> Vec<u8> {
        hash_data(magic, &self.hash)
    }

    /// Build a payload for another validator sharing this payload's round.
    ///
    /// The verification script is derived from `validators`, and
    /// `invocation_script` becomes the witness invocation. Used to expand the
    /// compact records of a Recovery message.
    pub fn reconstruct(
        &self,
        validators: &[PublicKey],
        message: ConsensusMessage,
        invocation_script: Vec<u8>,
    ) -> Result<ConsensusPayload> {
        let validator_index = message.validator_index();
        let key = validators
            .get(usize::from(validator_index))
            .ok_or(ConsensusError::UnknownValidator {
                index: usize::from(validator_index),
                count: validators.len(),
            })?;
        let unsigned = UnsignedConsensusPayload {
            version: self.version,
            previous_hash: self.previous_hash,
            block_index: self.block_index,
            validator_index,
            message,
        };
        Ok(unsigned.with_witness(Witness::new(invocation_script, signature_redeem_script(key))))
    }

    /// Check the witness speaks for `validators[validator_index]` and its
    /// signature covers this payload.
    ///
    /// # Errors
    ///
    /// Returns [`ConsensusError::UnknownValidator`] if the index is outside
    /// `validators` and propagates verifier failures. An invalid witness is
    /// `Ok(false)`.
    pub async fn verify_witness(
        &self,
        validators: &[PublicKey],
        verifier: &dyn WitnessVerifier,
        magic: u32,
    ) -> Result<bool> {
        let key = validators
            .get(usize::from(self.validator_index))
            .ok_or(ConsensusError::UnknownValidator {
                index: usize::from(self.validator_index),
                count: validators.len(),
            })?;
        let script_hash = signature_script_hash(key);
        let outcome = verifier
            .verify(&script_hash, &self.witness, &self.hash_data(magic))
            .await?;
        if !outcome.valid {
            log::debug!(
                "Rejected witness on {} payload {} from validator {}",
                self.message.message_type(),
                self.hash,
                self.validator_index
            );
        }
        Ok(outcome.valid)
    }
}
