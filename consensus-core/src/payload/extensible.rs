// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use dbft_traits::crypto::{hash256, hash_data};
use dbft_traits::script::{invocation_script, signature_redeem_script, signature_script_hash};
use dbft_traits::witness::{read_single_witness, write_single_witness};
use dbft_traits::{
    BinaryReader, BinaryWriter, FormatError, KeyPair, Serializable, UInt160, UInt256, Witness,
    WitnessVerifier,
};
use std::fmt;

use super::{ConsensusPayload, MAX_PAYLOAD_DATA};
use crate::error::{ConsensusError, Result};
use crate::types::{BlockIndex, CONSENSUS_CATEGORY};

const MAX_CATEGORY_LEN: usize = 32;

/// Fields of an [`ExtensiblePayload`] covered by its hash
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnsignedExtensiblePayload {
    /// Which service the payload belongs to
    pub category: String,

    /// First block height at which the payload is accepted
    pub valid_block_start: BlockIndex,

    /// First block height at which the payload is no longer accepted
    pub valid_block_end: BlockIndex,

    /// Script hash of the account that signs the payload
    pub sender: UInt160,

    pub data: Vec<u8>,
}

impl UnsignedExtensiblePayload {
    fn write(&self, writer: &mut BinaryWriter) {
        writer.write_var_string(&self.category);
        writer.write_u32(self.valid_block_start);
        writer.write_u32(self.valid_block_end);
        writer.write_uint160(&self.sender);
        writer.write_var_bytes(&self.data);
    }

    fn read(reader: &mut BinaryReader<'_>) -> std::result::Result<Self, FormatError> {
        Ok(Self {
            category: reader.read_var_string(MAX_CATEGORY_LEN)?,
            valid_block_start: reader.read_u32()?,
            valid_block_end: reader.read_u32()?,
            sender: reader.read_uint160()?,
            data: reader.read_var_bytes(MAX_PAYLOAD_DATA)?,
        })
    }

    pub fn hash(&self) -> UInt256 {
        let mut writer = BinaryWriter::new();
        self.write(&mut writer);
        hash256(&writer.into_bytes())
    }
}

/// Why an extensible payload was not accepted
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayloadRejection {
    /// The current height is outside `[valid_block_start, valid_block_end)`
    OutsideValidityWindow {
        height: BlockIndex,
        start: BlockIndex,
        end: BlockIndex,
    },

    /// The sender is not on the whitelist
    UnknownSender(UInt160),

    /// The witness does not authorize the sender over this payload
    InvalidWitness,
}

impl fmt::Display for PayloadRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadRejection::OutsideValidityWindow { height, start, end } => {
                write!(f, "height {} outside validity window [{}, {})", height, start, end)
            }
            PayloadRejection::UnknownSender(sender) => write!(f, "sender {} not whitelisted", sender),
            PayloadRejection::InvalidWitness => f.write_str("invalid witness"),
        }
    }
}

/// Outcome of [`ExtensiblePayload::verify`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayloadVerification {
    pub valid: bool,
    pub failure_reason: Option<PayloadRejection>,
    pub gas_consumed: u64,
}

impl PayloadVerification {
    fn accepted(gas_consumed: u64) -> Self {
        Self {
            valid: true,
            failure_reason: None,
            gas_consumed,
        }
    }

    fn rejected(reason: PayloadRejection, gas_consumed: u64) -> Self {
        Self {
            valid: false,
            failure_reason: Some(reason),
            gas_consumed,
        }
    }
}

/// Generic signed gossip envelope
///
/// Consensus traffic travels in extensible payloads of category `"dBFT"`
/// whose data is a serialized [`ConsensusPayload`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensiblePayload {
    unsigned: UnsignedExtensiblePayload,
    witness: Witness,
    hash: UInt256,
}

impl ExtensiblePayload {
    /// Attach an existing witness.
    pub fn with_witness(unsigned: UnsignedExtensiblePayload, witness: Witness) -> Self {
        let hash = unsigned.hash();
        Self {
            unsigned,
            witness,
            hash,
        }
    }

    /// Sign `unsigned` as its sender.
    ///
    /// Builds the single-signature contract for `key`, signs the hash-data
    /// and assembles the witness from the invocation and verification
    /// scripts.
    ///
    /// # Errors
    ///
    /// Returns [`ConsensusError::WrongSigner`] if the key's contract is not
    /// the payload's sender.
    pub fn sign(unsigned: UnsignedExtensiblePayload, key: &KeyPair, magic: u32) -> Result<Self> {
        let public_key = key.public_key();
        let signer = signature_script_hash(&public_key);
        if signer != unsigned.sender {
            return Err(ConsensusError::WrongSigner {
                sender: unsigned.sender,
                signer,
            });
        }
        let hash = unsigned.hash();
        let signature = key.sign(&hash_data(magic, &hash));
        Ok(Self {
            unsigned,
            witness: Witness::new(invocation_script(&signature), signature_redeem_script(&public_key)),
            hash,
        })
    }

    /// Wrap a consensus payload for gossip, signed by `key`.
    pub fn from_consensus(
        payload: &ConsensusPayload,
        valid_block_end: BlockIndex,
        key: &KeyPair,
        magic: u32,
    ) -> Result<Self> {
        let unsigned = UnsignedExtensiblePayload {
            category: CONSENSUS_CATEGORY.to_string(),
            valid_block_start: 0,
            valid_block_end,
            sender: signature_script_hash(&key.public_key()),
            data: payload.to_bytes(),
        };
        Self::sign(unsigned, key, magic)
    }

    /// Unwrap the consensus payload carried in `data`.
    pub fn into_consensus(&self, validators_count: usize) -> std::result::Result<ConsensusPayload, FormatError> {
        if self.unsigned.category != CONSENSUS_CATEGORY {
            return Err(FormatError::InvalidCategory(self.unsigned.category.clone()));
        }
        ConsensusPayload::decode(&self.unsigned.data, validators_count)
    }

    /// Check the payload may be relayed at `height`.
    ///
    /// Tests the validity window, then whitelist membership, then the
    /// witness. Invalid payloads are reported in the returned
    /// [`PayloadVerification`]; `Err` only signals a verifier failure.
    pub async fn verify(
        &self,
        height: BlockIndex,
        whitelist: &[UInt160],
        verifier: &dyn WitnessVerifier,
        magic: u32,
    ) -> Result<PayloadVerification> {
        let unsigned = &self.unsigned;
        if height < unsigned.valid_block_start || height >= unsigned.valid_block_end {
            return Ok(PayloadVerification::rejected(
                PayloadRejection::OutsideValidityWindow {
                    height,
                    start: unsigned.valid_block_start,
                    end: unsigned.valid_block_end,
                },
                0,
            ));
        }
        if !whitelist.contains(&unsigned.sender) {
            return Ok(PayloadVerification::rejected(
                PayloadRejection::UnknownSender(unsigned.sender),
                0,
            ));
        }
        let outcome = verifier
            .verify(&unsigned.sender, &self.witness, &self.hash_data(magic))
            .await?;
        if outcome.valid {
            Ok(PayloadVerification::accepted(outcome.gas_consumed))
        } else {
            log::warn!("Invalid witness on extensible payload {} from {}", self.hash, unsigned.sender);
            Ok(PayloadVerification::rejected(
                PayloadRejection::InvalidWitness,
                outcome.gas_consumed,
            ))
        }
    }

    pub fn unsigned(&self) -> &UnsignedExtensiblePayload {
        &self.unsigned
    }

    pub fn category(&self) -> &str {
        &self.unsigned.category
    }

    pub fn sender(&self) -> &UInt160 {
        &self.unsigned.sender
    }

    pub fn data(&self) -> &[u8] {
        &self.unsigned.data
    }

    pub fn witness(&self) -> &Witness {
        &self.witness
    }

    pub fn hash(&self) -> UInt256 {
        self.hash
    }

    pub fn hash_data(&self, magic: u32) -> Vec<u8> {
        hash_data(magic, &self.hash)
    }
}

impl Serializable for ExtensiblePayload {
    fn serialize(&self, writer: &mut BinaryWriter) {
        self.unsigned.write(writer);
        write_single_witness(writer, &self.witness);
    }

    fn deserialize(reader: &mut BinaryReader<'_>) -> std::result::Result<Self, FormatError> {
        let unsigned = UnsignedExtensiblePayload::read(reader)?;
        if unsigned.valid_block_start >= unsigned.valid_block_end {
            return Err(FormatError::PayloadMismatch("validity window"));
        }
        let witness = read_single_witness(reader)?;
        Ok(Self::with_witness(unsigned, witness))
    }
}
