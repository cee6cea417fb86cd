// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Compact payload records carried inside a Recovery message
//!
//! A compact record keeps only what cannot be re-derived: the validator
//! index, the message fields that differ per validator, and the invocation
//! script. The verification script is rebuilt from the receiver's own
//! validator list, never taken from the wire.

use dbft_traits::witness::MAX_INVOCATION_SCRIPT;
use dbft_traits::{BinaryReader, BinaryWriter, FormatError, SignatureBytes};
use std::collections::HashSet;

use super::ConsensusPayload;
use crate::message::{check_validator_index, ChangeViewReason, ConsensusMessage};
use crate::types::{ValidatorIndex, ViewNumber};

/// Wire behaviour shared by the compact record kinds
pub(crate) trait CompactRecord: Sized {
    fn validator_index(&self) -> ValidatorIndex;
    fn write(&self, writer: &mut BinaryWriter);
    fn read(reader: &mut BinaryReader<'_>) -> Result<Self, FormatError>;
}

/// Read a record array bounded by the validator count.
///
/// Every index must name a validator and appear at most once.
pub(crate) fn read_records<T: CompactRecord>(
    reader: &mut BinaryReader<'_>,
    validators_count: usize,
) -> Result<Vec<T>, FormatError> {
    let records = reader.read_array(validators_count, T::read)?;
    let mut seen = HashSet::with_capacity(records.len());
    for record in &records {
        let index = record.validator_index();
        check_validator_index(index, validators_count)?;
        if !seen.insert(index) {
            return Err(FormatError::DuplicateValidatorIndex(index));
        }
    }
    Ok(records)
}

pub(crate) fn write_records<T: CompactRecord>(writer: &mut BinaryWriter, records: &[T]) {
    writer.write_array(records, |w, record| record.write(w));
}

/// Compact form of a ChangeView payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeViewPayloadCompact {
    pub validator_index: ValidatorIndex,
    pub original_view_number: ViewNumber,
    pub new_view_number: ViewNumber,
    pub timestamp: u64,
    pub reason: ChangeViewReason,
    pub invocation_script: Vec<u8>,
}

impl ChangeViewPayloadCompact {
    /// Compact `payload`, or `None` if it does not carry a ChangeView.
    pub fn from_payload(payload: &ConsensusPayload) -> Option<Self> {
        match payload.message() {
            ConsensusMessage::ChangeView(message) => Some(Self {
                validator_index: payload.validator_index(),
                original_view_number: message.header.view_number,
                new_view_number: message.new_view_number,
                timestamp: message.timestamp,
                reason: message.reason,
                invocation_script: payload.witness().invocation.clone(),
            }),
            _ => None,
        }
    }
}

impl CompactRecord for ChangeViewPayloadCompact {
    fn validator_index(&self) -> ValidatorIndex {
        self.validator_index
    }

    fn write(&self, writer: &mut BinaryWriter) {
        writer.write_u8(self.validator_index);
        writer.write_u8(self.original_view_number);
        writer.write_u8(self.new_view_number);
        writer.write_u64(self.timestamp);
        writer.write_u8(self.reason as u8);
        writer.write_var_bytes(&self.invocation_script);
    }

    fn read(reader: &mut BinaryReader<'_>) -> Result<Self, FormatError> {
        let validator_index = reader.read_u8()?;
        let original_view_number = reader.read_u8()?;
        let new_view_number = reader.read_u8()?;
        if new_view_number == 0 {
            return Err(FormatError::ZeroNewViewNumber);
        }
        Ok(Self {
            validator_index,
            original_view_number,
            new_view_number,
            timestamp: reader.read_u64()?,
            reason: ChangeViewReason::try_from(reader.read_u8()?)?,
            invocation_script: reader.read_var_bytes(MAX_INVOCATION_SCRIPT)?,
        })
    }
}

/// Compact form of a PrepareRequest or PrepareResponse payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparationPayloadCompact {
    pub validator_index: ValidatorIndex,
    pub invocation_script: Vec<u8>,
}

impl PreparationPayloadCompact {
    pub fn from_payload(payload: &ConsensusPayload) -> Option<Self> {
        match payload.message() {
            ConsensusMessage::PrepareRequest(_) | ConsensusMessage::PrepareResponse(_) => Some(Self {
                validator_index: payload.validator_index(),
                invocation_script: payload.witness().invocation.clone(),
            }),
            _ => None,
        }
    }
}

impl CompactRecord for PreparationPayloadCompact {
    fn validator_index(&self) -> ValidatorIndex {
        self.validator_index
    }

    fn write(&self, writer: &mut BinaryWriter) {
        writer.write_u8(self.validator_index);
        writer.write_var_bytes(&self.invocation_script);
    }

    fn read(reader: &mut BinaryReader<'_>) -> Result<Self, FormatError> {
        Ok(Self {
            validator_index: reader.read_u8()?,
            invocation_script: reader.read_var_bytes(MAX_INVOCATION_SCRIPT)?,
        })
    }
}

/// Compact form of a Commit payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitPayloadCompact {
    pub view_number: ViewNumber,
    pub validator_index: ValidatorIndex,
    pub signature: SignatureBytes,
    pub invocation_script: Vec<u8>,
}

impl CommitPayloadCompact {
    pub fn from_payload(payload: &ConsensusPayload) -> Option<Self> {
        match payload.message() {
            ConsensusMessage::Commit(message) => Some(Self {
                view_number: message.header.view_number,
                validator_index: payload.validator_index(),
                signature: message.signature,
                invocation_script: payload.witness().invocation.clone(),
            }),
            _ => None,
        }
    }
}

impl CompactRecord for CommitPayloadCompact {
    fn validator_index(&self) -> ValidatorIndex {
        self.validator_index
    }

    fn write(&self, writer: &mut BinaryWriter) {
        writer.write_u8(self.view_number);
        writer.write_u8(self.validator_index);
        writer.write_bytes(&self.signature);
        writer.write_var_bytes(&self.invocation_script);
    }

    fn read(reader: &mut BinaryReader<'_>) -> Result<Self, FormatError> {
        Ok(Self {
            view_number: reader.read_u8()?,
            validator_index: reader.read_u8()?,
            signature: reader.read_array_fixed()?,
            invocation_script: reader.read_var_bytes(MAX_INVOCATION_SCRIPT)?,
        })
    }
}
