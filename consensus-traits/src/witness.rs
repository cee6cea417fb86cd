// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Witnesses: the invocation/verification script pair authorizing a signed
//! structure.

use crate::core::{FormatError, UInt160};
use crate::crypto::hash160;
use crate::io::{var_bytes_size, BinaryReader, BinaryWriter, Serializable};
use serde::{Deserialize, Serialize};

/// Maximum size of an invocation script.
pub const MAX_INVOCATION_SCRIPT: usize = 1024;

/// Maximum size of a verification script.
pub const MAX_VERIFICATION_SCRIPT: usize = 1024;

/// A signature (invocation) plus the contract it satisfies (verification).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    pub invocation: Vec<u8>,
    pub verification: Vec<u8>,
}

impl Witness {
    pub fn new(invocation: Vec<u8>, verification: Vec<u8>) -> Self {
        Self {
            invocation,
            verification,
        }
    }

    /// Hash of the verification script, i.e. the account this witness speaks for.
    pub fn script_hash(&self) -> UInt160 {
        hash160(&self.verification)
    }
}

impl Serializable for Witness {
    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_var_bytes(&self.invocation);
        writer.write_var_bytes(&self.verification);
    }

    fn deserialize(reader: &mut BinaryReader<'_>) -> Result<Self, FormatError> {
        let invocation = reader.read_var_bytes(MAX_INVOCATION_SCRIPT)?;
        let verification = reader.read_var_bytes(MAX_VERIFICATION_SCRIPT)?;
        Ok(Self {
            invocation,
            verification,
        })
    }

    fn size(&self) -> usize {
        var_bytes_size(self.invocation.len()) + var_bytes_size(self.verification.len())
    }
}

/// Read a witness list that must hold exactly one entry.
///
/// # Errors
///
/// Returns [`FormatError::WitnessCount`] for any other count.
pub fn read_single_witness(reader: &mut BinaryReader<'_>) -> Result<Witness, FormatError> {
    let count = reader.read_var_int(u64::from(u8::MAX))? as usize;
    if count != 1 {
        return Err(FormatError::WitnessCount(count));
    }
    <Witness as Serializable>::deserialize(reader)
}

/// Write a one-element witness list.
pub fn write_single_witness(writer: &mut BinaryWriter, witness: &Witness) {
    writer.write_var_int(1);
    Serializable::serialize(witness, writer);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_witness_roundtrip_and_size() {
        let witness = Witness::new(vec![1, 2, 3], vec![4; 40]);
        let bytes = witness.to_bytes();
        assert_eq!(bytes.len(), witness.size());
        assert_eq!(Witness::from_bytes(&bytes).unwrap(), witness);
    }

    #[test]
    fn test_single_witness_count_enforced() {
        let mut writer = BinaryWriter::new();
        writer.write_var_int(2);
        Serializable::serialize(&Witness::default(), &mut writer);
        Serializable::serialize(&Witness::default(), &mut writer);
        let bytes = writer.into_bytes();
        let err = read_single_witness(&mut BinaryReader::new(&bytes)).unwrap_err();
        assert_eq!(err, FormatError::WitnessCount(2));

        let err = read_single_witness(&mut BinaryReader::new(&[0])).unwrap_err();
        assert_eq!(err, FormatError::WitnessCount(0));
    }

    #[test]
    fn test_oversized_invocation_rejected() {
        let witness = Witness::new(vec![0; MAX_INVOCATION_SCRIPT + 1], vec![]);
        assert!(Witness::from_bytes(&witness.to_bytes()).is_err());
    }
}
