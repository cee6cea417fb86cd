// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use dbft_traits::{BinaryReader, BinaryWriter, FormatError, SignatureBytes};

use super::{MessageHeader, MessageType};

/// A validator's signature over the proposed block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    pub header: MessageHeader,

    /// Signature over the block's header hash-data
    pub signature: SignatureBytes,
}

impl Commit {
    pub(crate) fn write(&self, writer: &mut BinaryWriter) {
        self.header.write(writer, MessageType::Commit);
        writer.write_bytes(&self.signature);
    }

    pub(crate) fn read(reader: &mut BinaryReader<'_>, validators_count: usize) -> Result<Self, FormatError> {
        let header = MessageHeader::read(reader, MessageType::Commit, validators_count)?;
        let signature = reader.read_array_fixed()?;
        Ok(Self { header, signature })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ConsensusMessage;

    #[test]
    fn test_roundtrip() {
        let message = ConsensusMessage::from(Commit {
            header: MessageHeader::new(2, 100, 6),
            signature: [7; 64],
        });
        assert_eq!(ConsensusMessage::decode(&message.encode(), 7).unwrap(), message);
    }

    #[test]
    fn test_truncated_signature_rejected() {
        let mut bytes = ConsensusMessage::from(Commit {
            header: MessageHeader::new(0, 1, 0),
            signature: [1; 64],
        })
        .encode();
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(
            ConsensusMessage::decode(&bytes, 4),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }
}
