// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use dbft_traits::{BinaryReader, BinaryWriter, FormatError, UInt256};

use super::{MessageHeader, MessageType};

/// A backup's endorsement of the primary's prepare request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrepareResponse {
    pub header: MessageHeader,

    /// Hash of the prepare-request payload being endorsed
    pub preparation_hash: UInt256,
}

impl PrepareResponse {
    pub(crate) fn write(&self, writer: &mut BinaryWriter) {
        self.header.write(writer, MessageType::PrepareResponse);
        writer.write_uint256(&self.preparation_hash);
    }

    pub(crate) fn read(reader: &mut BinaryReader<'_>, validators_count: usize) -> Result<Self, FormatError> {
        let header = MessageHeader::read(reader, MessageType::PrepareResponse, validators_count)?;
        let preparation_hash = reader.read_uint256()?;
        Ok(Self {
            header,
            preparation_hash,
        })
    }
}
