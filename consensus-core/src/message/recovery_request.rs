// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use dbft_traits::{BinaryReader, BinaryWriter, FormatError};

use super::{MessageHeader, MessageType};

/// Ask peers for a [`Recovery`](super::Recovery) of the current round
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoveryRequest {
    pub header: MessageHeader,
    pub timestamp: u64,
}

impl RecoveryRequest {
    pub(crate) fn write(&self, writer: &mut BinaryWriter) {
        self.header.write(writer, MessageType::RecoveryRequest);
        writer.write_u64(self.timestamp);
    }

    pub(crate) fn read(reader: &mut BinaryReader<'_>, validators_count: usize) -> Result<Self, FormatError> {
        let header = MessageHeader::read(reader, MessageType::RecoveryRequest, validators_count)?;
        let timestamp = reader.read_u64()?;
        Ok(Self { header, timestamp })
    }
}
