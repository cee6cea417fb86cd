// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use dbft_traits::{BinaryReader, BinaryWriter, FormatError};

use super::{ChangeViewReason, MessageHeader, MessageType};
use crate::types::ViewNumber;

/// Request to move the round to a new view
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeView {
    pub header: MessageHeader,

    /// View the sender wants to move to; never zero
    pub new_view_number: ViewNumber,

    /// Sender's clock when the request was made, in milliseconds
    pub timestamp: u64,

    pub reason: ChangeViewReason,
}

impl ChangeView {
    pub(crate) fn write(&self, writer: &mut BinaryWriter) {
        self.header.write(writer, MessageType::ChangeView);
        writer.write_u8(self.new_view_number);
        writer.write_u64(self.timestamp);
        writer.write_u8(self.reason as u8);
    }

    pub(crate) fn read(reader: &mut BinaryReader<'_>, validators_count: usize) -> Result<Self, FormatError> {
        let header = MessageHeader::read(reader, MessageType::ChangeView, validators_count)?;
        let new_view_number = reader.read_u8()?;
        if new_view_number == 0 {
            return Err(FormatError::ZeroNewViewNumber);
        }
        let timestamp = reader.read_u64()?;
        let reason = ChangeViewReason::try_from(reader.read_u8()?)?;
        Ok(Self {
            header,
            new_view_number,
            timestamp,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ConsensusMessage;

    fn change_view(new_view_number: ViewNumber) -> ChangeView {
        ChangeView {
            header: MessageHeader::new(0, 12, 1),
            new_view_number,
            timestamp: 1_600_000_000_000,
            reason: ChangeViewReason::TxNotFound,
        }
    }

    #[test]
    fn test_roundtrip_keeps_reason() {
        let message = ConsensusMessage::from(change_view(1));
        let decoded = ConsensusMessage::decode(&message.encode(), 4).unwrap();
        match decoded {
            ConsensusMessage::ChangeView(cv) => {
                assert_eq!(cv.reason, ChangeViewReason::TxNotFound);
                assert_eq!(cv.new_view_number, 1);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_zero_new_view_rejected() {
        let bytes = ConsensusMessage::from(change_view(0)).encode();
        assert_eq!(
            ConsensusMessage::decode(&bytes, 4).unwrap_err(),
            FormatError::ZeroNewViewNumber
        );
    }

    #[test]
    fn test_unknown_reason_rejected() {
        let mut bytes = ConsensusMessage::from(change_view(1)).encode();
        let last = bytes.len() - 1;
        bytes[last] = 0x09;
        assert_eq!(
            ConsensusMessage::decode(&bytes, 4).unwrap_err(),
            FormatError::UnknownChangeViewReason(0x09)
        );
    }
}
