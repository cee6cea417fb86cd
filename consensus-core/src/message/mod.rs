// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Consensus messages
//!
//! Six message kinds drive a round. Every message starts with the same
//! header:
//!
//! ```text
//! type (u8) | view_number (u8) | block_index (u32) | validator_index (u8)
//! ```
//!
//! followed by the kind-specific body. Decoding is fail-closed: unknown type
//! bytes, out-of-range validator indexes and trailing bytes are rejected.

mod change_view;
mod commit;
mod prepare_request;
mod prepare_response;
mod recovery;
mod recovery_request;

pub use change_view::ChangeView;
pub use commit::Commit;
pub use prepare_request::{PrepareRequest, MAX_TRANSACTION_HASHES};
pub use prepare_response::PrepareResponse;
pub use recovery::Recovery;
pub use recovery_request::RecoveryRequest;

use dbft_traits::{BinaryReader, BinaryWriter, FormatError};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{BlockIndex, ValidatorIndex, ViewNumber};

/// Type discriminant of a consensus message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    ChangeView = 0x00,
    PrepareRequest = 0x20,
    PrepareResponse = 0x21,
    Commit = 0x30,
    RecoveryRequest = 0x40,
    Recovery = 0x41,
}

impl TryFrom<u8> for MessageType {
    type Error = FormatError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(MessageType::ChangeView),
            0x20 => Ok(MessageType::PrepareRequest),
            0x21 => Ok(MessageType::PrepareResponse),
            0x30 => Ok(MessageType::Commit),
            0x40 => Ok(MessageType::RecoveryRequest),
            0x41 => Ok(MessageType::Recovery),
            other => Err(FormatError::UnknownMessageType(other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::ChangeView => "ChangeView",
            MessageType::PrepareRequest => "PrepareRequest",
            MessageType::PrepareResponse => "PrepareResponse",
            MessageType::Commit => "Commit",
            MessageType::RecoveryRequest => "RecoveryRequest",
            MessageType::Recovery => "Recovery",
        };
        f.write_str(name)
    }
}

/// Why a validator asked to leave the current view
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChangeViewReason {
    Timeout = 0x00,
    ChangeAgreement = 0x01,
    TxNotFound = 0x02,
    TxRejectedByPolicy = 0x03,
    TxInvalid = 0x04,
    BlockRejectedByPolicy = 0x05,
}

impl TryFrom<u8> for ChangeViewReason {
    type Error = FormatError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(ChangeViewReason::Timeout),
            0x01 => Ok(ChangeViewReason::ChangeAgreement),
            0x02 => Ok(ChangeViewReason::TxNotFound),
            0x03 => Ok(ChangeViewReason::TxRejectedByPolicy),
            0x04 => Ok(ChangeViewReason::TxInvalid),
            0x05 => Ok(ChangeViewReason::BlockRejectedByPolicy),
            other => Err(FormatError::UnknownChangeViewReason(other)),
        }
    }
}

/// Fields shared by every consensus message
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MessageHeader {
    pub view_number: ViewNumber,
    pub block_index: BlockIndex,
    pub validator_index: ValidatorIndex,
}

impl MessageHeader {
    pub fn new(view_number: ViewNumber, block_index: BlockIndex, validator_index: ValidatorIndex) -> Self {
        Self {
            view_number,
            block_index,
            validator_index,
        }
    }

    pub(crate) fn write(&self, writer: &mut BinaryWriter, message_type: MessageType) {
        writer.write_u8(message_type as u8);
        writer.write_u8(self.view_number);
        writer.write_u32(self.block_index);
        writer.write_u8(self.validator_index);
    }

    /// Read a header whose type byte must be `expected`.
    pub(crate) fn read(
        reader: &mut BinaryReader<'_>,
        expected: MessageType,
        validators_count: usize,
    ) -> Result<Self, FormatError> {
        let found = reader.read_u8()?;
        if found != expected as u8 {
            return Err(FormatError::MessageTypeMismatch {
                expected: expected as u8,
                found,
            });
        }
        let view_number = reader.read_u8()?;
        let block_index = reader.read_u32()?;
        let validator_index = reader.read_u8()?;
        check_validator_index(validator_index, validators_count)?;
        Ok(Self {
            view_number,
            block_index,
            validator_index,
        })
    }
}

pub(crate) fn check_validator_index(index: ValidatorIndex, validators_count: usize) -> Result<(), FormatError> {
    if usize::from(index) >= validators_count {
        return Err(FormatError::ValidatorIndexOutOfRange {
            index,
            count: validators_count,
        });
    }
    Ok(())
}

/// A decoded consensus message
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsensusMessage {
    ChangeView(ChangeView),
    PrepareRequest(PrepareRequest),
    PrepareResponse(PrepareResponse),
    Commit(Commit),
    RecoveryRequest(RecoveryRequest),
    Recovery(Recovery),
}

impl ConsensusMessage {
    /// Decode a message for a round with `validators_count` validators.
    ///
    /// The type byte is peeked, not consumed, so each variant decoder reads
    /// and checks the full header itself.
    ///
    /// # Errors
    ///
    /// Returns a [`FormatError`] for unknown types, malformed bodies,
    /// out-of-range validator indexes and trailing bytes.
    pub fn decode(bytes: &[u8], validators_count: usize) -> Result<Self, FormatError> {
        let mut reader = BinaryReader::new(bytes);
        let message = Self::read(&mut reader, validators_count)?;
        reader.finish()?;
        Ok(message)
    }

    pub(crate) fn read(reader: &mut BinaryReader<'_>, validators_count: usize) -> Result<Self, FormatError> {
        let message = match MessageType::try_from(reader.peek_u8()?)? {
            MessageType::ChangeView => ConsensusMessage::ChangeView(ChangeView::read(reader, validators_count)?),
            MessageType::PrepareRequest => {
                ConsensusMessage::PrepareRequest(PrepareRequest::read(reader, validators_count)?)
            }
            MessageType::PrepareResponse => {
                ConsensusMessage::PrepareResponse(PrepareResponse::read(reader, validators_count)?)
            }
            MessageType::Commit => ConsensusMessage::Commit(Commit::read(reader, validators_count)?),
            MessageType::RecoveryRequest => {
                ConsensusMessage::RecoveryRequest(RecoveryRequest::read(reader, validators_count)?)
            }
            MessageType::Recovery => ConsensusMessage::Recovery(Recovery::read(reader, validators_count)?),
        };
        Ok(message)
    }

    pub(crate) fn write(&self, writer: &mut BinaryWriter) {
        match self {
            ConsensusMessage::ChangeView(message) => message.write(writer),
            ConsensusMessage::PrepareRequest(message) => message.write(writer),
            ConsensusMessage::PrepareResponse(message) => message.write(writer),
            ConsensusMessage::Commit(message) => message.write(writer),
            ConsensusMessage::RecoveryRequest(message) => message.write(writer),
            ConsensusMessage::Recovery(message) => message.write(writer),
        }
    }

    /// Wire bytes of the message.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::new();
        self.write(&mut writer);
        writer.into_bytes()
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            ConsensusMessage::ChangeView(_) => MessageType::ChangeView,
            ConsensusMessage::PrepareRequest(_) => MessageType::PrepareRequest,
            ConsensusMessage::PrepareResponse(_) => MessageType::PrepareResponse,
            ConsensusMessage::Commit(_) => MessageType::Commit,
            ConsensusMessage::RecoveryRequest(_) => MessageType::RecoveryRequest,
            ConsensusMessage::Recovery(_) => MessageType::Recovery,
        }
    }

    pub fn header(&self) -> &MessageHeader {
        match self {
            ConsensusMessage::ChangeView(message) => &message.header,
            ConsensusMessage::PrepareRequest(message) => &message.header,
            ConsensusMessage::PrepareResponse(message) => &message.header,
            ConsensusMessage::Commit(message) => &message.header,
            ConsensusMessage::RecoveryRequest(message) => &message.header,
            ConsensusMessage::Recovery(message) => &message.header,
        }
    }

    pub fn view_number(&self) -> ViewNumber {
        self.header().view_number
    }

    pub fn block_index(&self) -> BlockIndex {
        self.header().block_index
    }

    pub fn validator_index(&self) -> ValidatorIndex {
        self.header().validator_index
    }
}

impl From<ChangeView> for ConsensusMessage {
    fn from(message: ChangeView) -> Self {
        ConsensusMessage::ChangeView(message)
    }
}

impl From<PrepareRequest> for ConsensusMessage {
    fn from(message: PrepareRequest) -> Self {
        ConsensusMessage::PrepareRequest(message)
    }
}

impl From<PrepareResponse> for ConsensusMessage {
    fn from(message: PrepareResponse) -> Self {
        ConsensusMessage::PrepareResponse(message)
    }
}

impl From<Commit> for ConsensusMessage {
    fn from(message: Commit) -> Self {
        ConsensusMessage::Commit(message)
    }
}

impl From<RecoveryRequest> for ConsensusMessage {
    fn from(message: RecoveryRequest) -> Self {
        ConsensusMessage::RecoveryRequest(message)
    }
}

impl From<Recovery> for ConsensusMessage {
    fn from(message: Recovery) -> Self {
        ConsensusMessage::Recovery(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_type_rejected() {
        let bytes = [0x22, 0, 1, 0, 0, 0, 0];
        assert_eq!(
            ConsensusMessage::decode(&bytes, 4).unwrap_err(),
            FormatError::UnknownMessageType(0x22)
        );
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(matches!(
            ConsensusMessage::decode(&[], 4),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_dispatch_and_trailing_bytes() {
        let message: ConsensusMessage = RecoveryRequest {
            header: MessageHeader::new(1, 9, 2),
            timestamp: 77,
        }
        .into();
        let mut bytes = message.encode();
        let decoded = ConsensusMessage::decode(&bytes, 4).unwrap();
        assert_eq!(decoded.message_type(), MessageType::RecoveryRequest);
        assert_eq!(decoded, message);

        bytes.push(0);
        assert_eq!(
            ConsensusMessage::decode(&bytes, 4).unwrap_err(),
            FormatError::TrailingBytes(1)
        );
    }

    #[test]
    fn test_validator_index_checked_against_count() {
        let message: ConsensusMessage = RecoveryRequest {
            header: MessageHeader::new(0, 9, 4),
            timestamp: 1,
        }
        .into();
        assert_eq!(
            ConsensusMessage::decode(&message.encode(), 4).unwrap_err(),
            FormatError::ValidatorIndexOutOfRange { index: 4, count: 4 }
        );
    }

    #[test]
    fn test_reason_codes() {
        for code in 0u8..=5 {
            assert_eq!(ChangeViewReason::try_from(code).unwrap() as u8, code);
        }
        assert!(ChangeViewReason::try_from(6).is_err());
    }
}
