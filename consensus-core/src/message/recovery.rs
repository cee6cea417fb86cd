// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use dbft_traits::{BinaryReader, BinaryWriter, FormatError, UInt256};

use super::{ChangeView, Commit, MessageHeader, MessageType, PrepareRequest, PrepareResponse};
use crate::context::ConsensusContext;
use crate::error::Result;
use crate::payload::compact::{read_records, write_records};
use crate::payload::{
    ChangeViewPayloadCompact, CommitPayloadCompact, ConsensusPayload, PreparationPayloadCompact,
};

/// Snapshot of a round sent to a lagging or reconnecting validator
///
/// Carries at most one compact record per validator per phase, plus either
/// the full prepare request or just the hash the backups endorsed. The
/// receiver expands the records back into payloads with the
/// `*_payloads` methods below.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recovery {
    pub header: MessageHeader,
    pub change_view_messages: Vec<ChangeViewPayloadCompact>,
    pub prepare_request: Option<PrepareRequest>,

    /// Only meaningful when `prepare_request` is absent
    pub preparation_hash: Option<UInt256>,

    pub preparation_messages: Vec<PreparationPayloadCompact>,
    pub commit_messages: Vec<CommitPayloadCompact>,
}

impl Recovery {
    pub(crate) fn write(&self, writer: &mut BinaryWriter) {
        self.header.write(writer, MessageType::Recovery);
        write_records(writer, &self.change_view_messages);
        match (&self.prepare_request, &self.preparation_hash) {
            (Some(request), _) => {
                writer.write_bool(true);
                request.write(writer);
            }
            (None, Some(hash)) => {
                writer.write_bool(false);
                writer.write_var_bytes(hash.as_bytes());
            }
            (None, None) => {
                writer.write_bool(false);
                writer.write_var_int(0);
            }
        }
        write_records(writer, &self.preparation_messages);
        write_records(writer, &self.commit_messages);
    }

    pub(crate) fn read(reader: &mut BinaryReader<'_>, validators_count: usize) -> std::result::Result<Self, FormatError> {
        let header = MessageHeader::read(reader, MessageType::Recovery, validators_count)?;
        let change_view_messages = read_records(reader, validators_count)?;

        let (prepare_request, preparation_hash) = if reader.read_bool()? {
            let request = PrepareRequest::read(reader, validators_count)?;
            if request.header.block_index != header.block_index {
                return Err(FormatError::PayloadMismatch("block index"));
            }
            (Some(request), None)
        } else {
            match reader.read_var_int(UInt256::LEN as u64)? as usize {
                0 => (None, None),
                len if len == UInt256::LEN => (None, Some(reader.read_uint256()?)),
                found => {
                    return Err(FormatError::InvalidLength {
                        what: "preparation hash",
                        expected: UInt256::LEN,
                        found,
                    })
                }
            }
        };

        let preparation_messages = read_records(reader, validators_count)?;
        let commit_messages = read_records(reader, validators_count)?;

        Ok(Self {
            header,
            change_view_messages,
            prepare_request,
            preparation_hash,
            preparation_messages,
            commit_messages,
        })
    }

    /// Rebuild the ChangeView payloads, target view and reason included.
    pub fn change_view_payloads(
        &self,
        context: &ConsensusContext,
        recovery_payload: &ConsensusPayload,
    ) -> Result<Vec<ConsensusPayload>> {
        self.change_view_messages
            .iter()
            .map(|item| {
                let header = MessageHeader::new(
                    item.original_view_number,
                    self.header.block_index,
                    item.validator_index,
                );
                let message = ChangeView {
                    header,
                    new_view_number: item.new_view_number,
                    timestamp: item.timestamp,
                    reason: item.reason,
                };
                recovery_payload.reconstruct(
                    context.validators(),
                    message.into(),
                    item.invocation_script.clone(),
                )
            })
            .collect()
    }

    /// Rebuild the Commit payloads.
    pub fn commit_payloads(
        &self,
        context: &ConsensusContext,
        recovery_payload: &ConsensusPayload,
    ) -> Result<Vec<ConsensusPayload>> {
        self.commit_messages
            .iter()
            .map(|item| {
                let message = Commit {
                    header: MessageHeader::new(item.view_number, self.header.block_index, item.validator_index),
                    signature: item.signature,
                };
                recovery_payload.reconstruct(
                    context.validators(),
                    message.into(),
                    item.invocation_script.clone(),
                )
            })
            .collect()
    }

    /// Rebuild the primary's PrepareRequest payload.
    ///
    /// `None` when the message carries no request, the context has no
    /// primary, the request is not from that primary, or there is no
    /// preparation record from it.
    pub fn prepare_request_payload(
        &self,
        context: &ConsensusContext,
        recovery_payload: &ConsensusPayload,
    ) -> Result<Option<ConsensusPayload>> {
        let (Some(request), Some(primary)) = (&self.prepare_request, context.primary_index()) else {
            return Ok(None);
        };
        if request.header.validator_index != primary {
            return Ok(None);
        }
        let Some(record) = self
            .preparation_messages
            .iter()
            .find(|item| item.validator_index == primary)
        else {
            return Ok(None);
        };
        recovery_payload
            .reconstruct(
                context.validators(),
                request.clone().into(),
                record.invocation_script.clone(),
            )
            .map(Some)
    }

    /// Rebuild the backups' PrepareResponse payloads.
    ///
    /// Endorses the carried preparation hash, or else the hash of the
    /// context's own prepare request from the primary. Returns nothing when
    /// neither is known. The primary's own record is skipped.
    pub fn prepare_response_payloads(
        &self,
        context: &ConsensusContext,
        recovery_payload: &ConsensusPayload,
    ) -> Result<Vec<ConsensusPayload>> {
        let primary = context.primary_index();
        let preparation_hash = self.preparation_hash.or_else(|| {
            primary
                .and_then(|index| context.preparation_payload(index))
                .map(|payload| payload.hash())
        });
        let Some(preparation_hash) = preparation_hash else {
            return Ok(Vec::new());
        };

        self.preparation_messages
            .iter()
            .filter(|item| Some(item.validator_index) != primary)
            .map(|item| {
                let message = PrepareResponse {
                    header: MessageHeader::new(
                        self.header.view_number,
                        self.header.block_index,
                        item.validator_index,
                    ),
                    preparation_hash,
                };
                recovery_payload.reconstruct(
                    context.validators(),
                    message.into(),
                    item.invocation_script.clone(),
                )
            })
            .collect()
    }
}
