// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Signed envelopes for consensus messages
//!
//! A [`ConsensusPayload`] binds one message to a round (version, previous
//! hash, block index) and to the validator that sent it, and carries exactly
//! one witness. For gossip it is wrapped in an [`ExtensiblePayload`]. The
//! compact records in [`compact`] are the stripped-down forms a Recovery
//! message carries.

pub mod compact;
mod consensus;
mod extensible;

pub use compact::{ChangeViewPayloadCompact, CommitPayloadCompact, PreparationPayloadCompact};
pub use consensus::{ConsensusPayload, UnsignedConsensusPayload};
pub use extensible::{
    ExtensiblePayload, PayloadRejection, PayloadVerification, UnsignedExtensiblePayload,
};

/// Maximum size of the data carried by a payload
pub const MAX_PAYLOAD_DATA: usize = 0x0200_0000;
