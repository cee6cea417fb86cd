// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Witness verification.
//!
//! Executing arbitrary verification scripts is the VM's job, so the core asks
//! a [`WitnessVerifier`] whether a witness authorizes a given script hash.
//! [`SignatureWitnessVerifier`] handles the two standard contract shapes
//! validators use and is what the core and its tests rely on.

use crate::core::UInt160;
use crate::crypto::hash160;
use crate::script::{
    parse_invocation_signatures, parse_multisig_redeem_script, parse_signature_redeem_script,
};
use crate::witness::Witness;
use crate::Result;
use async_trait::async_trait;

/// GAS charged for one signature check.
pub const CHECK_SIG_PRICE: u64 = 1 << 15;

/// Result of running a witness.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WitnessOutcome {
    pub valid: bool,
    pub gas_consumed: u64,
}

impl WitnessOutcome {
    pub fn rejected(gas_consumed: u64) -> Self {
        Self {
            valid: false,
            gas_consumed,
        }
    }

    pub fn accepted(gas_consumed: u64) -> Self {
        Self {
            valid: true,
            gas_consumed,
        }
    }
}

/// Script/witness verification capability.
#[async_trait]
pub trait WitnessVerifier: Send + Sync {
    /// Check that `witness` authorizes `script_hash` over `hash_data`.
    ///
    /// An invalid witness is reported through [`WitnessOutcome::valid`];
    /// `Err` is reserved for failures of the verifier itself.
    async fn verify(
        &self,
        script_hash: &UInt160,
        witness: &Witness,
        hash_data: &[u8],
    ) -> Result<WitnessOutcome>;
}

/// Verifies standard single-signature and multi-signature contracts.
#[derive(Clone, Copy, Debug, Default)]
pub struct SignatureWitnessVerifier;

impl SignatureWitnessVerifier {
    /// Synchronous core of [`WitnessVerifier::verify`].
    pub fn check(&self, script_hash: &UInt160, witness: &Witness, hash_data: &[u8]) -> WitnessOutcome {
        if hash160(&witness.verification) != *script_hash {
            log::debug!("Witness script hash mismatch for {}", script_hash);
            return WitnessOutcome::rejected(0);
        }
        let Some(signatures) = parse_invocation_signatures(&witness.invocation) else {
            return WitnessOutcome::rejected(0);
        };

        if let Some(key) = parse_signature_redeem_script(&witness.verification) {
            return match signatures.as_slice() {
                [signature] if key.verify(hash_data, signature) => {
                    WitnessOutcome::accepted(CHECK_SIG_PRICE)
                }
                _ => WitnessOutcome::rejected(CHECK_SIG_PRICE),
            };
        }

        if let Some((m, keys)) = parse_multisig_redeem_script(&witness.verification) {
            if signatures.len() != m {
                return WitnessOutcome::rejected(0);
            }
            // Signatures must appear in the same order as the keys they match.
            let mut gas = 0;
            let (mut i, mut j) = (0, 0);
            while i < signatures.len() && j < keys.len() {
                gas += CHECK_SIG_PRICE;
                if keys[j].verify(hash_data, &signatures[i]) {
                    i += 1;
                }
                j += 1;
                if signatures.len() - i > keys.len() - j {
                    return WitnessOutcome::rejected(gas);
                }
            }
            return if i == signatures.len() {
                WitnessOutcome::accepted(gas)
            } else {
                WitnessOutcome::rejected(gas)
            };
        }

        log::debug!("Unsupported verification script for {}", script_hash);
        WitnessOutcome::rejected(0)
    }
}

#[async_trait]
impl WitnessVerifier for SignatureWitnessVerifier {
    async fn verify(
        &self,
        script_hash: &UInt160,
        witness: &Witness,
        hash_data: &[u8],
    ) -> Result<WitnessOutcome> {
        Ok(self.check(script_hash, witness, hash_data))
    }
}
