// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Standard verification and invocation scripts.
//!
//! Validators are authorized by two contract shapes: a single-signature
//! contract (one public key) and an M-of-N multi-signature contract (the
//! validator set, whose hash is the next-consensus address). The core only
//! needs to build and recognize these two shapes; arbitrary scripts are the
//! VM's business.

use crate::core::UInt160;
use crate::crypto::{hash160, sha256, PublicKey, SignatureBytes, PUBLIC_KEY_LEN, SIGNATURE_LEN};
use crate::quorum::get_m;
use anyhow::{bail, ensure};

const PUSHINT16: u8 = 0x01;
const PUSHDATA1: u8 = 0x0C;
const PUSH0: u8 = 0x10;
const SYSCALL: u8 = 0x41;

/// Largest validator set a multi-signature contract may name.
pub const MAX_MULTISIG_KEYS: usize = 1024;

/// Interop identifier: first four bytes of the SHA-256 of the method name.
fn interop_id(name: &str) -> [u8; 4] {
    let digest = sha256(name.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

fn check_sig_id() -> [u8; 4] {
    interop_id("System.Crypto.CheckSig")
}

fn check_multisig_id() -> [u8; 4] {
    interop_id("System.Crypto.CheckMultisig")
}

fn emit_push_int(script: &mut Vec<u8>, value: usize) {
    if value <= 16 {
        script.push(PUSH0 + value as u8);
    } else {
        script.push(PUSHINT16);
        script.extend_from_slice(&(value as u16).to_le_bytes());
    }
}

fn emit_push_data(script: &mut Vec<u8>, data: &[u8]) {
    script.push(PUSHDATA1);
    script.push(data.len() as u8);
    script.extend_from_slice(data);
}

/// Verification script of the single-signature contract for `key`.
pub fn signature_redeem_script(key: &PublicKey) -> Vec<u8> {
    let mut script = Vec::with_capacity(2 + PUBLIC_KEY_LEN + 5);
    emit_push_data(&mut script, key.as_bytes());
    script.push(SYSCALL);
    script.extend_from_slice(&check_sig_id());
    script
}

/// Script hash (account address) of the single-signature contract for `key`.
pub fn signature_script_hash(key: &PublicKey) -> UInt160 {
    hash160(&signature_redeem_script(key))
}

/// Verification script of an `m`-of-`keys.len()` multi-signature contract.
///
/// Keys are sorted so that every node derives the same script regardless of
/// the order the validator list was produced in.
///
/// # Errors
///
/// Returns an error unless `1 <= m <= keys.len() <= MAX_MULTISIG_KEYS`.
pub fn multisig_redeem_script(m: usize, keys: &[PublicKey]) -> anyhow::Result<Vec<u8>> {
    ensure!(m >= 1, "multi-signature threshold must be positive");
    ensure!(
        m <= keys.len(),
        "threshold {} exceeds key count {}",
        m,
        keys.len()
    );
    if keys.len() > MAX_MULTISIG_KEYS {
        bail!("too many keys for a multi-signature contract: {}", keys.len());
    }
    let mut sorted = keys.to_vec();
    sorted.sort();
    let mut script = Vec::with_capacity(keys.len() * (2 + PUBLIC_KEY_LEN) + 11);
    emit_push_int(&mut script, m);
    for key in &sorted {
        emit_push_data(&mut script, key.as_bytes());
    }
    emit_push_int(&mut script, sorted.len());
    script.push(SYSCALL);
    script.extend_from_slice(&check_multisig_id());
    Ok(script)
}

/// Invocation script pushing a single signature.
pub fn invocation_script(signature: &SignatureBytes) -> Vec<u8> {
    let mut script = Vec::with_capacity(2 + SIGNATURE_LEN);
    emit_push_data(&mut script, signature);
    script
}

/// Invocation script pushing several signatures in order.
pub fn multi_invocation_script(signatures: &[SignatureBytes]) -> Vec<u8> {
    let mut script = Vec::with_capacity(signatures.len() * (2 + SIGNATURE_LEN));
    for signature in signatures {
        emit_push_data(&mut script, signature);
    }
    script
}

/// Recognize a single-signature verification script.
pub fn parse_signature_redeem_script(script: &[u8]) -> Option<PublicKey> {
    if script.len() != 2 + PUBLIC_KEY_LEN + 5
        || script[0] != PUSHDATA1
        || script[1] as usize != PUBLIC_KEY_LEN
        || script[2 + PUBLIC_KEY_LEN] != SYSCALL
        || script[3 + PUBLIC_KEY_LEN..] != check_sig_id()
    {
        return None;
    }
    PublicKey::from_slice(&script[2..2 + PUBLIC_KEY_LEN]).ok()
}

fn read_push_int(script: &[u8], position: &mut usize) -> Option<usize> {
    let opcode = *script.get(*position)?;
    if (PUSH0..=PUSH0 + 16).contains(&opcode) {
        *position += 1;
        return Some((opcode - PUSH0) as usize);
    }
    if opcode == PUSHINT16 {
        let bytes = script.get(*position + 1..*position + 3)?;
        *position += 3;
        return Some(u16::from_le_bytes([bytes[0], bytes[1]]) as usize);
    }
    None
}

/// Recognize a multi-signature verification script, returning `(m, keys)`.
pub fn parse_multisig_redeem_script(script: &[u8]) -> Option<(usize, Vec<PublicKey>)> {
    let mut position = 0;
    let m = read_push_int(script, &mut position)?;
    let mut keys = Vec::new();
    while script.get(position) == Some(&PUSHDATA1) {
        if script.get(position + 1).copied()? as usize != PUBLIC_KEY_LEN {
            return None;
        }
        let bytes = script.get(position + 2..position + 2 + PUBLIC_KEY_LEN)?;
        keys.push(PublicKey::from_slice(bytes).ok()?);
        position += 2 + PUBLIC_KEY_LEN;
    }
    let n = read_push_int(script, &mut position)?;
    if m == 0 || m > n || n != keys.len() {
        return None;
    }
    if script.get(position) != Some(&SYSCALL) || script.get(position + 1..)? != check_multisig_id() {
        return None;
    }
    Some((m, keys))
}

/// Extract the signatures pushed by an invocation script.
///
/// Returns `None` if the script contains anything other than 64-byte pushes.
pub fn parse_invocation_signatures(script: &[u8]) -> Option<Vec<SignatureBytes>> {
    let mut signatures = Vec::new();
    let mut position = 0;
    while position < script.len() {
        if script[position] != PUSHDATA1 || script.get(position + 1).copied()? as usize != SIGNATURE_LEN {
            return None;
        }
        let bytes = script.get(position + 2..position + 2 + SIGNATURE_LEN)?;
        let mut signature = [0u8; SIGNATURE_LEN];
        signature.copy_from_slice(bytes);
        signatures.push(signature);
        position += 2 + SIGNATURE_LEN;
    }
    Some(signatures)
}

/// Next-consensus address: hash of the M-of-N contract over `validators`.
///
/// # Errors
///
/// Returns an error if the validator set is empty or too large.
pub fn bft_address(validators: &[PublicKey]) -> anyhow::Result<UInt160> {
    Ok(hash160(&multisig_redeem_script(get_m(validators.len()), validators)?))
}
