use alloy_primitives::{Address, B256, U256};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

use crate::error::DelegationError;
use crate::remote::RemoteSignature;
use crate::wallet::address_from_verifying_key;

/// Canonical `(r, s, y_parity)` ready for transaction encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedSignature {
    pub r: U256,
    pub s: U256,
    pub y_parity: bool,
}

/// Turns a backend signature into canonical form and checks it recovers to `expected`.
///
/// Leading zero bytes are stripped or padded to 32 bytes, `v` of 27/28 (or an
/// EIP-155 value) is reduced to a parity bit, high-s signatures are flipped to
/// low-s, and a missing parity is found by trying both candidates.
pub fn normalize_signature(
    raw: &RemoteSignature,
    hash: B256,
    expected: Address,
) -> Result<NormalizedSignature, DelegationError> {
    let r = to_word(&raw.r, "r")?;
    let s = to_word(&raw.s, "s")?;
    let mut compact = [0u8; 64];
    compact[..32].copy_from_slice(&r);
    compact[32..].copy_from_slice(&s);

    let mut signature = Signature::from_slice(&compact).map_err(|error| {
        DelegationError::InvalidSignature {
            reason: format!("r/s out of range: {error}"),
        }
    })?;
    let mut hinted_parity = raw.v.map(parity_from_v).transpose()?;
    if let Some(low_s) = signature.normalize_s() {
        signature = low_s;
        hinted_parity = hinted_parity.map(|parity| !parity);
    }

    let candidates = match hinted_parity {
        Some(parity) => [parity, !parity],
        None => [false, true],
    };
    for parity in candidates {
        if recovers_to(&signature, hash, parity, expected) {
            let bytes = signature.to_bytes();
            return Ok(NormalizedSignature {
                r: U256::from_be_slice(&bytes[..32]),
                s: U256::from_be_slice(&bytes[32..]),
                y_parity: parity,
            });
        }
    }

    Err(DelegationError::InvalidSignature {
        reason: format!("signature does not recover to {expected}"),
    })
}

fn to_word(bytes: &[u8], field: &str) -> Result<[u8; 32], DelegationError> {
    let first = bytes.iter().position(|byte| *byte != 0).unwrap_or(bytes.len());
    let significant = &bytes[first..];
    if significant.len() > 32 {
        return Err(DelegationError::InvalidSignature {
            reason: format!("{field} is longer than 32 bytes"),
        });
    }
    let mut word = [0u8; 32];
    word[32 - significant.len()..].copy_from_slice(significant);
    Ok(word)
}

fn parity_from_v(v: u64) -> Result<bool, DelegationError> {
    match v {
        0 | 1 => Ok(v == 1),
        27 | 28 => Ok(v == 28),
        v if v >= 35 => Ok((v - 35) % 2 == 1),
        other => Err(DelegationError::InvalidSignature {
            reason: format!("unsupported v value {other}"),
        }),
    }
}

fn recovers_to(signature: &Signature, hash: B256, parity: bool, expected: Address) -> bool {
    let recovery_id = RecoveryId::new(parity, false);
    VerifyingKey::recover_from_prehash(hash.as_slice(), signature, recovery_id)
        .map(|key| address_from_verifying_key(&key) == expected)
        .unwrap_or(false)
}
