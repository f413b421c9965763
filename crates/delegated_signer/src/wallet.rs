use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use tracing::info;

use crate::error::DelegationError;
use crate::rpc::ChainRpc;

/// The user's own wallet: identity plus personal-sign capability.
///
/// Implementations return `AuthorizationDenied` when the user declines and
/// `AuthorizationUnavailable` when the wallet cannot be reached.
#[async_trait]
pub trait BaseWallet: Send + Sync {
    fn address(&self) -> Address;

    fn chain_id(&self) -> u64;

    /// EIP-191 personal signature over `message`, 65 bytes `r || s || v`.
    async fn sign_challenge(&self, message: &str) -> Result<Bytes, DelegationError>;

    async fn native_balance(&self) -> Result<U256, DelegationError>;
}

/// Decides whether a challenge gets signed. Stands in for the wallet prompt.
pub trait ChallengeApprover: Send + Sync {
    fn approve(&self, message: &str) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

impl ChallengeApprover for AutoApprove {
    fn approve(&self, _message: &str) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DeclineAll;

impl ChallengeApprover for DeclineAll {
    fn approve(&self, _message: &str) -> bool {
        false
    }
}

/// Wallet backed by an in-memory secp256k1 key.
pub struct LocalWallet {
    key: SigningKey,
    address: Address,
    chain_id: u64,
    rpc: Arc<dyn ChainRpc>,
    approver: Arc<dyn ChallengeApprover>,
}

impl LocalWallet {
    #[must_use]
    pub fn new(
        key: SigningKey,
        chain_id: u64,
        rpc: Arc<dyn ChainRpc>,
        approver: Arc<dyn ChallengeApprover>,
    ) -> Self {
        let address = address_from_verifying_key(key.verifying_key());
        Self {
            key,
            address,
            chain_id,
            rpc,
            approver,
        }
    }
}

#[async_trait]
impl BaseWallet for LocalWallet {
    fn address(&self) -> Address {
        self.address
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn sign_challenge(&self, message: &str) -> Result<Bytes, DelegationError> {
        if !self.approver.approve(message) {
            return Err(DelegationError::denied("wallet owner declined the session request"));
        }
        info!(wallet = %self.address, "signing session challenge");

        let prehash = eip191_hash(message);
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(prehash.as_slice())
            .map_err(|error| {
                DelegationError::unavailable(format!("wallet signing failed: {error}"))
            })?;
        let mut bytes = signature.to_bytes().to_vec();
        bytes.push(recovery_id.to_byte() + 27);
        Ok(Bytes::from(bytes))
    }

    async fn native_balance(&self) -> Result<U256, DelegationError> {
        Ok(self.rpc.balance(self.address).await?)
    }
}

/// `keccak256("\x19Ethereum Signed Message:\n" || len || message)`.
#[must_use]
pub fn eip191_hash(message: &str) -> B256 {
    let bytes = message.as_bytes();
    let prefix = format!("\x19Ethereum Signed Message:\n{}", bytes.len());
    let mut hasher = Keccak256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(bytes);
    B256::from_slice(&hasher.finalize())
}

#[must_use]
pub fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let encoded = key.to_encoded_point(false);
    let digest = Keccak256::digest(&encoded.as_bytes()[1..]);
    Address::from_slice(&digest[12..])
}

/// Address of a SEC1-encoded public key (compressed or not).
pub fn address_from_public_key(public_key: &[u8]) -> Result<Address, DelegationError> {
    let key = VerifyingKey::from_sec1_bytes(public_key).map_err(|error| {
        DelegationError::InvalidSignature {
            reason: format!("invalid public key: {error}"),
        }
    })?;
    Ok(address_from_verifying_key(&key))
}

/// Recovers the signer of an EIP-191 personal signature.
pub fn recover_personal_signer(
    message: &str,
    signature: &[u8],
) -> Result<Address, DelegationError> {
    let invalid = |reason: String| DelegationError::InvalidSignature { reason };
    if signature.len() != 65 {
        return Err(invalid("signature must be 65 bytes".to_string()));
    }

    let parsed = Signature::try_from(&signature[..64])
        .map_err(|error| invalid(format!("invalid ECDSA signature bytes: {error}")))?;
    let recovery_byte = match signature[64] {
        27 | 28 => signature[64] - 27,
        0 | 1 => signature[64],
        _ => return Err(invalid("recovery id must be 0/1 or 27/28".to_string())),
    };
    let recovery_id = RecoveryId::from_byte(recovery_byte)
        .ok_or_else(|| invalid("recovery id is invalid".to_string()))?;
    let prehash = eip191_hash(message);
    let key = VerifyingKey::recover_from_prehash(prehash.as_slice(), &parsed, recovery_id)
        .map_err(|error| invalid(format!("failed recovering signer: {error}")))?;
    Ok(address_from_verifying_key(&key))
}

/// Parses a 0x-prefixed (or bare) hex secp256k1 private key.
pub fn parse_private_key(raw: &str) -> Result<SigningKey, DelegationError> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(digits).map_err(|error| {
        DelegationError::InvalidInput(format!("private key is not hex: {error}"))
    })?;
    SigningKey::from_slice(&bytes).map_err(|_| {
        DelegationError::InvalidInput("private key is not a valid secp256k1 scalar".to_string())
    })
}
