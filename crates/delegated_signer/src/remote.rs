use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::ability::Ability;
use crate::clock::Clock;
use crate::grant::Challenge;
use crate::wallet::recover_personal_signer;

/// What a delegated identity may sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningScope {
    SignAnything,
    PersonalSign,
}

impl fmt::Display for SigningScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignAnything => f.write_str("sign-anything"),
            Self::PersonalSign => f.write_str("personal-sign"),
        }
    }
}

/// Authentication material derived from a session grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthProof {
    pub subject: Address,
    pub grant_id: String,
    pub message: String,
    pub signature: Bytes,
}

/// Key pair minted inside the remote environment. Only public material leaves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedKey {
    pub identity_id: String,
    pub public_key: Bytes,
    pub scopes: Vec<SigningScope>,
}

/// Raw signature as returned by a signing backend, before normalization.
///
/// `r` and `s` may carry stripped or extra leading zero bytes; `v` may be
/// missing, `0/1`, or `27/28`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSignature {
    pub r: Vec<u8>,
    pub s: Vec<u8>,
    pub v: Option<u64>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteSignerError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("signing scope {0} was not granted")]
    ScopeMissing(SigningScope),
    #[error("unknown delegated identity '{0}'")]
    UnknownIdentity(String),
    #[error("remote signer unavailable: {0}")]
    Unavailable(String),
}

/// Remote-custody signing capability.
#[async_trait]
pub trait RemoteSigner: Send + Sync {
    /// Mints a key pair for the proof's subject, or resolves the existing one.
    async fn provision(
        &self,
        proof: &AuthProof,
        scopes: &[SigningScope],
    ) -> Result<ProvisionedKey, RemoteSignerError>;

    async fn sign_hash(
        &self,
        identity_id: &str,
        proof: &AuthProof,
        hash: B256,
    ) -> Result<RemoteSignature, RemoteSignerError>;
}

struct Custodied {
    identity_id: String,
    key: SigningKey,
    scopes: Vec<SigningScope>,
}

/// Custody backend that keeps keys inside this process.
///
/// It verifies every proof the way a network custody service would: the
/// challenge must be signed by the subject, unexpired and list the ability
/// being exercised.
pub struct InProcessCustody {
    clock: Arc<dyn Clock>,
    keys: Mutex<HashMap<Address, Custodied>>,
}

impl InProcessCustody {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            keys: Mutex::new(HashMap::new()),
        }
    }

    fn verify(&self, proof: &AuthProof, ability: Ability) -> Result<(), RemoteSignerError> {
        let signer = recover_personal_signer(&proof.message, &proof.signature)
            .map_err(|error| RemoteSignerError::Unauthorized(error.to_string()))?;
        if signer != proof.subject {
            return Err(RemoteSignerError::Unauthorized(
                "auth proof was not signed by its subject".to_string(),
            ));
        }

        let challenge = Challenge::parse(&proof.message)
            .map_err(|error| RemoteSignerError::Unauthorized(error.to_string()))?;
        if challenge.address != proof.subject {
            return Err(RemoteSignerError::Unauthorized(
                "auth proof subject does not match its challenge".to_string(),
            ));
        }
        if self.clock.now() >= challenge.expires_at {
            return Err(RemoteSignerError::Unauthorized(
                "auth proof has expired".to_string(),
            ));
        }
        if !challenge.abilities.contains(&ability) {
            return Err(RemoteSignerError::Unauthorized(format!(
                "auth proof does not grant {ability}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteSigner for InProcessCustody {
    async fn provision(
        &self,
        proof: &AuthProof,
        scopes: &[SigningScope],
    ) -> Result<ProvisionedKey, RemoteSignerError> {
        self.verify(proof, Ability::MINT_IDENTITY)?;

        let mut keys = self.keys.lock().await;
        let custodied = keys.entry(proof.subject).or_insert_with(|| {
            let identity_id = uuid::Uuid::new_v4().to_string();
            info!(subject = %proof.subject, %identity_id, "minted delegated key");
            Custodied {
                identity_id,
                key: SigningKey::random(&mut rand::rngs::OsRng),
                scopes: Vec::new(),
            }
        });
        for scope in scopes {
            if !custodied.scopes.contains(scope) {
                custodied.scopes.push(*scope);
            }
        }

        let public_key = custodied.key.verifying_key().to_encoded_point(false);
        Ok(ProvisionedKey {
            identity_id: custodied.identity_id.clone(),
            public_key: Bytes::copy_from_slice(public_key.as_bytes()),
            scopes: custodied.scopes.clone(),
        })
    }

    async fn sign_hash(
        &self,
        identity_id: &str,
        proof: &AuthProof,
        hash: B256,
    ) -> Result<RemoteSignature, RemoteSignerError> {
        self.verify(proof, Ability::SIGN_TRANSACTION)?;

        let keys = self.keys.lock().await;
        let custodied = keys
            .get(&proof.subject)
            .filter(|custodied| custodied.identity_id == identity_id)
            .ok_or_else(|| RemoteSignerError::UnknownIdentity(identity_id.to_string()))?;
        if !custodied.scopes.contains(&SigningScope::SignAnything) {
            return Err(RemoteSignerError::ScopeMissing(SigningScope::SignAnything));
        }

        let (signature, recovery_id) = custodied
            .key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|error| RemoteSignerError::Unavailable(error.to_string()))?;
        let bytes = signature.to_bytes();

        // Minimal big-endian encoding, as most custody APIs return it.
        Ok(RemoteSignature {
            r: strip_leading_zeros(&bytes[..32]),
            s: strip_leading_zeros(&bytes[32..]),
            v: Some(u64::from(recovery_id.to_byte()) + 27),
        })
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let first = bytes.iter().position(|byte| *byte != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}
