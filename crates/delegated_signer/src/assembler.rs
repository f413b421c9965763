use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use tracing::{debug, info, warn};

use crate::abi::decode_revert_reason;
use crate::ability::Ability;
use crate::clock::Clock;
use crate::error::DelegationError;
use crate::grant::SessionGrant;
use crate::identity::DelegatedIdentity;
use crate::nonce::{NonceManager, NonceSlot};
use crate::remote::{RemoteSignature, RemoteSigner};
use crate::rpc::{CallRequest, ChainRpc, RpcError, TxReceipt};
use crate::signature::{normalize_signature, NormalizedSignature};
use crate::tx::{LegacyTx, SignedTx};
use crate::wallet::address_from_verifying_key;

/// Anything that can produce a raw signature over a 32-byte hash for one address.
#[async_trait]
pub trait HashSigner: Send + Sync {
    fn address(&self) -> Address;

    async fn sign_hash(&self, hash: B256) -> Result<RemoteSignature, DelegationError>;
}

/// Signs through the remote signer as a delegated identity, re-checking the grant each time.
pub struct DelegatedSigner {
    identity: DelegatedIdentity,
    grant: Arc<SessionGrant>,
    remote: Arc<dyn RemoteSigner>,
    clock: Arc<dyn Clock>,
}

impl DelegatedSigner {
    #[must_use]
    pub fn new(
        identity: DelegatedIdentity,
        grant: Arc<SessionGrant>,
        remote: Arc<dyn RemoteSigner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            identity,
            grant,
            remote,
            clock,
        }
    }
}

#[async_trait]
impl HashSigner for DelegatedSigner {
    fn address(&self) -> Address {
        self.identity.address
    }

    async fn sign_hash(&self, hash: B256) -> Result<RemoteSignature, DelegationError> {
        self.grant.authorize(Ability::SIGN_TRANSACTION, self.clock.now())?;
        Ok(self
            .remote
            .sign_hash(&self.identity.identity_id, &self.grant.auth_proof(), hash)
            .await?)
    }
}

/// Signs with a key held in this process; used for the gas sponsor.
pub struct LocalKeySigner {
    key: SigningKey,
    address: Address,
}

impl LocalKeySigner {
    #[must_use]
    pub fn new(key: SigningKey) -> Self {
        let address = address_from_verifying_key(key.verifying_key());
        Self { key, address }
    }
}

#[async_trait]
impl HashSigner for LocalKeySigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_hash(&self, hash: B256) -> Result<RemoteSignature, DelegationError> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|error| DelegationError::SigningFailed {
                reason: error.to_string(),
            })?;
        let bytes = signature.to_bytes();
        Ok(RemoteSignature {
            r: bytes[..32].to_vec(),
            s: bytes[32..].to_vec(),
            v: Some(u64::from(recovery_id.to_byte())),
        })
    }
}

/// Timeouts and retry bounds for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitPolicy {
    pub broadcast_attempts: u32,
    pub broadcast_timeout: Duration,
    pub retry_base_delay: Duration,
    pub receipt_timeout: Duration,
    pub receipt_poll_interval: Duration,
    /// Percentage added on top of the node's gas estimate.
    pub gas_margin_percent: u64,
}

impl Default for SubmitPolicy {
    fn default() -> Self {
        Self {
            broadcast_attempts: 3,
            broadcast_timeout: Duration::from_secs(15),
            retry_base_delay: Duration::from_millis(500),
            receipt_timeout: Duration::from_secs(120),
            receipt_poll_interval: Duration::from_secs(2),
            gas_margin_percent: 20,
        }
    }
}

/// One contract call or transfer to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: Option<u64>,
}

impl TxRequest {
    #[must_use]
    pub fn call(to: Address, data: Bytes) -> Self {
        Self {
            to,
            data,
            value: U256::ZERO,
            gas_limit: None,
        }
    }

    #[must_use]
    pub fn transfer(to: Address, value: U256) -> Self {
        Self {
            to,
            data: Bytes::new(),
            value,
            gas_limit: Some(21_000),
        }
    }
}

/// Confirmed, successful transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutcome {
    pub tx_hash: B256,
    pub nonce: u64,
    pub from: Address,
    pub receipt: TxReceipt,
}

/// Builds, signs, broadcasts and confirms transactions.
pub struct TransactionAssembler {
    rpc: Arc<dyn ChainRpc>,
    nonces: Arc<NonceManager>,
    chain_id: u64,
    policy: SubmitPolicy,
}

impl TransactionAssembler {
    #[must_use]
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        nonces: Arc<NonceManager>,
        chain_id: u64,
        policy: SubmitPolicy,
    ) -> Self {
        Self {
            rpc,
            nonces,
            chain_id,
            policy,
        }
    }

    #[must_use]
    pub fn rpc(&self) -> &Arc<dyn ChainRpc> {
        &self.rpc
    }

    #[must_use]
    pub fn policy(&self) -> &SubmitPolicy {
        &self.policy
    }

    /// Signs `request` as `signer`, broadcasts it and waits for a successful receipt.
    ///
    /// The nonce slot is held from reservation through the first accepted
    /// broadcast. Retries resend the identical payload, so the hash never
    /// changes. A reverted receipt becomes `ChainRevert` with the decoded reason.
    pub async fn sign_and_submit(
        &self,
        signer: &dyn HashSigner,
        request: TxRequest,
    ) -> Result<TxOutcome, DelegationError> {
        let from = signer.address();
        let call = CallRequest {
            from: Some(from),
            to: request.to,
            data: request.data.clone(),
            value: request.value,
        };

        let gas_limit = match request.gas_limit {
            Some(limit) => limit,
            None => self.estimate_gas(&call).await?,
        };
        let gas_price = self.rpc.gas_price().await?;

        let mut slot = self.nonces.lock(from).await;
        self.reconcile(&mut slot).await?;
        let chain_pending = self.rpc.pending_nonce(from).await?;
        let nonce = slot.reserve(chain_pending);

        let tx = LegacyTx {
            chain_id: self.chain_id,
            nonce,
            gas_price,
            gas_limit,
            to: request.to,
            value: request.value,
            data: request.data,
        };
        let hash = tx.signing_hash();

        let signed = match self.sign(signer, hash, from).await {
            Ok(signature) => tx.into_signed(signature),
            Err(error) => {
                slot.release(nonce);
                return Err(error);
            }
        };
        slot.mark_signed(nonce, signed.hash);

        let tx_hash = self.broadcast(&mut slot, &signed).await?;
        slot.settle(nonce);
        drop(slot);

        let receipt = self.confirm(tx_hash).await?;
        if !receipt.success {
            let reason = self.revert_reason(&call).await;
            warn!(%tx_hash, %reason, "transaction reverted");
            return Err(DelegationError::ChainRevert { tx_hash, reason });
        }

        info!(%tx_hash, %from, nonce, block = receipt.block_number, "transaction confirmed");
        Ok(TxOutcome {
            tx_hash,
            nonce,
            from,
            receipt,
        })
    }

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, DelegationError> {
        match self.rpc.estimate_gas(call).await {
            Ok(estimate) => Ok(estimate + estimate * self.policy.gas_margin_percent / 100),
            Err(error) if error.revert_data().is_some() || is_execution_revert(&error) => {
                Err(DelegationError::SimulationRevert {
                    reason: revert_reason_from_error(&error),
                })
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn sign(
        &self,
        signer: &dyn HashSigner,
        hash: B256,
        from: Address,
    ) -> Result<NormalizedSignature, DelegationError> {
        let raw = signer.sign_hash(hash).await?;
        normalize_signature(&raw, hash, from)
    }

    /// Sends the signed payload, retrying transient failures with the same bytes.
    async fn broadcast(
        &self,
        slot: &mut NonceSlot,
        signed: &SignedTx,
    ) -> Result<B256, DelegationError> {
        let attempts = self.policy.broadcast_attempts.max(1);

        for attempt in 1..=attempts {
            debug!(tx_hash = %signed.hash, attempt, "broadcasting transaction");
            let outcome = tokio::time::timeout(
                self.policy.broadcast_timeout,
                self.rpc.send_raw_transaction(&signed.raw),
            )
            .await;

            match outcome {
                Ok(Ok(reported)) => {
                    if reported != signed.hash {
                        warn!(%reported, expected = %signed.hash, "node reported a different hash");
                    }
                    return Ok(signed.hash);
                }
                Ok(Err(error)) if error.is_already_known() => return Ok(signed.hash),
                Ok(Err(error)) if error.is_transient() => {
                    warn!(tx_hash = %signed.hash, attempt, %error, "transient broadcast failure");
                }
                Ok(Err(error)) => {
                    warn!(tx_hash = %signed.hash, %error, "broadcast rejected");
                    if let Err(reconcile_error) = self.reconcile(slot).await {
                        warn!(tx_hash = %signed.hash, error = %reconcile_error, "could not reconcile rejected nonce");
                    }
                    return Err(error.into());
                }
                Err(_) => {
                    warn!(tx_hash = %signed.hash, attempt, "broadcast attempt timed out");
                }
            }

            if attempt < attempts {
                let backoff = 2_u32.saturating_pow(attempt - 1);
                tokio::time::sleep(self.policy.retry_base_delay.saturating_mul(backoff)).await;
            }
        }

        if let Err(error) = self.reconcile(slot).await {
            warn!(tx_hash = %signed.hash, %error, "could not reconcile nonce after broadcast timeout");
        }
        Err(DelegationError::BroadcastTimeout {
            tx_hash: signed.hash,
            attempts,
        })
    }

    /// Settles the slot's last unacknowledged reservation against the chain.
    ///
    /// A nonce the chain has not consumed, whose payload the node does not
    /// know, is abandoned so the next reservation reuses it instead of
    /// queueing behind a gap.
    async fn reconcile(&self, slot: &mut NonceSlot) -> Result<(), DelegationError> {
        let Some(unsettled) = slot.unsettled() else {
            return Ok(());
        };
        let chain_pending = self.rpc.pending_nonce(slot.address()).await?;
        let known = match unsettled.tx_hash {
            Some(tx_hash) => self.rpc.transaction_known(tx_hash).await?,
            None => false,
        };

        if known || chain_pending > unsettled.nonce {
            debug!(address = %slot.address(), nonce = unsettled.nonce, "nonce consumed on chain");
            slot.settle(unsettled.nonce);
            return Ok(());
        }
        if let Err(error) = slot.abandon(unsettled.nonce, chain_pending) {
            warn!(address = %slot.address(), %error, "unsettled nonce kept");
            slot.settle(unsettled.nonce);
        }
        Ok(())
    }

    async fn confirm(&self, tx_hash: B256) -> Result<TxReceipt, DelegationError> {
        let receipt = self
            .rpc
            .wait_for_receipt(
                tx_hash,
                self.policy.receipt_timeout,
                self.policy.receipt_poll_interval,
            )
            .await?;
        receipt.ok_or(DelegationError::ReceiptTimeout {
            tx_hash,
            waited_secs: self.policy.receipt_timeout.as_secs(),
        })
    }

    /// Replays the call to recover an `Error(string)` message.
    async fn revert_reason(&self, call: &CallRequest) -> String {
        match self.rpc.call(call).await {
            Ok(_) => "execution reverted".to_string(),
            Err(error) => revert_reason_from_error(&error),
        }
    }
}

fn is_execution_revert(error: &RpcError) -> bool {
    match error {
        RpcError::Node { message, .. } => message.to_ascii_lowercase().contains("revert"),
        _ => false,
    }
}

fn revert_reason_from_error(error: &RpcError) -> String {
    let decoded = error
        .revert_data()
        .and_then(|data| hex::decode(data.trim_start_matches("0x")).ok())
        .and_then(|bytes| decode_revert_reason(&bytes));
    match (decoded, error) {
        (Some(reason), _) => reason,
        (None, RpcError::Node { message, .. }) => message.clone(),
        (None, other) => other.to_string(),
    }
}
