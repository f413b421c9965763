use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, U256};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::abi::{decode_uint, encode_call, Token};
use crate::ability::Ability;
use crate::assembler::{DelegatedSigner, HashSigner, TransactionAssembler, TxOutcome, TxRequest};
use crate::clock::Clock;
use crate::error::DelegationError;
use crate::grant::SessionGrant;
use crate::remote::{RemoteSigner, SigningScope};
use crate::rpc::CallRequest;
use crate::wallet::address_from_public_key;

/// Remote-custody signing identity. Private material stays with the remote signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegatedIdentity {
    pub identity_id: String,
    pub public_key: Bytes,
    pub address: Address,
    pub scopes: Vec<SigningScope>,
}

/// Fee-asset mint performed by a freshly funded identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeAssetMint {
    pub token: Address,
    pub amount: U256,
}

/// How much a new identity receives before first use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingPolicy {
    /// Native balance below which the sponsor tops the identity up.
    pub min_native_balance: U256,
    pub native_amount: U256,
    pub fee_asset: Option<FeeAssetMint>,
    pub timeout: Duration,
}

impl Default for FundingPolicy {
    fn default() -> Self {
        Self {
            min_native_balance: U256::from(500_000_000_000_000_u64),
            native_amount: U256::from(1_000_000_000_000_000_u64),
            fee_asset: None,
            timeout: Duration::from_secs(180),
        }
    }
}

#[derive(Debug, Default)]
struct FundingRecord {
    native_funded: bool,
    fee_asset_minted: bool,
}

/// Per-address funding record shared by every provisioning path.
///
/// The per-address lock serializes concurrent provisioning of one identity
/// so it is topped up at most once.
#[derive(Debug, Default)]
pub struct FundingLedger {
    records: std::sync::Mutex<HashMap<Address, Arc<Mutex<FundingRecord>>>>,
}

impl FundingLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, address: Address) -> Arc<Mutex<FundingRecord>> {
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(records.entry(address).or_default())
    }

    /// True once `address` is known to hold enough native gas.
    pub async fn is_funded(&self, address: Address) -> bool {
        self.record(address).lock().await.native_funded
    }
}

/// Account that pays native gas to new identities.
pub struct GasSponsor {
    signer: Arc<dyn HashSigner>,
}

impl GasSponsor {
    #[must_use]
    pub fn new(signer: Arc<dyn HashSigner>) -> Self {
        Self { signer }
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub async fn transfer(
        &self,
        assembler: &TransactionAssembler,
        to: Address,
        amount: U256,
    ) -> Result<TxOutcome, DelegationError> {
        assembler
            .sign_and_submit(self.signer.as_ref(), TxRequest::transfer(to, amount))
            .await
    }
}

/// Mints or resolves delegated identities and funds them before first use.
pub struct IdentityProvisioner {
    remote: Arc<dyn RemoteSigner>,
    assembler: Arc<TransactionAssembler>,
    clock: Arc<dyn Clock>,
    ledger: Arc<FundingLedger>,
    sponsor: Option<GasSponsor>,
    policy: FundingPolicy,
    timeout: Duration,
}

impl IdentityProvisioner {
    #[must_use]
    pub fn new(
        remote: Arc<dyn RemoteSigner>,
        assembler: Arc<TransactionAssembler>,
        clock: Arc<dyn Clock>,
        ledger: Arc<FundingLedger>,
    ) -> Self {
        Self {
            remote,
            assembler,
            clock,
            ledger,
            sponsor: None,
            policy: FundingPolicy::default(),
            timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_sponsor(mut self, sponsor: GasSponsor) -> Self {
        self.sponsor = Some(sponsor);
        self
    }

    #[must_use]
    pub fn with_funding_policy(mut self, policy: FundingPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn remote(&self) -> &Arc<dyn RemoteSigner> {
        &self.remote
    }

    /// Mints or resolves the identity bound to `grant`, then funds it.
    pub async fn provision(
        &self,
        grant: &Arc<SessionGrant>,
        scopes: &[SigningScope],
    ) -> Result<DelegatedIdentity, DelegationError> {
        grant.authorize(Ability::MINT_IDENTITY, self.clock.now())?;

        let proof = grant.auth_proof();
        let provisioned = tokio::time::timeout(self.timeout, self.remote.provision(&proof, scopes))
            .await
            .map_err(|_| DelegationError::ProvisioningUnavailable {
                reason: format!("remote signer did not answer within {:?}", self.timeout),
            })?
            .map_err(|error| match DelegationError::from(error) {
                denied @ DelegationError::AuthorizationDenied { .. } => denied,
                other => DelegationError::ProvisioningUnavailable {
                    reason: other.to_string(),
                },
            })?;

        grant.authorize(Ability::MINT_IDENTITY, self.clock.now())?;

        let identity = DelegatedIdentity {
            address: address_from_public_key(&provisioned.public_key)?,
            identity_id: provisioned.identity_id,
            public_key: provisioned.public_key,
            scopes: provisioned.scopes,
        };
        info!(
            identity_id = %identity.identity_id,
            address = %identity.address,
            "delegated identity ready"
        );

        tokio::time::timeout(self.policy.timeout, self.fund(grant, &identity))
            .await
            .map_err(|_| DelegationError::funding("funding did not confirm in time"))?
            .map_err(|error| match error {
                expired @ DelegationError::AuthorizationExpired { .. } => expired,
                funding @ DelegationError::FundingFailed { .. } => funding,
                other => DelegationError::funding(other),
            })?;

        Ok(identity)
    }

    async fn fund(
        &self,
        grant: &Arc<SessionGrant>,
        identity: &DelegatedIdentity,
    ) -> Result<(), DelegationError> {
        let entry = self.ledger.record(identity.address);
        let mut record = entry.lock().await;
        let rpc = self.assembler.rpc();

        if !record.native_funded {
            let balance = rpc.balance(identity.address).await?;
            if balance >= self.policy.min_native_balance {
                debug!(address = %identity.address, %balance, "identity already has gas");
            } else {
                let sponsor = self.sponsor.as_ref().ok_or_else(|| {
                    DelegationError::funding("identity has no gas and no sponsor is configured")
                })?;
                let outcome = sponsor
                    .transfer(&self.assembler, identity.address, self.policy.native_amount)
                    .await?;
                info!(
                    address = %identity.address,
                    tx_hash = %outcome.tx_hash,
                    amount = %self.policy.native_amount,
                    "sponsored native gas"
                );
            }
            record.native_funded = true;
        }

        if let Some(mint) = &self.policy.fee_asset {
            if !record.fee_asset_minted {
                let balance_call = encode_call(
                    "balanceOf(address)",
                    &[Token::Address(identity.address)],
                )
                .map_err(DelegationError::InvalidInput)?;
                let data = rpc
                    .call(&CallRequest::new(mint.token, balance_call))
                    .await
                    .map_err(|error| {
                        DelegationError::funding(format!("fee asset balance unavailable: {error}"))
                    })?;
                let current = decode_uint(&data, 0).map_err(|error| {
                    DelegationError::funding(format!("fee asset balance unreadable: {error}"))
                })?;

                if current < mint.amount {
                    let data = encode_call(
                        "mint(address,uint256)",
                        &[Token::Address(identity.address), Token::Uint(mint.amount)],
                    )
                    .map_err(DelegationError::InvalidInput)?;
                    let signer = DelegatedSigner::new(
                        identity.clone(),
                        Arc::clone(grant),
                        Arc::clone(&self.remote),
                        Arc::clone(&self.clock),
                    );
                    let outcome = self
                        .assembler
                        .sign_and_submit(&signer, TxRequest::call(mint.token, data))
                        .await?;
                    info!(
                        address = %identity.address,
                        tx_hash = %outcome.tx_hash,
                        "minted fee asset to identity"
                    );
                } else {
                    debug!(address = %identity.address, "fee asset already held; skipping mint");
                }
                record.fee_asset_minted = true;
            }
        }

        Ok(())
    }
}
