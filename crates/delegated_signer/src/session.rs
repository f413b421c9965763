use std::sync::Arc;

use alloy_primitives::Address;
use time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::ability::Ability;
use crate::assembler::{DelegatedSigner, TransactionAssembler, TxOutcome, TxRequest};
use crate::authorizer::SessionAuthorizer;
use crate::clock::Clock;
use crate::error::DelegationError;
use crate::grant::SessionGrant;
use crate::identity::{DelegatedIdentity, IdentityProvisioner};
use crate::remote::SigningScope;

const SESSION_ABILITIES: [Ability; 2] = [Ability::SIGN_TRANSACTION, Ability::MINT_IDENTITY];
const SESSION_SCOPES: [SigningScope; 2] = [SigningScope::SignAnything, SigningScope::PersonalSign];
/// Remaining lifetime below which a cached grant is not reused.
const REFRESH_MARGIN: Duration = Duration::minutes(1);

/// A valid grant together with the identity provisioned under it.
#[derive(Debug, Clone)]
pub struct DelegatedSession {
    pub grant: Arc<SessionGrant>,
    pub identity: DelegatedIdentity,
}

/// Owns the delegation for one base wallet and reuses it while it stays valid.
///
/// The first write action asks the wallet for a grant and provisions an
/// identity. Later actions reuse both until the grant expires; an expired
/// grant is dropped and the next action asks the wallet again.
pub struct DelegationManager {
    authorizer: SessionAuthorizer,
    provisioner: IdentityProvisioner,
    assembler: Arc<TransactionAssembler>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    cached: Mutex<Option<DelegatedSession>>,
}

impl DelegationManager {
    #[must_use]
    pub fn new(
        authorizer: SessionAuthorizer,
        provisioner: IdentityProvisioner,
        assembler: Arc<TransactionAssembler>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            authorizer,
            provisioner,
            assembler,
            clock,
            ttl,
            cached: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn wallet_address(&self) -> Address {
        self.authorizer.wallet().address()
    }

    #[must_use]
    pub fn authorizer(&self) -> &SessionAuthorizer {
        &self.authorizer
    }

    #[must_use]
    pub fn assembler(&self) -> &Arc<TransactionAssembler> {
        &self.assembler
    }

    /// Identity of the cached session, if one is still valid.
    pub async fn current_identity(&self) -> Option<DelegatedIdentity> {
        let now = self.clock.now();
        self.cached
            .lock()
            .await
            .as_ref()
            .filter(|session| !session.grant.is_expired_at(now))
            .map(|session| session.identity.clone())
    }

    /// Returns the cached session or establishes a new one.
    pub async fn session(&self) -> Result<DelegatedSession, DelegationError> {
        let mut cached = self.cached.lock().await;
        let now = self.clock.now();

        if let Some(session) = cached.as_ref() {
            if session.grant.expires_at - now > REFRESH_MARGIN {
                return Ok(session.clone());
            }
            info!(grant_id = %session.grant.id, "session grant near expiry; re-authorizing");
            *cached = None;
        }

        let grant = Arc::new(
            self.authorizer
                .acquire_grant(&SESSION_ABILITIES, self.ttl)
                .await?,
        );
        let identity = self.provisioner.provision(&grant, &SESSION_SCOPES).await?;
        let session = DelegatedSession { grant, identity };
        *cached = Some(session.clone());
        Ok(session)
    }

    /// Drops the cached session so the next action re-authorizes.
    pub async fn invalidate(&self) {
        if self.cached.lock().await.take().is_some() {
            info!("delegated session invalidated");
        }
    }

    /// Submits `request` as the delegated identity.
    pub async fn execute(&self, request: TxRequest) -> Result<TxOutcome, DelegationError> {
        let session = self.session().await?;
        let signer = DelegatedSigner::new(
            session.identity,
            session.grant,
            Arc::clone(self.provisioner.remote()),
            Arc::clone(&self.clock),
        );

        let result = self.assembler.sign_and_submit(&signer, request).await;
        if let Err(error) = &result {
            if error.requires_reauthorization() {
                warn!(%error, "delegation rejected; clearing cached session");
                self.invalidate().await;
            }
        }
        result
    }
}
