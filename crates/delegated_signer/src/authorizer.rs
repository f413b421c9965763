use std::collections::BTreeSet;
use std::sync::Arc;

use time::Duration;
use tracing::{info, warn};

use crate::ability::Ability;
use crate::clock::Clock;
use crate::error::DelegationError;
use crate::grant::{Challenge, SessionGrant};
use crate::rpc::ChainRpc;
use crate::wallet::{recover_personal_signer, BaseWallet};

const CHALLENGE_DOMAIN: &str = "meme-agent.local";
const CHALLENGE_URI: &str = "meme-agent://session";
const STATEMENT: &str =
    "Authorize the agent to act on your behalf with a delegated key for a limited time.";

/// Obtains session grants from the base wallet.
pub struct SessionAuthorizer {
    wallet: Arc<dyn BaseWallet>,
    rpc: Arc<dyn ChainRpc>,
    clock: Arc<dyn Clock>,
}

impl SessionAuthorizer {
    #[must_use]
    pub fn new(wallet: Arc<dyn BaseWallet>, rpc: Arc<dyn ChainRpc>, clock: Arc<dyn Clock>) -> Self {
        Self {
            wallet,
            rpc,
            clock,
        }
    }

    #[must_use]
    pub fn wallet(&self) -> &Arc<dyn BaseWallet> {
        &self.wallet
    }

    /// Asks the base wallet to sign a challenge for exactly `abilities` over `ttl`.
    pub async fn acquire_grant(
        &self,
        abilities: &[Ability],
        ttl: Duration,
    ) -> Result<SessionGrant, DelegationError> {
        if abilities.is_empty() {
            return Err(DelegationError::denied("no abilities were requested"));
        }
        if ttl <= Duration::ZERO {
            return Err(DelegationError::denied("session lifetime must be positive"));
        }

        let nonce = self.rpc.latest_block_hash().await.map_err(|error| {
            DelegationError::unavailable(format!("cannot fetch freshness nonce: {error}"))
        })?;

        let issued_at = self.clock.now();
        let challenge = Challenge {
            domain: CHALLENGE_DOMAIN.to_string(),
            uri: CHALLENGE_URI.to_string(),
            address: self.wallet.address(),
            chain_id: self.wallet.chain_id(),
            statement: STATEMENT.to_string(),
            nonce,
            issued_at,
            expires_at: issued_at + ttl,
            abilities: abilities.iter().copied().collect::<BTreeSet<_>>(),
        };
        let message = challenge.render()?;

        let signature = self.wallet.sign_challenge(&message).await.inspect_err(|error| {
            warn!(wallet = %challenge.address, %error, "session challenge not signed");
        })?;
        let signer = recover_personal_signer(&message, &signature)
            .map_err(|error| DelegationError::denied(error.to_string()))?;
        if signer != challenge.address {
            return Err(DelegationError::denied(format!(
                "challenge was signed by {signer}, not {}",
                challenge.address
            )));
        }

        let grant = SessionGrant {
            id: uuid::Uuid::new_v4().to_string(),
            wallet: challenge.address,
            chain_id: challenge.chain_id,
            abilities: challenge.abilities,
            issued_at,
            expires_at: challenge.expires_at,
            message,
            signature,
        };
        info!(
            grant_id = %grant.id,
            wallet = %grant.wallet,
            expires_at = %grant.expires_at,
            "session grant acquired"
        );
        Ok(grant)
    }
}
