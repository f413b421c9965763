use std::collections::BTreeSet;
use std::str::FromStr;

use alloy_primitives::{Address, Bytes, B256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::ability::Ability;
use crate::error::DelegationError;
use crate::remote::AuthProof;

/// Sign-in-with-Ethereum style challenge shown to the base wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub domain: String,
    pub uri: String,
    pub address: Address,
    pub chain_id: u64,
    pub statement: String,
    pub nonce: B256,
    pub issued_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub abilities: BTreeSet<Ability>,
}

impl Challenge {
    pub fn render(&self) -> Result<String, DelegationError> {
        let issued_at = format_rfc3339(self.issued_at)?;
        let expires_at = format_rfc3339(self.expires_at)?;
        let mut message = format!(
            "{domain} wants you to sign in with your Ethereum account:\n\
             {address}\n\
             \n\
             {statement}\n\
             \n\
             URI: {uri}\n\
             Version: 1\n\
             Chain ID: {chain_id}\n\
             Nonce: {nonce}\n\
             Issued At: {issued_at}\n\
             Expiration Time: {expires_at}\n\
             Resources:",
            domain = self.domain,
            address = self.address,
            statement = self.statement,
            uri = self.uri,
            chain_id = self.chain_id,
            nonce = self.nonce,
        );
        for ability in &self.abilities {
            message.push_str("\n- ");
            message.push_str(&ability.resource_uri());
        }
        Ok(message)
    }

    /// Parses a rendered challenge. Unknown resource URIs are ignored.
    pub fn parse(message: &str) -> Result<Self, DelegationError> {
        let malformed = |what: &str| DelegationError::InvalidInput(format!("challenge {what}"));
        let mut lines = message.lines();

        let domain = lines
            .next()
            .and_then(|line| line.strip_suffix(" wants you to sign in with your Ethereum account:"))
            .ok_or_else(|| malformed("is missing the sign-in preamble"))?
            .to_string();
        let address = lines
            .next()
            .and_then(|line| Address::from_str(line.trim()).ok())
            .ok_or_else(|| malformed("has an invalid address line"))?;

        let mut statement = String::new();
        let mut uri = None;
        let mut chain_id = None;
        let mut nonce = None;
        let mut issued_at = None;
        let mut expires_at = None;
        let mut abilities = BTreeSet::new();
        let mut in_resources = false;

        for line in lines {
            if in_resources {
                if let Some(ability) = line
                    .strip_prefix("- ")
                    .and_then(Ability::from_resource_uri)
                {
                    abilities.insert(ability);
                }
                continue;
            }
            if let Some(value) = line.strip_prefix("URI: ") {
                uri = Some(value.to_string());
            } else if let Some(value) = line.strip_prefix("Chain ID: ") {
                chain_id = value.parse::<u64>().ok();
            } else if let Some(value) = line.strip_prefix("Nonce: ") {
                nonce = B256::from_str(value).ok();
            } else if let Some(value) = line.strip_prefix("Issued At: ") {
                issued_at = OffsetDateTime::parse(value, &Rfc3339).ok();
            } else if let Some(value) = line.strip_prefix("Expiration Time: ") {
                expires_at = OffsetDateTime::parse(value, &Rfc3339).ok();
            } else if line == "Resources:" {
                in_resources = true;
            } else if !line.is_empty() && !line.starts_with("Version: ") && statement.is_empty() {
                statement = line.to_string();
            }
        }

        Ok(Self {
            domain,
            uri: uri.ok_or_else(|| malformed("is missing URI"))?,
            address,
            chain_id: chain_id.ok_or_else(|| malformed("is missing Chain ID"))?,
            statement,
            nonce: nonce.ok_or_else(|| malformed("is missing Nonce"))?,
            issued_at: issued_at.ok_or_else(|| malformed("is missing Issued At"))?,
            expires_at: expires_at.ok_or_else(|| malformed("is missing Expiration Time"))?,
            abilities,
        })
    }
}

/// Short-lived, capability-scoped authorization signed by the base wallet.
///
/// Lives in process memory only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionGrant {
    pub id: String,
    pub wallet: Address,
    pub chain_id: u64,
    pub abilities: BTreeSet<Ability>,
    pub issued_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub message: String,
    pub signature: Bytes,
}

impl SessionGrant {
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    #[must_use]
    pub fn covers(&self, ability: Ability) -> bool {
        self.abilities.contains(&ability)
    }

    /// Checks the grant before each use. Expiry wins over a missing ability.
    pub fn authorize(&self, ability: Ability, now: OffsetDateTime) -> Result<(), DelegationError> {
        if self.is_expired_at(now) {
            return Err(DelegationError::AuthorizationExpired {
                expired_at: format_rfc3339(self.expires_at)
                    .unwrap_or_else(|_| self.expires_at.to_string()),
            });
        }
        if !self.covers(ability) {
            return Err(DelegationError::denied(format!(
                "session grant does not include {ability}"
            )));
        }
        Ok(())
    }

    /// Proof handed to the remote signer in place of the grant itself.
    #[must_use]
    pub fn auth_proof(&self) -> AuthProof {
        AuthProof {
            subject: self.wallet,
            grant_id: self.id.clone(),
            message: self.message.clone(),
            signature: self.signature.clone(),
        }
    }
}

pub(crate) fn format_rfc3339(at: OffsetDateTime) -> Result<String, DelegationError> {
    at.format(&Rfc3339)
        .map_err(|error| DelegationError::InvalidInput(format!("cannot format timestamp: {error}")))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use alloy_primitives::{Address, Bytes, B256};
    use time::macros::datetime;
    use time::Duration;

    use super::{Challenge, SessionGrant};
    use crate::ability::Ability;
    use crate::error::DelegationError;

    fn grant() -> SessionGrant {
        SessionGrant {
            id: "g-1".to_string(),
            wallet: Address::repeat_byte(0x11),
            chain_id: 84532,
            abilities: BTreeSet::from([Ability::SIGN_TRANSACTION]),
            issued_at: datetime!(2026-01-01 00:00 UTC),
            expires_at: datetime!(2026-01-01 01:00 UTC),
            message: String::new(),
            signature: Bytes::new(),
        }
    }

    #[test]
    fn authorize_fails_closed_on_missing_ability() {
        let error = grant()
            .authorize(Ability::MINT_IDENTITY, datetime!(2026-01-01 00:10 UTC))
            .expect_err("mint is not granted");
        assert!(matches!(error, DelegationError::AuthorizationDenied { .. }));
    }

    #[test]
    fn authorize_reports_expiry_at_and_after_deadline() {
        let grant = grant();
        grant
            .authorize(
                Ability::SIGN_TRANSACTION,
                grant.expires_at - Duration::seconds(1),
            )
            .expect("still valid");

        for now in [grant.expires_at, grant.expires_at + Duration::hours(3)] {
            let error = grant
                .authorize(Ability::SIGN_TRANSACTION, now)
                .expect_err("expired");
            assert!(matches!(error, DelegationError::AuthorizationExpired { .. }));
        }
    }

    #[test]
    fn challenge_render_parses_back() {
        let challenge = Challenge {
            domain: "meme-agent.local".to_string(),
            uri: "meme-agent://session".to_string(),
            address: Address::repeat_byte(0xab),
            chain_id: 84532,
            statement: "Authorize the agent.".to_string(),
            nonce: B256::repeat_byte(0x07),
            issued_at: datetime!(2026-01-01 00:00 UTC),
            expires_at: datetime!(2026-01-02 00:00 UTC),
            abilities: BTreeSet::from([Ability::SIGN_TRANSACTION, Ability::MINT_IDENTITY]),
        };

        let rendered = challenge.render().expect("render");
        assert!(rendered.contains("Expiration Time: 2026-01-02T00:00:00Z"));
        assert!(rendered.contains("- urn:meme-agent:identity:mint"));
        assert_eq!(Challenge::parse(&rendered).expect("parse"), challenge);
    }
}
