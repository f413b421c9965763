use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Class of resource a session grant can act upon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    Transaction,
    Identity,
}

/// Operation permitted on a resource class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Sign,
    Mint,
}

/// One `(resource class, action)` pair carried by a session grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ability {
    pub resource: ResourceClass,
    pub action: Action,
}

const URN_PREFIX: &str = "urn:meme-agent:";

impl Ability {
    pub const SIGN_TRANSACTION: Self = Self::new(ResourceClass::Transaction, Action::Sign);
    pub const MINT_IDENTITY: Self = Self::new(ResourceClass::Identity, Action::Mint);

    #[must_use]
    pub const fn new(resource: ResourceClass, action: Action) -> Self {
        Self { resource, action }
    }

    /// Resource URI listed in the sign-in challenge.
    #[must_use]
    pub fn resource_uri(&self) -> String {
        format!("{URN_PREFIX}{self}")
    }

    #[must_use]
    pub fn from_resource_uri(uri: &str) -> Option<Self> {
        uri.strip_prefix(URN_PREFIX)?.parse().ok()
    }
}

impl ResourceClass {
    fn as_str(self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::Identity => "identity",
        }
    }
}

impl Action {
    fn as_str(self) -> &'static str {
        match self {
            Self::Sign => "sign",
            Self::Mint => "mint",
        }
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource.as_str(), self.action.as_str())
    }
}

impl FromStr for Ability {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (resource, action) = raw
            .split_once(':')
            .ok_or_else(|| format!("ability '{raw}' must look like resource:action"))?;
        let resource = match resource {
            "transaction" => ResourceClass::Transaction,
            "identity" => ResourceClass::Identity,
            other => return Err(format!("unknown resource class '{other}'")),
        };
        let action = match action {
            "sign" => Action::Sign,
            "mint" => Action::Mint,
            other => return Err(format!("unknown action '{other}'")),
        };
        Ok(Self::new(resource, action))
    }
}

#[cfg(test)]
mod tests {
    use super::Ability;

    #[test]
    fn resource_uri_parses_back() {
        let uri = Ability::SIGN_TRANSACTION.resource_uri();
        assert_eq!(uri, "urn:meme-agent:transaction:sign");
        assert_eq!(
            Ability::from_resource_uri(&uri),
            Some(Ability::SIGN_TRANSACTION)
        );
    }

    #[test]
    fn rejects_foreign_or_malformed_resources() {
        assert_eq!(Ability::from_resource_uri("lit-litaction://*"), None);
        assert!("identity".parse::<Ability>().is_err());
        assert!("identity:burn".parse::<Ability>().is_err());
    }
}
