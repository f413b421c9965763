use alloy_primitives::B256;
use thiserror::Error;

use crate::remote::RemoteSignerError;
use crate::rpc::RpcError;

/// Failure of any stage of the delegated execution pipeline.
///
/// Display strings are user-facing: tools forward them verbatim as error
/// results, and the model narrates them.
#[derive(Debug, Clone, Error)]
pub enum DelegationError {
    #[error("authorization denied: {reason}")]
    AuthorizationDenied { reason: String },

    #[error("authorization expired at {expired_at}; please authorize a new session")]
    AuthorizationExpired { expired_at: String },

    #[error("authorization unavailable: {reason}")]
    AuthorizationUnavailable { reason: String },

    #[error("delegated identity provisioning unavailable: {reason}")]
    ProvisioningUnavailable { reason: String },

    #[error("funding the delegated identity failed: {reason}")]
    FundingFailed { reason: String },

    #[error("remote signing failed: {reason}")]
    SigningFailed { reason: String },

    #[error("invalid signature: {reason}")]
    InvalidSignature { reason: String },

    #[error("transaction {tx_hash} reverted: {reason}")]
    ChainRevert { tx_hash: B256, reason: String },

    #[error("transaction would revert: {reason}")]
    SimulationRevert { reason: String },

    #[error("broadcast of transaction {tx_hash} timed out after {attempts} attempts")]
    BroadcastTimeout { tx_hash: B256, attempts: u32 },

    #[error("no receipt for transaction {tx_hash} within {waited_secs}s")]
    ReceiptTimeout { tx_hash: B256, waited_secs: u64 },

    #[error("nonce {nonce} cannot be abandoned: {reason}")]
    NonceInUse { nonce: u64, reason: String },

    #[error("chain rpc error: {0}")]
    Rpc(#[from] RpcError),

    #[error("{0}")]
    InvalidInput(String),
}

impl DelegationError {
    #[must_use]
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::AuthorizationDenied {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::AuthorizationUnavailable {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn funding(reason: impl ToString) -> Self {
        Self::FundingFailed {
            reason: reason.to_string(),
        }
    }

    /// True for failures the caller may retry without user involvement.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::AuthorizationUnavailable { .. } => true,
            Self::Rpc(error) => error.is_transient(),
            _ => false,
        }
    }

    /// True when the user has to sign a fresh session before retrying.
    #[must_use]
    pub fn requires_reauthorization(&self) -> bool {
        matches!(
            self,
            Self::AuthorizationDenied { .. } | Self::AuthorizationExpired { .. }
        )
    }
}

impl From<RemoteSignerError> for DelegationError {
    fn from(error: RemoteSignerError) -> Self {
        match error {
            RemoteSignerError::Unauthorized(reason) => Self::AuthorizationDenied { reason },
            RemoteSignerError::ScopeMissing(scope) => Self::AuthorizationDenied {
                reason: format!("delegated identity lacks the {scope} scope"),
            },
            other => Self::SigningFailed {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DelegationError;
    use crate::rpc::RpcError;

    #[test]
    fn denial_display_starts_with_authorization_denied() {
        let error = DelegationError::denied("user declined the session request");
        assert_eq!(
            error.to_string(),
            "authorization denied: user declined the session request"
        );
        assert!(error.requires_reauthorization());
        assert!(!error.is_retryable());
    }

    #[test]
    fn unavailability_is_retryable_but_denial_is_not() {
        assert!(DelegationError::unavailable("rpc down").is_retryable());
        assert!(DelegationError::Rpc(RpcError::Transport("reset".to_string())).is_retryable());
        assert!(!DelegationError::funding("no sponsor").is_retryable());
    }
}
