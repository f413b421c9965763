//! System instructions sent with every model turn.

use delegated_signer::units::{format_units, ETHER_DECIMALS};
use tracing::debug;

use crate::chain::ChainContext;

pub const DEFAULT_INSTRUCTIONS: &str = "You are an AI blockchain assistant. You can provide token \
information, suggest token creation parameters and show trading data. You have access to token \
creation and liquidity management tools; use them to create and manage tokens when the user asks. \
Amounts are plain decimal token units. When a tool fails, explain the failure to the user in plain \
language.";

/// Wallet facts appended to the base instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDetails {
    pub wallet_address: String,
    pub chain_id: u64,
    pub eth_balance: Option<String>,
}

impl UserDetails {
    /// Reads the details from the chain. A failed balance lookup leaves the
    /// balance unknown rather than failing the turn.
    pub async fn fetch(chain: &ChainContext) -> Self {
        let eth_balance = match chain.wallet_balance().await {
            Ok(balance) => Some(format_units(balance, ETHER_DECIMALS)),
            Err(error) => {
                debug!(%error, "wallet balance unavailable for instructions");
                None
            }
        };
        Self {
            wallet_address: chain.wallet_address().to_string(),
            chain_id: chain.chain_id(),
            eth_balance,
        }
    }
}

#[must_use]
pub fn render_instructions(base: &str, details: Option<&UserDetails>) -> String {
    let Some(details) = details else {
        return base.to_string();
    };

    format!(
        "{base}\n\nUser Details:\nWallet Address: {}\nChain ID: {}\nETH Balance: {}",
        details.wallet_address,
        details.chain_id,
        details.eth_balance.as_deref().unwrap_or("unknown"),
    )
}
