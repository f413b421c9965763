//! Chain access shared by the built-in tools.

use std::sync::Arc;

use delegated_signer::{
    Address, Bytes, CallRequest, ChainRpc, DelegationManager, TxOutcome, TxRequest, B256, U256,
};
use tracing::{debug, info};

use crate::contracts::{ContractCodec, Token};
use crate::registry::ToolError;

/// Deployed contracts the tools talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractAddresses {
    /// Fee asset paid to the meme factory and quote side of every pair.
    pub usdt: Address,
    pub meme_factory: Address,
    pub liquidity_factory: Option<Address>,
}

/// Wallet, delegation and contract access for one runtime.
pub struct ChainContext {
    rpc: Arc<dyn ChainRpc>,
    delegation: Arc<DelegationManager>,
    codec: Arc<dyn ContractCodec>,
    addresses: ContractAddresses,
    chain_id: u64,
    explorer_url: Option<String>,
}

impl ChainContext {
    #[must_use]
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        delegation: Arc<DelegationManager>,
        codec: Arc<dyn ContractCodec>,
        addresses: ContractAddresses,
        chain_id: u64,
    ) -> Self {
        Self {
            rpc,
            delegation,
            codec,
            addresses,
            chain_id,
            explorer_url: None,
        }
    }

    #[must_use]
    pub fn with_explorer(mut self, url: impl Into<String>) -> Self {
        self.explorer_url = Some(url.into());
        self
    }

    pub fn rpc(&self) -> &Arc<dyn ChainRpc> {
        &self.rpc
    }

    pub fn codec(&self) -> &dyn ContractCodec {
        self.codec.as_ref()
    }

    pub fn addresses(&self) -> &ContractAddresses {
        &self.addresses
    }

    pub fn delegation(&self) -> &Arc<DelegationManager> {
        &self.delegation
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn wallet_address(&self) -> Address {
        self.delegation.wallet_address()
    }

    /// Address that holds tokens created or bought by the tools: the current
    /// delegated identity when one exists, the base wallet otherwise.
    pub async fn acting_address(&self) -> Address {
        match self.delegation.current_identity().await {
            Some(identity) => identity.address,
            None => self.wallet_address(),
        }
    }

    pub async fn wallet_balance(&self) -> Result<U256, ToolError> {
        Ok(self.delegation.authorizer().wallet().native_balance().await?)
    }

    pub fn liquidity_factory(&self) -> Result<Address, ToolError> {
        self.addresses
            .liquidity_factory
            .ok_or_else(|| ToolError::failed("no liquidity factory address is configured"))
    }

    /// `eth_call` of `function` on `to`; returns the raw return data.
    pub async fn read(
        &self,
        to: Address,
        function: &str,
        args: &[Token],
    ) -> Result<Bytes, ToolError> {
        let data = self.codec.encode_call(function, args)?;
        debug!(%to, function, "reading contract");
        Ok(self.rpc.call(&CallRequest::new(to, data)).await?)
    }

    /// Submits `function` on `to` as the delegated identity and waits for a
    /// successful receipt.
    pub async fn write(
        &self,
        to: Address,
        function: &str,
        args: &[Token],
    ) -> Result<TxOutcome, ToolError> {
        let data = self.codec.encode_call(function, args)?;
        info!(%to, function, "submitting contract call");
        let outcome = self.delegation.execute(TxRequest::call(to, data)).await?;
        info!(
            tx_hash = %outcome.tx_hash,
            nonce = outcome.nonce,
            function,
            "contract call confirmed"
        );
        Ok(outcome)
    }

    /// Block explorer link for `tx_hash`, or the bare hash without an explorer.
    pub fn tx_link(&self, tx_hash: B256) -> String {
        match self.explorer_url.as_deref() {
            Some(base) => format!("{}/tx/{tx_hash}", base.trim_end_matches('/')),
            None => tx_hash.to_string(),
        }
    }
}
