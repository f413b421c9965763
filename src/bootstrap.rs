//! Assembles an [`Agent`] and its chain access from an [`AppConfig`].

use std::sync::Arc;

use agent_provider::{ModelProvider, ProviderInitError};
use delegated_signer::{
    parse_private_key, AutoApprove, BaseWallet, ChainRpc, Clock, DelegationManager,
    FundingLedger, GasSponsor, HashSigner, HttpChainRpc, IdentityProvisioner, InProcessCustody,
    LocalKeySigner, LocalWallet, NonceManager, RemoteSigner, RpcError, SessionAuthorizer,
    SubmitPolicy, SystemClock, TransactionAssembler,
};
use thread_store::{JsonlThreadStore, ThreadStoreError};
use tracing::info;

use crate::agent::Agent;
use crate::chain::ChainContext;
use crate::config::{
    AppConfig, ChainSection, ConfigError, DelegationSection, SPONSOR_KEY_ENV_VAR,
    WALLET_KEY_ENV_VAR,
};
use crate::contracts::SolidityCodec;
use crate::registry::{RegistryError, ToolRegistry};
use crate::tools::register_builtin_tools;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("provider setup failed: {0}")]
    Provider(#[from] ProviderInitError),
    #[error(transparent)]
    Store(#[from] ThreadStoreError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("chain rpc setup failed: {0}")]
    Rpc(#[from] RpcError),
}

/// Collaborators of the delegated pipeline that differ between a real
/// deployment and a test harness.
pub struct ChainParts {
    pub rpc: Arc<dyn ChainRpc>,
    pub wallet: Arc<dyn BaseWallet>,
    pub remote: Arc<dyn RemoteSigner>,
    pub sponsor: Option<Arc<dyn HashSigner>>,
    pub clock: Arc<dyn Clock>,
    pub policy: SubmitPolicy,
}

pub fn build_registry() -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry)?;
    Ok(registry)
}

/// Wires authorizer, provisioner, assembler and delegation manager around `parts`.
pub fn assemble_chain_context(
    parts: ChainParts,
    chain: &ChainSection,
    delegation: &DelegationSection,
) -> Result<ChainContext, ConfigError> {
    let addresses = chain.contract_addresses()?;
    let assembler = Arc::new(TransactionAssembler::new(
        Arc::clone(&parts.rpc),
        Arc::new(NonceManager::new()),
        chain.chain_id,
        parts.policy,
    ));

    let mut provisioner = IdentityProvisioner::new(
        parts.remote,
        Arc::clone(&assembler),
        Arc::clone(&parts.clock),
        Arc::new(FundingLedger::new()),
    )
    .with_funding_policy(delegation.funding_policy(addresses.usdt)?)
    .with_timeout(delegation.provisioning_timeout());
    if let Some(sponsor) = parts.sponsor {
        provisioner = provisioner.with_sponsor(GasSponsor::new(sponsor));
    }

    let authorizer = SessionAuthorizer::new(
        parts.wallet,
        Arc::clone(&parts.rpc),
        Arc::clone(&parts.clock),
    );
    let manager = DelegationManager::new(
        authorizer,
        provisioner,
        assembler,
        parts.clock,
        delegation.grant_ttl(),
    );

    let mut context = ChainContext::new(
        parts.rpc,
        Arc::new(manager),
        Arc::new(SolidityCodec),
        addresses,
        chain.chain_id,
    );
    if let Some(explorer) = &chain.explorer_url {
        context = context.with_explorer(explorer.clone());
    }
    Ok(context)
}

/// Chain access for the configured wallet, or `None` when no wallet key is set.
pub fn build_chain_context(config: &AppConfig) -> Result<Option<ChainContext>, BootstrapError> {
    let Some(wallet_key) = config.wallet_key.as_deref() else {
        info!("no wallet key configured; chain tools will report that chain access is missing");
        return Ok(None);
    };

    let chain = &config.file.chain;
    let key = parse_private_key(wallet_key).map_err(|error| ConfigError::Invalid {
        field: WALLET_KEY_ENV_VAR.to_string(),
        reason: error.to_string(),
    })?;
    let sponsor_key = match config.sponsor_key.as_deref() {
        Some(raw) => parse_private_key(raw).map_err(|error| ConfigError::Invalid {
            field: SPONSOR_KEY_ENV_VAR.to_string(),
            reason: error.to_string(),
        })?,
        None => key.clone(),
    };

    let rpc: Arc<dyn ChainRpc> = Arc::new(HttpChainRpc::new(&chain.rpc_url, chain.rpc_timeout())?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let wallet = LocalWallet::new(key, chain.chain_id, Arc::clone(&rpc), Arc::new(AutoApprove));
    info!(wallet = %wallet.address(), chain_id = chain.chain_id, rpc = %chain.rpc_url, "chain access configured");

    let parts = ChainParts {
        rpc,
        wallet: Arc::new(wallet),
        remote: Arc::new(InProcessCustody::new(Arc::clone(&clock))),
        sponsor: Some(Arc::new(LocalKeySigner::new(sponsor_key))),
        clock,
        policy: config.file.delegation.submit_policy(),
    };
    Ok(Some(assemble_chain_context(
        parts,
        chain,
        &config.file.delegation,
    )?))
}

pub fn build_agent(
    config: &AppConfig,
    provider: Arc<dyn ModelProvider>,
) -> Result<Agent, BootstrapError> {
    let store = JsonlThreadStore::new(config.thread_dir.clone())?;
    let registry = build_registry()?;
    let agent = Agent::new(
        provider,
        Arc::new(registry),
        Arc::new(store),
        config.agent_config(),
    );

    Ok(match build_chain_context(config)? {
        Some(chain) => agent.with_chain(Arc::new(chain)),
        None => agent,
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::FileConfig;

    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn app_config(wallet_key: Option<&str>, thread_dir: PathBuf) -> AppConfig {
        AppConfig {
            provider_id: "mock".to_string(),
            file: FileConfig::default(),
            wallet_key: wallet_key.map(str::to_string),
            sponsor_key: None,
            thread_dir,
            instructions: None,
        }
    }

    #[test]
    fn without_a_wallet_key_there_is_no_chain_access() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = app_config(None, dir.path().to_path_buf());
        assert!(build_chain_context(&config).expect("bootstrap").is_none());
    }

    #[test]
    fn a_malformed_wallet_key_names_the_variable() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = app_config(Some("0xnot-a-key"), dir.path().to_path_buf());
        let error = match build_chain_context(&config) {
            Ok(_) => panic!("bad key should fail"),
            Err(error) => error,
        };
        assert!(error.to_string().contains(WALLET_KEY_ENV_VAR));
    }

    #[test]
    fn chain_context_uses_the_configured_wallet() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = app_config(Some(TEST_KEY), dir.path().to_path_buf());
        let chain = build_chain_context(&config)
            .expect("bootstrap")
            .expect("chain configured");

        assert_eq!(
            chain.wallet_address().to_string().to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
        assert_eq!(chain.chain_id(), 84532);
    }

    #[test]
    fn build_agent_registers_every_builtin_tool() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = app_config(None, dir.path().join("threads"));
        let provider = crate::providers::provider_for_id("mock", None).expect("mock provider");
        let agent = build_agent(&config, provider).expect("agent builds");

        assert_eq!(agent.registry().len(), 11);
        assert_eq!(agent.config().max_tool_rounds, 10);
    }
}
