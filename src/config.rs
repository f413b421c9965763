//! Environment and file configuration.
//!
//! The environment selects the provider, keys and paths. An optional JSON
//! file named by `MEME_AGENT_CONFIG_PATH` carries the chain, delegation,
//! OpenAI and agent settings; missing sections fall back to Base Sepolia
//! defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use delegated_signer::units::{parse_units, ETHER_DECIMALS};
use delegated_signer::{Address, FeeAssetMint, FundingPolicy, SubmitPolicy, U256};
use serde::Deserialize;

use crate::agent::{AgentConfig, DEFAULT_MAX_TOOL_ROUNDS};
use crate::chain::ContractAddresses;
use crate::prompt::DEFAULT_INSTRUCTIONS;

pub const PROVIDER_ENV_VAR: &str = "MEME_AGENT_PROVIDER";
pub const CONFIG_PATH_ENV_VAR: &str = "MEME_AGENT_CONFIG_PATH";
pub const WALLET_KEY_ENV_VAR: &str = "MEME_AGENT_WALLET_KEY";
pub const SPONSOR_KEY_ENV_VAR: &str = "MEME_AGENT_SPONSOR_KEY";
pub const THREAD_DIR_ENV_VAR: &str = "MEME_AGENT_THREAD_DIR";
pub const INSTRUCTIONS_ENV_VAR: &str = "MEME_AGENT_SYSTEM_INSTRUCTIONS";
pub const LOG_ENV_VAR: &str = "MEME_AGENT_LOG";

pub const DEFAULT_PROVIDER_ID: &str = "mock";
pub const DEFAULT_THREAD_DIR: &str = ".meme_agent/threads";
/// Upper bound on `delegation.broadcast_attempts`; retry backoff doubles per attempt.
pub const MAX_BROADCAST_ATTEMPTS: u32 = 10;

pub const BASE_SEPOLIA_CHAIN_ID: u64 = 0x14a34;
pub const BASE_SEPOLIA_RPC_URL: &str = "https://sepolia.base.org";
pub const BASE_SEPOLIA_EXPLORER_URL: &str = "https://sepolia.basescan.org/";
pub const BASE_SEPOLIA_USDT: &str = "0x65E433162535b4d0cF34a8630684fC3211ce1EE9";
pub const BASE_SEPOLIA_MEME_FACTORY: &str = "0xb67444e08b5182549Cf1921F2EF63DC3D8b32eed";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
    #[error("{0} is not set")]
    Missing(&'static str),
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Contents of the JSON config file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub openai: Option<OpenAiSection>,
    pub chain: ChainSection,
    pub delegation: DelegationSection,
    pub agent: AgentSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenAiSection {
    pub api_key: String,
    /// First entry is the model used for every turn.
    pub models: Vec<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_sec: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChainSection {
    pub rpc_url: String,
    pub chain_id: u64,
    pub explorer_url: Option<String>,
    pub usdt_address: String,
    pub meme_factory_address: String,
    pub liquidity_factory_address: Option<String>,
    pub rpc_timeout_sec: u64,
}

impl Default for ChainSection {
    fn default() -> Self {
        Self {
            rpc_url: BASE_SEPOLIA_RPC_URL.to_string(),
            chain_id: BASE_SEPOLIA_CHAIN_ID,
            explorer_url: Some(BASE_SEPOLIA_EXPLORER_URL.to_string()),
            usdt_address: BASE_SEPOLIA_USDT.to_string(),
            meme_factory_address: BASE_SEPOLIA_MEME_FACTORY.to_string(),
            liquidity_factory_address: None,
            rpc_timeout_sec: 30,
        }
    }
}

impl ChainSection {
    pub fn contract_addresses(&self) -> Result<ContractAddresses, ConfigError> {
        Ok(ContractAddresses {
            usdt: parse_address("chain.usdt_address", &self.usdt_address)?,
            meme_factory: parse_address("chain.meme_factory_address", &self.meme_factory_address)?,
            liquidity_factory: self
                .liquidity_factory_address
                .as_deref()
                .map(|raw| parse_address("chain.liquidity_factory_address", raw))
                .transpose()?,
        })
    }

    #[must_use]
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_sec)
    }
}

/// Grant lifetime, identity funding and submission bounds. Wei amounts are
/// decimal strings; `fee_mint_amount` is in whole fee-asset units.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DelegationSection {
    pub grant_ttl_hours: u64,
    pub provisioning_timeout_sec: u64,
    pub funding_native_wei: String,
    pub funding_min_balance_wei: String,
    pub fee_mint_amount: Option<String>,
    pub broadcast_attempts: u32,
    pub broadcast_timeout_sec: u64,
    pub receipt_timeout_sec: u64,
}

impl Default for DelegationSection {
    fn default() -> Self {
        Self {
            grant_ttl_hours: 1,
            provisioning_timeout_sec: 180,
            funding_native_wei: "1000000000000000".to_string(),
            funding_min_balance_wei: "500000000000000".to_string(),
            fee_mint_amount: Some("100".to_string()),
            broadcast_attempts: 3,
            broadcast_timeout_sec: 15,
            receipt_timeout_sec: 120,
        }
    }
}

impl DelegationSection {
    #[must_use]
    pub fn grant_ttl(&self) -> time::Duration {
        time::Duration::hours(self.grant_ttl_hours as i64)
    }

    #[must_use]
    pub fn provisioning_timeout(&self) -> Duration {
        Duration::from_secs(self.provisioning_timeout_sec)
    }

    pub fn funding_policy(&self, fee_asset: Address) -> Result<FundingPolicy, ConfigError> {
        let fee_asset = self
            .fee_mint_amount
            .as_deref()
            .map(|raw| {
                parse_units(raw, ETHER_DECIMALS)
                    .map(|amount| FeeAssetMint {
                        token: fee_asset,
                        amount,
                    })
                    .map_err(|reason| ConfigError::invalid("delegation.fee_mint_amount", reason))
            })
            .transpose()?;

        Ok(FundingPolicy {
            min_native_balance: parse_wei(
                "delegation.funding_min_balance_wei",
                &self.funding_min_balance_wei,
            )?,
            native_amount: parse_wei("delegation.funding_native_wei", &self.funding_native_wei)?,
            fee_asset,
            timeout: self.provisioning_timeout(),
        })
    }

    #[must_use]
    pub fn submit_policy(&self) -> SubmitPolicy {
        SubmitPolicy {
            broadcast_attempts: self.broadcast_attempts,
            broadcast_timeout: Duration::from_secs(self.broadcast_timeout_sec),
            receipt_timeout: Duration::from_secs(self.receipt_timeout_sec),
            ..SubmitPolicy::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentSection {
    pub max_tool_rounds: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values serde cannot: non-empty strings, parseable addresses and amounts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(openai) = &self.openai {
            if openai.api_key.trim().is_empty() {
                return Err(ConfigError::invalid("openai.api_key", "must not be empty"));
            }
            if openai
                .models
                .first()
                .map_or(true, |model| model.trim().is_empty())
            {
                return Err(ConfigError::invalid(
                    "openai.models",
                    "must list at least one model",
                ));
            }
        }

        if self.chain.rpc_url.trim().is_empty() {
            return Err(ConfigError::invalid("chain.rpc_url", "must not be empty"));
        }
        if self.chain.chain_id == 0 {
            return Err(ConfigError::invalid("chain.chain_id", "must be non-zero"));
        }
        let addresses = self.chain.contract_addresses()?;

        if self.delegation.grant_ttl_hours == 0 {
            return Err(ConfigError::invalid(
                "delegation.grant_ttl_hours",
                "must be at least 1",
            ));
        }
        if !(1..=MAX_BROADCAST_ATTEMPTS).contains(&self.delegation.broadcast_attempts) {
            return Err(ConfigError::invalid(
                "delegation.broadcast_attempts",
                format!("must be between 1 and {MAX_BROADCAST_ATTEMPTS}"),
            ));
        }
        self.delegation.funding_policy(addresses.usdt)?;

        if self.agent.max_tool_rounds == 0 {
            return Err(ConfigError::invalid(
                "agent.max_tool_rounds",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Everything the binary needs to assemble a runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub provider_id: String,
    pub file: FileConfig,
    pub wallet_key: Option<String>,
    pub sponsor_key: Option<String>,
    pub thread_dir: PathBuf,
    pub instructions: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let file = match env_string_opt(CONFIG_PATH_ENV_VAR) {
            Some(path) => FileConfig::load(Path::new(&path))?,
            None => FileConfig::default(),
        };

        Ok(Self {
            provider_id: env_string_opt(PROVIDER_ENV_VAR)
                .unwrap_or_else(|| DEFAULT_PROVIDER_ID.to_string()),
            file,
            wallet_key: env_string_opt(WALLET_KEY_ENV_VAR),
            sponsor_key: env_string_opt(SPONSOR_KEY_ENV_VAR),
            thread_dir: env_string_opt(THREAD_DIR_ENV_VAR)
                .map_or_else(|| PathBuf::from(DEFAULT_THREAD_DIR), PathBuf::from),
            instructions: env_string_opt(INSTRUCTIONS_ENV_VAR),
        })
    }

    #[must_use]
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            instructions: self
                .instructions
                .clone()
                .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
            max_tool_rounds: self.file.agent.max_tool_rounds,
        }
    }
}

fn parse_address(field: &str, raw: &str) -> Result<Address, ConfigError> {
    Address::from_str(raw.trim())
        .map_err(|_| ConfigError::invalid(field, format!("'{raw}' is not a 0x-prefixed address")))
}

fn parse_wei(field: &str, raw: &str) -> Result<U256, ConfigError> {
    U256::from_str_radix(raw.trim(), 10)
        .map_err(|_| ConfigError::invalid(field, format!("'{raw}' is not a decimal wei amount")))
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value.trim().to_string())
        }
    })
}
