#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use agent_provider::ModelProvider;
use alloy_rlp::{Decodable, Header};
use async_trait::async_trait;
use delegated_signer::abi::{encode_tokens, selector, Token};
use delegated_signer::{
    parse_private_key, Address, AutoApprove, Bytes, CallRequest, ChainRpc, ChallengeApprover,
    DeclineAll, InProcessCustody, LocalKeySigner, LocalWallet, Log, ManualClock, RpcError,
    SubmitPolicy, TxReceipt, B256, U256,
};
use meme_agent::bootstrap::{assemble_chain_context, build_registry, ChainParts};
use meme_agent::chain::ChainContext;
use meme_agent::config::{ChainSection, DelegationSection};
use meme_agent::{Agent, AgentConfig, ToolRegistry, TurnUpdate};
use serde_json::Value;
use thread_store::{MemoryThreadStore, ThreadStore};
use time::OffsetDateTime;

pub const WALLET_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const SPONSOR_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
pub const WALLET_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
pub const CHAIN_ID: u64 = 84532;
pub const USDT: &str = "0x00000000000000000000000000000000000000a1";
pub const MEME_FACTORY: &str = "0x00000000000000000000000000000000000000b2";
pub const LIQUIDITY_FACTORY: &str = "0x00000000000000000000000000000000000000c3";
pub const EXPLORER: &str = "https://sepolia.basescan.org";

pub fn address(text: &str) -> Address {
    Address::from_str(text).expect("test address")
}

pub fn ether(whole: u64, milli: u64) -> U256 {
    U256::from(whole) * U256::from(10u64).pow(U256::from(18))
        + U256::from(milli) * U256::from(10u64).pow(U256::from(15))
}

/// One broadcast transaction as the fake node decoded it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTx {
    pub nonce: u64,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

impl SentTx {
    pub fn calls(&self, signature: &str) -> bool {
        self.data.len() >= 4 && self.data[..4] == selector(signature)
    }
}

fn decode_legacy(raw: &[u8]) -> SentTx {
    let mut buf = raw;
    let header = Header::decode(&mut buf).expect("rlp list header");
    assert!(header.list, "legacy transactions are RLP lists");
    let nonce = u64::decode(&mut buf).expect("nonce");
    let _gas_price = U256::decode(&mut buf).expect("gas price");
    let _gas_limit = u64::decode(&mut buf).expect("gas limit");
    let to = Address::decode(&mut buf).expect("to");
    let value = U256::decode(&mut buf).expect("value");
    let data = Bytes::decode(&mut buf).expect("data");
    SentTx {
        nonce,
        to,
        value,
        data,
    }
}

fn selector_of(data: &[u8]) -> Option<[u8; 4]> {
    let mut key = [0u8; 4];
    key.copy_from_slice(data.get(..4)?);
    Some(key)
}

#[derive(Default)]
struct State {
    sent: Vec<SentTx>,
    mined: HashMap<B256, SentTx>,
    reverting: HashSet<[u8; 4]>,
    receipt_logs: HashMap<[u8; 4], Vec<Log>>,
    call_results: HashMap<[u8; 4], Result<Bytes, RpcError>>,
    balances: HashMap<Address, U256>,
}

/// In-memory node that understands the contract calls the tools make.
///
/// Every broadcast is accepted and mined. Receipts revert for functions
/// registered with [`FakeChain::revert_on_chain`] and carry the logs
/// registered for the called function.
#[derive(Default)]
pub struct FakeChain {
    state: Mutex<State>,
    reads: AtomicUsize,
}

impl FakeChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("fake chain state")
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.state().sent.clone()
    }

    /// Broadcasts that call `signature`, in broadcast order.
    pub fn sent_calls(&self, signature: &str) -> Vec<SentTx> {
        self.sent()
            .into_iter()
            .filter(|tx| tx.calls(signature))
            .collect()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn revert_on_chain(&self, signature: &str) {
        self.state().reverting.insert(selector(signature));
    }

    pub fn set_receipt_logs(&self, signature: &str, logs: Vec<Log>) {
        self.state().receipt_logs.insert(selector(signature), logs);
    }

    pub fn set_call_result(&self, signature: &str, result: Result<Bytes, RpcError>) {
        self.state().call_results.insert(selector(signature), result);
    }

    pub fn returns(&self, signature: &str, tokens: &[Token]) {
        self.set_call_result(signature, Ok(Bytes::from(encode_tokens(tokens))));
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state().balances.insert(address, balance);
    }
}

#[async_trait]
impl ChainRpc for FakeChain {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        Ok(CHAIN_ID)
    }

    async fn pending_nonce(&self, _address: Address) -> Result<u64, RpcError> {
        Ok(0)
    }

    async fn gas_price(&self) -> Result<U256, RpcError> {
        Ok(U256::from(1_000_000_000_u64))
    }

    async fn balance(&self, address: Address) -> Result<U256, RpcError> {
        Ok(self.state().balances.get(&address).copied().unwrap_or_default())
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes, RpcError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if let Some(result) = selector_of(&request.data).and_then(|key| state.call_results.get(&key)) {
            return result.clone();
        }
        Ok(Bytes::from(vec![0u8; 32]))
    }

    async fn estimate_gas(&self, _request: &CallRequest) -> Result<u64, RpcError> {
        Ok(100_000)
    }

    async fn latest_block_hash(&self) -> Result<B256, RpcError> {
        Ok(B256::repeat_byte(0x42))
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, RpcError> {
        let hash = alloy_primitives::keccak256(raw);
        let tx = decode_legacy(raw);
        let mut state = self.state();
        state.sent.push(tx.clone());
        state.mined.insert(hash, tx);
        Ok(hash)
    }

    async fn transaction_known(&self, tx_hash: B256) -> Result<bool, RpcError> {
        Ok(self.state().mined.contains_key(&tx_hash))
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, RpcError> {
        let state = self.state();
        let Some(tx) = state.mined.get(&tx_hash) else {
            return Ok(None);
        };
        let key = selector_of(&tx.data);
        let reverted = key.is_some_and(|key| state.reverting.contains(&key));
        let logs = match key {
            Some(key) if !reverted => state.receipt_logs.get(&key).cloned().unwrap_or_default(),
            _ => Vec::new(),
        };
        Ok(Some(TxReceipt {
            tx_hash,
            success: !reverted,
            block_number: 7,
            gas_used: 50_000,
            logs,
        }))
    }
}

pub fn address_topic(address: Address) -> B256 {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    B256::from(word)
}

pub fn fast_policy() -> SubmitPolicy {
    SubmitPolicy {
        broadcast_attempts: 3,
        broadcast_timeout: Duration::from_millis(200),
        retry_base_delay: Duration::from_millis(1),
        receipt_timeout: Duration::from_millis(500),
        receipt_poll_interval: Duration::from_millis(5),
        gas_margin_percent: 20,
    }
}

pub fn chain_section() -> ChainSection {
    ChainSection {
        rpc_url: "http://127.0.0.1:8545".to_string(),
        chain_id: CHAIN_ID,
        explorer_url: Some(EXPLORER.to_string()),
        usdt_address: USDT.to_string(),
        meme_factory_address: MEME_FACTORY.to_string(),
        liquidity_factory_address: Some(LIQUIDITY_FACTORY.to_string()),
        rpc_timeout_sec: 5,
    }
}

/// Delegation settings without the fee-asset mint, so the only funding
/// broadcast is the sponsor's native transfer.
pub fn delegation_section() -> DelegationSection {
    DelegationSection {
        fee_mint_amount: None,
        ..DelegationSection::default()
    }
}

pub struct ChainHarness {
    pub chain: Arc<FakeChain>,
    pub context: Arc<ChainContext>,
}

impl ChainHarness {
    pub fn new() -> Self {
        Self::with_approver(Arc::new(AutoApprove))
    }

    pub fn declining() -> Self {
        Self::with_approver(Arc::new(DeclineAll))
    }

    pub fn with_approver(approver: Arc<dyn ChallengeApprover>) -> Self {
        let chain = FakeChain::new();
        let rpc: Arc<dyn ChainRpc> = chain.clone();
        let clock = Arc::new(ManualClock::new(OffsetDateTime::now_utc()));
        let wallet = LocalWallet::new(
            parse_private_key(WALLET_KEY).expect("wallet key"),
            CHAIN_ID,
            Arc::clone(&rpc),
            approver,
        );
        let parts = ChainParts {
            rpc,
            wallet: Arc::new(wallet),
            remote: Arc::new(InProcessCustody::new(clock.clone())),
            sponsor: Some(Arc::new(LocalKeySigner::new(
                parse_private_key(SPONSOR_KEY).expect("sponsor key"),
            ))),
            clock,
            policy: fast_policy(),
        };
        let context = assemble_chain_context(parts, &chain_section(), &delegation_section())
            .expect("chain context");

        Self {
            chain,
            context: Arc::new(context),
        }
    }
}

pub fn agent(provider: Arc<dyn ModelProvider>, chain: Option<Arc<ChainContext>>) -> Agent {
    agent_with(provider, chain, AgentConfig::default())
}

pub fn agent_with(
    provider: Arc<dyn ModelProvider>,
    chain: Option<Arc<ChainContext>>,
    config: AgentConfig,
) -> Agent {
    let registry = build_registry().expect("builtin registry");
    agent_with_registry(provider, registry, chain, config)
}

pub fn agent_with_registry(
    provider: Arc<dyn ModelProvider>,
    registry: ToolRegistry,
    chain: Option<Arc<ChainContext>>,
    config: AgentConfig,
) -> Agent {
    let store: Arc<dyn ThreadStore> = Arc::new(MemoryThreadStore::new());
    let agent = Agent::new(provider, Arc::new(registry), store, config);
    match chain {
        Some(chain) => agent.with_chain(chain),
        None => agent,
    }
}

pub fn tool_lines(updates: &[TurnUpdate]) -> Vec<String> {
    updates
        .iter()
        .filter(|update| update.role == agent_provider::Role::Tool)
        .map(|update| update.content.clone())
        .collect()
}

pub fn final_updates(updates: &[TurnUpdate]) -> Vec<&TurnUpdate> {
    updates.iter().filter(|update| update.is_final).collect()
}

pub fn parse_json(content: &str) -> Value {
    serde_json::from_str(content).expect("tool result is JSON")
}

/// Approver that counts how often the wallet was asked to sign.
#[derive(Default)]
pub struct CountingApprover {
    asked: AtomicUsize,
}

impl CountingApprover {
    pub fn count(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

impl ChallengeApprover for CountingApprover {
    fn approve(&self, _message: &str) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        true
    }
}

pub fn new_cancel() -> agent_provider::CancelSignal {
    Arc::new(std::sync::atomic::AtomicBool::new(false))
}
