#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use delegated_signer::abi::{encode_call, selector, Token};
use delegated_signer::{
    Address, Bytes, CallRequest, ChainRpc, ChallengeApprover, RpcError, SubmitPolicy, TxReceipt,
    B256, U256,
};

pub const WALLET_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const SPONSOR_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
pub const CHAIN_ID: u64 = 84532;

/// How the fake node answers one `eth_sendRawTransaction`.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    Accept,
    Transient,
    Hang,
    AlreadyKnown,
    Reject(&'static str),
}

#[derive(Default)]
struct State {
    send_script: VecDeque<SendOutcome>,
    sent: Vec<Bytes>,
    accepted: HashSet<B256>,
    reverting: bool,
    call_results: HashMap<[u8; 4], Result<Bytes, RpcError>>,
    estimate_error: Option<RpcError>,
    block_hash_error: Option<RpcError>,
    lookup_error: Option<RpcError>,
    balances: HashMap<Address, U256>,
    pending: HashMap<Address, u64>,
}

/// In-memory chain node. Sends accept by default; receipts exist for every
/// accepted hash.
#[derive(Default)]
pub struct FakeChain {
    state: Mutex<State>,
}

impl FakeChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake chain state")
    }

    pub fn script_sends(&self, script: impl IntoIterator<Item = SendOutcome>) {
        self.state().send_script.extend(script);
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.state().sent.clone()
    }

    pub fn accepted_count(&self) -> usize {
        self.state().accepted.len()
    }

    pub fn set_reverting(&self, reverting: bool) {
        self.state().reverting = reverting;
    }

    pub fn set_call_result(&self, signature: &str, result: Result<Bytes, RpcError>) {
        self.state().call_results.insert(selector(signature), result);
    }

    pub fn set_estimate_error(&self, error: RpcError) {
        self.state().estimate_error = Some(error);
    }

    pub fn set_block_hash_error(&self, error: RpcError) {
        self.state().block_hash_error = Some(error);
    }

    /// Makes `transaction_known` fail until cleared.
    pub fn set_lookup_error(&self, error: Option<RpcError>) {
        self.state().lookup_error = error;
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state().balances.insert(address, balance);
    }

    pub fn set_pending_nonce(&self, address: Address, nonce: u64) {
        self.state().pending.insert(address, nonce);
    }
}

pub fn revert_error(method: &str, reason: &str) -> RpcError {
    let data = encode_call("Error(string)", &[Token::String(reason.to_string())])
        .expect("encode revert payload");
    RpcError::Node {
        method: method.to_string(),
        code: 3,
        message: "execution reverted".to_string(),
        data: Some(format!("0x{}", hex::encode(&data))),
    }
}

fn node_error(method: &str, message: &str) -> RpcError {
    RpcError::Node {
        method: method.to_string(),
        code: -32000,
        message: message.to_string(),
        data: None,
    }
}

#[async_trait]
impl ChainRpc for FakeChain {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        Ok(CHAIN_ID)
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64, RpcError> {
        Ok(self.state().pending.get(&address).copied().unwrap_or_default())
    }

    async fn gas_price(&self) -> Result<U256, RpcError> {
        Ok(U256::from(1_000_000_000_u64))
    }

    async fn balance(&self, address: Address) -> Result<U256, RpcError> {
        Ok(self.state().balances.get(&address).copied().unwrap_or_default())
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes, RpcError> {
        let state = self.state();
        if request.data.len() >= 4 {
            let mut key = [0u8; 4];
            key.copy_from_slice(&request.data[..4]);
            if let Some(result) = state.call_results.get(&key) {
                return result.clone();
            }
        }
        Ok(Bytes::from(vec![0u8; 32]))
    }

    async fn estimate_gas(&self, _request: &CallRequest) -> Result<u64, RpcError> {
        match &self.state().estimate_error {
            Some(error) => Err(error.clone()),
            None => Ok(100_000),
        }
    }

    async fn latest_block_hash(&self) -> Result<B256, RpcError> {
        match &self.state().block_hash_error {
            Some(error) => Err(error.clone()),
            None => Ok(B256::repeat_byte(0x42)),
        }
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, RpcError> {
        let hash = alloy_primitives::keccak256(raw);
        let behavior = {
            let mut state = self.state();
            state.sent.push(raw.clone());
            state.send_script.pop_front().unwrap_or(SendOutcome::Accept)
        };
        match behavior {
            SendOutcome::Accept => {
                self.state().accepted.insert(hash);
                Ok(hash)
            }
            SendOutcome::AlreadyKnown => {
                self.state().accepted.insert(hash);
                Err(node_error("eth_sendRawTransaction", "already known"))
            }
            SendOutcome::Transient => Err(RpcError::Transport("connection reset".to_string())),
            SendOutcome::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(RpcError::Timeout)
            }
            SendOutcome::Reject(message) => Err(node_error("eth_sendRawTransaction", message)),
        }
    }

    async fn transaction_known(&self, tx_hash: B256) -> Result<bool, RpcError> {
        let state = self.state();
        match &state.lookup_error {
            Some(error) => Err(error.clone()),
            None => Ok(state.accepted.contains(&tx_hash)),
        }
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, RpcError> {
        let state = self.state();
        if !state.accepted.contains(&tx_hash) {
            return Ok(None);
        }
        Ok(Some(TxReceipt {
            tx_hash,
            success: !state.reverting,
            block_number: 7,
            gas_used: 50_000,
            logs: Vec::new(),
        }))
    }
}

pub fn fast_policy() -> SubmitPolicy {
    SubmitPolicy {
        broadcast_attempts: 3,
        broadcast_timeout: Duration::from_millis(100),
        retry_base_delay: Duration::from_millis(1),
        receipt_timeout: Duration::from_millis(500),
        receipt_poll_interval: Duration::from_millis(10),
        gas_margin_percent: 20,
    }
}

/// Approves every challenge and counts how often it was asked.
#[derive(Default)]
pub struct CountingApprover {
    pub asked: AtomicUsize,
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
