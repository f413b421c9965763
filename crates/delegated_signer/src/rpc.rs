use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

/// Failure talking to the chain node.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("node returned error {code} for {method}: {message}")]
    Node {
        method: String,
        code: i64,
        message: String,
        data: Option<String>,
    },

    #[error("malformed {method} response: {reason}")]
    Decode { method: String, reason: String },
}

impl RpcError {
    /// Transport hiccups and rate limits; the same request may succeed later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Node { code, message, .. } => {
                *code == -32005 || *code == 429 || message.to_ascii_lowercase().contains("rate")
            }
            Self::Decode { .. } => false,
        }
    }

    /// The node already has this exact payload in its pool or chain.
    #[must_use]
    pub fn is_already_known(&self) -> bool {
        match self {
            Self::Node { message, .. } => {
                let lowered = message.to_ascii_lowercase();
                lowered.contains("already known") || lowered.contains("known transaction")
            }
            _ => false,
        }
    }

    /// Hex revert payload attached to an execution error, if any.
    #[must_use]
    pub fn revert_data(&self) -> Option<&str> {
        match self {
            Self::Node { data, .. } => data.as_deref(),
            _ => None,
        }
    }

    fn decode(method: &str, reason: impl Into<String>) -> Self {
        Self::Decode {
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}

/// Read-only call or gas-estimation request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

impl CallRequest {
    #[must_use]
    pub fn new(to: Address, data: Bytes) -> Self {
        Self {
            from: None,
            to,
            data,
            value: U256::ZERO,
        }
    }

    fn to_json(&self) -> Value {
        let mut object = serde_json::Map::new();
        if let Some(from) = self.from {
            object.insert("from".to_string(), json!(from.to_string()));
        }
        object.insert("to".to_string(), json!(self.to.to_string()));
        object.insert("data".to_string(), json!(self.data.to_string()));
        if !self.value.is_zero() {
            object.insert("value".to_string(), json!(format!("0x{:x}", self.value)));
        }
        Value::Object(object)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub success: bool,
    pub block_number: u64,
    pub gas_used: u64,
    pub logs: Vec<Log>,
}

/// Chain access needed by the delegated pipeline and the tools.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn chain_id(&self) -> Result<u64, RpcError>;

    /// Next nonce including pending pool transactions.
    async fn pending_nonce(&self, address: Address) -> Result<u64, RpcError>;

    async fn gas_price(&self) -> Result<U256, RpcError>;

    async fn balance(&self, address: Address) -> Result<U256, RpcError>;

    async fn call(&self, request: &CallRequest) -> Result<Bytes, RpcError>;

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64, RpcError>;

    async fn latest_block_hash(&self) -> Result<B256, RpcError>;

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, RpcError>;

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, RpcError>;

    /// True when the node has the transaction in its pool or in a block.
    async fn transaction_known(&self, tx_hash: B256) -> Result<bool, RpcError>;

    /// Polls for a receipt until it appears or `timeout` elapses; `Ok(None)` on timeout.
    async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Option<TxReceipt>, RpcError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return Ok(Some(receipt)),
                Ok(None) => {}
                Err(error) if error.is_transient() => {
                    debug!(%tx_hash, %error, "receipt poll failed; retrying");
                }
                Err(error) => return Err(error),
            }
            if tokio::time::Instant::now() + poll_interval > deadline {
                return Ok(None);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

/// JSON-RPC over HTTP.
#[derive(Debug)]
pub struct HttpChainRpc {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpChainRpc {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(RpcError::Transport("rpc url is not configured".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| RpcError::Transport(error.to_string()))?;
        Ok(Self {
            client,
            url,
            next_id: AtomicU64::new(1),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    RpcError::Timeout
                } else {
                    RpcError::Transport(error.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(RpcError::Transport(format!("{method} returned HTTP {status}")));
        }

        let envelope: RpcEnvelope = response
            .json()
            .await
            .map_err(|error| RpcError::decode(method, error.to_string()))?;
        if let Some(error) = envelope.error {
            return Err(RpcError::Node {
                method: method.to_string(),
                code: error.code,
                message: error.message,
                data: error.data.and_then(|data| match data {
                    Value::String(raw) => Some(raw),
                    _ => None,
                }),
            });
        }
        Ok(envelope.result.unwrap_or(Value::Null))
    }

    async fn rpc_string(&self, method: &str, params: Value) -> Result<String, RpcError> {
        match self.rpc_call(method, params).await? {
            Value::String(raw) => Ok(raw),
            other => Err(RpcError::decode(
                method,
                format!("expected hex string, got {other}"),
            )),
        }
    }
}

#[derive(Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    status: Option<String>,
    block_number: Option<String>,
    gas_used: Option<String>,
    #[serde(default)]
    logs: Vec<RawLog>,
}

#[derive(Deserialize)]
struct RawLog {
    address: String,
    #[serde(default)]
    topics: Vec<String>,
    data: String,
}

#[async_trait]
impl ChainRpc for HttpChainRpc {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        let raw = self.rpc_string("eth_chainId", json!([])).await?;
        parse_hex_u64(&raw, "eth_chainId")
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64, RpcError> {
        let raw = self
            .rpc_string(
                "eth_getTransactionCount",
                json!([address.to_string(), "pending"]),
            )
            .await?;
        parse_hex_u64(&raw, "eth_getTransactionCount")
    }

    async fn gas_price(&self) -> Result<U256, RpcError> {
        let raw = self.rpc_string("eth_gasPrice", json!([])).await?;
        parse_hex_u256(&raw, "eth_gasPrice")
    }

    async fn balance(&self, address: Address) -> Result<U256, RpcError> {
        let raw = self
            .rpc_string("eth_getBalance", json!([address.to_string(), "latest"]))
            .await?;
        parse_hex_u256(&raw, "eth_getBalance")
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes, RpcError> {
        let raw = self
            .rpc_string("eth_call", json!([request.to_json(), "latest"]))
            .await?;
        parse_hex_bytes(&raw, "eth_call")
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64, RpcError> {
        let raw = self
            .rpc_string("eth_estimateGas", json!([request.to_json()]))
            .await?;
        parse_hex_u64(&raw, "eth_estimateGas")
    }

    async fn latest_block_hash(&self) -> Result<B256, RpcError> {
        let block = self
            .rpc_call("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        let raw = block
            .get("hash")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::decode("eth_getBlockByNumber", "block hash missing"))?;
        parse_b256(raw, "eth_getBlockByNumber")
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, RpcError> {
        let hash = self
            .rpc_string("eth_sendRawTransaction", json!([raw.to_string()]))
            .await?;
        parse_b256(&hash, "eth_sendRawTransaction")
    }

    async fn transaction_known(&self, tx_hash: B256) -> Result<bool, RpcError> {
        let value = self
            .rpc_call("eth_getTransactionByHash", json!([tx_hash.to_string()]))
            .await?;
        Ok(!value.is_null())
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, RpcError> {
        let method = "eth_getTransactionReceipt";
        let value = self.rpc_call(method, json!([tx_hash.to_string()])).await?;
        if value.is_null() {
            return Ok(None);
        }
        let raw: RawReceipt = serde_json::from_value(value)
            .map_err(|error| RpcError::decode(method, error.to_string()))?;

        let mut logs = Vec::with_capacity(raw.logs.len());
        for log in raw.logs {
            let topics = log
                .topics
                .iter()
                .map(|topic| parse_b256(topic, method))
                .collect::<Result<Vec<_>, _>>()?;
            logs.push(Log {
                address: parse_address(&log.address, method)?,
                topics,
                data: parse_hex_bytes(&log.data, method)?,
            });
        }

        Ok(Some(TxReceipt {
            tx_hash: parse_b256(&raw.transaction_hash, method)?,
            success: match raw.status.as_deref() {
                Some(status) => parse_hex_u64(status, method)? == 1,
                None => true,
            },
            block_number: raw
                .block_number
                .as_deref()
                .map(|raw| parse_hex_u64(raw, method))
                .transpose()?
                .unwrap_or_default(),
            gas_used: raw
                .gas_used
                .as_deref()
                .map(|raw| parse_hex_u64(raw, method))
                .transpose()?
                .unwrap_or_default(),
            logs,
        }))
    }
}

fn strip_hex_prefix<'a>(raw: &'a str, method: &str) -> Result<&'a str, RpcError> {
    let value = raw.trim();
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| RpcError::decode(method, format!("'{value}' must be 0x-prefixed hex")))
}

pub(crate) fn parse_hex_u64(raw: &str, method: &str) -> Result<u64, RpcError> {
    let digits = strip_hex_prefix(raw, method)?;
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|error| RpcError::decode(method, format!("invalid hex quantity: {error}")))
}

pub(crate) fn parse_hex_u256(raw: &str, method: &str) -> Result<U256, RpcError> {
    let digits = strip_hex_prefix(raw, method)?;
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    if digits.len() > 64 {
        return Err(RpcError::decode(method, "quantity exceeds 32 bytes"));
    }
    let padded = if digits.len() % 2 == 0 {
        digits.to_string()
    } else {
        format!("0{digits}")
    };
    let bytes = hex::decode(&padded)
        .map_err(|error| RpcError::decode(method, format!("invalid hex quantity: {error}")))?;
    Ok(U256::from_be_slice(&bytes))
}

pub(crate) fn parse_hex_bytes(raw: &str, method: &str) -> Result<Bytes, RpcError> {
    let digits = strip_hex_prefix(raw, method)?;
    hex::decode(digits)
        .map(Bytes::from)
        .map_err(|error| RpcError::decode(method, format!("invalid hex data: {error}")))
}

fn parse_b256(raw: &str, method: &str) -> Result<B256, RpcError> {
    let bytes = parse_hex_bytes(raw, method)?;
    if bytes.len() != 32 {
        return Err(RpcError::decode(method, "expected a 32-byte hash"));
    }
    Ok(B256::from_slice(&bytes))
}

fn parse_address(raw: &str, method: &str) -> Result<Address, RpcError> {
    let bytes = parse_hex_bytes(raw, method)?;
    if bytes.len() != 20 {
        return Err(RpcError::decode(method, "expected a 20-byte address"));
    }
    Ok(Address::from_slice(&bytes))
}

#[cfg(test)]
mod tests {
    use alloy_primitives::U256;

    use super::{parse_hex_u256, parse_hex_u64, RpcError};

    #[test]
    fn parses_odd_length_quantities() {
        assert_eq!(parse_hex_u64("0x1a", "t").unwrap(), 26);
        assert_eq!(parse_hex_u256("0xabc", "t").unwrap(), U256::from(0xabc_u64));
        assert_eq!(parse_hex_u256("0x", "t").unwrap(), U256::ZERO);
        assert!(parse_hex_u64("12", "t").is_err());
    }

    #[test]
    fn classifies_node_errors() {
        let known = RpcError::Node {
            method: "eth_sendRawTransaction".to_string(),
            code: -32000,
            message: "already known".to_string(),
            data: None,
        };
        assert!(known.is_already_known());
        assert!(!known.is_transient());

        let limited = RpcError::Node {
            method: "eth_call".to_string(),
            code: -32005,
            message: "limit exceeded".to_string(),
            data: None,
        };
        assert!(limited.is_transient());
    }
}
