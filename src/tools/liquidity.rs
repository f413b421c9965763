use async_trait::async_trait;
use delegated_signer::{Address, U256};
use serde_json::{json, Value};
use tracing::info;

use super::{display_amount, returned_address, returned_uint, spec};
use crate::chain::ChainContext;
use crate::contracts::Token;
use crate::registry::{ToolContext, ToolEffect, ToolError, ToolExecutor, ToolSpec};
use crate::schema::{ArgKind, ArgSpec, ValidatedArgs};

/// Upper bound on pairs listed by `get_all_pairs`.
const MAX_LISTED_PAIRS: u64 = 50;

const CREATE_PAIR_ARGS: &[ArgSpec] = &[
    ArgSpec::required("tokenA", ArgKind::Address, "First token of the pair"),
    ArgSpec::required("tokenB", ArgKind::Address, "Second token of the pair"),
];

const GET_PAIR_ARGS: &[ArgSpec] = &[ArgSpec::required(
    "tokenA",
    ArgKind::Address,
    "Token whose USDT pair to look up",
)];

const PAIR_ARGS: &[ArgSpec] = &[ArgSpec::required(
    "pairAddress",
    ArgKind::Address,
    "Liquidity pair contract address",
)];

const ADD_LIQUIDITY_ARGS: &[ArgSpec] = &[
    ArgSpec::required("pairAddress", ArgKind::Address, "Liquidity pair contract address"),
    ArgSpec::required("amount0Desired", ArgKind::Number, "Amount of token0 to deposit"),
    ArgSpec::required("amount1Desired", ArgKind::Number, "Amount of token1 to deposit"),
    ArgSpec::required("amount0Min", ArgKind::Number, "Minimum token0 accepted by the pair"),
    ArgSpec::required("amount1Min", ArgKind::Number, "Minimum token1 accepted by the pair"),
];

const REMOVE_LIQUIDITY_ARGS: &[ArgSpec] = &[
    ArgSpec::required("pairAddress", ArgKind::Address, "Liquidity pair contract address"),
    ArgSpec::required("liquidity", ArgKind::Number, "Amount of pair shares to redeem"),
];

const SWAP_ARGS: &[ArgSpec] = &[
    ArgSpec::required("pairAddress", ArgKind::Address, "Liquidity pair contract address"),
    ArgSpec::required("tokenIn", ArgKind::Address, "Token sold into the pair"),
    ArgSpec::required("amountIn", ArgKind::Number, "Amount of tokenIn to sell"),
    ArgSpec::required("amount0Out", ArgKind::Number, "Amount of token0 to receive"),
    ArgSpec::required("amount1Out", ArgKind::Number, "Amount of token1 to receive"),
];

pub(super) fn specs() -> Vec<ToolSpec> {
    vec![
        spec(
            "create_pair",
            "Create a liquidity pair for two tokens",
            CREATE_PAIR_ARGS,
            ToolEffect::ChainWrite,
            CreatePair,
        ),
        spec(
            "get_pair",
            "Get the liquidity pair of a token against USDT",
            GET_PAIR_ARGS,
            ToolEffect::ReadOnly,
            GetPair,
        ),
        spec(
            "get_all_pairs",
            "List the liquidity pairs created by the factory",
            &[],
            ToolEffect::ReadOnly,
            GetAllPairs,
        ),
        spec(
            "get_reserves",
            "Get the token reserves held by a liquidity pair",
            PAIR_ARGS,
            ToolEffect::ReadOnly,
            GetReserves,
        ),
        spec(
            "add_liquidity",
            "Deposit both tokens of a pair as liquidity",
            ADD_LIQUIDITY_ARGS,
            ToolEffect::ChainWrite,
            AddLiquidity,
        ),
        spec(
            "remove_liquidity",
            "Redeem pair shares for the underlying tokens",
            REMOVE_LIQUIDITY_ARGS,
            ToolEffect::ChainWrite,
            RemoveLiquidity,
        ),
        spec(
            "swap",
            "Swap one token of a pair for the other",
            SWAP_ARGS,
            ToolEffect::ChainWrite,
            Swap,
        ),
    ]
}

struct CreatePair;

#[async_trait]
impl ToolExecutor for CreatePair {
    async fn execute(&self, args: ValidatedArgs, ctx: &ToolContext) -> Result<Value, ToolError> {
        let chain = ctx.chain()?;
        let factory = chain.liquidity_factory()?;
        let token_a = args.address("tokenA")?;
        let token_b = args.address("tokenB")?;
        if token_a == token_b {
            return Err(ToolError::failed("a pair needs two different tokens"));
        }

        let outcome = chain
            .write(
                factory,
                "createPair",
                &[Token::Address(token_a), Token::Address(token_b)],
            )
            .await?;
        let pair = chain
            .codec()
            .decode_event(&outcome.receipt, "PairCreated")?
            .and_then(|event| event.address("pair"));
        info!(pair = ?pair, tx_hash = %outcome.tx_hash, "pair created");

        let mut result = json!({
            "txHash": outcome.tx_hash.to_string(),
            "explorer": chain.tx_link(outcome.tx_hash),
        });
        if let Some(pair) = pair {
            result["pair"] = json!(pair.to_string());
        }
        Ok(result)
    }
}

struct GetPair;

#[async_trait]
impl ToolExecutor for GetPair {
    async fn execute(&self, args: ValidatedArgs, ctx: &ToolContext) -> Result<Value, ToolError> {
        let chain = ctx.chain()?;
        let token = args.address("tokenA")?;
        let usdt = chain.addresses().usdt;
        let data = chain
            .read(
                chain.liquidity_factory()?,
                "getPair",
                &[Token::Address(token), Token::Address(usdt)],
            )
            .await?;
        let pair = returned_address(&data, 0, "getPair")?;

        if pair == Address::ZERO {
            return Ok(json!({ "pair": Value::Null, "message": "no pair exists for this token" }));
        }
        Ok(json!({ "pair": pair.to_string() }))
    }
}

struct GetAllPairs;

#[async_trait]
impl ToolExecutor for GetAllPairs {
    async fn execute(&self, _args: ValidatedArgs, ctx: &ToolContext) -> Result<Value, ToolError> {
        let chain = ctx.chain()?;
        let factory = chain.liquidity_factory()?;
        let data = chain.read(factory, "allPairsLength", &[]).await?;
        let total: u64 = returned_uint(&data, 0, "allPairsLength")?
            .try_into()
            .map_err(|_| ToolError::failed("pair count does not fit in 64 bits"))?;

        let mut pairs = Vec::new();
        for index in 0..total.min(MAX_LISTED_PAIRS) {
            let data = chain
                .read(factory, "allPairs", &[Token::Uint(U256::from(index))])
                .await?;
            pairs.push(returned_address(&data, 0, "allPairs")?.to_string());
        }

        Ok(json!({ "total": total, "pairs": pairs }))
    }
}

struct GetReserves;

#[async_trait]
impl ToolExecutor for GetReserves {
    async fn execute(&self, args: ValidatedArgs, ctx: &ToolContext) -> Result<Value, ToolError> {
        let chain = ctx.chain()?;
        let pair = args.address("pairAddress")?;
        let (token0, token1) = pair_tokens(chain, pair).await?;
        let data = chain.read(pair, "getReserves", &[]).await?;

        Ok(json!({
            "pair": pair.to_string(),
            "token0": token0.to_string(),
            "token1": token1.to_string(),
            "reserve0": display_amount(returned_uint(&data, 0, "getReserves")?),
            "reserve1": display_amount(returned_uint(&data, 1, "getReserves")?),
        }))
    }
}

/// Approves both pair tokens, then deposits them.
struct AddLiquidity;

#[async_trait]
impl ToolExecutor for AddLiquidity {
    async fn execute(&self, args: ValidatedArgs, ctx: &ToolContext) -> Result<Value, ToolError> {
        let chain = ctx.chain()?;
        let pair = args.address("pairAddress")?;
        let amount0 = args.amount("amount0Desired")?;
        let amount1 = args.amount("amount1Desired")?;
        let amount0_min = args.amount("amount0Min")?;
        let amount1_min = args.amount("amount1Min")?;
        if amount0_min > amount0 || amount1_min > amount1 {
            return Err(ToolError::failed("minimum amounts cannot exceed the desired amounts"));
        }

        let (token0, token1) = pair_tokens(chain, pair).await?;
        chain
            .write(token0, "approve", &[Token::Address(pair), Token::Uint(amount0)])
            .await?;
        chain
            .write(token1, "approve", &[Token::Address(pair), Token::Uint(amount1)])
            .await?;

        let outcome = chain
            .write(
                pair,
                "addLiquidity",
                &[
                    Token::Uint(amount0),
                    Token::Uint(amount1),
                    Token::Uint(amount0_min),
                    Token::Uint(amount1_min),
                ],
            )
            .await?;

        let mut result = json!({
            "pair": pair.to_string(),
            "txHash": outcome.tx_hash.to_string(),
            "explorer": chain.tx_link(outcome.tx_hash),
        });
        if let Some(minted) = chain.codec().decode_event(&outcome.receipt, "Mint")? {
            for field in ["amount0", "amount1"] {
                if let Some(Token::Uint(value)) = minted.get(field) {
                    result[field] = json!(display_amount(*value));
                }
            }
        }
        Ok(result)
    }
}

/// Burns pair shares held by the acting identity; the pair pays out both tokens.
struct RemoveLiquidity;

#[async_trait]
impl ToolExecutor for RemoveLiquidity {
    async fn execute(&self, args: ValidatedArgs, ctx: &ToolContext) -> Result<Value, ToolError> {
        let chain = ctx.chain()?;
        let pair = args.address("pairAddress")?;
        let liquidity = args.amount("liquidity")?;
        if liquidity.is_zero() {
            return Err(ToolError::failed("liquidity must be greater than zero"));
        }

        let outcome = chain
            .write(pair, "removeLiquidity", &[Token::Uint(liquidity)])
            .await?;

        let mut result = json!({
            "pair": pair.to_string(),
            "amount0": "0",
            "amount1": "0",
            "txHash": outcome.tx_hash.to_string(),
            "explorer": chain.tx_link(outcome.tx_hash),
        });
        if let Some(burned) = chain.codec().decode_event(&outcome.receipt, "Burn")? {
            for field in ["amount0", "amount1"] {
                if let Some(Token::Uint(value)) = burned.get(field) {
                    result[field] = json!(display_amount(*value));
                }
            }
        }
        info!(%pair, tx_hash = %outcome.tx_hash, "liquidity removed");
        Ok(result)
    }
}

/// Approves `tokenIn` to the pair, then swaps with the acting identity as recipient.
struct Swap;

#[async_trait]
impl ToolExecutor for Swap {
    async fn execute(&self, args: ValidatedArgs, ctx: &ToolContext) -> Result<Value, ToolError> {
        let chain = ctx.chain()?;
        let pair = args.address("pairAddress")?;
        let token_in = args.address("tokenIn")?;
        let amount_in = args.amount("amountIn")?;
        let amount0_out = args.amount("amount0Out")?;
        let amount1_out = args.amount("amount1Out")?;

        let (token0, token1) = pair_tokens(chain, pair).await?;
        if token_in != token0 && token_in != token1 {
            return Err(ToolError::failed(format!(
                "tokenIn {token_in} is not traded by pair {pair}"
            )));
        }

        let approval = chain
            .write(
                token_in,
                "approve",
                &[Token::Address(pair), Token::Uint(amount_in)],
            )
            .await?;
        let recipient = approval.from;

        let outcome = chain
            .write(
                pair,
                "swap",
                &[
                    Token::Uint(amount0_out),
                    Token::Uint(amount1_out),
                    Token::Address(recipient),
                ],
            )
            .await?;

        Ok(json!({
            "pair": pair.to_string(),
            "recipient": recipient.to_string(),
            "approvalTxHash": approval.tx_hash.to_string(),
            "txHash": outcome.tx_hash.to_string(),
            "explorer": chain.tx_link(outcome.tx_hash),
        }))
    }
}

async fn pair_tokens(chain: &ChainContext, pair: Address) -> Result<(Address, Address), ToolError> {
    let token0 = chain.read(pair, "token0", &[]).await?;
    let token1 = chain.read(pair, "token1", &[]).await?;
    Ok((
        returned_address(&token0, 0, "token0")?,
        returned_address(&token1, 0, "token1")?,
    ))
}
