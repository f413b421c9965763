use async_trait::async_trait;
use delegated_signer::Address;
use serde_json::{json, Value};
use tracing::info;

use super::{display_amount, returned_uint, spec};
use crate::contracts::Token;
use crate::registry::{ToolContext, ToolEffect, ToolError, ToolExecutor, ToolSpec};
use crate::schema::{ArgKind, ArgSpec, ValidatedArgs};

const TOKEN_BALANCE_ARGS: &[ArgSpec] = &[
    ArgSpec::required("tokenAddress", ArgKind::Address, "ERC20 token contract address"),
    ArgSpec::optional(
        "account",
        ArgKind::Address,
        "Holder to query; defaults to the agent's acting address",
    ),
];

const TRANSFER_TOKEN_ARGS: &[ArgSpec] = &[
    ArgSpec::required("tokenAddress", ArgKind::Address, "ERC20 token contract address"),
    ArgSpec::required("to", ArgKind::Address, "Recipient of the tokens"),
    ArgSpec::required("amount", ArgKind::Number, "Amount of tokens to send"),
];

const CREATE_TOKEN_ARGS: &[ArgSpec] = &[
    ArgSpec::required(
        "name",
        ArgKind::String { max_len: Some(32) },
        "The name of the meme coin, up to 32 characters",
    ),
    ArgSpec::required(
        "symbol",
        ArgKind::String { max_len: Some(8) },
        "The symbol of the meme coin, up to 8 characters",
    ),
    ArgSpec::required("maxSupply", ArgKind::Number, "The maximum supply of the meme coin"),
    ArgSpec::required("initialMint", ArgKind::Number, "The amount minted at creation"),
    ArgSpec::required(
        "usdtAmount",
        ArgKind::Number,
        "The amount of USDT paid to the factory for the initial mint",
    ),
];

pub(super) fn specs() -> Vec<ToolSpec> {
    vec![
        spec(
            "get_token_balance",
            "Get the ERC20 balance of an account for a token",
            TOKEN_BALANCE_ARGS,
            ToolEffect::ReadOnly,
            GetTokenBalance,
        ),
        spec(
            "transfer_token",
            "Send ERC20 tokens from the agent's acting address",
            TRANSFER_TOKEN_ARGS,
            ToolEffect::ChainWrite,
            TransferToken,
        ),
        spec(
            "create_token",
            "Create a new meme coin with the given parameters",
            CREATE_TOKEN_ARGS,
            ToolEffect::ChainWrite,
            CreateToken,
        ),
    ]
}

struct GetTokenBalance;

#[async_trait]
impl ToolExecutor for GetTokenBalance {
    async fn execute(&self, args: ValidatedArgs, ctx: &ToolContext) -> Result<Value, ToolError> {
        let chain = ctx.chain()?;
        let token = args.address("tokenAddress")?;
        let account = match args.optional_address("account")? {
            Some(account) => account,
            None => chain.acting_address().await,
        };

        let data = chain
            .read(token, "balanceOf", &[Token::Address(account)])
            .await?;
        let balance = returned_uint(&data, 0, "balanceOf")?;

        Ok(json!({
            "token": token.to_string(),
            "account": account.to_string(),
            "balance": display_amount(balance),
        }))
    }
}

struct TransferToken;

#[async_trait]
impl ToolExecutor for TransferToken {
    async fn execute(&self, args: ValidatedArgs, ctx: &ToolContext) -> Result<Value, ToolError> {
        let chain = ctx.chain()?;
        let token = args.address("tokenAddress")?;
        let to = args.address("to")?;
        let amount = args.amount("amount")?;
        if to == Address::ZERO {
            return Err(ToolError::failed("refusing to transfer to the zero address"));
        }

        let outcome = chain
            .write(token, "transfer", &[Token::Address(to), Token::Uint(amount)])
            .await?;
        info!(%token, %to, tx_hash = %outcome.tx_hash, "tokens transferred");

        Ok(json!({
            "token": token.to_string(),
            "from": outcome.from.to_string(),
            "to": to.to_string(),
            "amount": display_amount(amount),
            "txHash": outcome.tx_hash.to_string(),
            "explorer": chain.tx_link(outcome.tx_hash),
        }))
    }
}

/// Pays the USDT fee and deploys a meme coin through the factory.
struct CreateToken;

#[async_trait]
impl ToolExecutor for CreateToken {
    async fn execute(&self, args: ValidatedArgs, ctx: &ToolContext) -> Result<Value, ToolError> {
        let chain = ctx.chain()?;
        let addresses = chain.addresses();
        let name = args.string("name")?.to_string();
        let symbol = args.string("symbol")?.to_string();
        let max_supply = args.amount("maxSupply")?;
        let initial_mint = args.amount("initialMint")?;
        let usdt_amount = args.amount("usdtAmount")?;

        if initial_mint > max_supply {
            return Err(ToolError::failed("initialMint cannot exceed maxSupply"));
        }

        let approval = chain
            .write(
                addresses.usdt,
                "approve",
                &[Token::Address(addresses.meme_factory), Token::Uint(usdt_amount)],
            )
            .await?;

        let outcome = chain
            .write(
                addresses.meme_factory,
                "createMemeCoin",
                &[
                    Token::String(name.clone()),
                    Token::String(symbol.clone()),
                    Token::Uint(max_supply),
                    Token::Uint(initial_mint),
                    Token::Uint(usdt_amount),
                ],
            )
            .await?;

        let created = chain
            .codec()
            .decode_event(&outcome.receipt, "MemeCoinCreated")?
            .and_then(|event| event.address("memeCoin"));
        info!(%name, %symbol, token = ?created, tx_hash = %outcome.tx_hash, "meme coin created");

        let mut result = json!({
            "name": name,
            "symbol": symbol,
            "approvalTxHash": approval.tx_hash.to_string(),
            "txHash": outcome.tx_hash.to_string(),
            "explorer": chain.tx_link(outcome.tx_hash),
        });
        if let Some(token) = created {
            result["tokenAddress"] = json!(token.to_string());
        }
        Ok(result)
    }
}
