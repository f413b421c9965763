use async_trait::async_trait;
use serde_json::{json, Value};

use super::{display_amount, spec};
use crate::registry::{ToolContext, ToolEffect, ToolError, ToolExecutor, ToolSpec};
use crate::schema::ValidatedArgs;

pub(super) fn specs() -> Vec<ToolSpec> {
    vec![spec(
        "get_balance",
        "Get the native ETH balance of the user's connected wallet",
        &[],
        ToolEffect::ReadOnly,
        GetBalance,
    )]
}

/// Native balance of the base wallet, in ETH.
struct GetBalance;

#[async_trait]
impl ToolExecutor for GetBalance {
    async fn execute(&self, _args: ValidatedArgs, ctx: &ToolContext) -> Result<Value, ToolError> {
        let balance = ctx.chain()?.wallet_balance().await?;
        Ok(json!(display_amount(balance)))
    }
}
