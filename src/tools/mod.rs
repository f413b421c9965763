//! Built-in blockchain tools.
//!
//! Read tools go straight to the node. Write tools submit through the
//! delegation manager, one confirmed transaction per step.

mod balance;
mod liquidity;
mod token;

use std::sync::Arc;

use delegated_signer::abi::{decode_address, decode_uint};
use delegated_signer::units::{format_units, ETHER_DECIMALS};
use delegated_signer::{Address, U256};

use crate::contracts::ContractError;
use crate::registry::{RegistryError, ToolEffect, ToolError, ToolExecutor, ToolRegistry, ToolSpec};
use crate::schema::ArgSpec;

/// Every built-in tool, in the order they are advertised.
#[must_use]
pub fn builtin_tools() -> Vec<ToolSpec> {
    let mut tools = Vec::new();
    tools.extend(balance::specs());
    tools.extend(token::specs());
    tools.extend(liquidity::specs());
    tools
}

pub fn register_builtin_tools(registry: &mut ToolRegistry) -> Result<(), RegistryError> {
    for spec in builtin_tools() {
        registry.register(spec)?;
    }
    Ok(())
}

fn spec(
    name: &'static str,
    description: &'static str,
    args: &'static [ArgSpec],
    effect: ToolEffect,
    executor: impl ToolExecutor + 'static,
) -> ToolSpec {
    ToolSpec {
        name,
        description,
        args,
        effect,
        executor: Arc::new(executor),
    }
}

fn returned_uint(data: &[u8], index: usize, function: &str) -> Result<U256, ToolError> {
    decode_uint(data, index).map_err(|reason| return_decode_error(function, reason))
}

fn returned_address(data: &[u8], index: usize, function: &str) -> Result<Address, ToolError> {
    decode_address(data, index).map_err(|reason| return_decode_error(function, reason))
}

fn return_decode_error(function: &str, reason: String) -> ToolError {
    ContractError::Decode {
        what: format!("{function} return data"),
        reason,
    }
    .into()
}

fn display_amount(value: U256) -> String {
    format_units(value, ETHER_DECIMALS)
}
