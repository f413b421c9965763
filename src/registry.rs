//! Tool catalogue and dispatch.
//!
//! Dispatch never fails: unknown tools, argument violations, executor errors
//! and executor panics all come back as error [`ToolResult`]s so the loop can
//! feed them to the model.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use agent_provider::{ToolCall, ToolDefinition, ToolResult};
use async_trait::async_trait;
use delegated_signer::{DelegationError, RpcError};
use futures_util::FutureExt;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::chain::ChainContext;
use crate::contracts::ContractError;
use crate::schema::{json_schema, validate, ArgSpec, SchemaError, ValidatedArgs};

/// Whether a tool changes chain state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolEffect {
    ReadOnly,
    ChainWrite,
}

/// Executor failure. The display string is what the model sees.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(#[from] SchemaError),
    #[error(transparent)]
    Delegation(#[from] DelegationError),
    #[error("chain rpc error: {0}")]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Per-call context threaded into executors.
#[derive(Clone)]
pub struct ToolContext {
    pub thread_id: String,
    pub call_id: String,
    chain: Option<Arc<ChainContext>>,
}

impl ToolContext {
    #[must_use]
    pub fn new(thread_id: impl Into<String>, chain: Option<Arc<ChainContext>>) -> Self {
        Self {
            thread_id: thread_id.into(),
            call_id: String::new(),
            chain,
        }
    }

    #[must_use]
    pub fn for_call(&self, call_id: &str) -> Self {
        Self {
            call_id: call_id.to_string(),
            ..self.clone()
        }
    }

    pub fn chain(&self) -> Result<&ChainContext, ToolError> {
        self.chain
            .as_deref()
            .ok_or_else(|| ToolError::failed("chain access is not configured"))
    }
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, args: ValidatedArgs, ctx: &ToolContext) -> Result<Value, ToolError>;
}

/// Static description of one tool.
#[derive(Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub args: &'static [ArgSpec],
    pub effect: ToolEffect,
    pub executor: Arc<dyn ToolExecutor>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolSpec>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: ToolSpec) -> Result<(), RegistryError> {
        if self.get(spec.name).is_some() {
            return Err(RegistryError::DuplicateTool(spec.name.to_string()));
        }
        self.tools.push(spec);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|spec| spec.name == name)
    }

    #[must_use]
    pub fn effect_of(&self, name: &str) -> Option<ToolEffect> {
        self.get(name).map(|spec| spec.effect)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions advertised to the model, in registration order.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|spec| ToolDefinition {
                name: spec.name.to_string(),
                description: Some(spec.description.to_string()),
                input_schema: json_schema(spec.args),
            })
            .collect()
    }

    /// Runs one call. Executors are invoked at most once per dispatch.
    pub async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let Some(spec) = self.get(&call.name) else {
            warn!(tool = %call.name, call_id = %call.id, "model requested an unknown tool");
            return ToolResult::error(&call.id, &call.name, format!("unknown tool '{}'", call.name));
        };

        let args = match validate(spec.args, &call.arguments) {
            Ok(args) => args,
            Err(error) => {
                debug!(tool = spec.name, call_id = %call.id, %error, "rejected tool arguments");
                return ToolResult::error(&call.id, spec.name, format!("invalid arguments: {error}"));
            }
        };

        info!(tool = spec.name, call_id = %call.id, effect = ?spec.effect, "executing tool");
        let ctx = ctx.for_call(&call.id);
        let outcome = AssertUnwindSafe(spec.executor.execute(args, &ctx))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(content)) => ToolResult::success(&call.id, spec.name, content),
            Ok(Err(error)) => {
                warn!(tool = spec.name, call_id = %call.id, %error, "tool failed");
                ToolResult::error(&call.id, spec.name, error.to_string())
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(tool = spec.name, call_id = %call.id, %message, "tool panicked");
                ToolResult::error(
                    &call.id,
                    spec.name,
                    format!("tool '{}' crashed: {message}", spec.name),
                )
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
