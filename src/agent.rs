//! Agent loop: alternates model turns and tool rounds over a durable thread log.
//!
//! One user turn walks `AwaitingInput -> ModelTurn -> (ToolsTurn -> ModelTurn)* -> Terminal`.
//! Every message is appended to the [`ThreadStore`] before the model sees it,
//! and every tool call in the log gets exactly one tool message before the
//! next model turn is issued.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use agent_provider::{
    CancelSignal, Message, ModelProvider, ModelRequest, ModelResponse, ProviderError, Role,
    RunEvent, ToolCall, ToolResult,
};
use futures_util::future::join_all;
use futures_util::FutureExt;
use thread_store::{Thread, ThreadStore, ThreadStoreError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chain::ChainContext;
use crate::prompt::{render_instructions, UserDetails, DEFAULT_INSTRUCTIONS};
use crate::registry::{ToolContext, ToolEffect, ToolRegistry};

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;

/// Assistant content shown before the first streamed chunk arrives.
pub const IN_PROGRESS_PLACEHOLDER: &str = "Thinking...";

/// Result recorded for a chain-write call whose round was interrupted.
pub const INTERRUPTED_WRITE_RESULT: &str =
    "interrupted before a result was recorded; on-chain effect unknown, check the explorer before retrying";

/// Result recorded for calls requested after the round limit was reached.
pub const ROUND_LIMIT_RESULT: &str = "not executed: tool round limit reached";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingInput,
    ModelTurn,
    ToolsTurn,
    Terminal,
}

/// Incremental output of a turn.
///
/// Assistant updates carry the full text streamed so far, tool updates carry
/// one activity line. Exactly one update per successful turn has `is_final`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnUpdate {
    pub role: Role,
    pub content: String,
    pub is_final: bool,
}

impl TurnUpdate {
    fn assistant(content: impl Into<String>, is_final: bool) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            is_final,
        }
    }

    fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            is_final: false,
        }
    }
}

pub type UpdateSink<'a> = &'a mut (dyn FnMut(TurnUpdate) + Send);

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("turn cancelled")]
    Cancelled,
    #[error("message is empty")]
    EmptyInput,
    #[error("thread '{0}' does not exist")]
    UnknownThread(String),
    #[error("thread '{0}' has nothing to resume")]
    NothingToResume(String),
    #[error("thread '{0}' already has a turn in progress")]
    ThreadBusy(String),
    #[error("turn task failed: {0}")]
    TaskFailed(String),
    #[error(transparent)]
    Store(#[from] ThreadStoreError),
}

impl TurnError {
    /// True when the thread is intact and the user can simply try again.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ModelUnavailable(_) | Self::Cancelled | Self::ThreadBusy(_)
        )
    }
}

/// Summary of a completed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub text: String,
    pub tool_rounds: usize,
    pub round_limit_reached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub instructions: String,
    pub max_tool_rounds: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}

pub struct Agent {
    provider: Arc<dyn ModelProvider>,
    registry: Arc<ToolRegistry>,
    store: Arc<dyn ThreadStore>,
    chain: Option<Arc<ChainContext>>,
    config: AgentConfig,
    next_run_id: AtomicU64,
}

impl Agent {
    #[must_use]
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        registry: Arc<ToolRegistry>,
        store: Arc<dyn ThreadStore>,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            store,
            chain: None,
            config,
            next_run_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn with_chain(mut self, chain: Arc<ChainContext>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn store(&self) -> &Arc<dyn ThreadStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn provider(&self) -> &Arc<dyn ModelProvider> {
        &self.provider
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Runs one user turn on `thread_id`, creating the thread if needed.
    pub async fn run_turn(
        &self,
        thread_id: &str,
        user_text: &str,
        cancel: &CancelSignal,
        updates: UpdateSink<'_>,
    ) -> Result<TurnOutcome, TurnError> {
        let user_text = user_text.trim();
        if user_text.is_empty() {
            return Err(TurnError::EmptyInput);
        }

        info!(thread_id, "turn started");
        if let Some(thread) = self.store.get(thread_id)? {
            self.repair_interrupted_round(&thread, updates).await?;
        }
        self.drive(thread_id, LoopState::AwaitingInput, Some(user_text), 0, cancel, updates)
            .await
    }

    /// Re-enters the loop on an existing thread without new user input.
    ///
    /// Calls left without results are settled first: read-only calls run
    /// again, chain-write calls get an error result because their on-chain
    /// effect is unknown.
    pub async fn resume(
        &self,
        thread_id: &str,
        cancel: &CancelSignal,
        updates: UpdateSink<'_>,
    ) -> Result<TurnOutcome, TurnError> {
        let thread = self
            .store
            .get(thread_id)?
            .ok_or_else(|| TurnError::UnknownThread(thread_id.to_string()))?;

        info!(thread_id, messages = thread.messages.len(), "resuming thread");
        let repaired = self.repair_interrupted_round(&thread, updates).await?;
        if !repaired
            && thread
                .messages
                .last()
                .map_or(true, Message::is_terminal_assistant)
        {
            return Err(TurnError::NothingToResume(thread_id.to_string()));
        }

        let rounds = usize::from(repaired);
        self.drive(thread_id, LoopState::ModelTurn, None, rounds, cancel, updates)
            .await
    }

    async fn drive(
        &self,
        thread_id: &str,
        mut state: LoopState,
        mut input: Option<&str>,
        mut rounds: usize,
        cancel: &CancelSignal,
        updates: UpdateSink<'_>,
    ) -> Result<TurnOutcome, TurnError> {
        let instructions = self.instructions().await;
        let mut pending: Vec<ToolCall> = Vec::new();
        let mut final_text = String::new();
        let mut round_limit_reached = false;

        loop {
            debug!(thread_id, ?state, rounds, "agent loop state");
            state = match state {
                LoopState::AwaitingInput => {
                    if let Some(text) = input.take() {
                        self.store
                            .append(thread_id, &Message::user(new_message_id(), text))?;
                    }
                    LoopState::ModelTurn
                }
                LoopState::ModelTurn => {
                    if is_cancelled(cancel) {
                        info!(thread_id, "turn cancelled before model turn");
                        return Err(TurnError::Cancelled);
                    }

                    let thread = self.load(thread_id)?;
                    let response = self
                        .model_turn(&instructions, thread.messages, cancel, updates)
                        .await?;
                    let ModelResponse { text, tool_calls } = response;
                    self.store.append(
                        thread_id,
                        &Message::assistant(new_message_id(), text.clone(), tool_calls.clone()),
                    )?;

                    if tool_calls.is_empty() {
                        updates(TurnUpdate::assistant(text.clone(), true));
                        final_text = text;
                        LoopState::Terminal
                    } else {
                        pending = tool_calls;
                        LoopState::ToolsTurn
                    }
                }
                LoopState::ToolsTurn => {
                    let calls = std::mem::take(&mut pending);
                    if rounds >= self.config.max_tool_rounds {
                        warn!(thread_id, rounds, "tool round limit reached; ending turn");
                        let skipped: Vec<ToolResult> = calls
                            .iter()
                            .map(|call| ToolResult::error(&call.id, &call.name, ROUND_LIMIT_RESULT))
                            .collect();
                        self.commit_results(thread_id, &skipped, updates)?;

                        let text = format!(
                            "I stopped after {rounds} rounds of tool calls without reaching an answer. \
                             Please narrow the request and try again."
                        );
                        self.store.append(
                            thread_id,
                            &Message::assistant(new_message_id(), text.clone(), Vec::new()),
                        )?;
                        updates(TurnUpdate::assistant(text.clone(), true));
                        final_text = text;
                        round_limit_reached = true;
                        LoopState::Terminal
                    } else {
                        rounds += 1;
                        self.run_round(thread_id, &calls, updates).await?;
                        if is_cancelled(cancel) {
                            info!(thread_id, rounds, "turn cancelled after tool round");
                            return Err(TurnError::Cancelled);
                        }
                        LoopState::ModelTurn
                    }
                }
                LoopState::Terminal => {
                    info!(thread_id, rounds, "turn finished");
                    return Ok(TurnOutcome {
                        text: final_text,
                        tool_rounds: rounds,
                        round_limit_reached,
                    });
                }
            };
        }
    }

    async fn model_turn(
        &self,
        instructions: &str,
        messages: Vec<Message>,
        cancel: &CancelSignal,
        updates: UpdateSink<'_>,
    ) -> Result<ModelResponse, TurnError> {
        let run_id = self.next_run_id.fetch_add(1, Ordering::SeqCst);
        let request = ModelRequest {
            run_id,
            instructions: instructions.to_string(),
            messages,
            tools: self.registry.definitions(),
        };

        updates(TurnUpdate::assistant(IN_PROGRESS_PLACEHOLDER, false));
        let mut streamed = String::new();
        let mut emit = |event: RunEvent| {
            if let RunEvent::Chunk { text, .. } = event {
                streamed.push_str(&text);
                updates(TurnUpdate::assistant(streamed.clone(), false));
            }
        };

        let outcome = AssertUnwindSafe(self.provider.complete(
            request,
            Arc::clone(cancel),
            &mut emit,
        ))
        .catch_unwind()
        .await;

        match outcome {
            Ok(Ok(response)) => {
                debug!(run_id, tool_calls = response.tool_calls.len(), "model turn complete");
                Ok(response)
            }
            Ok(Err(ProviderError::Cancelled)) => Err(TurnError::Cancelled),
            Ok(Err(ProviderError::Unavailable(message))) => {
                warn!(run_id, %message, "model turn failed; discarding partial output");
                Err(TurnError::ModelUnavailable(message))
            }
            Err(_) => {
                warn!(run_id, "model provider panicked");
                Err(TurnError::ModelUnavailable(
                    "model provider panicked".to_string(),
                ))
            }
        }
    }

    /// Dispatches one round concurrently and commits the results in call order.
    async fn run_round(
        &self,
        thread_id: &str,
        calls: &[ToolCall],
        updates: UpdateSink<'_>,
    ) -> Result<(), TurnError> {
        for call in calls {
            updates(TurnUpdate::tool(format!("running {}", call.name)));
        }

        let ctx = ToolContext::new(thread_id, self.chain.clone());
        let results = join_all(calls.iter().map(|call| self.registry.dispatch(call, &ctx))).await;
        self.commit_results(thread_id, &results, updates)
    }

    /// Settles calls of the last assistant message that have no result yet.
    /// Returns whether anything was appended.
    async fn repair_interrupted_round(
        &self,
        thread: &Thread,
        updates: UpdateSink<'_>,
    ) -> Result<bool, TurnError> {
        let missing = unanswered_calls(&thread.messages);
        if missing.is_empty() {
            return Ok(false);
        }

        warn!(
            thread_id = %thread.id,
            calls = missing.len(),
            "settling tool calls from an interrupted round"
        );
        let ctx = ToolContext::new(thread.id.clone(), self.chain.clone());
        let results = join_all(missing.iter().map(|call| {
            let ctx = &ctx;
            async move {
                match self.registry.effect_of(&call.name) {
                    Some(ToolEffect::ChainWrite) => {
                        ToolResult::error(&call.id, &call.name, INTERRUPTED_WRITE_RESULT)
                    }
                    _ => self.registry.dispatch(call, ctx).await,
                }
            }
        }))
        .await;

        self.commit_results(&thread.id, &results, updates)?;
        Ok(true)
    }

    fn commit_results(
        &self,
        thread_id: &str,
        results: &[ToolResult],
        updates: UpdateSink<'_>,
    ) -> Result<(), TurnError> {
        for result in results {
            self.store
                .append(thread_id, &Message::tool(new_message_id(), result))?;
            let line = if result.is_error {
                format!("{} failed: {}", result.tool_name, result.content_text())
            } else {
                format!("{} done", result.tool_name)
            };
            updates(TurnUpdate::tool(line));
        }
        Ok(())
    }

    fn load(&self, thread_id: &str) -> Result<Thread, TurnError> {
        self.store
            .get(thread_id)?
            .ok_or_else(|| TurnError::UnknownThread(thread_id.to_string()))
    }

    async fn instructions(&self) -> String {
        let details = match &self.chain {
            Some(chain) => Some(UserDetails::fetch(chain).await),
            None => None,
        };
        render_instructions(&self.config.instructions, details.as_ref())
    }
}

/// Calls of the last assistant message that have no tool message yet, in call order.
fn unanswered_calls(messages: &[Message]) -> Vec<ToolCall> {
    let Some(index) = messages
        .iter()
        .rposition(|message| message.role == Role::Assistant)
    else {
        return Vec::new();
    };

    let answered: HashSet<&str> = messages[index + 1..]
        .iter()
        .filter(|message| message.role == Role::Tool)
        .filter_map(|message| message.tool_call_id.as_deref())
        .collect();

    messages[index]
        .tool_calls
        .iter()
        .filter(|call| !answered.contains(call.id.as_str()))
        .cloned()
        .collect()
}

fn new_message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

fn is_cancelled(cancel: &CancelSignal) -> bool {
    cancel.load(Ordering::Acquire)
}
