//! Deterministic mock implementation of the shared `agent_provider` contract.
//!
//! This crate contains no transport/protocol logic and is intended for local
//! development and contract-level integration testing. Turns are served from
//! a script queue first; once the queue is empty a small keyword policy picks
//! between answering and calling one of the advertised tools.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use agent_provider::{
    CancelSignal, Message, ModelProvider, ModelRequest, ModelResponse, ProviderError,
    ProviderProfile, Role, RunEvent, ToolCall,
};
use async_trait::async_trait;
use serde_json::json;

/// Stable provider identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";

/// One scripted model turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedTurn {
    /// Stream `text` word by word, then return it together with `tool_calls`.
    Respond(ModelResponse),
    /// Stream `partial` and then fail the run as unavailable.
    Fail { partial: String, error: String },
    /// Stream `partial` and then wait until the run is cancelled.
    HangAfter { partial: String },
}

impl ScriptedTurn {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Respond(ModelResponse {
            text: text.into(),
            tool_calls: Vec::new(),
        })
    }

    #[must_use]
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self::Respond(ModelResponse {
            text: String::new(),
            tool_calls: calls,
        })
    }

    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self::Fail {
            partial: String::new(),
            error: error.into(),
        }
    }
}

/// Builds a tool call with a literal JSON argument object.
#[must_use]
pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

/// Deterministic mock provider used by agent tests and local runs.
#[derive(Debug, Default)]
pub struct MockProvider {
    script: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<ModelRequest>>,
    token_delay: Duration,
    call_seq: Mutex<u64>,
}

impl MockProvider {
    /// Creates a provider that serves `turns` in order before falling back to
    /// the keyword policy.
    #[must_use]
    pub fn scripted(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            script: Mutex::new(turns.into()),
            ..Self::default()
        }
    }

    /// Pauses between streamed tokens, which keeps cancellation observable.
    #[must_use]
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    pub fn push(&self, turn: ScriptedTurn) {
        lock_unpoisoned(&self.script).push_back(turn);
    }

    /// Every request this provider has served, in order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        lock_unpoisoned(&self.requests).clone()
    }

    pub fn remaining(&self) -> usize {
        lock_unpoisoned(&self.script).len()
    }

    fn next_turn(&self, req: &ModelRequest) -> ScriptedTurn {
        if let Some(turn) = lock_unpoisoned(&self.script).pop_front() {
            return turn;
        }
        ScriptedTurn::Respond(self.policy_response(req))
    }

    fn policy_response(&self, req: &ModelRequest) -> ModelResponse {
        let Some(last) = req.messages.last() else {
            return text_response("How can I help with your meme tokens today?");
        };

        match last.role {
            Role::Tool => text_response(narrate_tool_results(&req.messages)),
            Role::User => {
                let lowered = last.content.to_lowercase();
                let wanted = if lowered.contains("balance") {
                    Some("get_balance")
                } else if lowered.contains("pairs") {
                    Some("get_all_pairs")
                } else {
                    None
                };

                match wanted.filter(|name| req.tools.iter().any(|tool| tool.name == *name)) {
                    Some(name) => {
                        let mut seq = lock_unpoisoned(&self.call_seq);
                        *seq += 1;
                        ModelResponse {
                            text: String::new(),
                            tool_calls: vec![tool_call(
                                &format!("mock_call_{}", *seq),
                                name,
                                json!({}),
                            )],
                        }
                    }
                    None => text_response(format!("You said: {}", last.content.trim())),
                }
            }
            Role::Assistant => text_response(""),
        }
    }

    async fn stream_words(
        &self,
        run_id: u64,
        text: &str,
        cancel: &CancelSignal,
        emit: &mut (dyn FnMut(RunEvent) + Send),
    ) -> Result<(), ProviderError> {
        let mut pending = String::new();
        for ch in text.chars() {
            pending.push(ch);
            if matches!(ch, ' ' | '\n') {
                self.emit_token(run_id, std::mem::take(&mut pending), cancel, emit)
                    .await?;
            }
        }
        if !pending.is_empty() {
            self.emit_token(run_id, pending, cancel, emit).await?;
        }
        Ok(())
    }

    async fn emit_token(
        &self,
        run_id: u64,
        text: String,
        cancel: &CancelSignal,
        emit: &mut (dyn FnMut(RunEvent) + Send),
    ) -> Result<(), ProviderError> {
        if cancel.load(Ordering::Acquire) {
            return Err(ProviderError::Cancelled);
        }
        emit(RunEvent::Chunk { run_id, text });
        if !self.token_delay.is_zero() {
            tokio::time::sleep(self.token_delay).await;
        }
        Ok(())
    }

    async fn run(
        &self,
        run_id: u64,
        turn: ScriptedTurn,
        cancel: &CancelSignal,
        emit: &mut (dyn FnMut(RunEvent) + Send),
    ) -> Result<ModelResponse, ProviderError> {
        match turn {
            ScriptedTurn::Respond(response) => {
                self.stream_words(run_id, &response.text, cancel, emit)
                    .await?;
                Ok(response)
            }
            ScriptedTurn::Fail { partial, error } => {
                self.stream_words(run_id, &partial, cancel, emit).await?;
                Err(ProviderError::Unavailable(error))
            }
            ScriptedTurn::HangAfter { partial } => {
                self.stream_words(run_id, &partial, cancel, emit).await?;
                while !cancel.load(Ordering::Acquire) {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Err(ProviderError::Cancelled)
            }
        }
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: MOCK_PROVIDER_ID.to_string(),
            model_id: "mock".to_string(),
        }
    }

    async fn complete(
        &self,
        req: ModelRequest,
        cancel: CancelSignal,
        emit: &mut (dyn FnMut(RunEvent) + Send),
    ) -> Result<ModelResponse, ProviderError> {
        let run_id = req.run_id;
        emit(RunEvent::Started { run_id });

        let turn = self.next_turn(&req);
        lock_unpoisoned(&self.requests).push(req);

        match self.run(run_id, turn, &cancel, emit).await {
            Ok(response) => {
                emit(RunEvent::Finished { run_id });
                Ok(response)
            }
            Err(ProviderError::Cancelled) => {
                emit(RunEvent::Cancelled { run_id });
                Err(ProviderError::Cancelled)
            }
            Err(error) => {
                emit(RunEvent::Failed {
                    run_id,
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }
}

fn text_response(text: impl Into<String>) -> ModelResponse {
    ModelResponse {
        text: text.into(),
        tool_calls: Vec::new(),
    }
}

/// Summarizes the tool results that follow the latest assistant call.
fn narrate_tool_results(messages: &[Message]) -> String {
    let start = messages
        .iter()
        .rposition(|message| message.role == Role::Assistant)
        .map_or(0, |index| index + 1);
    let caller = start.checked_sub(1).and_then(|index| messages.get(index));

    let lines: Vec<String> = messages[start..]
        .iter()
        .filter(|message| message.role == Role::Tool)
        .map(|message| {
            let name = caller
                .and_then(|assistant| {
                    assistant
                        .tool_calls
                        .iter()
                        .find(|call| Some(&call.id) == message.tool_call_id.as_ref())
                })
                .map(|call| call.name.as_str())
                .unwrap_or("tool");

            if message.is_error {
                format!("I couldn't complete {name}: {}", message.content)
            } else if name == "get_balance" {
                format!("Your wallet balance is {} ETH.", message.content)
            } else {
                format!("{name} returned: {}", message.content)
            }
        })
        .collect();

    lines.join("\n")
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
