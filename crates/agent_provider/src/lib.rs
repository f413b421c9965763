//! Provider-agnostic contract for one model turn of the agent loop.
//!
//! This crate defines the shared message log types, host-mediated tool-calling
//! envelopes and the streaming lifecycle events a model provider emits. It
//! excludes provider transport details and the loop that decides when to call
//! tools.

use std::fmt;
use std::sync::{atomic::AtomicBool, Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier for one provider run (one model turn).
pub type RunId = u64;

/// Shared cancellation flag for a run.
pub type CancelSignal = Arc<AtomicBool>;

/// Error returned while constructing/configuring a provider before any run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInitError {
    message: String,
}

impl ProviderInitError {
    /// Creates a new provider initialization error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the underlying error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ProviderInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ProviderInitError {}

impl From<String> for ProviderInitError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ProviderInitError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Author of a message in the thread log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// Tool invocation requested by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One immutable entry of a thread's append-only message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_error: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Message {
    /// Builds a user message.
    #[must_use]
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
        }
    }

    /// Builds an assistant message, optionally carrying tool calls.
    #[must_use]
    pub fn assistant(
        id: impl Into<String>,
        text: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content: text.into(),
            tool_calls,
            tool_call_id: None,
            is_error: false,
        }
    }

    /// Builds the tool message answering one tool call.
    #[must_use]
    pub fn tool(id: impl Into<String>, result: &ToolResult) -> Self {
        Self {
            id: id.into(),
            role: Role::Tool,
            content: result.content_text(),
            tool_calls: Vec::new(),
            tool_call_id: Some(result.call_id.clone()),
            is_error: result.is_error,
        }
    }

    /// Returns true when this message ends a loop iteration without requesting tools.
    #[must_use]
    pub fn is_terminal_assistant(&self) -> bool {
        self.role == Role::Assistant && self.tool_calls.is_empty()
    }
}

/// Generic host-mediated tool definition exposed to a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Host tool call result fed back into the thread.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub is_error: bool,
    pub content: Value,
}

impl ToolResult {
    /// Constructs a successful tool result.
    #[must_use]
    pub fn success(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<Value>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            is_error: false,
            content: content.into(),
        }
    }

    /// Constructs a tool error result.
    #[must_use]
    pub fn error(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<Value>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            is_error: true,
            content: content.into(),
        }
    }

    /// Renders the content as the plain text stored in the thread log.
    #[must_use]
    pub fn content_text(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// Input required for one model turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub run_id: RunId,
    pub instructions: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

/// Completed model turn: final text plus zero or more tool calls.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Provider-emitted lifecycle event for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Started { run_id: RunId },
    Chunk { run_id: RunId, text: String },
    Finished { run_id: RunId },
    Failed { run_id: RunId, error: String },
    Cancelled { run_id: RunId },
}

impl RunEvent {
    /// Returns the run identifier associated with this event.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        match self {
            Self::Started { run_id }
            | Self::Chunk { run_id, .. }
            | Self::Finished { run_id }
            | Self::Failed { run_id, .. }
            | Self::Cancelled { run_id } => *run_id,
        }
    }

    /// Returns true when this event terminates the run lifecycle.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

/// Failure of a single model turn.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("model unavailable: {0}")]
    Unavailable(String),
    #[error("run cancelled")]
    Cancelled,
}

/// Immutable metadata describing a model provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider_id: String,
    pub model_id: String,
}

/// Provider interface for executing one model turn.
#[async_trait]
pub trait ModelProvider: Send + Sync + 'static {
    /// Returns provider/model identity metadata.
    fn profile(&self) -> ProviderProfile;

    /// Executes one model turn, streaming text chunks through `emit` in provider order.
    ///
    /// Providers return the fully assembled response once the stream ends. A
    /// cancelled run returns `ProviderError::Cancelled` after emitting
    /// `RunEvent::Cancelled`.
    async fn complete(
        &self,
        req: ModelRequest,
        cancel: CancelSignal,
        emit: &mut (dyn FnMut(RunEvent) + Send),
    ) -> Result<ModelResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        CancelSignal, Message, ModelProvider, ModelRequest, ModelResponse, ProviderError,
        ProviderInitError, ProviderProfile, Role, RunEvent, ToolCall, ToolResult,
    };

    struct EchoProvider;

    #[async_trait::async_trait]
    impl ModelProvider for EchoProvider {
        fn profile(&self) -> ProviderProfile {
            ProviderProfile {
                provider_id: "echo".to_string(),
                model_id: "echo-model".to_string(),
            }
        }

        async fn complete(
            &self,
            req: ModelRequest,
            _cancel: CancelSignal,
            emit: &mut (dyn FnMut(RunEvent) + Send),
        ) -> Result<ModelResponse, ProviderError> {
            emit(RunEvent::Started { run_id: req.run_id });
            let text = req
                .messages
                .last()
                .map(|message| message.content.clone())
                .unwrap_or_default();
            emit(RunEvent::Chunk {
                run_id: req.run_id,
                text: text.clone(),
            });
            emit(RunEvent::Finished { run_id: req.run_id });
            Ok(ModelResponse {
                text,
                tool_calls: Vec::new(),
            })
        }
    }

    #[test]
    fn run_event_run_id_returns_event_run_id() {
        let run_id = 42;
        let events = [
            RunEvent::Started { run_id },
            RunEvent::Chunk {
                run_id,
                text: "partial".to_string(),
            },
            RunEvent::Finished { run_id },
            RunEvent::Failed {
                run_id,
                error: "failure".to_string(),
            },
            RunEvent::Cancelled { run_id },
        ];

        for event in events {
            assert_eq!(event.run_id(), run_id);
        }
    }

    #[test]
    fn run_event_terminal_detection_matches_lifecycle() {
        assert!(!RunEvent::Started { run_id: 1 }.is_terminal());
        assert!(!RunEvent::Chunk {
            run_id: 1,
            text: "hello".to_string(),
        }
        .is_terminal());
        assert!(RunEvent::Finished { run_id: 1 }.is_terminal());
        assert!(RunEvent::Failed {
            run_id: 1,
            error: "boom".to_string(),
        }
        .is_terminal());
        assert!(RunEvent::Cancelled { run_id: 1 }.is_terminal());
    }

    #[test]
    fn provider_init_error_preserves_message() {
        let error = ProviderInitError::new("missing api key");
        assert_eq!(error.message(), "missing api key");
        assert_eq!(error.to_string(), "missing api key");
    }

    #[test]
    fn tool_result_constructors_set_error_flag_and_content() {
        let success = ToolResult::success("call-1", "get_balance", json!({"balance": "0.42"}));
        assert!(!success.is_error);
        assert_eq!(success.content_text(), r#"{"balance":"0.42"}"#);

        let error = ToolResult::error("call-2", "swap", "authorization denied");
        assert!(error.is_error);
        assert_eq!(error.content_text(), "authorization denied");
    }

    #[test]
    fn tool_message_links_back_to_call_and_keeps_error_flag() {
        let result = ToolResult::error("call-9", "create_token", "authorization denied");
        let message = Message::tool("m-3", &result);

        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("call-9"));
        assert!(message.is_error);
        assert_eq!(message.content, "authorization denied");
    }

    #[test]
    fn terminal_assistant_detection_requires_no_tool_calls() {
        let plain = Message::assistant("m-1", "done", Vec::new());
        let calling = Message::assistant(
            "m-2",
            "",
            vec![ToolCall {
                id: "call-1".to_string(),
                name: "get_balance".to_string(),
                arguments: json!({}),
            }],
        );

        assert!(plain.is_terminal_assistant());
        assert!(!calling.is_terminal_assistant());
        assert!(!Message::user("m-0", "hi").is_terminal_assistant());
    }

    #[test]
    fn message_serialization_omits_empty_optional_fields() {
        let encoded = serde_json::to_value(Message::user("m-1", "hello")).expect("serialize");
        assert_eq!(
            encoded,
            json!({"id": "m-1", "role": "user", "content": "hello"})
        );

        let decoded: Message = serde_json::from_value(encoded).expect("deserialize");
        assert_eq!(decoded, Message::user("m-1", "hello"));
    }

    #[tokio::test]
    async fn provider_trait_is_object_safe_and_streams_events() {
        let provider: Box<dyn ModelProvider> = Box::new(EchoProvider);
        let mut events = Vec::new();
        let response = provider
            .complete(
                ModelRequest {
                    run_id: 3,
                    instructions: String::new(),
                    messages: vec![Message::user("m-1", "ping")],
                    tools: Vec::new(),
                },
                CancelSignal::default(),
                &mut |event| events.push(event),
            )
            .await
            .expect("echo run");

        assert_eq!(response.text, "ping");
        assert_eq!(events.len(), 3);
        assert!(events[2].is_terminal());
    }
}
