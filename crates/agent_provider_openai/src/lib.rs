//! OpenAI chat-completions implementation of the shared `agent_provider` contract.
//!
//! This adapter translates the thread log into chat-completions messages and
//! the `openai_api` stream back into `RunEvent` lifecycle events and
//! structured tool calls.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use agent_provider::{
    CancelSignal, Message, ModelProvider, ModelRequest, ModelResponse, ProviderError,
    ProviderInitError, ProviderProfile, Role, RunEvent, ToolCall, ToolDefinition,
};
use async_trait::async_trait;
use openai_api::{
    AssembledResponse, AssembledToolCall, ChatCompletionRequest, ChatMessage, ChatStreamEvent,
    ChatTool, ChatToolCall, OpenAiApiClient, OpenAiApiConfig, OpenAiApiError,
};
use serde_json::Value;
use tracing::debug;

/// Stable provider identifier used by startup selection.
pub const OPENAI_PROVIDER_ID: &str = "openai";

pub const DEFAULT_MODEL_ID: &str = "gpt-4o-mini";

/// Runtime configuration for the OpenAI provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAiProviderConfig {
    pub api_key: String,
    pub model_id: String,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
}

impl OpenAiProviderConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model_id: model_id.into(),
            base_url: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn into_api_config(self) -> OpenAiApiConfig {
        let mut config = OpenAiApiConfig::new(self.api_key);

        if let Some(base_url) = self.base_url {
            config = config.with_base_url(base_url);
        }

        if let Some(timeout) = self.timeout {
            config = config.with_timeout(timeout);
        }

        config
    }
}

type StreamHandler<'a> = &'a mut (dyn FnMut(&ChatStreamEvent) + Send);

#[async_trait]
trait StreamClient: Send + Sync {
    async fn stream(
        &self,
        request: &ChatCompletionRequest,
        cancel: &CancelSignal,
        on_event: StreamHandler<'_>,
    ) -> Result<AssembledResponse, OpenAiApiError>;
}

#[derive(Debug)]
struct DefaultStreamClient {
    client: OpenAiApiClient,
}

#[async_trait]
impl StreamClient for DefaultStreamClient {
    async fn stream(
        &self,
        request: &ChatCompletionRequest,
        cancel: &CancelSignal,
        on_event: StreamHandler<'_>,
    ) -> Result<AssembledResponse, OpenAiApiError> {
        self.client
            .stream_with_handler(request, Some(cancel), on_event)
            .await
    }
}

/// `ModelProvider` adapter backed by `openai_api` transport primitives.
pub struct OpenAiProvider {
    model_id: String,
    stream_client: Arc<dyn StreamClient>,
}

impl OpenAiProvider {
    /// Creates a provider using real chat-completions transport.
    pub fn new(config: OpenAiProviderConfig) -> Result<Self, ProviderInitError> {
        let model_id = sanitize_model_id(&config.model_id);
        let stream_client = Arc::new(DefaultStreamClient {
            client: OpenAiApiClient::new(config.into_api_config()).map_err(map_init_error)?,
        });

        Ok(Self {
            model_id,
            stream_client,
        })
    }

    fn build_request(&self, req: &ModelRequest) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(req.messages.len() + 1);
        if !req.instructions.trim().is_empty() {
            messages.push(ChatMessage::system(req.instructions.clone()));
        }
        messages.extend(req.messages.iter().map(to_chat_message));

        ChatCompletionRequest::new(self.model_id.clone(), messages)
            .with_tools(req.tools.iter().map(to_chat_tool).collect())
    }

    #[cfg(test)]
    fn with_stream_client_for_tests(model_id: &str, stream_client: Arc<dyn StreamClient>) -> Self {
        Self {
            model_id: sanitize_model_id(model_id),
            stream_client,
        }
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: OPENAI_PROVIDER_ID.to_string(),
            model_id: self.model_id.clone(),
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

        if cancel.load(Ordering::Acquire) {
            emit(RunEvent::Cancelled { run_id });
            return Err(ProviderError::Cancelled);
        }

        let request = self.build_request(&req);
        let mut on_event = |event: &ChatStreamEvent| {
            if let ChatStreamEvent::ContentDelta { delta } = event {
                if !delta.is_empty() {
                    emit(RunEvent::Chunk {
                        run_id,
                        text: delta.clone(),
                    });
                }
            }
        };
        let outcome = self
            .stream_client
            .stream(&request, &cancel, &mut on_event)
            .await;

        match outcome {
            Ok(response) => {
                debug!(
                    run_id,
                    tool_calls = response.tool_calls.len(),
                    finish_reason = ?response.finish_reason,
                    "model turn finished"
                );
                emit(RunEvent::Finished { run_id });
                Ok(ModelResponse {
                    text: response.text,
                    tool_calls: response.tool_calls.into_iter().map(to_tool_call).collect(),
                })
            }
            Err(OpenAiApiError::Cancelled) => {
                emit(RunEvent::Cancelled { run_id });
                Err(ProviderError::Cancelled)
            }
            Err(error) => {
                let error = format!("OpenAI request failed: {error}");
                emit(RunEvent::Failed {
                    run_id,
                    error: error.clone(),
                });
                Err(ProviderError::Unavailable(error))
            }
        }
    }
}

fn to_chat_message(message: &Message) -> ChatMessage {
    match message.role {
        Role::User => ChatMessage::user(message.content.clone()),
        Role::Assistant => ChatMessage::assistant(
            message.content.clone(),
            message
                .tool_calls
                .iter()
                .map(|call| {
                    ChatToolCall::function(
                        call.id.clone(),
                        call.name.clone(),
                        call.arguments.to_string(),
                    )
                })
                .collect(),
        ),
        Role::Tool => ChatMessage::tool(
            message.tool_call_id.clone().unwrap_or_default(),
            message.content.clone(),
        ),
    }
}

fn to_chat_tool(tool: &ToolDefinition) -> ChatTool {
    ChatTool::function(
        tool.name.clone(),
        tool.description.clone(),
        tool.input_schema.clone(),
    )
}

/// Arguments that are not valid JSON are passed through as a string so the
/// tool registry reports them as an argument error instead of failing the turn.
fn to_tool_call(call: AssembledToolCall) -> ToolCall {
    let arguments = if call.arguments.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(&call.arguments).unwrap_or(Value::String(call.arguments))
    };

    ToolCall {
        id: call.id,
        name: call.name,
        arguments,
    }
}

fn sanitize_model_id(model_id: &str) -> String {
    let trimmed = model_id.trim();
    if trimmed.is_empty() {
        DEFAULT_MODEL_ID.to_string()
    } else {
        trimmed.to_string()
    }
}

fn map_init_error(error: OpenAiApiError) -> ProviderInitError {
    ProviderInitError::new(format!("Failed to initialize openai provider: {error}"))
}
