//! Transport-only client for OpenAI-compatible chat-completions endpoints.
//!
//! This crate owns request building, streaming SSE parsing and retry
//! behavior. It knows nothing about threads, tools or the agent loop; tool
//! calls arrive as [`ChatStreamEvent::ToolCallDelta`] fragments and are
//! assembled by [`ChatAccumulator`] for the caller to dispatch.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod headers;
pub mod payload;
pub mod retry;
pub mod sse;
pub mod url;

pub use client::{CancellationSignal, OpenAiApiClient, StreamResult};
pub use config::OpenAiApiConfig;
pub use error::OpenAiApiError;
pub use events::{AssembledResponse, AssembledToolCall, ChatAccumulator, ChatStreamEvent, FinishReason};
pub use payload::{ChatCompletionRequest, ChatMessage, ChatTool, ChatToolCall};
pub use retry::RetryPolicy;
pub use sse::SseStreamParser;
pub use url::normalize_chat_url;
