use std::collections::BTreeMap;

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
}

impl FinishReason {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "stop" => Self::Stop,
            // Legacy single-function responses report `function_call`.
            "tool_calls" | "function_call" => Self::ToolCalls,
            "length" => Self::Length,
            "content_filter" => Self::ContentFilter,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::ToolCalls => "tool_calls",
            Self::Length => "length",
            Self::ContentFilter => "content_filter",
        }
    }
}

/// Stream event emitted by the parser after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatStreamEvent {
    ContentDelta {
        delta: String,
    },
    /// Fragment of one tool call; fragments sharing `index` belong together.
    ToolCallDelta {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    Finished {
        reason: FinishReason,
    },
    /// `data: [DONE]` sentinel.
    Done,
    Error {
        code: Option<String>,
        message: Option<String>,
    },
}

/// Tool call assembled from its streamed fragments. `arguments` is the raw
/// JSON text the model produced and may be malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Complete model turn reconstructed from a stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssembledResponse {
    pub text: String,
    pub tool_calls: Vec<AssembledToolCall>,
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChatAccumulator {
    text: String,
    tool_calls: BTreeMap<u32, PartialToolCall>,
    finish_reason: Option<FinishReason>,
    done: bool,
}

impl ChatAccumulator {
    pub fn apply(&mut self, event: &ChatStreamEvent) {
        match event {
            ChatStreamEvent::ContentDelta { delta } => self.text.push_str(delta),
            ChatStreamEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                let call = self.tool_calls.entry(*index).or_default();
                if let Some(id) = id.as_deref().filter(|id| !id.is_empty()) {
                    call.id = id.to_string();
                }
                if let Some(name) = name.as_deref() {
                    call.name.push_str(name);
                }
                call.arguments.push_str(arguments);
            }
            ChatStreamEvent::Finished { reason } => self.finish_reason = Some(*reason),
            ChatStreamEvent::Done => self.done = true,
            ChatStreamEvent::Error { .. } => {}
        }
    }

    /// True once the server signalled the end of the turn.
    pub fn is_complete(&self) -> bool {
        self.finish_reason.is_some() || self.done
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Tool calls in stream index order. Calls the server left without an id
    /// get a positional one so results can still be paired.
    pub fn finish(self) -> AssembledResponse {
        let tool_calls = self
            .tool_calls
            .into_iter()
            .map(|(index, call)| AssembledToolCall {
                id: if call.id.is_empty() {
                    format!("call_{index}")
                } else {
                    call.id
                },
                name: call.name,
                arguments: call.arguments,
            })
            .collect();

        AssembledResponse {
            text: self.text,
            tool_calls,
            finish_reason: self.finish_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{AssembledToolCall, ChatAccumulator, ChatStreamEvent, FinishReason};

    #[test]
    fn accumulator_joins_interleaved_tool_call_fragments_by_index() {
        let mut accumulator = ChatAccumulator::default();
        let events = [
            ChatStreamEvent::ToolCallDelta {
                index: 1,
                id: Some("call_b".to_string()),
                name: Some("get_reserves".to_string()),
                arguments: "{\"pair".to_string(),
            },
            ChatStreamEvent::ToolCallDelta {
                index: 0,
                id: Some("call_a".to_string()),
                name: Some("get_balance".to_string()),
                arguments: String::new(),
            },
            ChatStreamEvent::ToolCallDelta {
                index: 1,
                id: None,
                name: None,
                arguments: "\":\"0x01\"}".to_string(),
            },
            ChatStreamEvent::ToolCallDelta {
                index: 0,
                id: None,
                name: None,
                arguments: "{}".to_string(),
            },
            ChatStreamEvent::Finished {
                reason: FinishReason::ToolCalls,
            },
        ];
        for event in &events {
            accumulator.apply(event);
        }

        assert!(accumulator.is_complete());
        let response = accumulator.finish();
        assert_eq!(
            response.tool_calls,
            vec![
                AssembledToolCall {
                    id: "call_a".to_string(),
                    name: "get_balance".to_string(),
                    arguments: "{}".to_string(),
                },
                AssembledToolCall {
                    id: "call_b".to_string(),
                    name: "get_reserves".to_string(),
                    arguments: "{\"pair\":\"0x01\"}".to_string(),
                },
            ]
        );
        assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn missing_call_ids_get_positional_ids() {
        let mut accumulator = ChatAccumulator::default();
        accumulator.apply(&ChatStreamEvent::ToolCallDelta {
            index: 2,
            id: None,
            name: Some("get_all_pairs".to_string()),
            arguments: "{}".to_string(),
        });

        assert_eq!(accumulator.finish().tool_calls[0].id, "call_2");
    }
}
