use serde_json::Value;

use crate::events::{ChatStreamEvent, FinishReason};

/// Incremental parser for SSE text streams.
#[derive(Debug, Default)]
pub struct SseStreamParser {
    buffer: String,
}

impl SseStreamParser {
    /// Feed arbitrary bytes into the parser and drain complete events.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ChatStreamEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }
        let mut events = Vec::new();

        while let Some(split) = self.buffer.find("\n\n") {
            let frame = self.buffer[..split].to_string();
            self.buffer.drain(0..split + 2);

            let Some(payload) = extract_data_payload(&frame) else {
                continue;
            };
            if payload == "[DONE]" {
                events.push(ChatStreamEvent::Done);
                continue;
            }
            if let Ok(value) = serde_json::from_str::<Value>(&payload) {
                events.extend(map_chunk(&value));
            }
        }

        events
    }

    /// Parse a complete SSE payload string in one shot.
    pub fn parse_frames(input: &str) -> Vec<ChatStreamEvent> {
        let mut parser = Self::default();
        parser.feed(input.as_bytes())
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.trim().is_empty()
    }
}

fn extract_data_payload(frame: &str) -> Option<String> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .collect();

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

fn map_chunk(value: &Value) -> Vec<ChatStreamEvent> {
    if let Some(error) = value.get("error") {
        return vec![ChatStreamEvent::Error {
            code: string_field(error, "code").or_else(|| string_field(error, "type")),
            message: string_field(error, "message"),
        }];
    }

    let mut events = Vec::new();
    let Some(choices) = value.get("choices").and_then(Value::as_array) else {
        return events;
    };

    // Only the first choice is requested.
    let Some(choice) = choices.first() else {
        return events;
    };

    if let Some(delta) = choice.get("delta") {
        if let Some(content) = delta.get("content").and_then(Value::as_str) {
            if !content.is_empty() {
                events.push(ChatStreamEvent::ContentDelta {
                    delta: content.to_owned(),
                });
            }
        }

        for (position, call) in delta
            .get("tool_calls")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .enumerate()
        {
            let index = call
                .get("index")
                .and_then(Value::as_u64)
                .and_then(|index| u32::try_from(index).ok())
                .unwrap_or(position as u32);
            let function = call.get("function");
            events.push(ChatStreamEvent::ToolCallDelta {
                index,
                id: string_field(call, "id"),
                name: function.and_then(|function| string_field(function, "name")),
                arguments: function
                    .and_then(|function| function.get("arguments"))
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_owned(),
            });
        }
    }

    if let Some(reason) = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .and_then(FinishReason::parse)
    {
        events.push(ChatStreamEvent::Finished { reason });
    }

    events
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::SseStreamParser;
    use crate::events::ChatStreamEvent;

    #[test]
    fn parse_sse_frames_incrementally() {
        let mut parser = SseStreamParser::default();
        let mut events = Vec::new();

        events.extend(parser.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel"));
        assert!(events.is_empty());
        events.extend(parser.feed(b"lo\"}}]}\n\n"));
        assert_eq!(
            events,
            vec![ChatStreamEvent::ContentDelta {
                delta: "Hello".to_string()
            }]
        );

        events.extend(parser.feed(b"data: [DONE]\n\n"));
        assert_eq!(events.last(), Some(&ChatStreamEvent::Done));
        assert!(parser.is_empty_buffer());
    }
}
