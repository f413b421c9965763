use agent_provider::Message;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThreadHeader {
    pub version: u32,
    pub thread_id: String,
    pub created_at: String,
}

impl ThreadHeader {
    #[must_use]
    pub fn v1(thread_id: impl Into<String>, created_at: impl Into<String>) -> Self {
        Self {
            version: 1,
            thread_id: thread_id.into(),
            created_at: created_at.into(),
        }
    }
}

/// One appended message plus its position in the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageRecord {
    pub parent_id: Option<String>,
    pub ts: String,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThreadLine {
    Thread(ThreadHeader),
    Message(MessageRecord),
}
