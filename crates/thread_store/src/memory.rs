use std::collections::HashMap;
use std::sync::Mutex;

use agent_provider::Message;

use crate::error::ThreadStoreError;
use crate::store::{lock_unpoisoned, now_rfc3339, Thread, ThreadStore};

/// Process-local store; threads vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryThreadStore {
    threads: Mutex<HashMap<String, Thread>>,
}

impl MemoryThreadStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ThreadStore for MemoryThreadStore {
    fn get(&self, thread_id: &str) -> Result<Option<Thread>, ThreadStoreError> {
        Ok(lock_unpoisoned(&self.threads).get(thread_id).cloned())
    }

    fn append(&self, thread_id: &str, message: &Message) -> Result<(), ThreadStoreError> {
        let created_at = now_rfc3339()?;
        let mut threads = lock_unpoisoned(&self.threads);
        let thread = threads
            .entry(thread_id.to_string())
            .or_insert_with(|| Thread {
                id: thread_id.to_string(),
                created_at,
                messages: Vec::new(),
            });

        if thread.messages.iter().any(|m| m.id == message.id) {
            return Err(ThreadStoreError::DuplicateAppend {
                thread_id: thread_id.to_string(),
                id: message.id.clone(),
            });
        }
        thread.messages.push(message.clone());
        Ok(())
    }
}
