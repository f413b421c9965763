use std::path::{Path, PathBuf};

use crate::error::ThreadStoreError;

pub const THREAD_DIR: [&str; 2] = [".meme_agent", "threads"];

const MAX_THREAD_ID_LEN: usize = 128;

#[must_use]
pub fn thread_root(base: &Path) -> PathBuf {
    base.join(THREAD_DIR[0]).join(THREAD_DIR[1])
}

/// Thread ids become file names, so only a conservative charset is accepted.
pub fn validate_thread_id(thread_id: &str) -> Result<(), ThreadStoreError> {
    let reason = if thread_id.is_empty() {
        Some("must not be empty")
    } else if thread_id.len() > MAX_THREAD_ID_LEN {
        Some("must be at most 128 characters")
    } else if !thread_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        Some("may only contain ASCII letters, digits, '-' and '_'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ThreadStoreError::InvalidThreadId {
            id: thread_id.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

#[must_use]
pub fn thread_file_name(thread_id: &str) -> String {
    format!("{thread_id}.jsonl")
}
