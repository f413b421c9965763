//! Durable per-thread message logs for the agent loop.
//!
//! Each thread is an append-only JSONL file: one header record followed by
//! one record per message, chained by `parent_id`. Appends are flushed to
//! disk before returning so a message is never fed to the model unless it
//! would survive a restart.

mod error;
mod memory;
mod paths;
mod schema;
mod store;

pub use error::{Corruption, ThreadStoreError};
pub use memory::MemoryThreadStore;
pub use paths::{thread_file_name, thread_root, validate_thread_id, THREAD_DIR};
pub use schema::{MessageRecord, ThreadHeader, ThreadLine};
pub use store::{new_thread_id, JsonlThreadStore, Thread, ThreadStore};
