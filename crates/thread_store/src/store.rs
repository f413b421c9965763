use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use agent_provider::Message;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::{Corruption, ThreadStoreError};
use crate::paths::{thread_file_name, validate_thread_id};
use crate::schema::{MessageRecord, ThreadHeader, ThreadLine};

/// Append handles kept open at once; the least recently used is closed first.
const MAX_OPEN_THREADS: usize = 32;

/// A conversation's ordered message log.
#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    pub id: String,
    pub created_at: String,
    pub messages: Vec<Message>,
}

/// Durable storage keyed by thread id.
///
/// `append` must not return before the message is durable.
pub trait ThreadStore: Send + Sync {
    fn get(&self, thread_id: &str) -> Result<Option<Thread>, ThreadStoreError>;

    fn append(&self, thread_id: &str, message: &Message) -> Result<(), ThreadStoreError>;
}

#[must_use]
pub fn new_thread_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn now_rfc3339() -> Result<String, ThreadStoreError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(ThreadStoreError::Clock)
}

struct OpenThread {
    file: File,
    ids: HashSet<String>,
    last_id: Option<String>,
    last_used: u64,
}

#[derive(Default)]
struct OpenThreads {
    threads: HashMap<String, OpenThread>,
    clock: u64,
}

/// One `<thread_id>.jsonl` file per thread under a root directory.
pub struct JsonlThreadStore {
    root: PathBuf,
    open: Mutex<OpenThreads>,
}

impl JsonlThreadStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ThreadStoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|source| ThreadStoreError::io("create thread directory", &root, source))?;

        Ok(Self {
            root,
            open: Mutex::new(OpenThreads::default()),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn thread_path(&self, thread_id: &str) -> PathBuf {
        self.root.join(thread_file_name(thread_id))
    }

    /// Number of threads holding an open append handle.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        lock_unpoisoned(&self.open).threads.len()
    }

    fn open_for_append(&self, thread_id: &str) -> Result<OpenThread, ThreadStoreError> {
        let path = self.thread_path(thread_id);

        if path.exists() {
            let loaded = load_thread_file(&path, thread_id)?;
            let mut file = OpenOptions::new()
                .append(true)
                .open(&path)
                .map_err(|source| ThreadStoreError::io("open for append", &path, source))?;

            if loaded.torn_tail {
                warn!(
                    thread_id,
                    path = %path.display(),
                    keep_bytes = loaded.complete_len,
                    "dropping partially written record"
                );
                file.set_len(loaded.complete_len)
                    .map_err(|source| ThreadStoreError::io("truncate", &path, source))?;
                file.sync_data()
                    .map_err(|source| ThreadStoreError::io("sync", &path, source))?;
            } else if loaded.unterminated {
                file.write_all(b"\n")
                    .map_err(|source| ThreadStoreError::io("append to", &path, source))?;
            }

            if let Some(thread) = loaded.thread {
                return Ok(OpenThread {
                    file,
                    ids: thread.messages.iter().map(|m| m.id.clone()).collect(),
                    last_id: thread.messages.last().map(|m| m.id.clone()),
                    last_used: 0,
                });
            }
            // Only a torn header was ever written.
            return start_thread(file, &path, thread_id);
        }

        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .map_err(|source| ThreadStoreError::io("create", &path, source))?;
        start_thread(file, &path, thread_id)
    }
}

fn start_thread(mut file: File, path: &Path, thread_id: &str) -> Result<OpenThread, ThreadStoreError> {
    let header = ThreadLine::Thread(ThreadHeader::v1(thread_id, now_rfc3339()?));
    write_line(&mut file, path, &header)?;
    debug!(thread_id, path = %path.display(), "started thread file");

    Ok(OpenThread {
        file,
        ids: HashSet::new(),
        last_id: None,
        last_used: 0,
    })
}

impl ThreadStore for JsonlThreadStore {
    fn get(&self, thread_id: &str) -> Result<Option<Thread>, ThreadStoreError> {
        validate_thread_id(thread_id)?;
        let path = self.thread_path(thread_id);
        if !path.exists() {
            return Ok(None);
        }
        Ok(load_thread_file(&path, thread_id)?.thread)
    }

    fn append(&self, thread_id: &str, message: &Message) -> Result<(), ThreadStoreError> {
        validate_thread_id(thread_id)?;
        let mut open = lock_unpoisoned(&self.open);
        open.clock += 1;
        let now = open.clock;

        if !open.threads.contains_key(thread_id) {
            let opened = self.open_for_append(thread_id)?;
            if open.threads.len() >= MAX_OPEN_THREADS {
                evict_least_recent(&mut open.threads);
            }
            open.threads.insert(thread_id.to_string(), opened);
        }
        let Some(thread) = open.threads.get_mut(thread_id) else {
            return Ok(());
        };
        thread.last_used = now;
        let path = self.thread_path(thread_id);

        if thread.ids.contains(&message.id) {
            return Err(ThreadStoreError::DuplicateAppend {
                thread_id: thread_id.to_string(),
                id: message.id.clone(),
            });
        }

        let line = ThreadLine::Message(MessageRecord {
            parent_id: thread.last_id.clone(),
            ts: now_rfc3339()?,
            message: message.clone(),
        });
        if let Err(error) = write_line(&mut thread.file, &path, &line) {
            // The file may end in a partial record; reopening repairs it.
            open.threads.remove(thread_id);
            return Err(error);
        }

        thread.ids.insert(message.id.clone());
        thread.last_id = Some(message.id.clone());
        Ok(())
    }
}

fn evict_least_recent(threads: &mut HashMap<String, OpenThread>) {
    let oldest = threads
        .iter()
        .min_by_key(|(_, thread)| thread.last_used)
        .map(|(id, _)| id.clone());
    if let Some(id) = oldest {
        debug!(thread_id = %id, "closing idle thread handle");
        threads.remove(&id);
    }
}

fn write_line(file: &mut File, path: &Path, line: &ThreadLine) -> Result<(), ThreadStoreError> {
    let mut encoded = serde_json::to_string(line).map_err(|source| ThreadStoreError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    encoded.push('\n');
    file.write_all(encoded.as_bytes())
        .map_err(|source| ThreadStoreError::io("append to", path, source))?;
    file.sync_data()
        .map_err(|source| ThreadStoreError::io("sync", path, source))
}

/// A thread file as found on disk.
pub(crate) struct LoadedThread {
    /// `None` when the file holds nothing but a torn header.
    pub(crate) thread: Option<Thread>,
    /// Length of the prefix made of whole records.
    pub(crate) complete_len: u64,
    /// The file ends in a record cut short by a crash.
    pub(crate) torn_tail: bool,
    /// The last record is whole but lacks its newline.
    pub(crate) unterminated: bool,
}

/// Reads and validates a thread file.
///
/// A final line without a newline that does not parse is a write the process
/// never finished; it is left out rather than failing the whole thread.
pub(crate) fn load_thread_file(path: &Path, thread_id: &str) -> Result<LoadedThread, ThreadStoreError> {
    let bytes = fs::read(path).map_err(|source| ThreadStoreError::io("read", path, source))?;
    let complete_len = bytes
        .iter()
        .rposition(|byte| *byte == b'\n')
        .map_or(0, |index| index + 1);
    let (body, tail) = bytes.split_at(complete_len);

    let mut lines: Vec<&[u8]> = body.split(|byte| *byte == b'\n').collect();
    let mut torn_tail = false;
    let mut unterminated = false;
    if !tail.iter().all(u8::is_ascii_whitespace) {
        let whole = std::str::from_utf8(tail)
            .ok()
            .is_some_and(|text| serde_json::from_str::<ThreadLine>(text).is_ok());
        if whole {
            unterminated = true;
            lines.push(tail);
        } else {
            warn!(path = %path.display(), "ignoring partially written last record");
            torn_tail = true;
        }
    }

    let mut header: Option<ThreadHeader> = None;
    let mut messages: Vec<Message> = Vec::new();
    let mut seen = HashSet::new();

    for (line_index, raw) in lines.into_iter().enumerate() {
        let line_number = line_index + 1;
        let line = std::str::from_utf8(raw)
            .map_err(|_| ThreadStoreError::corrupt(path, line_number, Corruption::NotUtf8))?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed = serde_json::from_str::<ThreadLine>(line).map_err(|error| {
            ThreadStoreError::corrupt(path, line_number, Corruption::Json(error.to_string()))
        })?;

        if header.is_none() {
            let ThreadLine::Thread(parsed_header) = parsed else {
                return Err(ThreadStoreError::corrupt(path, line_number, Corruption::HeaderExpected));
            };
            validate_header(path, line_number, thread_id, &parsed_header)?;
            header = Some(parsed_header);
            continue;
        }

        let ThreadLine::Message(record) = parsed else {
            return Err(ThreadStoreError::corrupt(path, line_number, Corruption::MessageExpected));
        };
        validate_rfc3339(path, line_number, "ts", &record.ts)?;

        let expected = messages.last().map(|m| m.id.clone());
        if record.parent_id != expected {
            return Err(ThreadStoreError::corrupt(
                path,
                line_number,
                Corruption::ParentMismatch {
                    id: record.message.id,
                    expected,
                    found: record.parent_id,
                },
            ));
        }
        if !seen.insert(record.message.id.clone()) {
            return Err(ThreadStoreError::corrupt(
                path,
                line_number,
                Corruption::DuplicateId(record.message.id),
            ));
        }
        messages.push(record.message);
    }

    let thread = match header {
        Some(header) => Some(Thread {
            id: header.thread_id,
            created_at: header.created_at,
            messages,
        }),
        None if torn_tail && complete_len == 0 => None,
        None => {
            return Err(ThreadStoreError::corrupt(path, 0, Corruption::MissingHeader));
        }
    };

    Ok(LoadedThread {
        thread,
        complete_len: complete_len as u64,
        torn_tail,
        unterminated,
    })
}

fn validate_header(
    path: &Path,
    line_number: usize,
    thread_id: &str,
    header: &ThreadHeader,
) -> Result<(), ThreadStoreError> {
    if header.version != 1 {
        return Err(ThreadStoreError::corrupt(
            path,
            line_number,
            Corruption::Version(header.version),
        ));
    }
    if header.thread_id != thread_id {
        return Err(ThreadStoreError::corrupt(
            path,
            line_number,
            Corruption::ForeignHeader {
                owner: header.thread_id.clone(),
            },
        ));
    }

    validate_rfc3339(path, line_number, "created_at", &header.created_at)
}

pub(crate) fn validate_rfc3339(
    path: &Path,
    line_number: usize,
    field: &'static str,
    value: &str,
) -> Result<(), ThreadStoreError> {
    if OffsetDateTime::parse(value, &Rfc3339).is_err() {
        return Err(ThreadStoreError::corrupt(
            path,
            line_number,
            Corruption::Timestamp {
                field,
                value: value.to_string(),
            },
        ));
    }

    Ok(())
}

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
