use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// What was wrong with a line of a thread log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Corruption {
    /// The file holds no thread header at all.
    MissingHeader,
    HeaderExpected,
    MessageExpected,
    Version(u32),
    /// The header names a different thread than the file name.
    ForeignHeader { owner: String },
    NotUtf8,
    Json(String),
    DuplicateId(String),
    ParentMismatch {
        id: String,
        expected: Option<String>,
        found: Option<String>,
    },
    Timestamp { field: &'static str, value: String },
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingHeader => f.write_str("no thread header"),
            Self::HeaderExpected => f.write_str("expected the thread header first"),
            Self::MessageExpected => f.write_str("expected a message record"),
            Self::Version(found) => write!(f, "log version {found} is not supported"),
            Self::ForeignHeader { owner } => write!(f, "header belongs to thread '{owner}'"),
            Self::NotUtf8 => f.write_str("line is not UTF-8"),
            Self::Json(reason) => write!(f, "unreadable record: {reason}"),
            Self::DuplicateId(id) => write!(f, "message '{id}' appears twice"),
            Self::ParentMismatch { id, expected, found } => write!(
                f,
                "message '{id}' follows {found:?} but the previous message is {expected:?}"
            ),
            Self::Timestamp { field, value } => write!(f, "'{field}' is not RFC 3339: {value}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ThreadStoreError {
    #[error("cannot {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `line` is 1-based; 0 when the problem is the file as a whole.
    #[error("thread log {path} line {line}: {kind}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        kind: Corruption,
    },

    #[error("invalid thread id '{id}': {reason}")]
    InvalidThreadId { id: String, reason: &'static str },

    #[error("thread '{thread_id}' already contains message id '{id}'")]
    DuplicateAppend { thread_id: String, id: String },

    #[error("cannot encode a record for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("current time cannot be written as RFC 3339: {0}")]
    Clock(#[source] time::error::Format),
}

impl ThreadStoreError {
    #[must_use]
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn corrupt(path: impl Into<PathBuf>, line: usize, kind: Corruption) -> Self {
        Self::Corrupt {
            path: path.into(),
            line,
            kind,
        }
    }

    /// The corruption kind, when this is a malformed log.
    #[must_use]
    pub fn corruption(&self) -> Option<&Corruption> {
        match self {
            Self::Corrupt { kind, .. } => Some(kind),
            _ => None,
        }
    }
}
