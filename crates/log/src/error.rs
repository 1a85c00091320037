use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error produced by log operations.
///
/// Absent records are not errors: read paths return `Ok(None)` for offsets
/// that are out of range or were removed by retention, so pollers do not pay
/// for an error allocation on every miss.
#[derive(Debug, Error)]
pub enum Error {
    #[error("log is closed")]
    Closed,

    #[error("payload must not be empty")]
    EmptyPayload,

    #[error("payload of {got} bytes exceeds the maximum message size of {max} bytes")]
    PayloadTooLarge { got: usize, max: usize },

    #[error("out-of-order append: offset={offset} but next-offset={next_offset}")]
    OutOfOrder { offset: u64, next_offset: u64 },

    #[error("{}", render_corrupt(.reason, .offset, .path))]
    Corrupt {
        reason: Corruption,
        offset: Option<u64>,
        path: Option<PathBuf>,
    },

    #[error("invalid flush policy: {0}")]
    InvalidFlushPolicy(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Why a record (or index entry) could not be trusted.
#[derive(Debug, Error)]
pub enum Corruption {
    #[error("record header truncated")]
    TruncatedHeader,

    #[error("data length {len} outside sane bounds")]
    LengthOutOfBounds { len: u64 },

    #[error("record body truncated: expected {expected} bytes, {got} available")]
    TruncatedData { expected: usize, got: usize },

    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("short read from store")]
    ShortRead,
}

impl Error {
    pub(crate) fn corrupt(reason: Corruption) -> Self {
        Error::Corrupt {
            reason,
            offset: None,
            path: None,
        }
    }

    pub(crate) fn corrupt_at(reason: Corruption, offset: u64) -> Self {
        Error::Corrupt {
            reason,
            offset: Some(offset),
            path: None,
        }
    }

    pub(crate) fn with_path(self, p: impl Into<PathBuf>) -> Self {
        match self {
            Error::Corrupt { reason, offset, .. } => Error::Corrupt {
                reason,
                offset,
                path: Some(p.into()),
            },
            other => other,
        }
    }
}

fn render_corrupt(reason: &Corruption, offset: &Option<u64>, path: &Option<PathBuf>) -> String {
    let mut msg = format!("corrupt record: {reason}");
    if let Some(offset) = offset {
        msg.push_str(&format!(" (offset {offset})"));
    }
    if let Some(path) = path {
        msg.push_str(&format!(" in {}", path.display()));
    }
    msg
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
