//! Segmented, offset-addressed storage core of the chute message queue.
//!
//! A [`TopicLog`] is an ordered collection of segments, each a pair of an
//! append-only store file and a memory-mapped sparse index. Records get
//! monotonically increasing 64-bit offsets and are served by point reads;
//! durability is governed by a [`FlushPolicy`].

mod flush;
mod index;
mod record;
mod segment;
mod store;
mod topiclog;

pub mod error;

pub use crate::error::Error;
pub use crate::flush::{FlushPolicy, FlushStrategy};
pub use crate::index::{Index, IndexEntry, ENTRY_LEN};
pub use crate::record::{checksum, Record, HEADER_LEN};
pub use crate::segment::{segment_id, Segment, INDEX_EXT, LEGACY_STORE_EXT, STORE_EXT};
pub use crate::store::Store;
pub use crate::topiclog::TopicLog;

#[cfg(test)]
mod tests;

/// [`TopicLog`] options.
#[derive(Clone, Copy, Debug)]
pub struct Options {
    /// The size in bytes past which the active segment is sealed and a new
    /// one started.
    ///
    /// Default: 1 MiB
    pub max_segment_size: u64,
    /// The largest accepted payload, in bytes.
    ///
    /// Default: 1 MiB
    pub max_message_size: usize,
    /// Age past which sealed segments become eligible for deletion by
    /// [`TopicLog::truncate`].
    ///
    /// Default: 7 days
    pub retention_period_ms: u64,
    /// When appended data is forced to stable storage.
    ///
    /// Default: force after every append.
    pub flush: FlushPolicy,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_segment_size: 1024 * 1024,
            max_message_size: 1024 * 1024,
            retention_period_ms: 7 * 24 * 60 * 60 * 1000,
            flush: FlushPolicy::default(),
        }
    }
}
