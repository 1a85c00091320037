use std::path::{Path, PathBuf};

use log::{debug, warn};
use parking_lot::RwLock;

use crate::error::Result;
use crate::index::{Index, IndexEntry};
use crate::record::{Record, HEADER_LEN};
use crate::store::Store;

pub const STORE_EXT: &str = "store";
pub const INDEX_EXT: &str = "index";
/// Historical store-file extension, recognized on open, never written.
pub const LEGACY_STORE_EXT: &str = "log";

/// Smallest serialized record: header plus a one-byte payload.
const MIN_RECORD_LEN: u64 = HEADER_LEN as u64 + 1;

/// Render a start offset as the 20-digit zero-padded on-disk segment id.
pub fn segment_id(start_offset: u64) -> String {
    format!("{start_offset:020}")
}

/// A segment file-name stem as found on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum SegmentStem {
    /// 20-digit zero-padded start offset (the only form ever written).
    Modern(u64),
    /// Historical `segment-N` form; `N` orders segments but carries no
    /// offset, which must come from the segment's own index instead.
    Legacy(u64),
}

impl SegmentStem {
    pub fn parse(stem: &str) -> Option<Self> {
        if let Some(n) = stem.strip_prefix("segment-") {
            return n.parse().ok().map(SegmentStem::Legacy);
        }
        stem.parse().ok().map(SegmentStem::Modern)
    }

    pub fn render(&self) -> String {
        match self {
            SegmentStem::Modern(offset) => segment_id(*offset),
            SegmentStem::Legacy(n) => format!("segment-{n}"),
        }
    }
}

#[derive(Debug)]
struct SegmentState {
    next_offset: u64,
}

/// A (store, index) pair covering a contiguous offset range.
///
/// The segment lock serializes appends against each other and against
/// readers; the store and index carry their own locks for their file-level
/// invariants. Lock order is segment, then store, then index.
#[derive(Debug)]
pub struct Segment {
    start_offset: u64,
    store: Store,
    index: Index,
    state: RwLock<SegmentState>,
}

impl Segment {
    /// Create a fresh segment starting at `start_offset` in `dir`.
    pub fn create(dir: &Path, start_offset: u64) -> Result<Self> {
        let stem = segment_id(start_offset);
        let store = Store::create(dir.join(format!("{stem}.{STORE_EXT}")))?;
        let index = Index::create(dir.join(format!("{stem}.{INDEX_EXT}")))?;
        debug!("created segment {stem} in {}", dir.display());

        Ok(Self {
            start_offset,
            store,
            index,
            state: RwLock::new(SegmentState {
                next_offset: start_offset,
            }),
        })
    }

    /// Open an existing segment and repair its tail.
    ///
    /// `fallback_start` is the start offset implied by the surrounding log
    /// (the file name for modern segments, the running next-offset for legacy
    /// ones); a non-empty index overrides it for legacy segments, whose names
    /// carry no offset.
    pub(crate) fn open(dir: &Path, stem: &SegmentStem, store_ext: &str, fallback_start: u64) -> Result<Self> {
        let stem_str = stem.render();
        let store = Store::open(dir.join(format!("{stem_str}.{store_ext}")))?;
        let index_path = dir.join(format!("{stem_str}.{INDEX_EXT}"));
        let index = if index_path.exists() {
            Index::open(&index_path)?
        } else {
            warn!("segment {stem_str} has no index file, starting one empty");
            Index::create(&index_path)?
        };

        recover_tail(&stem_str, &store, &index)?;

        let start_offset = match stem {
            SegmentStem::Modern(offset) => *offset,
            SegmentStem::Legacy(_) => index.first().map(|e| e.offset).unwrap_or(fallback_start),
        };
        let next_offset = index.last().map(|e| e.offset + 1).unwrap_or(start_offset);
        debug!("opened segment {stem_str}: offsets [{start_offset}, {next_offset})");

        Ok(Self {
            start_offset,
            store,
            index,
            state: RwLock::new(SegmentState { next_offset }),
        })
    }

    /// Append `data` at the segment's next offset.
    pub fn append(&self, data: &[u8]) -> Result<Record> {
        let mut state = self.state.write();
        let record = Record::new(state.next_offset, data.to_vec());
        self.write_record(&record)?;
        state.next_offset = record.offset + 1;
        Ok(record)
    }

    /// Append `data` at a caller-supplied offset.
    ///
    /// Offset ordering is the owning log's contract; here the only
    /// post-condition is `next_offset = max(next_offset, offset + 1)`.
    pub fn append_at(&self, offset: u64, data: &[u8]) -> Result<Record> {
        let mut state = self.state.write();
        let record = Record::new(offset, data.to_vec());
        self.write_record(&record)?;
        state.next_offset = state.next_offset.max(offset + 1);
        Ok(record)
    }

    fn write_record(&self, record: &Record) -> Result<()> {
        let mut buf = Vec::with_capacity(record.encoded_len());
        record.encode(&mut buf);
        // Store bytes land before the index entry: an entry that is visible
        // always refers to completed store bytes.
        let position = self.store.append(&buf)?;
        self.index.append(IndexEntry {
            offset: record.offset,
            position,
            length: buf.len() as u32,
            checksum: record.checksum,
        })?;
        Ok(())
    }

    /// Read the record at `offset`, or `None` if this segment has no entry
    /// for it.
    pub fn read(&self, offset: u64) -> Result<Option<Record>> {
        let _state = self.state.read();
        let Some(entry) = self.index.find(offset) else {
            return Ok(None);
        };
        let bytes = self.store.read(entry.position, entry.length)?;
        let record = Record::decode(&bytes, offset).map_err(|e| e.with_path(self.store.path()))?;
        Ok(Some(record))
    }

    pub fn is_full(&self, max_size: u64) -> bool {
        self.store.size() >= max_size
    }

    pub fn is_empty(&self) -> bool {
        self.index.entry_count() == 0
    }

    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    pub fn next_offset(&self) -> u64 {
        self.state.read().next_offset
    }

    pub fn lowest_offset(&self) -> Option<u64> {
        self.index.first().map(|e| e.offset)
    }

    pub fn highest_offset(&self) -> Option<u64> {
        self.index.last().map(|e| e.offset)
    }

    pub fn record_count(&self) -> u64 {
        self.index.entry_count()
    }

    pub fn size(&self) -> u64 {
        self.store.size()
    }

    pub fn flush(&self, metadata_also: bool) -> Result<()> {
        self.store.flush(metadata_also)?;
        self.index.flush()?;
        Ok(())
    }

    /// Flush and release the segment's files. The index file is shrunk to its
    /// exact durable size.
    pub fn close(&self) -> Result<()> {
        self.store.flush(true)?;
        self.index.close()?;
        Ok(())
    }

    pub fn store_path(&self) -> &Path {
        self.store.path()
    }

    pub fn index_path(&self) -> PathBuf {
        self.index.path().to_path_buf()
    }
}

/// Walk the index and discard the first invalid entry and everything after
/// it. An entry is invalid if it is too short to be a record, does not
/// strictly increase the offset sequence, or refers past the end of the
/// store (a torn tail). The store itself is never truncated here; dead bytes
/// at end-of-store are harmless once no entry refers to them.
fn recover_tail(stem: &str, store: &Store, index: &Index) -> Result<()> {
    let store_size = store.size();
    let raw = index.entry_count();
    let mut valid = 0u64;
    let mut prev: Option<u64> = None;

    while valid < raw {
        let Some(entry) = index.entry(valid) else {
            break;
        };
        let too_short = (entry.length as u64) < MIN_RECORD_LEN;
        let out_of_order = prev.is_some_and(|p| entry.offset <= p);
        let torn = entry.position + entry.length as u64 > store_size;
        if too_short || out_of_order || torn {
            warn!(
                "segment {stem}: discarding index entries {valid}..{raw} \
                 (offset={} position={} length={} store-size={store_size})",
                entry.offset, entry.position, entry.length,
            );
            break;
        }
        prev = Some(entry.offset);
        valid += 1;
    }

    index.truncate_entries(valid)?;
    Ok(())
}
