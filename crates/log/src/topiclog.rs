use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use itertools::Itertools as _;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::flush::{timer_tick, FlushTracker, Flusher};
use crate::record::Record;
use crate::segment::{segment_id, Segment, SegmentStem, LEGACY_STORE_EXT, STORE_EXT};
use crate::Options;

struct LogState {
    /// All live segments, keyed by start offset. The map always contains the
    /// active segment; everything else is sealed.
    segments: BTreeMap<u64, Arc<Segment>>,
    active: Arc<Segment>,
    next_offset: u64,
    closed: bool,
}

pub(crate) struct LogInner {
    dir: PathBuf,
    opts: Options,
    state: RwLock<LogState>,
    tracker: FlushTracker,
}

/// The append-only, offset-addressed log of one topic.
///
/// Appends are serialized by the write half of the log lock; reads share the
/// read half and binary-search the segment map for the owning segment. All
/// further locking (segment, store, index) nests strictly inside.
pub struct TopicLog {
    inner: Arc<LogInner>,
    flusher: Mutex<Option<Flusher>>,
}

impl TopicLog {
    /// Open (or initialize) the log rooted at `dir`, recovering whatever
    /// segments are on disk.
    pub fn open(dir: impl Into<PathBuf>, opts: Options) -> Result<Self> {
        let dir = dir.into();
        opts.flush.validate()?;
        fs::create_dir_all(&dir)?;

        let mut segments = BTreeMap::new();
        let mut next_offset = 0u64;
        for (stem, store_ext) in enumerate_segments(&dir)? {
            let segment = Arc::new(Segment::open(&dir, &stem, store_ext, next_offset)?);
            next_offset = next_offset.max(segment.next_offset());
            segments.insert(segment.start_offset(), segment);
        }

        let active = match segments.values().next_back() {
            Some(last) if !last.is_full(opts.max_segment_size) => last.clone(),
            _ => {
                let segment = Arc::new(Segment::create(&dir, next_offset)?);
                segments.insert(next_offset, segment.clone());
                segment
            }
        };
        info!(
            "opened log at {}: {} segments, next offset {next_offset}",
            dir.display(),
            segments.len(),
        );

        let inner = Arc::new(LogInner {
            dir,
            opts,
            state: RwLock::new(LogState {
                segments,
                active,
                next_offset,
                closed: false,
            }),
            tracker: FlushTracker::new(),
        });

        let flusher = match opts.flush.timer_interval() {
            Some(interval) => {
                let weak: Weak<LogInner> = Arc::downgrade(&inner);
                Some(Flusher::spawn(timer_tick(interval), move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.flush_pending();
                    }
                })?)
            }
            None => None,
        };

        Ok(Self {
            inner,
            flusher: Mutex::new(flusher),
        })
    }

    /// Append an opaque payload, assigning the next offset.
    pub fn append(&self, payload: &[u8]) -> Result<Record> {
        self.inner.append_with(payload, None)
    }

    /// Append at a caller-supplied offset, which must be at least the current
    /// next offset. Skipped offsets stay permanently unmapped.
    pub fn append_at(&self, offset: u64, payload: &[u8]) -> Result<Record> {
        self.inner.append_with(payload, Some(offset))
    }

    /// Read the record at `offset`. `Ok(None)` for offsets that were never
    /// assigned, not yet assigned, or removed by retention.
    pub fn read(&self, offset: u64) -> Result<Option<Record>> {
        let state = self.inner.state.read();
        if state.closed {
            return Err(Error::Closed);
        }
        read_locked(&state, offset)
    }

    /// Read up to `max` records starting at `from` (clamped to the oldest
    /// readable offset). Unmapped offsets inside the range are skipped.
    pub fn read_batch(&self, from: u64, max: usize) -> Result<Vec<Record>> {
        let state = self.inner.state.read();
        if state.closed {
            return Err(Error::Closed);
        }
        let oldest = state
            .segments
            .keys()
            .next()
            .copied()
            .unwrap_or(state.next_offset);

        let mut records = Vec::new();
        let mut offset = from.max(oldest);
        while records.len() < max && offset < state.next_offset {
            if let Some(record) = read_locked(&state, offset)? {
                records.push(record);
            }
            offset += 1;
        }
        Ok(records)
    }

    /// Force the active segment to stable storage.
    pub fn flush(&self) -> Result<()> {
        let state = self.inner.state.read();
        if state.closed {
            return Err(Error::Closed);
        }
        state.active.flush(self.inner.opts.flush.force_metadata)?;
        self.inner.tracker.mark_flushed();
        Ok(())
    }

    /// Apply retention: delete sealed segments that are empty or whose store
    /// file is older than the retention period. The active segment is never
    /// deleted, and offsets are never renumbered.
    pub fn truncate(&self) -> Result<()> {
        let mut state = self.inner.state.write();
        if state.closed {
            return Err(Error::Closed);
        }
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_millis(self.inner.opts.retention_period_ms))
            .unwrap_or(UNIX_EPOCH);

        let sealed: Vec<u64> = state
            .segments
            .keys()
            .filter(|start| **start != state.active.start_offset())
            .copied()
            .collect();
        for start in sealed {
            let Some(segment) = state.segments.get(&start).cloned() else {
                continue;
            };
            let expired = segment.is_empty() || store_mtime(&segment)? <= cutoff;
            if !expired {
                continue;
            }
            segment.close()?;
            fs::remove_file(segment.store_path())?;
            fs::remove_file(segment.index_path())?;
            state.segments.remove(&start);
            info!("retention removed segment {}", segment_id(start));
        }
        Ok(())
    }

    /// Flush all segments, stop the background flusher, and close. Idempotent:
    /// a second close is a no-op; any other operation after close fails
    /// [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        {
            let state = self.inner.state.read();
            if state.closed {
                return Ok(());
            }
            for segment in state.segments.values() {
                segment.flush(true)?;
            }
        }
        if let Some(flusher) = self.flusher.lock().take() {
            flusher.stop();
        }

        let mut state = self.inner.state.write();
        if state.closed {
            return Ok(());
        }
        for segment in state.segments.values() {
            segment.close()?;
        }
        state.closed = true;
        debug!("closed log at {}", self.inner.dir.display());
        Ok(())
    }

    pub fn next_offset(&self) -> u64 {
        self.inner.state.read().next_offset
    }

    /// The oldest offset still covered by a segment, i.e. the lower bound of
    /// reads that can succeed.
    pub fn oldest_offset(&self) -> u64 {
        let state = self.inner.state.read();
        state
            .segments
            .keys()
            .next()
            .copied()
            .unwrap_or(state.next_offset)
    }

    pub fn record_count(&self) -> u64 {
        let state = self.inner.state.read();
        state.segments.values().map(|s| s.record_count()).sum()
    }

    pub fn total_size(&self) -> u64 {
        let state = self.inner.state.read();
        state.segments.values().map(|s| s.size()).sum()
    }

    pub fn segment_count(&self) -> u32 {
        self.inner.state.read().segments.len() as u32
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }
}

impl Drop for TopicLog {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("failed to close log on drop: {e}");
        }
    }
}

impl LogInner {
    fn append_with(&self, payload: &[u8], at: Option<u64>) -> Result<Record> {
        if payload.is_empty() {
            return Err(Error::EmptyPayload);
        }
        if payload.len() > self.opts.max_message_size {
            return Err(Error::PayloadTooLarge {
                got: payload.len(),
                max: self.opts.max_message_size,
            });
        }

        let mut state = self.state.write();
        if state.closed {
            return Err(Error::Closed);
        }
        if let Some(offset) = at {
            if offset < state.next_offset {
                return Err(Error::OutOfOrder {
                    offset,
                    next_offset: state.next_offset,
                });
            }
        }

        if state.active.is_full(self.opts.max_segment_size) {
            state.active.flush(self.opts.flush.force_metadata)?;
            debug!("rolling segment at offset {}", state.next_offset);
            let segment = Arc::new(Segment::create(&self.dir, state.next_offset)?);
            state.segments.insert(segment.start_offset(), segment.clone());
            state.active = segment;
        }

        let record = match at {
            Some(offset) => state.active.append_at(offset, payload)?,
            None => state.active.append(payload)?,
        };
        state.next_offset = state.active.next_offset();

        self.tracker.note_append();
        if self
            .opts
            .flush
            .should_flush(self.tracker.pending(), self.tracker.since_last())
        {
            state.active.flush(self.opts.flush.force_metadata)?;
            self.tracker.mark_flushed();
        }
        Ok(record)
    }

    /// Timer-driven flush of the active segment.
    fn flush_pending(&self) {
        if !self.tracker.has_pending() {
            return;
        }
        let state = self.state.read();
        if state.closed {
            return;
        }
        match state.active.flush(self.opts.flush.force_metadata) {
            Ok(()) => self.tracker.mark_flushed(),
            Err(e) => warn!("background flush failed: {e}"),
        }
    }
}

fn read_locked(state: &LogState, offset: u64) -> Result<Option<Record>> {
    if offset >= state.next_offset {
        return Ok(None);
    }
    // The owner is the greatest segment whose start offset is <= offset.
    let Some((_, segment)) = state.segments.range(..=offset).next_back() else {
        return Ok(None);
    };
    segment.read(offset)
}

fn store_mtime(segment: &Segment) -> Result<SystemTime> {
    Ok(fs::metadata(segment.store_path())?.modified()?)
}

/// Enumerate segment files in `dir`, in recovery order: legacy `segment-N`
/// stems sorted by `N` first, then 20-digit stems sorted by start offset.
fn enumerate_segments(dir: &Path) -> Result<Vec<(SegmentStem, &'static str)>> {
    let mut legacy = Vec::new();
    let mut modern = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(STORE_EXT) => STORE_EXT,
            Some(LEGACY_STORE_EXT) => LEGACY_STORE_EXT,
            _ => continue,
        };
        let Some(stem) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(SegmentStem::parse)
        else {
            debug!("ignoring unrecognized file {}", path.display());
            continue;
        };
        match stem {
            SegmentStem::Legacy(n) => legacy.push((n, stem, ext)),
            SegmentStem::Modern(offset) => modern.push((offset, stem, ext)),
        }
    }

    Ok(legacy
        .into_iter()
        .sorted_by_key(|(n, ..)| *n)
        .chain(modern.into_iter().sorted_by_key(|(offset, ..)| *offset))
        .map(|(_, stem, ext)| (stem, ext))
        .collect())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::tests::helpers::{enable_logging, open_log, small_segment_opts};

    #[test]
    fn single_segment_round_trip() {
        enable_logging();
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir, Options::default());

        let record = log.append(b"hello").unwrap();
        assert_eq!(record.offset, 0);
        assert_eq!(record.data.len(), 5);
        assert_eq!(log.read(0).unwrap().unwrap().data, b"hello");
        assert_eq!(log.next_offset(), 1);
        assert_eq!(log.segment_count(), 1);
    }

    #[test]
    fn offsets_are_contiguous() {
        enable_logging();
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir, small_segment_opts(64));

        for expected in 0..20u64 {
            assert_eq!(log.append(&[1u8; 20]).unwrap().offset, expected);
        }
        assert_eq!(log.next_offset(), 20);
        assert_eq!(log.record_count(), 20);
    }

    #[test]
    fn rotation_at_max_segment_size() {
        enable_logging();
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir, small_segment_opts(64));

        // 20-byte payloads serialize to 36 bytes; the store passes 64 bytes
        // after the second append, so the third rolls.
        for _ in 0..4 {
            log.append(&[9u8; 20]).unwrap();
        }
        assert_eq!(log.segment_count(), 2);
        assert!(dir.path().join("00000000000000000000.store").exists());
        assert!(dir.path().join("00000000000000000002.store").exists());

        let record = log.read(3).unwrap().unwrap();
        assert_eq!(record.offset, 3);
    }

    #[test]
    fn append_at_enforces_monotonicity() {
        enable_logging();
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir, Options::default());

        log.append(b"zero").unwrap();
        assert!(matches!(
            log.append_at(0, b"dup"),
            Err(Error::OutOfOrder {
                offset: 0,
                next_offset: 1
            })
        ));

        // Exactly next_offset is accepted, larger offsets leave a gap.
        assert_eq!(log.append_at(1, b"one").unwrap().offset, 1);
        assert_eq!(log.append_at(5, b"five").unwrap().offset, 5);
        assert_eq!(log.next_offset(), 6);
        assert_eq!(log.read(3).unwrap(), None);
        assert_eq!(log.read(5).unwrap().unwrap().data, b"five");
    }

    #[test]
    fn payload_validation() {
        enable_logging();
        let dir = TempDir::new().unwrap();
        let mut opts = Options::default();
        opts.max_message_size = 8;
        let log = open_log(&dir, opts);

        assert!(matches!(log.append(b""), Err(Error::EmptyPayload)));
        assert_eq!(log.append(&[0u8; 8]).unwrap().offset, 0);
        assert!(matches!(
            log.append(&[0u8; 9]),
            Err(Error::PayloadTooLarge { got: 9, max: 8 })
        ));
    }

    #[test]
    fn read_beyond_next_offset_is_none() {
        enable_logging();
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir, Options::default());
        log.append(b"only").unwrap();

        assert_eq!(log.read(1).unwrap(), None);
        assert_eq!(log.read(1000).unwrap(), None);
    }

    #[test]
    fn reopen_resumes_offsets() {
        enable_logging();
        let dir = TempDir::new().unwrap();
        {
            let log = open_log(&dir, small_segment_opts(64));
            for _ in 0..5 {
                log.append(&[3u8; 20]).unwrap();
            }
            log.close().unwrap();
        }

        let log = open_log(&dir, small_segment_opts(64));
        assert_eq!(log.next_offset(), 5);
        assert_eq!(log.append(&[4u8; 20]).unwrap().offset, 5);
        for offset in 0..6 {
            assert_eq!(log.read(offset).unwrap().unwrap().offset, offset);
        }
    }

    #[test]
    fn close_is_idempotent_and_final() {
        enable_logging();
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir, Options::default());
        log.append(b"x").unwrap();

        log.close().unwrap();
        log.close().unwrap();
        assert!(matches!(log.append(b"y"), Err(Error::Closed)));
        assert!(matches!(log.read(0), Err(Error::Closed)));
        assert!(matches!(log.flush(), Err(Error::Closed)));
        assert!(matches!(log.truncate(), Err(Error::Closed)));
    }

    #[test]
    fn retention_deletes_sealed_segments_only() {
        enable_logging();
        let dir = TempDir::new().unwrap();
        let mut opts = small_segment_opts(64);
        opts.retention_period_ms = 0;
        let log = open_log(&dir, opts);

        // Fill enough for two sealed segments plus the active one.
        for _ in 0..5 {
            log.append(&[7u8; 20]).unwrap();
        }
        assert_eq!(log.segment_count(), 3);

        log.truncate().unwrap();
        assert_eq!(log.segment_count(), 1);
        assert_eq!(log.read(0).unwrap(), None);
        assert_eq!(log.read(3).unwrap(), None);
        assert_eq!(log.read(4).unwrap().unwrap().offset, 4);
        assert_eq!(log.oldest_offset(), 4);
        // Offsets are not renumbered.
        assert_eq!(log.append(&[8u8; 20]).unwrap().offset, 5);
    }

    #[test]
    fn retention_keeps_fresh_segments() {
        enable_logging();
        let dir = TempDir::new().unwrap();
        let opts = small_segment_opts(64); // 7-day default retention
        let log = open_log(&dir, opts);

        for _ in 0..5 {
            log.append(&[7u8; 20]).unwrap();
        }
        let before = log.segment_count();
        log.truncate().unwrap();
        assert_eq!(log.segment_count(), before);
        assert_eq!(log.read(0).unwrap().unwrap().offset, 0);
    }

    #[test]
    fn read_batch_skips_holes_and_clamps() {
        enable_logging();
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir, Options::default());
        log.append(b"a").unwrap();
        log.append_at(3, b"b").unwrap();
        log.append(b"c").unwrap();

        let all = log.read_batch(0, 10).unwrap();
        assert_eq!(
            all.iter().map(|r| r.offset).collect::<Vec<_>>(),
            vec![0, 3, 4]
        );

        let capped = log.read_batch(0, 2).unwrap();
        assert_eq!(
            capped.iter().map(|r| r.offset).collect::<Vec<_>>(),
            vec![0, 3]
        );
    }

    #[test]
    fn stats_accessors() {
        enable_logging();
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir, small_segment_opts(64));
        for _ in 0..3 {
            log.append(&[1u8; 20]).unwrap();
        }

        assert_eq!(log.next_offset(), 3);
        assert_eq!(log.record_count(), 3);
        assert_eq!(log.total_size(), 3 * 36);
        assert_eq!(log.segment_count(), 2);
        assert_eq!(log.oldest_offset(), 0);
    }
}
