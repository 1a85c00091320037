use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use memmap2::MmapMut;
use parking_lot::RwLock;

use crate::error::Result;

/// Fixed stride of one index entry:
/// `[offset: u64][store_position: u64][record_length: u32][checksum: u32]`,
/// little-endian.
pub const ENTRY_LEN: usize = 24;

/// Growth granularity of the backing file while the index is live. The file
/// is truncated back to `entries * ENTRY_LEN` on close, so a durable index is
/// always a multiple of the stride; a padded tail only survives a crash and
/// is discarded by the open-time scan.
const GROWTH_ALIGN: u64 = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub offset: u64,
    pub position: u64,
    pub length: u32,
    pub checksum: u32,
}

impl IndexEntry {
    fn write_to(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.position.to_le_bytes());
        buf[16..20].copy_from_slice(&self.length.to_le_bytes());
        buf[20..24].copy_from_slice(&self.checksum.to_le_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        Self {
            offset: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            position: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            length: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            checksum: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
        }
    }
}

#[derive(Debug)]
struct Inner {
    file: File,
    /// `None` while the file is empty; an empty index is a zero-byte file and
    /// cannot be mapped.
    map: Option<MmapMut>,
    entries: u64,
    file_len: u64,
}

/// Memory-mapped, append-only sparse index for one segment.
///
/// The write lock shelters remapping during growth: no reader dereferences a
/// mapping that is being replaced.
#[derive(Debug)]
pub struct Index {
    path: PathBuf,
    inner: RwLock<Inner>,
}

impl Index {
    /// Create the index file for a fresh segment (atomically; an existing
    /// empty file is adopted, mirroring [`crate::store::Store::create`]).
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::options()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .or_else(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    let file = File::options().read(true).write(true).open(&path)?;
                    if file.metadata()?.len() == 0 {
                        return Ok(file);
                    }
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("index {} already exists and is non-empty", path.display()),
                    ));
                }
                Err(e)
            })?;

        Ok(Self {
            path,
            inner: RwLock::new(Inner {
                file,
                map: None,
                entries: 0,
                file_len: 0,
            }),
        })
    }

    /// Open an existing index file.
    ///
    /// The entry count is `file_len / 24`; trailing bytes that do not form a
    /// whole entry are ignored. Validation of the entries themselves (and
    /// truncation of a torn tail) is the owning segment's job, via
    /// [`Index::truncate_entries`].
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::options().read(true).write(true).open(&path)?;
        let file_len = file.metadata()?.len();
        let map = if file_len == 0 {
            None
        } else {
            Some(unsafe { MmapMut::map_mut(&file)? })
        };

        Ok(Self {
            path,
            inner: RwLock::new(Inner {
                file,
                map,
                entries: file_len / ENTRY_LEN as u64,
                file_len,
            }),
        })
    }

    /// Append the next entry, extending the mapping when capacity is
    /// exhausted.
    pub fn append(&self, entry: IndexEntry) -> Result<()> {
        let mut inner = self.inner.write();
        let required = (inner.entries + 1) * ENTRY_LEN as u64;
        if required > inner.file_len || inner.map.is_none() {
            grow(&self.path, &mut inner, required)?;
        }
        let start = inner.entries as usize * ENTRY_LEN;
        let map = inner
            .map
            .as_mut()
            .expect("index mapping present after grow");
        entry.write_to(&mut map[start..start + ENTRY_LEN]);
        inner.entries += 1;
        Ok(())
    }

    /// Binary search for the entry with exactly this offset.
    pub fn find(&self, offset: u64) -> Option<IndexEntry> {
        let inner = self.inner.read();
        let map = inner.map.as_ref()?;

        let mut lo = 0u64;
        let mut hi = inner.entries;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let entry = entry_at(map, mid);
            match entry.offset.cmp(&offset) {
                std::cmp::Ordering::Equal => return Some(entry),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        None
    }

    /// Entry at position `i`, or `None` past the end.
    pub fn entry(&self, i: u64) -> Option<IndexEntry> {
        let inner = self.inner.read();
        if i >= inner.entries {
            return None;
        }
        inner.map.as_ref().map(|map| entry_at(map, i))
    }

    pub fn first(&self) -> Option<IndexEntry> {
        self.entry(0)
    }

    pub fn last(&self) -> Option<IndexEntry> {
        let inner = self.inner.read();
        match (inner.entries, inner.map.as_ref()) {
            (0, _) | (_, None) => None,
            (n, Some(map)) => Some(entry_at(map, n - 1)),
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.read().entries
    }

    /// Force the mapping to stable storage.
    pub fn flush(&self) -> io::Result<()> {
        let inner = self.inner.read();
        match inner.map.as_ref() {
            Some(map) => map.flush(),
            None => Ok(()),
        }
    }

    /// Discard everything from entry `n` on. Used by tail recovery.
    pub(crate) fn truncate_entries(&self, n: u64) -> io::Result<()> {
        let mut inner = self.inner.write();
        if n >= inner.entries && inner.file_len == inner.entries * ENTRY_LEN as u64 {
            return Ok(());
        }
        let n = n.min(inner.entries);
        if let Some(map) = inner.map.take() {
            map.flush()?;
        }
        let new_len = n * ENTRY_LEN as u64;
        inner.file.set_len(new_len)?;
        inner.file_len = new_len;
        inner.entries = n;
        if new_len > 0 {
            inner.map = Some(unsafe { MmapMut::map_mut(&inner.file)? });
        }
        Ok(())
    }

    /// Flush, unmap, and shrink the file to exactly `entries * 24` bytes.
    pub(crate) fn close(&self) -> io::Result<()> {
        let mut inner = self.inner.write();
        if let Some(map) = inner.map.take() {
            map.flush()?;
        }
        let exact = inner.entries * ENTRY_LEN as u64;
        if inner.file_len != exact {
            inner.file.set_len(exact)?;
            inner.file_len = exact;
        }
        inner.file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn entry_at(map: &MmapMut, i: u64) -> IndexEntry {
    let start = i as usize * ENTRY_LEN;
    IndexEntry::read_from(&map[start..start + ENTRY_LEN])
}

fn grow(path: &Path, inner: &mut Inner, required: u64) -> io::Result<()> {
    let new_len = required.div_ceil(GROWTH_ALIGN) * GROWTH_ALIGN;
    // The old mapping is forced before being dropped; readers cannot hold it
    // across this point because growth runs under the write lock.
    if let Some(map) = inner.map.take() {
        map.flush()?;
    }
    inner.file.set_len(new_len)?;
    inner.map = Some(unsafe { MmapMut::map_mut(&inner.file)? });
    inner.file_len = new_len;
    debug!("index {} grown to {} bytes", path.display(), new_len);
    Ok(())
}
