use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use parking_lot::RwLock;

use crate::error::{Corruption, Error, Result};

/// Append-only byte file holding one segment's record stream.
///
/// Appends are serialized by the write half of the lock and always land at
/// end-of-file (the handle is opened in append mode). Readers share the read
/// half and may observe any position up to the last completed append.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    file: RwLock<File>,
    size: AtomicU64,
}

impl Store {
    /// Create the store file for a fresh segment.
    ///
    /// Creation is atomic: an existing non-empty file is an error, while an
    /// existing empty file (a previous create that never got a write) is
    /// adopted.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::options()
            .read(true)
            .append(true)
            .create_new(true)
            .open(&path)
            .or_else(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    let file = File::options().read(true).append(true).open(&path)?;
                    if file.metadata()?.len() == 0 {
                        debug!("adopting empty store file {}", path.display());
                        return Ok(file);
                    }
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("store {} already exists and is non-empty", path.display()),
                    ));
                }
                Err(e)
            })?;

        Ok(Self {
            path,
            file: RwLock::new(file),
            size: AtomicU64::new(0),
        })
    }

    /// Open an existing store file.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::options().read(true).append(true).open(&path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path,
            file: RwLock::new(file),
            size: AtomicU64::new(size),
        })
    }

    /// Append `bytes` at end-of-file, returning the pre-write position.
    pub fn append(&self, bytes: &[u8]) -> Result<u64> {
        use std::io::Write as _;

        let file = self.file.write();
        let position = self.size.load(Ordering::Acquire);
        (&*file).write_all(bytes)?;
        self.size
            .store(position + bytes.len() as u64, Ordering::Release);
        Ok(position)
    }

    /// Read exactly `length` bytes at `position`.
    pub fn read(&self, position: u64, length: u32) -> Result<Vec<u8>> {
        let end = position + length as u64;
        if end > self.size() {
            return Err(Error::corrupt(Corruption::ShortRead).with_path(&self.path));
        }

        let mut buf = vec![0u8; length as usize];
        self.read_exact_at(&mut buf, position).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::corrupt(Corruption::ShortRead).with_path(&self.path)
            } else {
                Error::Io(e)
            }
        })?;
        Ok(buf)
    }

    #[cfg(unix)]
    fn read_exact_at(&self, buf: &mut [u8], position: u64) -> io::Result<()> {
        use std::os::unix::fs::FileExt as _;

        let file = self.file.read();
        file.read_exact_at(buf, position)
    }

    #[cfg(not(unix))]
    fn read_exact_at(&self, buf: &mut [u8], position: u64) -> io::Result<()> {
        use std::io::{Read as _, Seek as _, SeekFrom};

        // No positioned read without a cursor move, so readers briefly take
        // the write half to keep seek+read atomic. Appends are unaffected:
        // the handle is in append mode.
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(position))?;
        file.read_exact(buf)
    }

    /// Force written data to stable storage, optionally including file
    /// metadata (fsync vs fdatasync semantics).
    pub fn flush(&self, metadata_also: bool) -> io::Result<()> {
        let file = self.file.read();
        if metadata_also {
            file.sync_all()
        } else {
            file.sync_data()
        }
    }

    /// Shrink the file to `new_size`. Only used while repairing a torn tail
    /// during recovery.
    pub fn truncate(&self, new_size: u64) -> io::Result<()> {
        let file = self.file.write();
        file.set_len(new_size)?;
        self.size.store(new_size, Ordering::Release);
        Ok(())
    }

    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
