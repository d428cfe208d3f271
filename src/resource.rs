//! File resources the worker reads from.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use bytes::Bytes;

/// A random-access byte source with a size that may change between calls.
pub trait FileResource: Send + Sync + fmt::Debug {
    /// Current total size in bytes.
    fn size(&self) -> io::Result<u64>;

    /// Reads exactly `[start, end)`. A resource shorter than `end` is an error.
    fn read_at(
        &self,
        start: u64,
        end: u64,
    ) -> io::Result<Bytes>;

    /// Reads the whole resource into memory.
    fn read_all(&self) -> io::Result<Bytes> {
        let size = self.size()?;
        self.read_at(0, size)
    }
}

/// A file on the local filesystem, read with positional reads.
#[derive(Debug)]
pub struct LocalFile {
    path: PathBuf,
    file: File,
}

impl LocalFile {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileResource for LocalFile {
    fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn read_at(
        &self,
        start: u64,
        end: u64,
    ) -> io::Result<Bytes> {
        let mut buf = vec![0u8; end.saturating_sub(start) as usize];
        read_exact_at(&self.file, &mut buf, start)?;
        Ok(Bytes::from(buf))
    }
}

#[cfg(unix)]
fn read_exact_at(
    file: &File,
    buf: &mut [u8],
    offset: u64,
) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(not(unix))]
fn read_exact_at(
    mut file: &File,
    buf: &mut [u8],
    offset: u64,
) -> io::Result<()> {
    use std::io::{Read, Seek, SeekFrom};
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)
}

/// An in-memory resource whose contents can be swapped or made to fail.
#[derive(Debug, Default)]
pub struct MemoryResource {
    data: RwLock<Bytes>,
    failing: AtomicBool,
    reads: AtomicU64,
}

impl MemoryResource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: RwLock::new(data.into()),
            ..Default::default()
        }
    }

    /// Replaces the contents, e.g. to simulate a file that grew or shrank.
    pub fn replace(
        &self,
        data: impl Into<Bytes>,
    ) {
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = data.into();
    }

    /// While set, every read fails with `PermissionDenied`.
    pub fn set_failing(
        &self,
        failing: bool,
    ) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `read_at` calls served so far, failed ones included.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

impl FileResource for MemoryResource {
    fn size(&self) -> io::Result<u64> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.len() as u64)
    }

    fn read_at(
        &self,
        start: u64,
        end: u64,
    ) -> io::Result<Bytes> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "read rejected by resource",
            ));
        }
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        if start > end || end > data.len() as u64 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("range {start}..{end} exceeds resource of {} bytes", data.len()),
            ));
        }
        Ok(data.slice(start as usize..end as usize))
    }
}
