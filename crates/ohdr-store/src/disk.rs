use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ohdr_types::Address;
use tracing::debug;

use crate::allocator::FreeListAllocator;
use crate::error::{StoreError, StoreResult};
use crate::traits::{BlockAllocator, Storage};

/// File-backed storage.
///
/// The allocator's bookkeeping lives only in memory: reopening a file starts
/// allocating at its current length, so regions freed in an earlier session
/// are not reused.
pub struct FileBackend {
    path: PathBuf,
    file: File,
    allocator: FreeListAllocator,
}

impl FileBackend {
    /// Create (or truncate) a file at `path`.
    pub fn create(path: &Path, granularity: u64, limit: Option<u64>) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        debug!(path = %path.display(), "created backing file");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            allocator: FreeListAllocator::new(granularity, 0, limit),
        })
    }

    /// Open an existing file at `path`.
    pub fn open(path: &Path, granularity: u64, limit: Option<u64>) -> StoreResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let g = granularity.max(1);
        let base = len.div_ceil(g) * g;
        debug!(path = %path.display(), len, "opened backing file");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            allocator: FreeListAllocator::new(granularity, base, limit),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current length of the backing file.
    pub fn len(&self) -> StoreResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Returns `true` if the backing file is empty.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl Storage for FileBackend {
    fn read_at(&mut self, address: Address, buf: &mut [u8]) -> StoreResult<()> {
        let len = buf.len() as u64;
        let out_of_bounds = |end: u64| StoreError::OutOfBounds { address, len, end };
        if address.is_undef() {
            return Err(out_of_bounds(self.len()?));
        }
        self.file.seek(SeekFrom::Start(address.get()))?;
        match self.file.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(out_of_bounds(self.len()?)),
            Err(e) => Err(e.into()),
        }
    }

    fn write_at(&mut self, address: Address, data: &[u8]) -> StoreResult<()> {
        if address.is_undef() {
            return Err(StoreError::OutOfBounds {
                address,
                len: data.len() as u64,
                end: self.len()?,
            });
        }
        self.file.seek(SeekFrom::Start(address.get()))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn extent(&mut self) -> StoreResult<u64> {
        self.len()
    }

    fn sync(&mut self) -> StoreResult<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl BlockAllocator for FileBackend {
    fn granularity(&self) -> u64 {
        self.allocator.granularity()
    }

    fn allocate(&mut self, min_size: u64) -> StoreResult<Address> {
        self.allocator.allocate(min_size)
    }

    fn free(&mut self, address: Address, size: u64) -> StoreResult<()> {
        self.allocator.free(address, size)
    }
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("path", &self.path)
            .field("allocated_end", &self.allocator.end())
            .finish()
    }
}
