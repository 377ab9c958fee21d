use ohdr_types::Address;

use crate::allocator::FreeListAllocator;
use crate::error::{StoreError, StoreResult};
use crate::traits::{BlockAllocator, Storage};

/// In-memory file image.
///
/// Intended for tests and embedding. The image grows on write; reads of
/// bytes past the written end fail with [`StoreError::OutOfBounds`].
pub struct MemoryBackend {
    image: Vec<u8>,
    allocator: FreeListAllocator,
    writes: u64,
}

impl MemoryBackend {
    /// Create an empty image with the given allocation granularity.
    pub fn new(granularity: u64) -> Self {
        Self::with_limit(granularity, None)
    }

    /// Create an empty image that refuses to grow past `limit` bytes.
    pub fn with_limit(granularity: u64, limit: Option<u64>) -> Self {
        Self {
            image: Vec::new(),
            allocator: FreeListAllocator::new(granularity, 0, limit),
            writes: 0,
        }
    }

    /// Number of bytes in the image.
    pub fn len(&self) -> usize {
        self.image.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.image.is_empty()
    }

    /// Number of successful `write_at` calls.
    pub fn write_count(&self) -> u64 {
        self.writes
    }

    /// The allocator's bookkeeping.
    pub fn allocator(&self) -> &FreeListAllocator {
        &self.allocator
    }

    /// The raw image bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.image
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(8)
    }
}

impl Storage for MemoryBackend {
    fn read_at(&mut self, address: Address, buf: &mut [u8]) -> StoreResult<()> {
        let start = address.get() as usize;
        let end = start.checked_add(buf.len());
        match end {
            Some(end) if !address.is_undef() && end <= self.image.len() => {
                buf.copy_from_slice(&self.image[start..end]);
                Ok(())
            }
            _ => Err(StoreError::OutOfBounds {
                address,
                len: buf.len() as u64,
                end: self.image.len() as u64,
            }),
        }
    }

    fn extent(&mut self) -> StoreResult<u64> {
        Ok(self.image.len() as u64)
    }

    fn write_at(&mut self, address: Address, data: &[u8]) -> StoreResult<()> {
        if address.is_undef() {
            return Err(StoreError::OutOfBounds {
                address,
                len: data.len() as u64,
                end: self.image.len() as u64,
            });
        }
        let start = address.get() as usize;
        let end = start + data.len();
        if end > self.image.len() {
            self.image.resize(end, 0);
        }
        self.image[start..end].copy_from_slice(data);
        self.writes += 1;
        Ok(())
    }
}

impl BlockAllocator for MemoryBackend {
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

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("image_len", &self.image.len())
            .field("allocated_end", &self.allocator.end())
            .finish()
    }
}
