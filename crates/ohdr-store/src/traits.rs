use ohdr_types::Address;

use crate::error::StoreResult;

/// Raw positional byte storage.
///
/// Implementations must satisfy these invariants:
/// - A successful `write_at` is visible to every later `read_at` of the
///   same range.
/// - Reads of never-written ranges fail rather than fabricate bytes.
/// - All I/O errors are propagated, never silently ignored.
pub trait Storage {
    /// Fill `buf` with the bytes stored at `address`.
    fn read_at(&mut self, address: Address, buf: &mut [u8]) -> StoreResult<()>;

    /// Write `data` at `address`, extending the storage if needed.
    fn write_at(&mut self, address: Address, data: &[u8]) -> StoreResult<()>;

    /// One past the last byte ever written.
    fn extent(&mut self) -> StoreResult<u64>;

    /// Make previous writes durable. Backends without durability no-op.
    fn sync(&mut self) -> StoreResult<()> {
        Ok(())
    }

    /// Read `len` bytes at `address` into a fresh buffer.
    fn read_bytes(&mut self, address: Address, len: usize) -> StoreResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_at(address, &mut buf)?;
        Ok(buf)
    }
}

/// Hands out and reclaims regions of the file address space.
pub trait BlockAllocator {
    /// Allocation granularity in bytes. Every granted region is a multiple.
    fn granularity(&self) -> u64;

    /// Allocate a region of at least `min_size` bytes.
    fn allocate(&mut self, min_size: u64) -> StoreResult<Address>;

    /// Return a region previously obtained from [`allocate`](Self::allocate).
    fn free(&mut self, address: Address, size: u64) -> StoreResult<()>;

    /// `size` rounded up to the allocation granularity.
    fn round_up(&self, size: u64) -> u64 {
        let g = self.granularity().max(1);
        size.max(1).div_ceil(g) * g
    }
}

/// A complete file backend: storage plus address-space management.
pub trait Backend: Storage + BlockAllocator {}

impl<T: Storage + BlockAllocator> Backend for T {}
