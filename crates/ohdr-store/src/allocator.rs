use std::collections::BTreeMap;

use ohdr_types::Address;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::BlockAllocator;

/// First-fit free-list allocator over a linear address space.
///
/// New space is carved from the end of the file; freed regions are kept in
/// an ordered map keyed by start offset and merged with adjacent free
/// regions. A freed region that touches the end shrinks the end instead.
#[derive(Clone, Debug)]
pub struct FreeListAllocator {
    granularity: u64,
    end: u64,
    limit: Option<u64>,
    /// start -> length
    free: BTreeMap<u64, u64>,
}

impl FreeListAllocator {
    /// Create an allocator whose first region starts at `base`.
    pub fn new(granularity: u64, base: u64, limit: Option<u64>) -> Self {
        Self {
            granularity: granularity.max(1),
            end: base,
            limit,
            free: BTreeMap::new(),
        }
    }

    /// One past the highest allocated byte.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Total bytes sitting in the free list.
    pub fn free_bytes(&self) -> u64 {
        self.free.values().sum()
    }

    /// Number of distinct free regions.
    pub fn free_regions(&self) -> usize {
        self.free.len()
    }

    fn take_free(&mut self, size: u64) -> Option<u64> {
        let (&start, &len) = self.free.iter().find(|&(_, &len)| len >= size)?;
        self.free.remove(&start);
        if len > size {
            self.free.insert(start + size, len - size);
        }
        Some(start)
    }
}

impl BlockAllocator for FreeListAllocator {
    fn granularity(&self) -> u64 {
        self.granularity
    }

    fn allocate(&mut self, min_size: u64) -> StoreResult<Address> {
        let size = self.round_up(min_size);

        if let Some(start) = self.take_free(size) {
            debug!(address = start, size, "allocated from free list");
            return Ok(Address::new(start));
        }

        let new_end = self.end.checked_add(size).ok_or(StoreError::OutOfSpace {
            requested: size,
            end: self.end,
            limit: u64::MAX,
        })?;
        if let Some(limit) = self.limit {
            if new_end > limit {
                return Err(StoreError::OutOfSpace {
                    requested: size,
                    end: self.end,
                    limit,
                });
            }
        }
        let start = self.end;
        self.end = new_end;
        debug!(address = start, size, "allocated at end of file");
        Ok(Address::new(start))
    }

    fn free(&mut self, address: Address, size: u64) -> StoreResult<()> {
        let size = self.round_up(size);
        let mut start = address.get();
        let invalid = |reason: &str| StoreError::InvalidFree {
            address,
            size,
            reason: reason.to_string(),
        };

        if address.is_undef() || start.checked_add(size).map_or(true, |e| e > self.end) {
            return Err(invalid("region extends past end of file"));
        }
        let mut len = size;

        if let Some((&prev, &prev_len)) = self.free.range(..=start).next_back() {
            if prev + prev_len > start {
                return Err(invalid("overlaps a free region"));
            }
            if prev + prev_len == start {
                self.free.remove(&prev);
                start = prev;
                len += prev_len;
            }
        }
        if let Some((&next, &next_len)) = self.free.range(start + 1..).next() {
            if start + len > next {
                return Err(invalid("overlaps a free region"));
            }
            if start + len == next {
                self.free.remove(&next);
                len += next_len;
            }
        }

        if start + len == self.end {
            self.end = start;
        } else {
            self.free.insert(start, len);
        }
        debug!(address = %address, size, "freed region");
        Ok(())
    }
}
