//! The [`MetadataCache`] itself.
//!
//! Entries live in a `HashMap<Address, CacheEntry<T>>`. Keying strictly on
//! address is what enforces the single-representation rule: there is no
//! other identity under which a second decode could be stored.

use std::collections::HashMap;

use ohdr_store::Storage;
use ohdr_types::Address;
use tracing::{debug, warn};

use crate::entry::{CacheEntry, Cacheable};
use crate::error::{CacheError, CacheResult};

/// What to do with an entry once it has been written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushMode {
    /// Write dirty entries and keep them resident.
    WriteOnly,
    /// Write dirty entries, then drop every unpinned flushed entry so the
    /// next access reloads from storage.
    WriteAndEvict,
}

/// Which entries a flush covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushTarget {
    /// Every resident entry.
    All,
    /// A single address. Flushing a non-resident address is a no-op.
    Entry(Address),
}

/// Counters describing cache traffic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub writes: u64,
    pub evictions: u64,
}

/// Write-back cache of decoded on-disk structures.
pub struct MetadataCache<T: Cacheable> {
    entries: HashMap<Address, CacheEntry<T>>,
    capacity: Option<usize>,
    tick: u64,
    stats: CacheStats,
}

impl<T: Cacheable> MetadataCache<T> {
    /// Create an empty cache. With `capacity`, clean unpinned entries are
    /// evicted to stay within that many resident entries.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            tick: 0,
            stats: CacheStats::default(),
        }
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is resident.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if `address` is resident.
    pub fn contains(&self, address: Address) -> bool {
        self.entries.contains_key(&address)
    }

    /// Dirty state of a resident entry, `None` if not resident.
    pub fn is_dirty(&self, address: Address) -> Option<bool> {
        self.entries.get(&address).map(CacheEntry::is_dirty)
    }

    /// Number of resident dirty entries.
    pub fn dirty_count(&self) -> usize {
        self.entries.values().filter(|e| e.dirty).count()
    }

    /// The resident entry at `address`, without loading.
    pub fn peek(&self, address: Address) -> Option<&CacheEntry<T>> {
        self.entries.get(&address)
    }

    /// Traffic counters.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    // ---------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------

    /// Get the entry at `address`, loading and decoding it on a miss.
    pub fn get<S>(&mut self, storage: &mut S, address: Address) -> Result<&T, T::Error>
    where
        S: Storage + ?Sized,
    {
        self.ensure_loaded(storage, address)?;
        self.entries
            .get(&address)
            .map(|e| &e.content)
            .ok_or_else(|| CacheError::NotCached(address).into())
    }

    /// Mutable access to the entry at `address`, loading it on a miss.
    ///
    /// Does not mark the entry dirty; call [`mark_dirty`](Self::mark_dirty)
    /// or use [`modify`](Self::modify).
    pub fn get_mut<S>(&mut self, storage: &mut S, address: Address) -> Result<&mut T, T::Error>
    where
        S: Storage + ?Sized,
    {
        self.ensure_loaded(storage, address)?;
        self.entries
            .get_mut(&address)
            .map(|e| &mut e.content)
            .ok_or_else(|| CacheError::NotCached(address).into())
    }

    /// Apply `f` to the entry at `address` and mark it dirty.
    pub fn modify<S, R>(
        &mut self,
        storage: &mut S,
        address: Address,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, T::Error>
    where
        S: Storage + ?Sized,
    {
        self.ensure_loaded(storage, address)?;
        let entry = self
            .entries
            .get_mut(&address)
            .ok_or(CacheError::NotCached(address))?;
        entry.dirty = true;
        Ok(f(&mut entry.content))
    }

    /// Mark a resident entry dirty.
    pub fn mark_dirty(&mut self, address: Address) -> CacheResult<()> {
        let entry = self
            .entries
            .get_mut(&address)
            .ok_or(CacheError::NotCached(address))?;
        entry.dirty = true;
        Ok(())
    }

    /// Register a freshly created structure. It starts dirty since storage
    /// has never seen it.
    pub fn insert(&mut self, address: Address, content: T) -> CacheResult<()> {
        if self.entries.contains_key(&address) {
            return Err(CacheError::AlreadyCached(address));
        }
        self.make_room(address);
        self.tick += 1;
        self.entries
            .insert(address, CacheEntry::new(content, true, self.tick));
        debug!(%address, "inserted new cache entry");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Pinning and removal
    // ---------------------------------------------------------------

    /// Pin a resident entry against eviction.
    pub fn pin(&mut self, address: Address) -> CacheResult<()> {
        let entry = self
            .entries
            .get_mut(&address)
            .ok_or(CacheError::NotCached(address))?;
        entry.pin_count += 1;
        Ok(())
    }

    /// Release one pin.
    pub fn unpin(&mut self, address: Address) -> CacheResult<()> {
        let entry = self
            .entries
            .get_mut(&address)
            .ok_or(CacheError::NotCached(address))?;
        entry.pin_count = entry.pin_count.saturating_sub(1);
        Ok(())
    }

    /// Drop an entry without writing it, returning its content.
    ///
    /// Used when the underlying region is being released to the allocator.
    pub fn discard(&mut self, address: Address) -> CacheResult<Option<T>> {
        match self.entries.get(&address) {
            None => Ok(None),
            Some(e) if e.pin_count > 0 => Err(CacheError::Pinned(address)),
            Some(_) => {
                debug!(%address, "discarded cache entry");
                Ok(self.entries.remove(&address).map(|e| e.content))
            }
        }
    }

    // ---------------------------------------------------------------
    // Flush
    // ---------------------------------------------------------------

    /// Write dirty entries back to storage.
    ///
    /// Every targeted entry is attempted. The first failure is returned after
    /// the rest have been tried; failed entries keep their dirty bit.
    pub fn flush<S>(&mut self, storage: &mut S, target: FlushTarget, mode: FlushMode) -> Result<(), T::Error>
    where
        S: Storage + ?Sized,
    {
        let mut addresses: Vec<Address> = match target {
            FlushTarget::All => self.entries.keys().copied().collect(),
            FlushTarget::Entry(address) if self.entries.contains_key(&address) => vec![address],
            FlushTarget::Entry(_) => Vec::new(),
        };
        addresses.sort();

        let mut first_error = None;
        let mut wrote = false;
        for address in addresses {
            match self.flush_one(storage, address, mode) {
                Ok(w) => wrote |= w,
                Err(e) => {
                    warn!(%address, "flush of cache entry failed; entry left dirty");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if wrote {
            storage.sync().map_err(CacheError::from)?;
        }
        Ok(())
    }

    fn flush_one<S>(&mut self, storage: &mut S, address: Address, mode: FlushMode) -> Result<bool, T::Error>
    where
        S: Storage + ?Sized,
    {
        let Some(entry) = self.entries.get_mut(&address) else {
            return Ok(false);
        };

        let wrote = if entry.dirty {
            let image = entry.content.encode()?;
            storage.write_at(address, &image).map_err(CacheError::from)?;
            entry.dirty = false;
            self.stats.writes += 1;
            debug!(%address, len = image.len(), "flushed cache entry");
            true
        } else {
            false
        };

        if mode == FlushMode::WriteAndEvict {
            if entry.pin_count > 0 {
                debug!(%address, pins = entry.pin_count, "pinned entry kept resident");
            } else {
                self.entries.remove(&address);
                self.stats.evictions += 1;
            }
        }
        Ok(wrote)
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn ensure_loaded<S>(&mut self, storage: &mut S, address: Address) -> Result<(), T::Error>
    where
        S: Storage + ?Sized,
    {
        self.tick += 1;
        if let Some(entry) = self.entries.get_mut(&address) {
            entry.last_access = self.tick;
            self.stats.hits += 1;
            return Ok(());
        }
        self.stats.misses += 1;

        let probe = storage
            .read_bytes(address, T::PROBE_LEN)
            .map_err(CacheError::from)?;
        let len = T::image_len(address, &probe)?;
        let end = storage.extent().map_err(CacheError::from)?;
        if address.get().saturating_add(len as u64) > end {
            return Err(CacheError::ImageOverrun {
                address,
                len: len as u64,
                end,
            }
            .into());
        }
        let image = storage.read_bytes(address, len).map_err(CacheError::from)?;
        let content = T::decode(address, &image)?;

        self.make_room(address);
        self.entries
            .insert(address, CacheEntry::new(content, false, self.tick));
        self.stats.loads += 1;
        debug!(%address, len, "loaded cache entry");
        Ok(())
    }

    /// Evict least-recently-used clean, unpinned entries until there is room
    /// for one more. Dirty entries are never dropped here.
    fn make_room(&mut self, incoming: Address) {
        let Some(capacity) = self.capacity else {
            return;
        };
        while self.entries.len() >= capacity.max(1) {
            let victim = self
                .entries
                .iter()
                .filter(|(a, e)| **a != incoming && !e.dirty && e.pin_count == 0)
                .min_by_key(|(_, e)| e.last_access)
                .map(|(a, _)| *a);
            match victim {
                Some(address) => {
                    self.entries.remove(&address);
                    self.stats.evictions += 1;
                    debug!(%address, "evicted clean cache entry");
                }
                None => {
                    debug!(resident = self.entries.len(), capacity, "cache over capacity; nothing evictable");
                    return;
                }
            }
        }
    }
}

impl<T: Cacheable> std::fmt::Debug for MetadataCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("resident", &self.entries.len())
            .field("dirty", &self.dirty_count())
            .field("capacity", &self.capacity)
            .field("stats", &self.stats)
            .finish()
    }
}
