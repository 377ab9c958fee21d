use ohdr_types::Address;

use crate::error::CacheError;

/// An on-disk structure the metadata cache can load, hold and write back.
///
/// Loading is two-phase: the cache first reads [`PROBE_LEN`](Self::PROBE_LEN)
/// bytes at the entry's address, asks [`image_len`](Self::image_len) how long
/// the full image is, then reads the full image and hands it to
/// [`decode`](Self::decode).
pub trait Cacheable: Sized {
    /// Error type for decode/encode failures. Cache and storage failures
    /// convert into it.
    type Error: From<CacheError>;

    /// Number of leading bytes needed to learn the image length.
    const PROBE_LEN: usize;

    /// Total on-disk length of the image whose leading bytes are `probe`.
    fn image_len(address: Address, probe: &[u8]) -> Result<usize, Self::Error>;

    /// Decode a full on-disk image.
    fn decode(address: Address, image: &[u8]) -> Result<Self, Self::Error>;

    /// Serialize the current in-memory state to its on-disk image.
    fn encode(&self) -> Result<Vec<u8>, Self::Error>;
}

/// A resident cache entry.
#[derive(Debug)]
pub struct CacheEntry<T> {
    pub(crate) content: T,
    pub(crate) dirty: bool,
    pub(crate) pin_count: u32,
    pub(crate) last_access: u64,
}

impl<T> CacheEntry<T> {
    pub(crate) fn new(content: T, dirty: bool, tick: u64) -> Self {
        Self {
            content,
            dirty,
            pin_count: 0,
            last_access: tick,
        }
    }

    /// The decoded content.
    pub fn content(&self) -> &T {
        &self.content
    }

    /// Whether the in-memory content differs from storage.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Outstanding pins. Pinned entries are never evicted.
    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }
}
