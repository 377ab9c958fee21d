use ohdr_store::StoreError;
use ohdr_types::Address;

/// Errors from metadata cache bookkeeping.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Storage failure while loading or flushing an entry.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// The image length read from the entry's prefix runs past the end of
    /// storage.
    #[error("image of {len} bytes at {address} runs past end of storage ({end})")]
    ImageOverrun { address: Address, len: u64, end: u64 },

    /// An entry for this address is already resident.
    #[error("address {0} is already cached")]
    AlreadyCached(Address),

    /// No entry for this address is resident.
    #[error("address {0} is not cached")]
    NotCached(Address),

    /// The entry is pinned and cannot be dropped.
    #[error("address {0} is pinned")]
    Pinned(Address),
}

/// Result alias for cache bookkeeping.
pub type CacheResult<T> = Result<T, CacheError>;
