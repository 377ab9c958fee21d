use ohdr_types::Address;

/// Errors from allocation and raw storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error from the underlying file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The allocator cannot satisfy the request without exceeding its limit.
    #[error("out of space: requested {requested} bytes at end {end}, limit {limit}")]
    OutOfSpace { requested: u64, end: u64, limit: u64 },

    /// A read touched bytes that were never written.
    #[error("read of {len} bytes at {address} is beyond end of storage ({end})")]
    OutOfBounds { address: Address, len: u64, end: u64 },

    /// A free did not match an allocated region.
    #[error("invalid free of {size} bytes at {address}: {reason}")]
    InvalidFree {
        address: Address,
        size: u64,
        reason: String,
    },
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
