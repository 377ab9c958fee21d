use ohdr_cache::CacheError;
use ohdr_store::StoreError;
use ohdr_types::Address;

use crate::message::MessageType;

/// Errors from object header operations.
///
/// Chunk overflow never appears here: it is always resolved by linking a new
/// chunk. `UnknownMessageType` and `Corrupt` are fatal to the operation on
/// the affected header only; other headers in the file stay usable.
#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    /// No live message of this type exists at this index.
    #[error("no {kind} message at index {index}")]
    NotFound { kind: MessageType, index: usize },

    /// An update was requested but the header holds no message of the type.
    #[error("header has no existing {0} message to update")]
    NoExistingMessage(MessageType),

    /// A second instance of a single-instance message type was requested.
    #[error("{0} message already exists and allows a single instance")]
    DuplicateMessage(MessageType),

    /// The targeted message is flagged constant.
    #[error("{kind} message at index {index} is constant")]
    ConstantMessage { kind: MessageType, index: usize },

    /// A record carries a type tag the codec registry does not know.
    #[error("unknown message type tag {0:#06x}")]
    UnknownMessageType(u16),

    /// Chunk framing or the continuation chain is broken.
    #[error("corrupt chunk at {address}: {reason}")]
    Corrupt { address: Address, reason: String },

    /// The encoded message exceeds the configured ceiling.
    #[error("message of {size} bytes exceeds limit of {limit}")]
    MessageTooLarge { size: u64, limit: u32 },

    /// The block allocator could not provide a region.
    #[error("allocation failed: {0}")]
    AllocationFailure(StoreError),

    /// Storage read or write failure.
    #[error("I/O error: {0}")]
    Io(StoreError),

    /// A message body could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Configuration rejected by validation or parsing.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Metadata cache bookkeeping failure.
    #[error("cache error: {0}")]
    Cache(CacheError),
}

impl From<StoreError> for HeaderError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::OutOfSpace { .. } => Self::AllocationFailure(e),
            other => Self::Io(other),
        }
    }
}

impl From<CacheError> for HeaderError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Store(store) => store.into(),
            CacheError::ImageOverrun { address, len, end } => Self::Corrupt {
                address,
                reason: format!("chunk image of {len} bytes runs past end of file ({end})"),
            },
            other => Self::Cache(other),
        }
    }
}

/// Result alias for header operations.
pub type HeaderResult<T> = Result<T, HeaderError>;
