use serde::{Deserialize, Serialize};

use crate::chunk::MIN_CHUNK_CAPACITY;
use crate::error::{HeaderError, HeaderResult};

/// Largest accepted `max_message_size`. Chunk sizing adds record overhead to
/// a message size in `u32`, so the ceiling leaves headroom for it.
pub const MESSAGE_SIZE_CEILING: u32 = 1 << 30;

/// Tuning for chunk allocation, message limits and the metadata cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderConfig {
    /// Smallest record capacity given to an overflow chunk.
    pub min_chunk_size: u32,
    /// Allocator granularity; chunk regions round up to a multiple of it.
    pub alignment: u64,
    /// Ceiling on a single message's encoded body size.
    pub max_message_size: u32,
    /// Bound on resident cache entries. Only clean, unpinned entries are
    /// evicted to honour it.
    pub cache_capacity: Option<usize>,
    /// Refuse to grow the file past this many bytes.
    pub max_file_size: Option<u64>,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            min_chunk_size: 256,
            alignment: 8,
            max_message_size: 64 * 1024,
            cache_capacity: None,
            max_file_size: None,
        }
    }
}

impl HeaderConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> HeaderResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| HeaderError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the chunk manager cannot work with.
    pub fn validate(&self) -> HeaderResult<()> {
        if self.alignment == 0 {
            return Err(HeaderError::Config("alignment must be non-zero".into()));
        }
        if self.min_chunk_size < MIN_CHUNK_CAPACITY {
            return Err(HeaderError::Config(format!(
                "min_chunk_size {} is below the minimum of {MIN_CHUNK_CAPACITY}",
                self.min_chunk_size
            )));
        }
        if self.max_message_size == 0 {
            return Err(HeaderError::Config("max_message_size must be non-zero".into()));
        }
        if self.max_message_size > MESSAGE_SIZE_CEILING {
            return Err(HeaderError::Config(format!(
                "max_message_size {} is above the ceiling of {MESSAGE_SIZE_CEILING}",
                self.max_message_size
            )));
        }
        if self.cache_capacity == Some(0) {
            return Err(HeaderError::Config("cache_capacity must be non-zero".into()));
        }
        Ok(())
    }
}
