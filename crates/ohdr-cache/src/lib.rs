//! Address-keyed write-back metadata cache.
//!
//! The cache holds decoded on-disk structures ([`Cacheable`] entries) keyed
//! strictly by their file [`Address`](ohdr_types::Address). It is the single
//! point of truth for those structures while they are in memory: two call
//! sites asking for the same address always observe the same value, and
//! modifications stay in memory until an explicit [`MetadataCache::flush`].
//!
//! # Design Rules
//!
//! 1. At most one decoded representation per address.
//! 2. Loads happen on miss; writes happen only on flush.
//! 3. A failed write leaves the entry dirty so the flush can be retried.
//! 4. Callers never hold a reference across operations; they re-request.

pub mod cache;
pub mod entry;
pub mod error;

pub use cache::{CacheStats, FlushMode, FlushTarget, MetadataCache};
pub use entry::{CacheEntry, Cacheable};
pub use error::{CacheError, CacheResult};
