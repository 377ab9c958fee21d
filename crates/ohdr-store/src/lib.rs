//! Block allocation and raw storage for a single-file object header store.
//!
//! The object header core never chooses physical layout. It asks a
//! [`BlockAllocator`] for a region of at least some size, honours whatever
//! address comes back, and moves bytes in and out through [`Storage`].
//!
//! # Backends
//!
//! All backends implement both traits (and therefore [`Backend`]):
//!
//! - [`MemoryBackend`] -- `Vec<u8>`-backed file image for tests and embedding
//! - [`FileBackend`] -- a real file on disk
//!
//! Both share the [`FreeListAllocator`] for address bookkeeping.
//!
//! # Design Rules
//!
//! 1. Allocation sizes are rounded up to the allocator's granularity.
//! 2. Freed regions are coalesced with their neighbours.
//! 3. All I/O errors are propagated, never retried or silently ignored.

pub mod allocator;
pub mod disk;
pub mod error;
pub mod memory;
pub mod traits;

pub use allocator::FreeListAllocator;
pub use disk::FileBackend;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryBackend;
pub use traits::{Backend, BlockAllocator, Storage};
