use std::path::Path;

use ohdr_cache::{FlushMode, FlushTarget, MetadataCache};
use ohdr_store::{Backend, FileBackend, MemoryBackend};
use ohdr_types::Address;
use tracing::{debug, warn};

use crate::chunk::Chunk;
use crate::config::HeaderConfig;
use crate::error::HeaderResult;

/// An open store: the storage backend, the chunk cache over it, and the
/// configuration governing chunk allocation.
///
/// Every header operation takes the handle explicitly; there is no global
/// registry of open files.
#[derive(Debug)]
pub struct HeaderFile<B: Backend = MemoryBackend> {
    pub(crate) backend: B,
    pub(crate) cache: MetadataCache<Chunk>,
    pub(crate) config: HeaderConfig,
}

impl HeaderFile<MemoryBackend> {
    /// A store held entirely in memory.
    pub fn in_memory(config: HeaderConfig) -> HeaderResult<Self> {
        config.validate()?;
        let backend = MemoryBackend::with_limit(config.alignment, config.max_file_size);
        Self::with_backend(backend, config)
    }
}

impl HeaderFile<FileBackend> {
    /// Create (or truncate) a store file at `path`.
    pub fn create(path: impl AsRef<Path>, config: HeaderConfig) -> HeaderResult<Self> {
        config.validate()?;
        let backend = FileBackend::create(path.as_ref(), config.alignment, config.max_file_size)?;
        Self::with_backend(backend, config)
    }

    /// Open an existing store file. New chunks are allocated past its
    /// current end.
    pub fn open(path: impl AsRef<Path>, config: HeaderConfig) -> HeaderResult<Self> {
        config.validate()?;
        let backend = FileBackend::open(path.as_ref(), config.alignment, config.max_file_size)?;
        Self::with_backend(backend, config)
    }
}

impl<B: Backend> HeaderFile<B> {
    /// Wrap an arbitrary backend.
    pub fn with_backend(backend: B, config: HeaderConfig) -> HeaderResult<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            cache: MetadataCache::new(config.cache_capacity),
            config,
        })
    }

    pub fn config(&self) -> &HeaderConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Direct storage access. Writes here bypass the cache.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn cache(&self) -> &MetadataCache<Chunk> {
        &self.cache
    }

    /// Write every dirty chunk back to storage.
    pub fn flush(&mut self, mode: FlushMode) -> HeaderResult<()> {
        debug!(?mode, dirty = self.cache.dirty_count(), "flushing header cache");
        self.cache.flush(&mut self.backend, FlushTarget::All, mode)
    }

    /// Write back the chunks of one header.
    ///
    /// Every chunk is attempted; the first failure is returned.
    pub fn flush_header(&mut self, header: Address, mode: FlushMode) -> HeaderResult<()> {
        let chain = self.chain(header)?;
        let mut first_error = None;
        for address in chain {
            if let Err(e) = self
                .cache
                .flush(&mut self.backend, FlushTarget::Entry(address), mode)
            {
                warn!(%header, %address, error = %e, "header chunk flush failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Keep the first chunk of `header` resident across evicting flushes.
    pub fn pin_header(&mut self, header: Address) -> HeaderResult<()> {
        self.cache.get(&mut self.backend, header)?;
        self.cache.pin(header)?;
        Ok(())
    }

    pub fn unpin_header(&mut self, header: Address) -> HeaderResult<()> {
        self.cache.unpin(header)?;
        Ok(())
    }

    /// Flush everything and hand back the backend.
    pub fn close(mut self) -> HeaderResult<B> {
        self.flush(FlushMode::WriteAndEvict)?;
        Ok(self.backend)
    }
}
