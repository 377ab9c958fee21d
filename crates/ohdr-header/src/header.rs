//! Object header operations: create, modify, read, remove.
//!
//! Chunks are always fetched through the metadata cache by address and no
//! reference outlives the call that obtained it. The chain is re-walked on
//! every operation, so a chunk evicted by a flush is simply reloaded.

use std::collections::HashSet;

use ohdr_store::Backend;
use ohdr_types::Address;
use tracing::debug;

use crate::chunk::{
    Chunk, SlotDecision, SlotRequest, UpdateOutcome, CHUNK_PREFIX_LEN, CONTINUATION_RECORD_LEN,
    MIN_CHUNK_CAPACITY, RECORD_HEADER_LEN,
};
use crate::codec;
use crate::error::{HeaderError, HeaderResult};
use crate::file::HeaderFile;
use crate::message::{Continuation, Message, MessageBody, MessageFlags, MessageType};
use crate::shadow::EntryShadow;

/// Which instance of a message type `modify` targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sequence {
    /// Create a new instance.
    New,
    /// Update the existing instance at this sequence index.
    Index(usize),
}

/// Which instances `remove` deletes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selection {
    All,
    Index(usize),
}

/// A placement decision resolved across the chunk chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placement {
    /// The chunk the decision applies to. For `NeedsOverflow` this is the
    /// tail chunk that will be linked onward.
    pub chunk: Address,
    pub decision: SlotDecision,
}

/// Outcome of a successful `modify`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Modified {
    /// Sequence index of the written message.
    pub index: usize,
    /// Whether the supplied shadow was overwritten with the new content.
    pub shadow_updated: bool,
}

impl<B: Backend> HeaderFile<B> {
    /// Allocate the first chunk of a new header with at least `size_hint`
    /// bytes of record space. Returns the header address.
    pub fn create_header(&mut self, size_hint: u32) -> HeaderResult<Address> {
        let chunk = self.allocate_chunk(size_hint.max(MIN_CHUNK_CAPACITY))?;
        let address = chunk.address();
        let capacity = chunk.capacity();
        self.cache.insert(address, chunk)?;
        debug!(header = %address, capacity, "created object header");
        Ok(address)
    }

    /// Decide where a `size`-byte message of `kind` goes.
    ///
    /// Updates resolve to the chunk holding the targeted instance. New
    /// instances take the first fitting deleted slot of the same type that
    /// lies after every live instance, and otherwise append to the tail
    /// chunk. Either way the new instance gets the next sequence index.
    pub fn find_slot(
        &mut self,
        header: Address,
        kind: MessageType,
        size: u32,
        sequence: Sequence,
    ) -> HeaderResult<Placement> {
        match sequence {
            Sequence::Index(index) => {
                let (chunk, local) = self.locate_local(header, kind, index)?;
                let decision = self.cache.get(&mut self.backend, chunk)?.find_slot(
                    kind,
                    size,
                    SlotRequest::Existing(local),
                )?;
                Ok(Placement { chunk, decision })
            }
            Sequence::New => {
                let chain = self.chain(header)?;
                if !kind.allows_multiple() && self.count_in(&chain, kind)? > 0 {
                    return Err(HeaderError::DuplicateMessage(kind));
                }
                // Chunks before the last one holding a live instance have no
                // slot that keeps creation order.
                let mut first_candidate = 0;
                for (pos, &address) in chain.iter().enumerate() {
                    if self.cache.get(&mut self.backend, address)?.live_count(kind) > 0 {
                        first_candidate = pos;
                    }
                }
                let mut tail = Placement {
                    chunk: header,
                    decision: SlotDecision::NeedsOverflow,
                };
                for &address in &chain[first_candidate..] {
                    let decision = self.cache.get(&mut self.backend, address)?.find_slot(
                        kind,
                        size,
                        SlotRequest::New,
                    )?;
                    if let SlotDecision::DeletedSlotReuse(_) = decision {
                        return Ok(Placement {
                            chunk: address,
                            decision,
                        });
                    }
                    tail = Placement {
                        chunk: address,
                        decision,
                    };
                }
                Ok(tail)
            }
        }
    }

    /// Create or update a message.
    ///
    /// With [`Sequence::New`] a new instance is created; single-instance
    /// types that already exist are refused. With [`Sequence::Index`] the
    /// existing instance is overwritten in place and keeps its index. When
    /// `shadow` is supplied and models the message type it is overwritten
    /// with the written content.
    pub fn modify(
        &mut self,
        header: Address,
        shadow: Option<&mut EntryShadow>,
        sequence: Sequence,
        flags: MessageFlags,
        msg: &Message,
    ) -> HeaderResult<Modified> {
        let kind = msg.kind();
        let size = codec::size_of(msg)?;
        if size > self.config.max_message_size {
            return Err(HeaderError::MessageTooLarge {
                size: u64::from(size),
                limit: self.config.max_message_size,
            });
        }

        let placement = self.find_slot(header, kind, size, sequence)?;
        let (chunk, slot) = match placement.decision {
            SlotDecision::UpdateExisting(slot) => {
                self.update_existing(header, placement.chunk, slot, sequence, flags, msg, size)?
            }
            SlotDecision::DeletedSlotReuse(slot) => {
                self.cache.modify(&mut self.backend, placement.chunk, |c| {
                    c.reuse(slot, msg.clone(), flags)
                })??;
                (placement.chunk, slot)
            }
            SlotDecision::AppendNew => (
                placement.chunk,
                self.append_to(placement.chunk, msg, flags, size)?,
            ),
            SlotDecision::NeedsOverflow => {
                let overflow = self.link_overflow(placement.chunk, size)?;
                (overflow, self.append_to(overflow, msg, flags, size)?)
            }
        };

        let index = self.ordinal_of(header, kind, chunk, slot)?;
        let shadow_updated = match shadow {
            Some(shadow) => shadow.store(header, msg, index),
            None => false,
        };
        debug!(%header, %kind, index, chunk = %chunk, decision = ?placement.decision, "modified header message");
        Ok(Modified {
            index,
            shadow_updated,
        })
    }

    /// Read the `index`-th live message of `kind`.
    ///
    /// A shadow that mirrors instance 0 of `kind` on this header answers the
    /// read without touching the cache.
    pub fn read(
        &mut self,
        header: Address,
        shadow: Option<&EntryShadow>,
        kind: MessageType,
        index: usize,
    ) -> HeaderResult<Message> {
        if let Some(msg) = shadow.and_then(|s| s.lookup(header, kind, index)) {
            debug!(%header, %kind, "read served from entry shadow");
            return Ok(msg);
        }
        if kind.is_internal() {
            return Err(HeaderError::NotFound { kind, index });
        }

        let (chunk, slot) = self.locate(header, kind, index).map_err(|e| match e {
            HeaderError::NoExistingMessage(kind) => HeaderError::NotFound { kind, index },
            other => other,
        })?;
        let msg = self
            .cache
            .get_mut(&mut self.backend, chunk)?
            .message_mut(slot)?
            .payload()?
            .clone();
        Ok(msg)
    }

    /// Typed [`read`](Self::read).
    pub fn read_as<T: MessageBody>(
        &mut self,
        header: Address,
        shadow: Option<&EntryShadow>,
        index: usize,
    ) -> HeaderResult<T> {
        let msg = self.read(header, shadow, T::TYPE, index)?;
        T::from_message(msg)
            .ok_or_else(|| HeaderError::Codec(format!("{} read returned another type", T::TYPE)))
    }

    /// Delete messages of `kind`. Returns how many were deleted; absent
    /// messages are not an error.
    ///
    /// Non-first chunks left without live messages are released to the
    /// allocator. A shadow caching `kind` is cleared.
    pub fn remove(
        &mut self,
        header: Address,
        shadow: Option<&mut EntryShadow>,
        kind: MessageType,
        selection: Selection,
    ) -> HeaderResult<usize> {
        let chain = self.chain(header)?;
        let mut removed = 0;
        match selection {
            Selection::All => {
                for &address in &chain {
                    if self.cache.get(&mut self.backend, address)?.live_count(kind) > 0 {
                        removed += self
                            .cache
                            .modify(&mut self.backend, address, |c| c.delete_all(kind))?;
                    }
                }
            }
            Selection::Index(index) => match self.locate(header, kind, index) {
                Ok((address, slot)) => {
                    if self
                        .cache
                        .modify(&mut self.backend, address, |c| c.delete_slot(slot))?
                    {
                        removed = 1;
                    }
                }
                Err(HeaderError::NotFound { .. } | HeaderError::NoExistingMessage(_)) => {}
                Err(e) => return Err(e),
            },
        }

        if removed > 0 {
            self.release_empty_chunks(&chain)?;
            if let Some(shadow) = shadow {
                if shadow.cached_type() == Some(kind) {
                    shadow.clear();
                }
            }
        }
        debug!(%header, %kind, removed, "removed header messages");
        Ok(removed)
    }

    /// Release every chunk of `header` and drop them from the cache.
    pub fn delete_header(&mut self, header: Address) -> HeaderResult<()> {
        let mut regions = Vec::new();
        for address in self.chain(header)? {
            regions.push((address, self.cache.get(&mut self.backend, address)?.region_len()));
        }
        for (address, len) in regions {
            self.cache.discard(address)?;
            self.backend.free(address, len)?;
        }
        debug!(%header, "deleted object header");
        Ok(())
    }

    /// Live messages of `kind` across the whole header.
    pub fn message_count(&mut self, header: Address, kind: MessageType) -> HeaderResult<usize> {
        let chain = self.chain(header)?;
        self.count_in(&chain, kind)
    }

    /// Chunk addresses in chain order, the header address first.
    pub fn chunk_addresses(&mut self, header: Address) -> HeaderResult<Vec<Address>> {
        self.chain(header)
    }

    // ---------------------------------------------------------------
    // Chain walking
    // ---------------------------------------------------------------

    /// Follow continuations from the first chunk.
    pub(crate) fn chain(&mut self, header: Address) -> HeaderResult<Vec<Address>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some((header, None));
        while let Some((address, expected_len)) = next {
            if !seen.insert(address) {
                return Err(HeaderError::Corrupt {
                    address,
                    reason: "continuation chain loops".into(),
                });
            }
            let chunk = self.cache.get(&mut self.backend, address)?;
            if let Some(expected) = expected_len {
                if chunk.region_len() != expected {
                    return Err(HeaderError::Corrupt {
                        address,
                        reason: format!(
                            "continuation declares {expected} bytes, chunk spans {}",
                            chunk.region_len()
                        ),
                    });
                }
            }
            next = chunk
                .continuation()
                .map(|c| (c.address, Some(u64::from(c.length))));
            chain.push(address);
        }
        Ok(chain)
    }

    fn count_in(&mut self, chain: &[Address], kind: MessageType) -> HeaderResult<usize> {
        let mut count = 0;
        for &address in chain {
            count += self.cache.get(&mut self.backend, address)?.live_count(kind);
        }
        Ok(count)
    }

    /// The chunk holding instance `index` of `kind` and the instance's
    /// position among that chunk's live messages of `kind`.
    fn locate_local(
        &mut self,
        header: Address,
        kind: MessageType,
        index: usize,
    ) -> HeaderResult<(Address, usize)> {
        let mut remaining = index;
        let mut total = 0;
        for address in self.chain(header)? {
            let live = self.cache.get(&mut self.backend, address)?.live_count(kind);
            if remaining < live {
                return Ok((address, remaining));
            }
            remaining -= live;
            total += live;
        }
        if total == 0 {
            Err(HeaderError::NoExistingMessage(kind))
        } else {
            Err(HeaderError::NotFound { kind, index })
        }
    }

    /// The chunk and slot holding instance `index` of `kind`.
    fn locate(
        &mut self,
        header: Address,
        kind: MessageType,
        index: usize,
    ) -> HeaderResult<(Address, usize)> {
        let (address, local) = self.locate_local(header, kind, index)?;
        let slot = self
            .cache
            .get(&mut self.backend, address)?
            .nth_live(kind, local)
            .ok_or(HeaderError::NotFound { kind, index })?;
        Ok((address, slot))
    }

    /// Sequence index of the live message in `slot` of `chunk`.
    fn ordinal_of(
        &mut self,
        header: Address,
        kind: MessageType,
        chunk: Address,
        slot: usize,
    ) -> HeaderResult<usize> {
        let mut ordinal = 0;
        for address in self.chain(header)? {
            let c = self.cache.get(&mut self.backend, address)?;
            if address == chunk {
                return Ok(ordinal + c.live_before(kind, slot));
            }
            ordinal += c.live_count(kind);
        }
        Err(HeaderError::Corrupt {
            address: chunk,
            reason: format!("chunk is not part of header {header}"),
        })
    }

    // ---------------------------------------------------------------
    // Chunk allocation and linking
    // ---------------------------------------------------------------

    fn allocate_chunk(&mut self, min_capacity: u32) -> HeaderResult<Chunk> {
        let region = self
            .backend
            .round_up(u64::from(CHUNK_PREFIX_LEN) + u64::from(min_capacity));
        let capacity = u32::try_from(region - u64::from(CHUNK_PREFIX_LEN)).map_err(|_| {
            HeaderError::MessageTooLarge {
                size: region,
                limit: u32::MAX,
            }
        })?;
        let address = self.backend.allocate(region)?;
        debug!(%address, capacity, "allocated header chunk");
        Ok(Chunk::new(address, capacity))
    }

    fn continuation_to(chunk: &Chunk) -> HeaderResult<Continuation> {
        let length = u32::try_from(chunk.region_len()).map_err(|_| HeaderError::Corrupt {
            address: chunk.address(),
            reason: "chunk region exceeds continuation length field".into(),
        })?;
        Ok(Continuation {
            address: chunk.address(),
            length,
        })
    }

    /// Allocate an overflow chunk big enough for one `size`-byte message
    /// and link `tail` to it.
    fn link_overflow(&mut self, tail: Address, size: u32) -> HeaderResult<Address> {
        let needed = record_span(&[
            u64::from(RECORD_HEADER_LEN),
            u64::from(size),
            u64::from(CONTINUATION_RECORD_LEN),
        ])?;
        let chunk = self.allocate_chunk(needed.max(self.config.min_chunk_size))?;
        let continuation = Self::continuation_to(&chunk)?;
        let address = chunk.address();
        self.cache.insert(address, chunk)?;
        self.cache.modify(&mut self.backend, tail, |c| {
            c.set_continuation(Some(continuation))
        })?;
        debug!(%tail, overflow = %address, "linked overflow chunk");
        Ok(address)
    }

    fn append_to(
        &mut self,
        chunk: Address,
        msg: &Message,
        flags: MessageFlags,
        size: u32,
    ) -> HeaderResult<usize> {
        self.cache
            .modify(&mut self.backend, chunk, |c| c.append(msg.clone(), flags, size))?
            .ok_or_else(|| HeaderError::Corrupt {
                address: chunk,
                reason: format!("no room to append {size} byte message"),
            })
    }

    #[allow(clippy::too_many_arguments)]
    fn update_existing(
        &mut self,
        header: Address,
        chunk: Address,
        slot: usize,
        sequence: Sequence,
        flags: MessageFlags,
        msg: &Message,
        size: u32,
    ) -> HeaderResult<(Address, usize)> {
        let kind = msg.kind();
        let constant = self
            .cache
            .get(&mut self.backend, chunk)?
            .messages()
            .get(slot)
            .is_some_and(|m| m.flags().constant);
        if constant {
            let index = match sequence {
                Sequence::Index(index) => index,
                Sequence::New => self.ordinal_of(header, kind, chunk, slot)?,
            };
            return Err(HeaderError::ConstantMessage { kind, index });
        }

        let outcome = self.cache.modify(&mut self.backend, chunk, |c| {
            c.update(slot, msg.clone(), flags, size)
        })??;
        match outcome {
            UpdateOutcome::InPlace => Ok((chunk, slot)),
            UpdateOutcome::NeedsSplit => {
                let moved_to = self.split_chunk(chunk, slot, size)?;
                self.cache.modify(&mut self.backend, moved_to, |c| {
                    c.update(0, msg.clone(), flags, size)
                })??;
                Ok((moved_to, 0))
            }
        }
    }

    /// Move the records from `slot` onward into a new chunk linked right
    /// after `address`. The new chunk has room for the record in `slot` to
    /// grow to `grown_size`. Returns the new chunk's address.
    fn split_chunk(&mut self, address: Address, slot: usize, grown_size: u32) -> HeaderResult<Address> {
        let (moved_len, growth, onward) = {
            let chunk = self.cache.get(&mut self.backend, address)?;
            let tail = chunk.messages().get(slot..).unwrap_or_default();
            let moved_len = tail
                .iter()
                .map(|m| u64::from(m.record_len()))
                .sum::<u64>();
            let growth = tail
                .first()
                .map_or(0, |m| u64::from(grown_size.saturating_sub(m.raw_size())));
            (moved_len, growth, chunk.continuation())
        };

        let capacity = record_span(&[moved_len, growth, u64::from(CONTINUATION_RECORD_LEN)])?
            .max(self.config.min_chunk_size);
        let mut fresh = self.allocate_chunk(capacity)?;
        let link = Self::continuation_to(&fresh)?;
        let moved = self.cache.modify(&mut self.backend, address, |c| {
            let moved = c.split_off(slot);
            c.set_continuation(Some(link));
            moved
        })?;
        for record in moved {
            fresh.push_stored(record);
        }
        fresh.set_continuation(onward);

        let fresh_address = fresh.address();
        self.cache.insert(fresh_address, fresh)?;
        debug!(%address, split_at = slot, new_chunk = %fresh_address, "split header chunk");
        Ok(fresh_address)
    }

    /// Release non-first chunks without live messages, re-linking each
    /// predecessor past them.
    fn release_empty_chunks(&mut self, chain: &[Address]) -> HeaderResult<()> {
        let Some((&first, rest)) = chain.split_first() else {
            return Ok(());
        };
        let mut prev = first;
        for &address in rest {
            let (empty, onward, len) = {
                let chunk = self.cache.get(&mut self.backend, address)?;
                (!chunk.has_live_messages(), chunk.continuation(), chunk.region_len())
            };
            if !empty {
                prev = address;
                continue;
            }
            self.cache
                .modify(&mut self.backend, prev, |c| c.set_continuation(onward))?;
            self.cache.discard(address)?;
            self.backend.free(address, len)?;
            debug!(%address, predecessor = %prev, "released empty header chunk");
        }
        Ok(())
    }
}

/// Sum of record lengths as a chunk capacity.
fn record_span(parts: &[u64]) -> HeaderResult<u32> {
    let total: u64 = parts.iter().sum();
    u32::try_from(total).map_err(|_| HeaderError::MessageTooLarge {
        size: total,
        limit: u32::MAX,
    })
}
