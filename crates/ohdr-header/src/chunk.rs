//! Chunk manager: the byte layout of one header chunk.
//!
//! On-disk image:
//!
//! ```text
//! [4 bytes: magic "OHCK"]
//! [4 bytes: capacity (little-endian u32)]
//! capacity bytes of records, each:
//!   [2 bytes: type tag (LE u16)] [1 byte: flags] [4 bytes: body size (LE u32)] [body]
//! ```
//!
//! User messages come first in header order, then the continuation record
//! if the chunk links onward, then a single NULL record covering the unused
//! tail (or bare zero padding when the tail is shorter than a record header).
//!
//! A chunk without a continuation always keeps [`CONTINUATION_RECORD_LEN`]
//! bytes in reserve so that it can be linked to an overflow chunk without
//! moving any message.

use ohdr_cache::Cacheable;
use ohdr_types::Address;

use crate::codec::{self, CONTINUATION_BODY_LEN};
use crate::error::{HeaderError, HeaderResult};
use crate::message::{Continuation, Message, MessageFlags, MessageType};

pub const CHUNK_MAGIC: [u8; 4] = *b"OHCK";
pub const CHUNK_PREFIX_LEN: u32 = 8;
pub const RECORD_HEADER_LEN: u32 = 7;
pub const CONTINUATION_RECORD_LEN: u32 = RECORD_HEADER_LEN + CONTINUATION_BODY_LEN;
/// Room for the continuation reserve plus one empty record.
pub const MIN_CHUNK_CAPACITY: u32 = CONTINUATION_RECORD_LEN + RECORD_HEADER_LEN;

/// Where a message of a given size should go within one chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotDecision {
    /// Overwrite the live message in this slot.
    UpdateExisting(usize),
    /// Revive the deleted slot, which is large enough.
    DeletedSlotReuse(usize),
    /// Append after the last message.
    AppendNew,
    /// No room; the header needs another chunk.
    NeedsOverflow,
}

/// What the caller wants placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotRequest {
    /// The n-th live message of the type within this chunk.
    Existing(usize),
    /// A new instance.
    New,
}

/// Result of an in-place update attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    InPlace,
    /// The grown record does not fit; the chunk must be split at the slot.
    NeedsSplit,
}

// ---------------------------------------------------------------------------
// StoredMessage
// ---------------------------------------------------------------------------

/// One message record as held in a decoded chunk.
///
/// The body stays as raw bytes until its first typed read; writes replace it
/// with the native value, which is encoded again on flush.
#[derive(Clone, Debug)]
pub struct StoredMessage {
    kind: MessageType,
    flags: MessageFlags,
    raw_size: u32,
    raw: Vec<u8>,
    native: Option<Message>,
}

impl StoredMessage {
    fn from_message(msg: Message, flags: MessageFlags, raw_size: u32) -> Self {
        Self {
            kind: msg.kind(),
            flags: MessageFlags {
                deleted: false,
                ..flags
            },
            raw_size,
            raw: Vec::new(),
            native: Some(msg),
        }
    }

    fn from_raw(kind: MessageType, flags: MessageFlags, raw: Vec<u8>) -> Self {
        Self {
            kind,
            flags,
            raw_size: raw.len() as u32,
            raw,
            native: None,
        }
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    pub fn flags(&self) -> MessageFlags {
        self.flags
    }

    /// Size of the body slot on disk.
    pub fn raw_size(&self) -> u32 {
        self.raw_size
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.deleted
    }

    /// Whether the body has been decoded (or written) since load.
    pub fn is_decoded(&self) -> bool {
        self.native.is_some()
    }

    /// Record header plus body slot.
    pub fn record_len(&self) -> u32 {
        RECORD_HEADER_LEN + self.raw_size
    }

    fn is_live(&self, kind: MessageType) -> bool {
        self.kind == kind && !self.flags.deleted
    }

    /// The decoded body, decoding the raw bytes on first access.
    pub fn payload(&mut self) -> HeaderResult<&Message> {
        if self.native.is_none() {
            let msg = codec::decode(self.kind, &self.raw)?;
            self.native = Some(msg);
            self.raw = Vec::new();
        }
        self.native
            .as_ref()
            .ok_or_else(|| HeaderError::Codec(format!("{} body missing", self.kind)))
    }

    fn set(&mut self, msg: Message, flags: MessageFlags) {
        self.kind = msg.kind();
        self.flags = MessageFlags {
            deleted: false,
            ..flags
        };
        self.native = Some(msg);
        self.raw = Vec::new();
    }

    fn write_body(&self, out: &mut Vec<u8>) -> HeaderResult<()> {
        let start = out.len();
        match &self.native {
            Some(msg) => {
                out.resize(start + self.raw_size as usize, 0);
                codec::encode(msg, &mut out[start..])
            }
            None => {
                out.extend_from_slice(&self.raw);
                out.resize(start + self.raw_size as usize, 0);
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// A fixed-capacity storage region holding part of a header's messages.
#[derive(Clone, Debug)]
pub struct Chunk {
    address: Address,
    capacity: u32,
    messages: Vec<StoredMessage>,
    continuation: Option<Continuation>,
}

impl Chunk {
    /// An empty chunk with `capacity` bytes of record space.
    pub fn new(address: Address, capacity: u32) -> Self {
        Self {
            address,
            capacity,
            messages: Vec::new(),
            continuation: None,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Bytes of record space (prefix excluded).
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Full on-disk region length (prefix included).
    pub fn region_len(&self) -> u64 {
        u64::from(CHUNK_PREFIX_LEN) + u64::from(self.capacity)
    }

    /// Message records in order, deleted slots included.
    pub fn messages(&self) -> &[StoredMessage] {
        &self.messages
    }

    pub fn continuation(&self) -> Option<Continuation> {
        self.continuation
    }

    /// Bytes taken by records, the continuation record included.
    pub fn used_bytes(&self) -> u32 {
        let records: u32 = self.messages.iter().map(StoredMessage::record_len).sum();
        match self.continuation {
            Some(_) => records + CONTINUATION_RECORD_LEN,
            None => records,
        }
    }

    /// Unused record space.
    pub fn free_bytes(&self) -> u32 {
        self.capacity.saturating_sub(self.used_bytes())
    }

    /// Free space minus the continuation reserve.
    pub fn available(&self) -> u32 {
        let reserve = match self.continuation {
            Some(_) => 0,
            None => CONTINUATION_RECORD_LEN,
        };
        self.free_bytes().saturating_sub(reserve)
    }

    /// Live messages of `kind`.
    pub fn live_count(&self, kind: MessageType) -> usize {
        self.messages.iter().filter(|m| m.is_live(kind)).count()
    }

    /// Whether any message is not deleted.
    pub fn has_live_messages(&self) -> bool {
        self.messages.iter().any(|m| !m.is_deleted())
    }

    /// Slot of the `n`-th live message of `kind`.
    pub fn nth_live(&self, kind: MessageType, n: usize) -> Option<usize> {
        self.messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_live(kind))
            .nth(n)
            .map(|(slot, _)| slot)
    }

    /// Live messages of `kind` in slots before `slot`.
    pub fn live_before(&self, kind: MessageType, slot: usize) -> usize {
        self.messages[..slot.min(self.messages.len())]
            .iter()
            .filter(|m| m.is_live(kind))
            .count()
    }

    /// Slot of the last live message of `kind`.
    pub fn last_live(&self, kind: MessageType) -> Option<usize> {
        self.messages.iter().rposition(|m| m.is_live(kind))
    }

    /// Smallest deleted slot of `kind` whose body can hold `size` bytes.
    ///
    /// Only slots past the last live message of `kind` qualify, so a revived
    /// slot never lands ahead of an older instance.
    pub fn reusable_slot(&self, kind: MessageType, size: u32) -> Option<usize> {
        let from = self.last_live(kind).map_or(0, |slot| slot + 1);
        self.messages
            .iter()
            .enumerate()
            .skip(from)
            .filter(|(_, m)| m.kind == kind && m.is_deleted() && m.raw_size >= size)
            .min_by_key(|(_, m)| m.raw_size)
            .map(|(slot, _)| slot)
    }

    /// Whether a new record with a `size`-byte body fits without overflow.
    pub fn can_append(&self, size: u32) -> bool {
        RECORD_HEADER_LEN.saturating_add(size) <= self.available()
    }

    /// Decide placement for a `size`-byte body of `kind` within this chunk.
    ///
    /// For [`SlotRequest::New`] a fitting deleted slot of the same type is
    /// preferred over appending, to bound fragmentation.
    pub fn find_slot(
        &self,
        kind: MessageType,
        size: u32,
        request: SlotRequest,
    ) -> HeaderResult<SlotDecision> {
        match request {
            SlotRequest::Existing(n) => {
                if self.live_count(kind) == 0 {
                    return Err(HeaderError::NoExistingMessage(kind));
                }
                self.nth_live(kind, n)
                    .map(SlotDecision::UpdateExisting)
                    .ok_or(HeaderError::NotFound { kind, index: n })
            }
            SlotRequest::New => {
                if let Some(slot) = self.reusable_slot(kind, size) {
                    Ok(SlotDecision::DeletedSlotReuse(slot))
                } else if self.can_append(size) {
                    Ok(SlotDecision::AppendNew)
                } else {
                    Ok(SlotDecision::NeedsOverflow)
                }
            }
        }
    }

    /// Mutable access to the record in `slot`.
    pub fn message_mut(&mut self, slot: usize) -> HeaderResult<&mut StoredMessage> {
        let address = self.address;
        self.messages.get_mut(slot).ok_or_else(|| HeaderError::Corrupt {
            address,
            reason: format!("no message slot {slot}"),
        })
    }

    /// Overwrite a live message, growing its slot into free space if needed.
    pub fn update(
        &mut self,
        slot: usize,
        msg: Message,
        flags: MessageFlags,
        size: u32,
    ) -> HeaderResult<UpdateOutcome> {
        let available = self.available();
        let m = self.message_mut(slot)?;
        if size > m.raw_size {
            if size - m.raw_size > available {
                return Ok(UpdateOutcome::NeedsSplit);
            }
            m.raw_size = size;
        }
        m.set(msg, flags);
        Ok(UpdateOutcome::InPlace)
    }

    /// Revive a deleted slot with a new message.
    pub fn reuse(&mut self, slot: usize, msg: Message, flags: MessageFlags) -> HeaderResult<()> {
        self.message_mut(slot)?.set(msg, flags);
        Ok(())
    }

    /// Append a new record. Returns its slot, or `None` if it does not fit.
    pub fn append(&mut self, msg: Message, flags: MessageFlags, size: u32) -> Option<usize> {
        if !self.can_append(size) {
            return None;
        }
        self.messages
            .push(StoredMessage::from_message(msg, flags, size));
        Some(self.messages.len() - 1)
    }

    pub fn set_continuation(&mut self, continuation: Option<Continuation>) {
        self.continuation = continuation;
    }

    /// Detach the records from `slot` onward.
    pub(crate) fn split_off(&mut self, slot: usize) -> Vec<StoredMessage> {
        self.messages.split_off(slot.min(self.messages.len()))
    }

    /// Attach a record detached from another chunk.
    pub(crate) fn push_stored(&mut self, message: StoredMessage) {
        self.messages.push(message);
    }

    /// Delete the live message in `slot`. Returns `false` if it was not live.
    pub fn delete_slot(&mut self, slot: usize) -> bool {
        let deleted = match self.messages.get_mut(slot) {
            Some(m) if !m.is_deleted() => {
                m.flags.deleted = true;
                true
            }
            _ => false,
        };
        if deleted {
            self.coalesce();
        }
        deleted
    }

    /// Delete every live message of `kind`. Returns how many were deleted.
    pub fn delete_all(&mut self, kind: MessageType) -> usize {
        let mut count = 0;
        for m in self.messages.iter_mut().filter(|m| m.is_live(kind)) {
            m.flags.deleted = true;
            count += 1;
        }
        if count > 0 {
            self.coalesce();
        }
        count
    }

    /// Merge runs of deleted records of the same type into one slot and
    /// return trailing deleted records to free space.
    fn coalesce(&mut self) {
        let mut merged: Vec<StoredMessage> = Vec::with_capacity(self.messages.len());
        for m in self.messages.drain(..) {
            let absorb = m.is_deleted()
                && merged
                    .last()
                    .is_some_and(|prev| prev.is_deleted() && prev.kind == m.kind);
            if !absorb {
                merged.push(m);
            } else if let Some(prev) = merged.last_mut() {
                prev.raw_size += m.record_len();
                prev.native = None;
                prev.raw = vec![0u8; prev.raw_size as usize];
            }
        }
        while merged.last().is_some_and(StoredMessage::is_deleted) {
            merged.pop();
        }
        self.messages = merged;
    }

    // ---------------------------------------------------------------
    // Image encode / decode
    // ---------------------------------------------------------------

    fn corrupt(&self, reason: impl Into<String>) -> HeaderError {
        HeaderError::Corrupt {
            address: self.address,
            reason: reason.into(),
        }
    }

    /// Serialize to the full on-disk region.
    pub fn encode_image(&self) -> HeaderResult<Vec<u8>> {
        let region_len = self.region_len() as usize;
        let mut out = Vec::with_capacity(region_len);
        out.extend_from_slice(&CHUNK_MAGIC);
        out.extend_from_slice(&self.capacity.to_le_bytes());

        for m in &self.messages {
            write_record_header(&mut out, m.kind, m.flags, m.raw_size);
            m.write_body(&mut out)?;
        }
        if let Some(cont) = &self.continuation {
            write_record_header(
                &mut out,
                MessageType::Continuation,
                MessageFlags::default(),
                CONTINUATION_BODY_LEN,
            );
            out.extend_from_slice(&codec::encode_continuation(cont)?);
        }

        if out.len() > region_len {
            return Err(self.corrupt(format!(
                "records need {} bytes but region is {region_len}",
                out.len()
            )));
        }
        let tail = (region_len - out.len()) as u32;
        if tail >= RECORD_HEADER_LEN {
            write_record_header(
                &mut out,
                MessageType::Null,
                MessageFlags::default(),
                tail - RECORD_HEADER_LEN,
            );
        }
        out.resize(region_len, 0);
        Ok(out)
    }

    /// Parse a full on-disk region.
    pub fn decode_image(address: Address, image: &[u8]) -> HeaderResult<Self> {
        let capacity = image_capacity(address, image)?;
        let mut chunk = Chunk::new(address, capacity);
        if image.len() as u64 != chunk.region_len() {
            return Err(chunk.corrupt(format!(
                "image is {} bytes, prefix declares {}",
                image.len(),
                chunk.region_len()
            )));
        }

        let end = image.len();
        let mut pos = CHUNK_PREFIX_LEN as usize;
        let header_len = RECORD_HEADER_LEN as usize;
        while end - pos >= header_len {
            let tag = u16::from_le_bytes([image[pos], image[pos + 1]]);
            let flag_bits = image[pos + 2];
            let size = u32::from_le_bytes([
                image[pos + 3],
                image[pos + 4],
                image[pos + 5],
                image[pos + 6],
            ]);
            let body_start = pos + header_len;
            let body_end = body_start + size as usize;
            if body_end > end {
                return Err(chunk.corrupt(format!(
                    "record at offset {pos} overruns chunk ({size} byte body)"
                )));
            }
            let kind = MessageType::from_tag(tag).ok_or(HeaderError::UnknownMessageType(tag))?;
            let flags = MessageFlags::from_bits(flag_bits)
                .ok_or_else(|| chunk.corrupt(format!("unknown flag bits {flag_bits:#04x}")))?;
            let body = &image[body_start..body_end];

            match kind {
                MessageType::Null => {}
                MessageType::Continuation => {
                    if chunk.continuation.is_some() {
                        return Err(chunk.corrupt("multiple continuation records"));
                    }
                    if size != CONTINUATION_BODY_LEN {
                        return Err(chunk.corrupt(format!("continuation body is {size} bytes")));
                    }
                    chunk.continuation = Some(codec::decode_continuation(body)?);
                }
                _ => chunk
                    .messages
                    .push(StoredMessage::from_raw(kind, flags, body.to_vec())),
            }
            pos = body_end;
        }

        if chunk.used_bytes() > capacity {
            return Err(chunk.corrupt("records exceed capacity"));
        }
        Ok(chunk)
    }
}

fn write_record_header(out: &mut Vec<u8>, kind: MessageType, flags: MessageFlags, size: u32) {
    out.extend_from_slice(&kind.tag().to_le_bytes());
    out.push(flags.bits());
    out.extend_from_slice(&size.to_le_bytes());
}

/// Validate the prefix and return the declared capacity.
fn image_capacity(address: Address, image: &[u8]) -> HeaderResult<u32> {
    if image.len() < CHUNK_PREFIX_LEN as usize {
        return Err(HeaderError::Corrupt {
            address,
            reason: "chunk prefix truncated".into(),
        });
    }
    if image[..4] != CHUNK_MAGIC {
        return Err(HeaderError::Corrupt {
            address,
            reason: format!(
                "bad chunk magic {:?}",
                String::from_utf8_lossy(&image[..4])
            ),
        });
    }
    Ok(u32::from_le_bytes([image[4], image[5], image[6], image[7]]))
}

impl Cacheable for Chunk {
    type Error = HeaderError;
    const PROBE_LEN: usize = CHUNK_PREFIX_LEN as usize;

    fn image_len(address: Address, probe: &[u8]) -> HeaderResult<usize> {
        let capacity = image_capacity(address, probe)?;
        CHUNK_PREFIX_LEN
            .checked_add(capacity)
            .and_then(|len| usize::try_from(len).ok())
            .ok_or_else(|| HeaderError::Corrupt {
                address,
                reason: format!("chunk capacity {capacity} is out of range"),
            })
    }

    fn decode(address: Address, image: &[u8]) -> HeaderResult<Self> {
        Chunk::decode_image(address, image)
    }

    fn encode(&self) -> HeaderResult<Vec<u8>> {
        self.encode_image()
    }
}
