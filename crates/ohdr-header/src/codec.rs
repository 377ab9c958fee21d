//! Message codec registry.
//!
//! Every message type owns its binary layout. Bodies are serde structs
//! encoded with bincode (fixed-width little-endian integers, `u64` length
//! prefixes for strings and vectors); the registry dispatches on
//! [`MessageType`] and reports exact encoded sizes for slot allocation.
//!
//! Decoding tolerates trailing bytes: a reused or shrunk slot is larger than
//! the body written into it and the remainder is zero padding.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{HeaderError, HeaderResult};
use crate::message::{
    Attribute, Comment, Continuation, DataLayout, Message, MessageType, SymbolTable,
};

/// Encoded size of a continuation body: address (8) + length (4).
pub const CONTINUATION_BODY_LEN: u32 = 12;

/// Whether a type's encoded size is known up front.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeClass {
    Fixed(u32),
    Variable,
}

/// The size declaration for a message type.
pub fn size_class(kind: MessageType) -> SizeClass {
    match kind {
        MessageType::SymbolTable => SizeClass::Fixed(16),
        MessageType::Continuation => SizeClass::Fixed(CONTINUATION_BODY_LEN),
        MessageType::Null
        | MessageType::DataLayout
        | MessageType::Attribute
        | MessageType::Comment => SizeClass::Variable,
    }
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .allow_trailing_bytes()
}

fn body_size<T: Serialize>(body: &T) -> HeaderResult<u32> {
    let size = options()
        .serialized_size(body)
        .map_err(|e| HeaderError::Codec(e.to_string()))?;
    u32::try_from(size).map_err(|_| HeaderError::MessageTooLarge {
        size,
        limit: u32::MAX,
    })
}

fn encode_body<T: Serialize>(body: &T, buf: &mut [u8]) -> HeaderResult<()> {
    let bytes = options()
        .serialize(body)
        .map_err(|e| HeaderError::Codec(e.to_string()))?;
    if bytes.len() > buf.len() {
        return Err(HeaderError::Codec(format!(
            "encoded body of {} bytes does not fit slot of {}",
            bytes.len(),
            buf.len()
        )));
    }
    buf[..bytes.len()].copy_from_slice(&bytes);
    buf[bytes.len()..].fill(0);
    Ok(())
}

fn decode_body<T: DeserializeOwned>(kind: MessageType, buf: &[u8]) -> HeaderResult<T> {
    options()
        .with_limit(buf.len() as u64)
        .deserialize(buf)
        .map_err(|e| HeaderError::Codec(format!("{kind} body: {e}")))
}

/// Exact encoded size of a message body.
pub fn size_of(msg: &Message) -> HeaderResult<u32> {
    match msg {
        Message::DataLayout(layout) => body_size(layout),
        Message::Attribute(attr) => body_size(attr),
        Message::Comment(comment) => body_size(comment),
        Message::SymbolTable(stab) => body_size(stab),
    }
}

/// Encode a message body into `buf`, zero-filling any slack.
pub fn encode(msg: &Message, buf: &mut [u8]) -> HeaderResult<()> {
    match msg {
        Message::DataLayout(layout) => encode_body(layout, buf),
        Message::Attribute(attr) => encode_body(attr, buf),
        Message::Comment(comment) => encode_body(comment, buf),
        Message::SymbolTable(stab) => encode_body(stab, buf),
    }
}

/// Decode a caller-visible message body of the given type.
pub fn decode(kind: MessageType, buf: &[u8]) -> HeaderResult<Message> {
    match kind {
        MessageType::DataLayout => decode_body::<DataLayout>(kind, buf).map(Message::DataLayout),
        MessageType::Attribute => decode_body::<Attribute>(kind, buf).map(Message::Attribute),
        MessageType::Comment => decode_body::<Comment>(kind, buf).map(Message::Comment),
        MessageType::SymbolTable => decode_body::<SymbolTable>(kind, buf).map(Message::SymbolTable),
        MessageType::Null | MessageType::Continuation => Err(HeaderError::Codec(format!(
            "{kind} is not a caller-visible message type"
        ))),
    }
}

/// Decode a body by its raw on-disk tag.
pub fn decode_tagged(tag: u16, buf: &[u8]) -> HeaderResult<Message> {
    let kind = MessageType::from_tag(tag).ok_or(HeaderError::UnknownMessageType(tag))?;
    decode(kind, buf)
}

pub fn encode_continuation(cont: &Continuation) -> HeaderResult<Vec<u8>> {
    let mut buf = vec![0u8; CONTINUATION_BODY_LEN as usize];
    encode_body(cont, &mut buf)?;
    Ok(buf)
}

pub fn decode_continuation(buf: &[u8]) -> HeaderResult<Continuation> {
    decode_body(MessageType::Continuation, buf)
}
