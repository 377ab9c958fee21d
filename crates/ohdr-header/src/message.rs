use serde::{Deserialize, Serialize};

use ohdr_types::Address;

/// The type of a header message, identified on disk by a 16-bit tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Free space inside a chunk. Never exposed to callers.
    Null,
    /// Where and how a dataset's raw data is laid out.
    DataLayout,
    /// A named, opaque attribute value.
    Attribute,
    /// Free-form object comment.
    Comment,
    /// Link to the next chunk of the header. Never exposed to callers.
    Continuation,
    /// B-tree and local heap addresses for a group.
    SymbolTable,
}

impl MessageType {
    /// On-disk type tag.
    pub fn tag(self) -> u16 {
        match self {
            Self::Null => 0x0000,
            Self::DataLayout => 0x0008,
            Self::Attribute => 0x000C,
            Self::Comment => 0x000D,
            Self::Continuation => 0x0010,
            Self::SymbolTable => 0x0011,
        }
    }

    /// Parse an on-disk type tag.
    pub fn from_tag(tag: u16) -> Option<Self> {
        match tag {
            0x0000 => Some(Self::Null),
            0x0008 => Some(Self::DataLayout),
            0x000C => Some(Self::Attribute),
            0x000D => Some(Self::Comment),
            0x0010 => Some(Self::Continuation),
            0x0011 => Some(Self::SymbolTable),
            _ => None,
        }
    }

    /// Whether a header may carry more than one live message of this type.
    pub fn allows_multiple(self) -> bool {
        matches!(self, Self::Attribute | Self::SymbolTable)
    }

    /// Types the chunk manager owns; callers cannot create or read them.
    pub fn is_internal(self) -> bool {
        matches!(self, Self::Null | Self::Continuation)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::DataLayout => write!(f, "layout"),
            Self::Attribute => write!(f, "attribute"),
            Self::Comment => write!(f, "comment"),
            Self::Continuation => write!(f, "continuation"),
            Self::SymbolTable => write!(f, "stab"),
        }
    }
}

/// Per-message flag bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFlags {
    /// The message may not be updated once written.
    pub constant: bool,
    /// The message body is shared with other objects.
    pub shared: bool,
    /// The slot is deleted and may be reused by a message of the same type.
    pub deleted: bool,
}

impl MessageFlags {
    const CONSTANT: u8 = 0x01;
    const SHARED: u8 = 0x02;
    const DELETED: u8 = 0x04;

    /// Flags for a constant message.
    pub fn constant() -> Self {
        Self {
            constant: true,
            ..Default::default()
        }
    }

    /// Encode to the on-disk flag byte.
    pub fn bits(self) -> u8 {
        let mut bits = 0;
        if self.constant {
            bits |= Self::CONSTANT;
        }
        if self.shared {
            bits |= Self::SHARED;
        }
        if self.deleted {
            bits |= Self::DELETED;
        }
        bits
    }

    /// Decode an on-disk flag byte. Unknown bits are rejected.
    pub fn from_bits(bits: u8) -> Option<Self> {
        if bits & !(Self::CONSTANT | Self::SHARED | Self::DELETED) != 0 {
            return None;
        }
        Some(Self {
            constant: bits & Self::CONSTANT != 0,
            shared: bits & Self::SHARED != 0,
            deleted: bits & Self::DELETED != 0,
        })
    }
}

// ---------------------------------------------------------------------------
// Message bodies
// ---------------------------------------------------------------------------

/// Symbol table pointers for a group: its B-tree and local heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolTable {
    pub btree_address: Address,
    pub heap_address: Address,
}

impl SymbolTable {
    /// Build from raw file offsets.
    pub fn new(btree_address: u64, heap_address: u64) -> Self {
        Self {
            btree_address: Address::new(btree_address),
            heap_address: Address::new(heap_address),
        }
    }
}

/// Contiguous raw-data layout: where the data starts and its dimensions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataLayout {
    pub address: Address,
    pub dims: Vec<u64>,
}

/// A named attribute with an opaque value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub data: Vec<u8>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Free-form comment text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub text: String,
}

impl Comment {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Link from a full chunk to the next chunk of the same header.
///
/// `length` is the full region length of the next chunk, prefix included.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuation {
    pub address: Address,
    pub length: u32,
}

/// A caller-visible message payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    DataLayout(DataLayout),
    Attribute(Attribute),
    Comment(Comment),
    SymbolTable(SymbolTable),
}

impl Message {
    /// The message's type.
    pub fn kind(&self) -> MessageType {
        match self {
            Self::DataLayout(_) => MessageType::DataLayout,
            Self::Attribute(_) => MessageType::Attribute,
            Self::Comment(_) => MessageType::Comment,
            Self::SymbolTable(_) => MessageType::SymbolTable,
        }
    }
}

/// Typed access to one message body.
pub trait MessageBody: Sized {
    /// The message type this body is stored as.
    const TYPE: MessageType;

    fn into_message(self) -> Message;

    /// Extract the body, or `None` if `msg` is a different type.
    fn from_message(msg: Message) -> Option<Self>;
}

impl MessageBody for SymbolTable {
    const TYPE: MessageType = MessageType::SymbolTable;

    fn into_message(self) -> Message {
        Message::SymbolTable(self)
    }

    fn from_message(msg: Message) -> Option<Self> {
        match msg {
            Message::SymbolTable(stab) => Some(stab),
            _ => None,
        }
    }
}

impl MessageBody for DataLayout {
    const TYPE: MessageType = MessageType::DataLayout;

    fn into_message(self) -> Message {
        Message::DataLayout(self)
    }

    fn from_message(msg: Message) -> Option<Self> {
        match msg {
            Message::DataLayout(layout) => Some(layout),
            _ => None,
        }
    }
}

impl MessageBody for Attribute {
    const TYPE: MessageType = MessageType::Attribute;

    fn into_message(self) -> Message {
        Message::Attribute(self)
    }

    fn from_message(msg: Message) -> Option<Self> {
        match msg {
            Message::Attribute(attr) => Some(attr),
            _ => None,
        }
    }
}

impl MessageBody for Comment {
    const TYPE: MessageType = MessageType::Comment;

    fn into_message(self) -> Message {
        Message::Comment(self)
    }

    fn from_message(msg: Message) -> Option<Self> {
        match msg {
            Message::Comment(comment) => Some(comment),
            _ => None,
        }
    }
}

impl From<SymbolTable> for Message {
    fn from(stab: SymbolTable) -> Self {
        stab.into_message()
    }
}

impl From<DataLayout> for Message {
    fn from(layout: DataLayout) -> Self {
        layout.into_message()
    }
}

impl From<Attribute> for Message {
    fn from(attr: Attribute) -> Self {
        attr.into_message()
    }
}

impl From<Comment> for Message {
    fn from(comment: Comment) -> Self {
        comment.into_message()
    }
}
