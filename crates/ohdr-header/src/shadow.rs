use ohdr_types::Address;

use crate::message::{Message, MessageType, SymbolTable};

/// Message content a directory entry may carry. Only one type is valid at a
/// time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CachedMessage {
    #[default]
    Nothing,
    SymbolTable(SymbolTable),
}

impl CachedMessage {
    /// The cached message type, or `None` when nothing is cached.
    pub fn kind(&self) -> Option<MessageType> {
        match self {
            Self::Nothing => None,
            Self::SymbolTable(_) => Some(MessageType::SymbolTable),
        }
    }

    /// Shadow form of `msg`, if the shadow models its type.
    pub fn from_message(msg: &Message) -> Option<Self> {
        match msg {
            Message::SymbolTable(stab) => Some(Self::SymbolTable(*stab)),
            _ => None,
        }
    }

    pub fn to_message(&self) -> Option<Message> {
        match self {
            Self::Nothing => None,
            Self::SymbolTable(stab) => Some(Message::SymbolTable(*stab)),
        }
    }
}

/// Denormalized copy of one message held in a caller-owned directory entry.
///
/// Header operations write into it as a side effect. A read only trusts it
/// for sequence index 0 of the cached type on the same header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryShadow {
    header: Address,
    cached: CachedMessage,
    mirrored_index: usize,
}

impl Default for EntryShadow {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryShadow {
    /// An empty shadow bound to no header.
    pub fn new() -> Self {
        Self {
            header: Address::UNDEF,
            cached: CachedMessage::Nothing,
            mirrored_index: 0,
        }
    }

    /// An empty shadow for the entry pointing at `header`.
    pub fn for_header(header: Address) -> Self {
        Self {
            header,
            ..Self::new()
        }
    }

    pub fn header(&self) -> Address {
        self.header
    }

    pub fn cached(&self) -> &CachedMessage {
        &self.cached
    }

    pub fn cached_type(&self) -> Option<MessageType> {
        self.cached.kind()
    }

    /// The cached symbol table fields, if that is what is cached.
    pub fn symbol_table(&self) -> Option<&SymbolTable> {
        match &self.cached {
            CachedMessage::SymbolTable(stab) => Some(stab),
            CachedMessage::Nothing => None,
        }
    }

    /// Forget the cached content. The header binding is kept.
    pub fn clear(&mut self) {
        self.cached = CachedMessage::Nothing;
        self.mirrored_index = 0;
    }

    /// Overwrite with the message just written at `index` of `header`.
    /// Returns `false` (leaving the shadow untouched) for unmodelled types.
    pub(crate) fn store(&mut self, header: Address, msg: &Message, index: usize) -> bool {
        match CachedMessage::from_message(msg) {
            Some(cached) => {
                self.header = header;
                self.cached = cached;
                self.mirrored_index = index;
                true
            }
            None => false,
        }
    }

    /// The cached message if it answers a read of `(kind, index)` on `header`.
    pub(crate) fn lookup(&self, header: Address, kind: MessageType, index: usize) -> Option<Message> {
        if self.header != header || index != 0 || self.mirrored_index != 0 {
            return None;
        }
        if self.cached.kind() != Some(kind) {
            return None;
        }
        self.cached.to_message()
    }
}
