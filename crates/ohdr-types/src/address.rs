use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Byte offset of a region within the backing file.
///
/// An `Address` is the only stable identity an on-disk structure has: the
/// metadata cache keys on it, continuation records store it, and object
/// headers are named by the address of their first chunk.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(u64);

impl Address {
    /// The undefined address. Represents "no region".
    pub const UNDEF: Self = Self(u64::MAX);

    /// Wrap a raw file offset.
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    /// The raw file offset.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns `true` if this is the undefined address.
    pub const fn is_undef(self) -> bool {
        self.0 == u64::MAX
    }

    /// The address `len` bytes past this one, or `None` on overflow.
    pub fn checked_add(self, len: u64) -> Option<Self> {
        self.0.checked_add(len).map(Self)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_undef() {
            write!(f, "Address(UNDEF)")
        } else {
            write!(f, "Address({:#x})", self.0)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_undef() {
            write!(f, "UNDEF")
        } else {
            write!(f, "{:#x}", self.0)
        }
    }
}

impl From<u64> for Address {
    fn from(offset: u64) -> Self {
        Self(offset)
    }
}

impl FromStr for Address {
    type Err = TypeError;

    /// Parse `UNDEF`, a `0x`-prefixed hex offset, or a decimal offset.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "UNDEF" {
            return Ok(Self::UNDEF);
        }
        let parsed = match s.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => s.parse::<u64>(),
        };
        parsed
            .map(Self)
            .map_err(|e| TypeError::InvalidAddress(format!("{s}: {e}")))
    }
}
