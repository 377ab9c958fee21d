//! Foundation types for object header storage.
//!
//! Every other `ohdr` crate depends on `ohdr-types`.
//!
//! # Key Types
//!
//! - [`Address`] -- Byte offset of a region inside the single backing file
//! - [`TypeError`] -- Parse failures for textual addresses

pub mod address;
pub mod error;

pub use address::Address;
pub use error::TypeError;
