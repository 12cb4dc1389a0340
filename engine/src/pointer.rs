//! Tagged 13-byte addresses.
//!
//! A pointer names either a stored data record or a stored tree node inside a
//! chunk.
//!
//! # Binary Layout
//!
//! ```text
//! [type: 1 byte][position: 8 bytes, big-endian][chunk: 4 bytes, big-endian]
//! ```
//!
//! A pointer whose type byte is `0x00` is the "absent" pointer; it is what a
//! zero-filled slot decodes to.
//!
//! # Usage
//!
//! ```
//! use index_engine::pointer::{Pointer, PointerType};
//!
//! let pointer = Pointer::new(PointerType::Node, 1, 1);
//! let bytes = pointer.to_bytes();
//! assert_eq!(bytes, [0x02, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 1]);
//! assert_eq!(Pointer::from_bytes(&bytes), Some(pointer));
//! ```

use std::cmp::Ordering;

/// Encoded size of a pointer in bytes.
pub const POINTER_SIZE: usize = 13;

/// What a pointer refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PointerType {
    /// A stored data record.
    Data = 0x01,
    /// A stored tree node.
    Node = 0x02,
}

impl TryFrom<u8> for PointerType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Data),
            0x02 => Ok(Self::Node),
            _ => Err(value),
        }
    }
}

/// An address of a record or node: `(type, position, chunk)`.
///
/// Ordering is `(chunk, position)` with the chunk most significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pointer {
    pub pointer_type: PointerType,
    pub position: u64,
    pub chunk: u32,
}

impl Pointer {
    #[must_use]
    pub const fn new(pointer_type: PointerType, position: u64, chunk: u32) -> Self {
        Self {
            pointer_type,
            position,
            chunk,
        }
    }

    /// Pointer to a tree node slot.
    #[must_use]
    pub const fn node(position: u64, chunk: u32) -> Self {
        Self::new(PointerType::Node, position, chunk)
    }

    /// Pointer to a data record.
    #[must_use]
    pub const fn data(position: u64, chunk: u32) -> Self {
        Self::new(PointerType::Data, position, chunk)
    }

    #[must_use]
    pub const fn is_node(&self) -> bool {
        matches!(self.pointer_type, PointerType::Node)
    }

    /// Encode into the fixed 13-byte layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; POINTER_SIZE] {
        let mut bytes = [0u8; POINTER_SIZE];
        self.write_to(&mut bytes);
        bytes
    }

    /// Write the encoded pointer into the first 13 bytes of `out`.
    ///
    /// # Panics
    ///
    /// Panics if `out` is shorter than [`POINTER_SIZE`].
    pub fn write_to(&self, out: &mut [u8]) {
        out[0] = self.pointer_type as u8;
        out[1..9].copy_from_slice(&self.position.to_be_bytes());
        out[9..13].copy_from_slice(&self.chunk.to_be_bytes());
    }

    /// Decode a pointer.
    ///
    /// Returns `None` for the absent pointer (type byte `0x00`), for an
    /// unknown type byte, or when fewer than 13 bytes are given.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < POINTER_SIZE {
            return None;
        }
        let pointer_type = PointerType::try_from(bytes[0]).ok()?;

        let mut position = [0u8; 8];
        position.copy_from_slice(&bytes[1..9]);
        let mut chunk = [0u8; 4];
        chunk.copy_from_slice(&bytes[9..13]);

        Some(Self {
            pointer_type,
            position: u64::from_be_bytes(position),
            chunk: u32::from_be_bytes(chunk),
        })
    }

    /// Write the absent pointer (all zeros) into `out`.
    pub fn write_absent(out: &mut [u8]) {
        out[..POINTER_SIZE].fill(0);
    }
}

impl Ord for Pointer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.chunk
            .cmp(&other.chunk)
            .then(self.position.cmp(&other.position))
            .then(self.pointer_type.cmp(&other.pointer_type))
    }
}

impl PartialOrd for Pointer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Pointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.pointer_type {
            PointerType::Data => "data",
            PointerType::Node => "node",
        };
        write!(f, "{kind}@{}:{}", self.chunk, self.position)
    }
}
