//! Fixed-width binary codecs for keys and values.
//!
//! Every key and value stored in a node occupies a fixed number of bytes so
//! that slots can be addressed by index. A codec also defines which byte
//! pattern marks an empty slot:
//!
//! - Plain integers carry a leading presence byte (`0x01`), so zero is a
//!   valid key and an all-zero slot is empty.
//! - The `NonZero*` keys are stored without a flag; the zero value itself is
//!   the empty-slot sentinel and can never be stored.
//! - Pointers are empty when their type byte is `0x00`.
//!
//! The tree is generic over [`BinaryCodec`], so the concrete codec is fixed
//! per tree instance at compile time.

use std::fmt::Debug;

use crate::pointer::{POINTER_SIZE, Pointer};

/// Errors produced while encoding or decoding a key or value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Zero was given to a codec that reserves it as the empty sentinel.
    ZeroNotAllowed,
    /// The byte slice does not have the codec's width.
    WrongLength { expected: usize, actual: usize },
    /// The bytes do not hold a value (empty slot).
    Absent,
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroNotAllowed => write!(f, "zero is reserved and cannot be stored"),
            Self::WrongLength { expected, actual } => {
                write!(f, "expected {expected} bytes, got {actual}")
            }
            Self::Absent => write!(f, "slot holds no value"),
        }
    }
}

impl std::error::Error for CodecError {}

/// A type with a fixed-size binary form.
pub trait BinaryCodec: Sized + Clone + Ord + Debug + Send + Sync + 'static {
    /// Encoded width in bytes.
    const SIZE: usize;

    /// Encode into `out`, which is exactly `SIZE` bytes long.
    fn encode(&self, out: &mut [u8]) -> Result<(), CodecError>;

    /// Decode from exactly `SIZE` bytes.
    fn decode(bytes: &[u8]) -> Result<Self, CodecError>;

    /// Whether `bytes` hold a value rather than an empty slot.
    fn is_present(bytes: &[u8]) -> bool;
}

const fn check_len(bytes: &[u8], expected: usize) -> Result<(), CodecError> {
    if bytes.len() == expected {
        Ok(())
    } else {
        Err(CodecError::WrongLength {
            expected,
            actual: bytes.len(),
        })
    }
}

/// Codecs for primitive integers with a leading presence byte.
macro_rules! flagged_integer_codec {
    ($ty:ty) => {
        impl BinaryCodec for $ty {
            const SIZE: usize = 1 + std::mem::size_of::<$ty>();

            fn encode(&self, out: &mut [u8]) -> Result<(), CodecError> {
                check_len(out, Self::SIZE)?;
                out[0] = 0x01;
                out[1..].copy_from_slice(&self.to_be_bytes());
                Ok(())
            }

            fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
                check_len(bytes, Self::SIZE)?;
                if bytes[0] != 0x01 {
                    return Err(CodecError::Absent);
                }
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(&bytes[1..]);
                Ok(<$ty>::from_be_bytes(raw))
            }

            fn is_present(bytes: &[u8]) -> bool {
                bytes.first() == Some(&0x01)
            }
        }
    };
}

flagged_integer_codec!(i32);
flagged_integer_codec!(i64);
flagged_integer_codec!(u32);
flagged_integer_codec!(u64);

/// Zero-excluding keys: the integer is stored bare and zero means "empty".
macro_rules! non_zero_key {
    ($(#[$meta:meta])* $name:ident, $inner:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name($inner);

        impl $name {
            /// Wrap a non-zero value.
            pub const fn new(value: $inner) -> Result<Self, CodecError> {
                if value == 0 {
                    Err(CodecError::ZeroNotAllowed)
                } else {
                    Ok(Self(value))
                }
            }

            #[must_use]
            pub const fn get(self) -> $inner {
                self.0
            }
        }

        impl TryFrom<$inner> for $name {
            type Error = CodecError;

            fn try_from(value: $inner) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl BinaryCodec for $name {
            const SIZE: usize = std::mem::size_of::<$inner>();

            fn encode(&self, out: &mut [u8]) -> Result<(), CodecError> {
                check_len(out, Self::SIZE)?;
                if self.0 == 0 {
                    return Err(CodecError::ZeroNotAllowed);
                }
                out.copy_from_slice(&self.0.to_be_bytes());
                Ok(())
            }

            fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
                check_len(bytes, Self::SIZE)?;
                let mut raw = [0u8; std::mem::size_of::<$inner>()];
                raw.copy_from_slice(bytes);
                match <$inner>::from_be_bytes(raw) {
                    0 => Err(CodecError::Absent),
                    value => Ok(Self(value)),
                }
            }

            fn is_present(bytes: &[u8]) -> bool {
                bytes.iter().any(|b| *b != 0)
            }
        }
    };
}

non_zero_key!(
    /// A 32-bit signed key that cannot be zero.
    NonZeroKey32,
    i32
);
non_zero_key!(
    /// A 64-bit signed key that cannot be zero.
    NonZeroKey64,
    i64
);

impl BinaryCodec for Pointer {
    const SIZE: usize = POINTER_SIZE;

    fn encode(&self, out: &mut [u8]) -> Result<(), CodecError> {
        check_len(out, Self::SIZE)?;
        self.write_to(out);
        Ok(())
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        check_len(bytes, Self::SIZE)?;
        Self::from_bytes(bytes).ok_or(CodecError::Absent)
    }

    fn is_present(bytes: &[u8]) -> bool {
        bytes.first().is_some_and(|b| *b != 0)
    }
}
