//! `0x`-prefixed hex wire primitives.
//!
//! Every node speaks hex strings on the wire. These newtypes parse strictly
//! (prefix required, fixed widths enforced) so a malformed response surfaces as
//! a decode error instead of a silently different value.

use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons a hex string could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HexError {
    /// The string did not start with `0x`.
    MissingPrefix(String),
    /// The digits were not valid hex (or had odd length for a byte string).
    InvalidDigits(String),
    /// A fixed-width value had the wrong number of bytes.
    WrongLength { expected: usize, got: usize },
    /// A quantity does not fit the target integer width.
    Overflow(String),
}

impl fmt::Display for HexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HexError::MissingPrefix(raw) => write!(f, "hex value '{raw}' is missing the 0x prefix"),
            HexError::InvalidDigits(raw) => write!(f, "hex value '{raw}' has invalid digits"),
            HexError::WrongLength { expected, got } => {
                write!(f, "expected {expected} bytes, got {got}")
            }
            HexError::Overflow(raw) => write!(f, "quantity '{raw}' overflows u64"),
        }
    }
}

impl std::error::Error for HexError {}

fn strip_prefix(s: &str) -> Result<&str, HexError> {
    let t = s.trim();
    t.strip_prefix("0x")
        .or_else(|| t.strip_prefix("0X"))
        .ok_or_else(|| HexError::MissingPrefix(s.to_string()))
}

/// Decode a `0x`-prefixed byte string.
pub fn decode_prefixed(s: &str) -> Result<Vec<u8>, HexError> {
    let digits = strip_prefix(s)?;
    ::hex::decode(digits).map_err(|_| HexError::InvalidDigits(s.to_string()))
}

/// Encode bytes as a lowercase `0x`-prefixed string.
pub fn encode_prefixed(bytes: &[u8]) -> String {
    format!("0x{}", ::hex::encode(bytes))
}

// ---------------------------------------------------------------------------
// Fixed-width byte strings
// ---------------------------------------------------------------------------

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub const fn zero() -> Self {
                Self([0u8; $len])
            }

            pub fn from_slice(bytes: &[u8]) -> Result<Self, HexError> {
                let arr: [u8; $len] = bytes.try_into().map_err(|_| HexError::WrongLength {
                    expected: $len,
                    got: bytes.len(),
                })?;
                Ok(Self(arr))
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::zero()
            }
        }

        impl FromStr for $name {
            type Err = HexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_slice(&decode_prefixed(s)?)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&encode_prefixed(&self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(de::Error::custom)
            }
        }
    };
}

fixed_bytes!(
    /// 32-byte hash (block hash, transaction hash, state roots, topics).
    B256,
    32
);

fixed_bytes!(
    /// 20-byte account address.
    Address,
    20
);

fixed_bytes!(
    /// 8-byte proof-of-work nonce carried by post-boundary headers.
    BlockNonce,
    8
);

// ---------------------------------------------------------------------------
// Variable-length byte strings
// ---------------------------------------------------------------------------

/// Arbitrary-length byte string (call data, extra data, blooms).
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bytes(pub Vec<u8>);

impl Bytes {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl FromStr for Bytes {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_prefixed(s).map(Bytes)
    }
}

impl fmt::Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_prefixed(&self.0))
    }
}

impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bytes({self})")
    }
}

impl Serialize for Bytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Bytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Quantities
// ---------------------------------------------------------------------------

/// Unbounded unsigned quantity (`0x`-prefixed, no leading zeros, `0x0` for zero).
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity(pub BigUint);

impl Quantity {
    pub fn from_u64(v: u64) -> Self {
        Self(BigUint::from(v))
    }

    pub fn is_zero(&self) -> bool {
        self.0.bits() == 0
    }

    pub fn to_u64(&self) -> Option<u64> {
        u64::try_from(&self.0).ok()
    }

    /// Big-endian bytes with no leading zeros; empty for zero.
    pub fn to_be_bytes_trimmed(&self) -> Vec<u8> {
        if self.is_zero() {
            Vec::new()
        } else {
            self.0.to_bytes_be()
        }
    }
}

impl From<u64> for Quantity {
    fn from(v: u64) -> Self {
        Self::from_u64(v)
    }
}

impl FromStr for Quantity {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = strip_prefix(s)?;
        if digits.is_empty() {
            return Err(HexError::InvalidDigits(s.to_string()));
        }
        BigUint::parse_bytes(digits.as_bytes(), 16)
            .map(Quantity)
            .ok_or_else(|| HexError::InvalidDigits(s.to_string()))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::Debug for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Quantity({self})")
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Parse a `0x` quantity into a `u64`.
pub fn parse_u64_quantity(s: &str) -> Result<u64, HexError> {
    let digits = strip_prefix(s)?;
    if digits.is_empty() {
        return Err(HexError::InvalidDigits(s.to_string()));
    }
    u64::from_str_radix(digits, 16).map_err(|e| match e.kind() {
        std::num::IntErrorKind::PosOverflow => HexError::Overflow(s.to_string()),
        _ => HexError::InvalidDigits(s.to_string()),
    })
}

struct U64QuantityVisitor;

impl<'de> de::Visitor<'de> for U64QuantityVisitor {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a 0x-prefixed hex quantity")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
        parse_u64_quantity(v).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
        Ok(v)
    }
}

struct U64Quantity(u64);

impl<'de> Deserialize<'de> for U64Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(U64QuantityVisitor).map(U64Quantity)
    }
}

/// `#[serde(with = "u64_quantity")]` for `u64` fields carried as hex quantities.
pub mod u64_quantity {
    use super::*;

    pub fn serialize<S: Serializer>(v: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{v:#x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        U64Quantity::deserialize(deserializer).map(|q| q.0)
    }
}

/// `#[serde(with = "opt_u64_quantity")]` for optional hex quantities.
pub mod opt_u64_quantity {
    use super::*;

    pub fn serialize<S: Serializer>(v: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(v) => serializer.serialize_some(&format!("{v:#x}")),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<u64>, D::Error> {
        Option::<U64Quantity>::deserialize(deserializer).map(|o| o.map(|q| q.0))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
