//! Asset definitions, operations and fixed-point amount rules.
//!
//! Amounts are fixed point with 8 decimals (`COIN` minimal units per whole unit). An asset minted with `units = u`
//! only accepts amounts that are whole multiples of `10^(8 - u)`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use crate::error::AssetError;

/// Minimal units per whole coin (and per whole asset unit at 8 decimals).
pub const COIN: u64 = 100_000_000;

/// Upper bound on any single amount and on an asset's total supply.
pub const MAX_MONEY: u64 = 21_000_000_000 * COIN;

/// Maximum number of decimal places an asset may declare.
pub const MAX_UNITS: u8 = 8;

/// Amount carried by every owner token.
pub const OWNER_ASSET_AMOUNT: u64 = COIN;

/// Owner tokens are indivisible.
pub const OWNER_UNITS: u8 = 0;

/// Unique assets are a single indivisible unit.
pub const UNIQUE_ASSET_AMOUNT: u64 = COIN;
pub const UNIQUE_ASSET_UNITS: u8 = 0;

/// Raw length of a content hash (sha2-256 multihash: 0x12 0x20 + 32 bytes).
pub const CONTENT_HASH_LEN: usize = 34;
/// Length of the base58 text form of a content hash.
pub const CONTENT_HASH_TEXT_LEN: usize = 46;

pub fn is_units_valid(units: u8) -> bool {
    units <= MAX_UNITS
}

pub fn is_money_range(amount: u64) -> bool {
    amount <= MAX_MONEY
}

/// True when `amount` carries no more fractional precision than `units` decimals.
pub fn check_amount_with_units(amount: u64, units: u8) -> bool {
    if !is_units_valid(units) {
        return false;
    }
    let step = 10u64.pow(u32::from(MAX_UNITS - units));
    amount % step == 0
}

/// Errors produced by content hash parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentHashError {
    #[error("Content hash must be {expected} characters, got {got}")]
    BadTextLength { expected: usize, got: usize },

    #[error("Content hash is not valid base58: {0}")]
    BadEncoding(String),

    #[error("Content hash must decode to {expected} bytes, got {got}")]
    BadLength { expected: usize, got: usize },
}

impl From<ContentHashError> for AssetError {
    fn from(err: ContentHashError) -> Self {
        AssetError::Validation(err.to_string())
    }
}

/// Immutable content pointer (IPFS multihash) attached to an asset.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; CONTENT_HASH_LEN]);

impl ContentHash {
    pub fn from_bytes(bytes: [u8; CONTENT_HASH_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ContentHashError> {
        let raw: [u8; CONTENT_HASH_LEN] = bytes.try_into().map_err(|_| ContentHashError::BadLength {
            expected: CONTENT_HASH_LEN,
            got: bytes.len(),
        })?;
        Ok(Self(raw))
    }

    /// Parses the 46-character text form. Any other length is rejected, never truncated.
    pub fn from_base58(text: &str) -> Result<Self, ContentHashError> {
        if text.len() != CONTENT_HASH_TEXT_LEN {
            return Err(ContentHashError::BadTextLength {
                expected: CONTENT_HASH_TEXT_LEN,
                got: text.len(),
            });
        }
        let decoded = bs58::decode(text)
            .into_vec()
            .map_err(|e| ContentHashError::BadEncoding(e.to_string()))?;
        Self::from_slice(&decoded)
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    pub fn as_bytes(&self) -> &[u8; CONTENT_HASH_LEN] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_base58())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        ContentHash::from_base58(&text).map_err(serde::de::Error::custom)
    }
}

/// Metadata of a minted asset. `units` is fixed at mint time; the rest changes only through reissuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDefinition {
    pub name: String,
    /// Total supply in minimal units.
    pub amount: u64,
    pub units: u8,
    pub reissuable: bool,
    pub content_hash: Option<ContentHash>,
}

impl AssetDefinition {
    pub fn new(
        name: impl Into<String>,
        amount: u64,
        units: u8,
        reissuable: bool,
        content_hash: Option<ContentHash>,
    ) -> Self {
        Self {
            name: name.into(),
            amount,
            units,
            reissuable,
            content_hash,
        }
    }

    /// Directory record for an owner token.
    pub fn owner(owner_name: impl Into<String>) -> Self {
        Self::new(owner_name, OWNER_ASSET_AMOUNT, OWNER_UNITS, false, None)
    }

    pub fn has_content_hash(&self) -> bool {
        self.content_hash.is_some()
    }
}

/// `amount` units of `name` attached to a single output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetTransfer {
    pub name: String,
    pub amount: u64,
}

impl AssetTransfer {
    pub fn new(name: impl Into<String>, amount: u64) -> Self {
        Self {
            name: name.into(),
            amount,
        }
    }
}

/// Additional supply and metadata update for an existing reissuable asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetReissue {
    pub name: String,
    /// Additional supply in minimal units (may be zero for a metadata-only update).
    pub amount: u64,
    pub reissuable: bool,
    pub content_hash: Option<ContentHash>,
}

impl AssetReissue {
    pub fn new(
        name: impl Into<String>,
        amount: u64,
        reissuable: bool,
        content_hash: Option<ContentHash>,
    ) -> Self {
        Self {
            name: name.into(),
            amount,
            reissuable,
            content_hash,
        }
    }

    /// Applies this reissue to the current definition. `None` when the new supply leaves the money range.
    pub fn apply_to(&self, current: &AssetDefinition) -> Option<AssetDefinition> {
        let amount = current.amount.checked_add(self.amount).filter(|total| is_money_range(*total))?;
        Some(AssetDefinition {
            name: current.name.clone(),
            amount,
            units: current.units,
            reissuable: self.reissuable,
            content_hash: self.content_hash.or(current.content_hash),
        })
    }
}
