//! Output scripts and payment destinations.
//!
//! Only the two standard destination templates are recognised; asset payloads are appended after them by the
//! codec. Addresses are base58check strings of `prefix || hash160`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use crate::error::AssetError;

pub const OP_DUP: u8 = 0x76;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_DROP: u8 = 0x75;
pub const OP_PUSHDATA1: u8 = 0x4c;
/// Marks the start of an asset payload.
pub const OP_XSR_ASSET: u8 = 0xc0;

pub const HASH160_LEN: usize = 20;
/// `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`
pub const P2PKH_LEN: usize = 25;
/// `OP_HASH160 <20> OP_EQUAL`
pub const P2SH_LEN: usize = 23;

/// Raw output script bytes.
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Script(Vec<u8>);

impl Script {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_hex(text: &str) -> Result<Self, AssetError> {
        hex::decode(text)
            .map(Self)
            .map_err(|e| AssetError::Validation(format!("Invalid script hex: {}", e)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({})", self.to_hex())
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<Vec<u8>> for Script {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// 20-byte key or script hash, serialized as hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash160(pub [u8; HASH160_LEN]);

impl Hash160 {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }
}

impl fmt::Debug for Hash160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash160({})", hex::encode(self.0))
    }
}

impl Serialize for Hash160 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Hash160 {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        Hash160::from_slice(&bytes)
            .ok_or_else(|| serde::de::Error::custom("hash160 must be 20 bytes"))
    }
}

/// Address prefixes for base58check encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressPrefixes {
    pub pubkey_hash: u8,
    pub script_hash: u8,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid base58check address: {0}")]
    BadEncoding(String),

    #[error("Address payload must be 21 bytes, got {0}")]
    BadLength(usize),

    #[error("Unknown address prefix {0}")]
    UnknownPrefix(u8),
}

impl From<AddressError> for AssetError {
    fn from(err: AddressError) -> Self {
        AssetError::Validation(err.to_string())
    }
}

/// Where an output pays to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Destination {
    KeyHash(Hash160),
    ScriptHash(Hash160),
}

impl Destination {
    /// Standard script paying to this destination.
    pub fn script(&self) -> Script {
        let mut bytes = Vec::with_capacity(P2PKH_LEN);
        match self {
            Destination::KeyHash(hash) => {
                bytes.extend_from_slice(&[OP_DUP, OP_HASH160, HASH160_LEN as u8]);
                bytes.extend_from_slice(&hash.0);
                bytes.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
            }
            Destination::ScriptHash(hash) => {
                bytes.extend_from_slice(&[OP_HASH160, HASH160_LEN as u8]);
                bytes.extend_from_slice(&hash.0);
                bytes.push(OP_EQUAL);
            }
        }
        Script(bytes)
    }

    /// Matches a standard destination template at the start of `script`. Returns the destination and the
    /// number of bytes it occupies.
    pub fn parse_prefix(script: &[u8]) -> Option<(Destination, usize)> {
        if script.len() >= P2PKH_LEN
            && script[0] == OP_DUP
            && script[1] == OP_HASH160
            && script[2] == HASH160_LEN as u8
            && script[23] == OP_EQUALVERIFY
            && script[24] == OP_CHECKSIG
        {
            let hash = Hash160::from_slice(&script[3..23])?;
            return Some((Destination::KeyHash(hash), P2PKH_LEN));
        }
        if script.len() >= P2SH_LEN
            && script[0] == OP_HASH160
            && script[1] == HASH160_LEN as u8
            && script[22] == OP_EQUAL
        {
            let hash = Hash160::from_slice(&script[2..22])?;
            return Some((Destination::ScriptHash(hash), P2SH_LEN));
        }
        None
    }

    pub fn to_address(&self, prefixes: &AddressPrefixes) -> String {
        let (prefix, hash) = match self {
            Destination::KeyHash(hash) => (prefixes.pubkey_hash, hash),
            Destination::ScriptHash(hash) => (prefixes.script_hash, hash),
        };
        let mut payload = Vec::with_capacity(HASH160_LEN + 1);
        payload.push(prefix);
        payload.extend_from_slice(&hash.0);
        bs58::encode(payload).with_check().into_string()
    }

    pub fn from_address(address: &str, prefixes: &AddressPrefixes) -> Result<Self, AddressError> {
        let payload = bs58::decode(address)
            .with_check(None)
            .into_vec()
            .map_err(|e| AddressError::BadEncoding(e.to_string()))?;
        if payload.len() != HASH160_LEN + 1 {
            return Err(AddressError::BadLength(payload.len()));
        }
        let hash = Hash160::from_slice(&payload[1..]).ok_or(AddressError::BadLength(payload.len()))?;
        match payload[0] {
            p if p == prefixes.pubkey_hash => Ok(Destination::KeyHash(hash)),
            p if p == prefixes.script_hash => Ok(Destination::ScriptHash(hash)),
            other => Err(AddressError::UnknownPrefix(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIXES: AddressPrefixes = AddressPrefixes {
        pubkey_hash: 63,
        script_hash: 125,
    };

    #[test]
    fn test_p2pkh_template() {
        let dest = Destination::KeyHash(Hash160([7u8; 20]));
        let script = dest.script();
        assert_eq!(script.len(), P2PKH_LEN);
        assert_eq!(Destination::parse_prefix(script.as_bytes()), Some((dest, P2PKH_LEN)));
    }

    #[test]
    fn test_p2sh_template() {
        let dest = Destination::ScriptHash(Hash160([9u8; 20]));
        let script = dest.script();
        assert_eq!(script.len(), P2SH_LEN);
        assert_eq!(Destination::parse_prefix(script.as_bytes()), Some((dest, P2SH_LEN)));
    }

    #[test]
    fn test_non_standard_script() {
        assert_eq!(Destination::parse_prefix(&[]), None);
        assert_eq!(Destination::parse_prefix(&[OP_DUP, OP_HASH160, 20]), None);
        assert_eq!(Destination::parse_prefix(&[0x6a, 0x01, 0x00]), None);
    }

    #[test]
    fn test_address_round_trip() {
        let key = Destination::KeyHash(Hash160([1u8; 20]));
        let script = Destination::ScriptHash(Hash160([2u8; 20]));
        for dest in [key, script] {
            let address = dest.to_address(&PREFIXES);
            assert_eq!(Destination::from_address(&address, &PREFIXES), Ok(dest));
        }
        assert_ne!(key.to_address(&PREFIXES), script.to_address(&PREFIXES));
    }

    #[test]
    fn test_address_rejects_bad_checksum() {
        let mut address = Destination::KeyHash(Hash160([1u8; 20])).to_address(&PREFIXES);
        let last = address.pop().unwrap();
        address.push(if last == '2' { '3' } else { '2' });
        assert!(Destination::from_address(&address, &PREFIXES).is_err());
    }

    #[test]
    fn test_script_hex() {
        let script = Script::from_hex("76a9").unwrap();
        assert_eq!(script.as_bytes(), &[OP_DUP, OP_HASH160]);
        assert_eq!(script.to_hex(), "76a9");
        assert!(Script::from_hex("zz").is_err());
    }
}
