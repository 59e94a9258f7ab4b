//! Ledger transaction format as seen by the asset layer.
//!
//! Only the parts the asset rules read are modelled: spent outpoints, output values and output scripts.
//! Signatures and script execution belong to the ledger engine.
//!
//! **Determinism:** the txid is the double SHA-256 of a fixed little-endian serialization; same transaction
//! data yields the same txid.

use bytes::BufMut;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use crate::core::script::Script;
use crate::error::{AssetError, Result};

/// Transaction id (double SHA-256), displayed as hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TxId(pub [u8; 32]);

impl TxId {
    pub fn from_hex(text: &str) -> Result<Self> {
        let bytes = hex::decode(text)
            .map_err(|e| AssetError::Validation(format!("Invalid txid hex: {}", e)))?;
        let raw: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AssetError::Validation(format!("Txid must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self(raw))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.to_hex())
    }
}

impl Serialize for TxId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TxId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        TxId::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

/// Reference to an output of an earlier transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: TxId,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: TxId, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// The outpoint a coinbase input refers to.
    pub fn null() -> Self {
        Self {
            txid: TxId::default(),
            vout: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid.is_null() && self.vout == u32::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub sequence: u32,
}

impl TxIn {
    pub fn new(prevout: OutPoint) -> Self {
        Self {
            prevout,
            sequence: u32::MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    /// Base-currency value in minimal units.
    pub value: u64,
    pub script: Script,
}

impl TxOut {
    pub fn new(value: u64, script: Script) -> Self {
        Self { value, script }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn new(inputs: Vec<TxIn>, outputs: Vec<TxOut>) -> Self {
        Self {
            version: 2,
            inputs,
            outputs,
            lock_time: 0,
        }
    }

    /// Coinbase transaction; the height goes into the input sequence so coinbases at different heights differ.
    pub fn coinbase(height: u32, outputs: Vec<TxOut>) -> Self {
        Self {
            version: 2,
            inputs: vec![TxIn {
                prevout: OutPoint::null(),
                sequence: height,
            }],
            outputs,
            lock_time: 0,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    fn serialize_canonical(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.outputs.len() * 64);
        buf.put_i32_le(self.version);
        buf.put_u32_le(self.inputs.len() as u32);
        for input in &self.inputs {
            buf.put_slice(&input.prevout.txid.0);
            buf.put_u32_le(input.prevout.vout);
            buf.put_u32_le(input.sequence);
        }
        buf.put_u32_le(self.outputs.len() as u32);
        for output in &self.outputs {
            buf.put_u64_le(output.value);
            buf.put_u32_le(output.script.len() as u32);
            buf.put_slice(output.script.as_bytes());
        }
        buf.put_u32_le(self.lock_time);
        buf
    }

    /// Computes the transaction id. Same transaction data -> same txid.
    pub fn txid(&self) -> TxId {
        let first = Sha256::digest(self.serialize_canonical());
        let second = Sha256::digest(first);
        let mut out = [0u8; 32];
        out.copy_from_slice(&second);
        TxId(out)
    }

    pub fn outpoint(&self, vout: u32) -> OutPoint {
        OutPoint::new(self.txid(), vout)
    }
}

/// A block as delivered by the ledger engine's connect/disconnect notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u32,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(height: u32, transactions: Vec<Transaction>) -> Self {
        Self { height, transactions }
    }
}
