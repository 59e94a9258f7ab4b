//! Interface to the ledger engine's UTXO set.
//!
//! The asset layer never owns coins; it resolves spent outputs through `CoinView` and, when it drives block
//! connection itself (tests, replay, CLI), keeps a `UtxoSet` in step.

use std::collections::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use crate::core::transaction::{OutPoint, Transaction, TxOut};
use crate::error::{AssetError, Result};

/// An unspent output together with where it was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub output: TxOut,
    pub height: u32,
    pub is_coinbase: bool,
}

impl Coin {
    pub fn new(output: TxOut, height: u32, is_coinbase: bool) -> Self {
        Self {
            output,
            height,
            is_coinbase,
        }
    }
}

/// Read access to unspent outputs.
pub trait CoinView {
    fn coin(&self, outpoint: &OutPoint) -> Option<Coin>;
}

/// Mutable UTXO set driven by block connection.
pub trait UtxoSet: CoinView {
    fn add_coin(&mut self, outpoint: OutPoint, coin: Coin);

    /// Removes and returns the coin, `None` if it was not unspent.
    fn spend_coin(&mut self, outpoint: &OutPoint) -> Option<Coin>;
}

/// In-memory UTXO set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoinsCache {
    coins: HashMap<OutPoint, Coin>,
}

impl CoinsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OutPoint, &Coin)> {
        self.coins.iter()
    }

    /// Adds every output of `tx` as a coin at `height`.
    pub fn add_outputs(&mut self, tx: &Transaction, height: u32) {
        let txid = tx.txid();
        let is_coinbase = tx.is_coinbase();
        for (vout, output) in tx.outputs.iter().enumerate() {
            self.add_coin(
                OutPoint::new(txid, vout as u32),
                Coin::new(output.clone(), height, is_coinbase),
            );
        }
    }
}

impl CoinView for CoinsCache {
    fn coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        self.coins.get(outpoint).cloned()
    }
}

impl UtxoSet for CoinsCache {
    fn add_coin(&mut self, outpoint: OutPoint, coin: Coin) {
        self.coins.insert(outpoint, coin);
    }

    fn spend_coin(&mut self, outpoint: &OutPoint) -> Option<Coin> {
        self.coins.remove(outpoint)
    }
}

/// Coins spent by one transaction, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxUndo {
    pub spent: Vec<(OutPoint, Coin)>,
}

impl CoinView for TxUndo {
    fn coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        self.spent
            .iter()
            .find(|(spent, _)| spent == outpoint)
            .map(|(_, coin)| coin.clone())
    }
}

/// Coins spent by a block, one entry per transaction in block order (empty for the coinbase).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockUndo {
    pub height: u32,
    pub txs: Vec<TxUndo>,
}

/// Spends the inputs of `tx` and adds its outputs. Returns the spent coins.
pub fn connect_transaction<U: UtxoSet + ?Sized>(utxo: &mut U, tx: &Transaction, height: u32) -> Result<TxUndo> {
    let mut undo = TxUndo::default();
    if !tx.is_coinbase() {
        if let Some(missing) = tx.inputs.iter().find(|input| utxo.coin(&input.prevout).is_none()) {
            return Err(AssetError::State(format!(
                "Input {} of {} is not unspent",
                missing.prevout,
                tx.txid()
            )));
        }
        let mut seen = HashSet::with_capacity(tx.inputs.len());
        if let Some(duplicate) = tx.inputs.iter().find(|input| !seen.insert(input.prevout)) {
            return Err(AssetError::State(format!(
                "Input {} of {} is spent twice",
                duplicate.prevout,
                tx.txid()
            )));
        }
        for input in &tx.inputs {
            let coin = utxo.spend_coin(&input.prevout).ok_or_else(|| {
                AssetError::State(format!("Input {} of {} is not unspent", input.prevout, tx.txid()))
            })?;
            undo.spent.push((input.prevout, coin));
        }
    }
    let txid = tx.txid();
    let is_coinbase = tx.is_coinbase();
    for (vout, output) in tx.outputs.iter().enumerate() {
        utxo.add_coin(
            OutPoint::new(txid, vout as u32),
            Coin::new(output.clone(), height, is_coinbase),
        );
    }
    Ok(undo)
}

/// Reverses `connect_transaction`: removes the outputs and restores the spent coins.
pub fn disconnect_transaction<U: UtxoSet + ?Sized>(utxo: &mut U, tx: &Transaction, undo: &TxUndo) -> Result<()> {
    let txid = tx.txid();
    for vout in 0..tx.outputs.len() {
        utxo.spend_coin(&OutPoint::new(txid, vout as u32)).ok_or_else(|| {
            AssetError::State(format!("Output {}:{} missing while disconnecting", txid, vout))
        })?;
    }
    for (outpoint, coin) in undo.spent.iter().rev() {
        utxo.add_coin(*outpoint, coin.clone());
    }
    Ok(())
}
