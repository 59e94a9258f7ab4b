//! Asset state cache: balances, holders, watched unspent outputs and the asset directory.
//!
//! # Consistency
//! For every asset name the per-address balances sum to the live unspent amount of that name, and an address
//! appears among the holders of a name iff its balance is non-zero. Zero balances and empty sets are removed,
//! never stored, so `undo_transaction(apply_transaction(tx))` restores the cache bit for bit.
//!
//! # Atomicity
//! `apply_transaction` and `undo_transaction` compute every change first (balances, unspent outputs, one
//! directory batch) and only then commit. A failure before the directory commit leaves the cache untouched.
//!
//! # Snapshots
//! The in-memory maps sit behind `Arc`; a snapshot is O(1) and updates copy on write.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};
use crate::config::AssetParams;
use crate::core::asset::AssetDefinition;
use crate::core::codec::{decode_script, AssetScript, CodecError};
use crate::core::directory::{
    paginate, DirectoryBatch, DirectoryEntry, DirectoryError, DirectoryFilter, DirectoryStore, DirectoryUndo,
};
use crate::core::ledger::{Coin, CoinView};
use crate::core::name::GrammarError;
use crate::core::transaction::{OutPoint, Transaction, TxId};
use crate::core::validation::{check_conservation, Accepted, ConservationViolation, SupplyChange};
use crate::error::AssetError;

/// Base58check address string.
pub type Address = String;

/// Errors produced by cache updates and queries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Transaction {txid} rejected: {violation}")]
    Rejected {
        txid: String,
        violation: ConservationViolation,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Grammar(#[from] GrammarError),

    #[error("Count must be positive")]
    ZeroCount,

    #[error("Cache inconsistent: {0}")]
    Inconsistent(String),
}

impl From<CacheError> for AssetError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Rejected { violation, .. } => violation.into(),
            CacheError::Codec(e) => e.into(),
            CacheError::Directory(e) => e.into(),
            CacheError::Grammar(e) => e.into(),
            other => AssetError::Cache(other.to_string()),
        }
    }
}

/// One asset leg located at an outpoint.
#[derive(Debug, Clone)]
struct LocatedLeg {
    outpoint: OutPoint,
    name: String,
    address: Address,
    amount: u64,
}

/// Every change one apply or undo makes, computed before anything is committed.
#[derive(Debug, Default)]
struct PendingChanges {
    balances: BTreeMap<(String, Address), u64>,
    unspent_remove: Vec<(String, OutPoint)>,
    unspent_add: Vec<(String, OutPoint, u64)>,
    directory: DirectoryBatch,
}

/// Balance of an asset held by watched addresses, with the outputs holding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MyAssetBalance {
    pub name: String,
    pub balance: u64,
    pub outpoints: Vec<OutPoint>,
}

/// Immutable view of the whole cache.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    balances: Arc<BTreeMap<(String, Address), u64>>,
    holders: Arc<BTreeMap<String, BTreeSet<Address>>>,
    my_unspent: Arc<BTreeMap<String, BTreeMap<OutPoint, u64>>>,
    directory: Vec<DirectoryEntry>,
    next_sequence: u64,
}

impl CacheSnapshot {
    pub fn balances(&self) -> &BTreeMap<(String, Address), u64> {
        &self.balances
    }

    pub fn directory(&self) -> &[DirectoryEntry] {
        &self.directory
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty() && self.my_unspent.is_empty() && self.directory.is_empty()
    }

    /// Deterministic digest of everything the snapshot holds.
    pub fn compute_state_root(&self) -> String {
        let mut hasher = Sha256::new();
        for ((name, address), balance) in self.balances.iter() {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(address.as_bytes());
            hasher.update(balance.to_le_bytes());
        }
        for (name, outputs) in self.my_unspent.iter() {
            hasher.update(name.as_bytes());
            for (outpoint, amount) in outputs {
                hasher.update(outpoint.txid.0);
                hasher.update(outpoint.vout.to_le_bytes());
                hasher.update(amount.to_le_bytes());
            }
        }
        for entry in &self.directory {
            let definition = &entry.definition;
            hasher.update(definition.name.as_bytes());
            hasher.update(definition.amount.to_le_bytes());
            hasher.update([definition.units, u8::from(definition.reissuable)]);
            if let Some(hash) = &definition.content_hash {
                hasher.update(hash.as_bytes());
            }
            hasher.update(entry.mint_height.to_le_bytes());
            hasher.update(entry.sequence.to_le_bytes());
        }
        hasher.update(self.next_sequence.to_le_bytes());
        hex::encode(hasher.finalize())
    }
}

impl PartialEq for CacheSnapshot {
    fn eq(&self, other: &Self) -> bool {
        *self.balances == *other.balances
            && *self.holders == *other.holders
            && *self.my_unspent == *other.my_unspent
            && self.directory == other.directory
            && self.next_sequence == other.next_sequence
    }
}

impl Eq for CacheSnapshot {}

pub struct AssetCache {
    params: AssetParams,
    directory: Box<dyn DirectoryStore>,
    balances: Arc<BTreeMap<(String, Address), u64>>,
    holders: Arc<BTreeMap<String, BTreeSet<Address>>>,
    /// Unspent asset outputs paying to watched addresses.
    my_unspent: Arc<BTreeMap<String, BTreeMap<OutPoint, u64>>>,
    watched: BTreeSet<Address>,
}

impl AssetCache {
    pub fn new(params: AssetParams, directory: Box<dyn DirectoryStore>) -> Self {
        Self {
            params,
            directory,
            balances: Arc::new(BTreeMap::new()),
            holders: Arc::new(BTreeMap::new()),
            my_unspent: Arc::new(BTreeMap::new()),
            watched: BTreeSet::new(),
        }
    }

    pub fn params(&self) -> &AssetParams {
        &self.params
    }

    pub fn directory(&self) -> &dyn DirectoryStore {
        self.directory.as_ref()
    }

    /// Tracks unspent outputs paying to `address` from now on.
    pub fn watch_address(&mut self, address: Address) {
        self.watched.insert(address);
    }

    pub fn is_watched(&self, address: &str) -> bool {
        self.watched.contains(address)
    }

    /// Runs the conservation check against the current directory.
    pub fn validate<V: CoinView + ?Sized>(&self, tx: &Transaction, view: &V) -> Result<Accepted, CacheError> {
        check_conservation(tx, view, self.directory.as_ref(), &self.params).map_err(|violation| {
            CacheError::Rejected {
                txid: tx.txid().to_hex(),
                violation,
            }
        })
    }

    fn output_legs(&self, tx: &Transaction) -> Result<Vec<LocatedLeg>, CacheError> {
        let txid = tx.txid();
        let mut legs = Vec::new();
        for (vout, output) in tx.outputs.iter().enumerate() {
            let decoded = decode_script(&output.script)?;
            if let Some(leg) = decoded.leg() {
                legs.push(LocatedLeg {
                    outpoint: OutPoint::new(txid, vout as u32),
                    name: leg.name.to_string(),
                    address: leg.destination.to_address(&self.params.address_prefixes),
                    amount: leg.amount,
                });
            }
        }
        Ok(legs)
    }

    fn input_legs<V: CoinView + ?Sized>(&self, tx: &Transaction, view: &V) -> Result<Vec<LocatedLeg>, CacheError> {
        let mut legs = Vec::new();
        if tx.is_coinbase() {
            return Ok(legs);
        }
        for input in &tx.inputs {
            let coin = view.coin(&input.prevout).ok_or_else(|| {
                CacheError::Inconsistent(format!("spent coin {} not resolvable", input.prevout))
            })?;
            let decoded = decode_script(&coin.output.script)?;
            if let Some(leg) = decoded.leg() {
                legs.push(LocatedLeg {
                    outpoint: input.prevout,
                    name: leg.name.to_string(),
                    address: leg.destination.to_address(&self.params.address_prefixes),
                    amount: leg.amount,
                });
            }
        }
        Ok(legs)
    }

    /// New balances after removing `debits` and adding `credits`. Fails on underflow or overflow.
    fn resolve_balances(
        &self,
        debits: &[LocatedLeg],
        credits: &[LocatedLeg],
    ) -> Result<BTreeMap<(String, Address), u64>, CacheError> {
        let mut deltas: BTreeMap<(String, Address), i128> = BTreeMap::new();
        for leg in debits {
            *deltas.entry((leg.name.clone(), leg.address.clone())).or_insert(0) -= i128::from(leg.amount);
        }
        for leg in credits {
            *deltas.entry((leg.name.clone(), leg.address.clone())).or_insert(0) += i128::from(leg.amount);
        }
        let mut resolved = BTreeMap::new();
        for (key, delta) in deltas {
            let current = i128::from(self.balances.get(&key).copied().unwrap_or(0));
            let next = u64::try_from(current + delta).map_err(|_| {
                CacheError::Inconsistent(format!(
                    "balance of {} at {} would become {}",
                    key.0,
                    key.1,
                    current + delta
                ))
            })?;
            resolved.insert(key, next);
        }
        Ok(resolved)
    }

    /// Watched legs worth tracking. Zero-amount outputs (e.g. a zero reissue) hold nothing.
    fn watched_outputs(&self, legs: &[LocatedLeg]) -> Vec<(String, OutPoint, u64)> {
        legs.iter()
            .filter(|leg| leg.amount > 0 && self.watched.contains(&leg.address))
            .map(|leg| (leg.name.clone(), leg.outpoint, leg.amount))
            .collect()
    }

    fn mint_batch(&self, tx: &Transaction, accepted: &Accepted, height: u32) -> Result<DirectoryBatch, CacheError> {
        let mut batch = DirectoryBatch::new();
        let mut undo = Vec::new();
        match &accepted.supply {
            Some(SupplyChange::Mint { definition, owner }) => {
                let mut sequence = self.directory.next_sequence()?;
                batch.puts.push(DirectoryEntry {
                    definition: definition.clone(),
                    mint_height: height,
                    sequence,
                });
                undo.push(DirectoryUndo::Minted {
                    name: definition.name.clone(),
                });
                sequence += 1;
                if let Some(owner) = owner {
                    batch.puts.push(DirectoryEntry {
                        definition: AssetDefinition::owner(owner.clone()),
                        mint_height: height,
                        sequence,
                    });
                    undo.push(DirectoryUndo::Minted { name: owner.clone() });
                    sequence += 1;
                }
                batch.next_sequence = Some(sequence);
            }
            Some(SupplyChange::Reissue { reissue, .. }) => {
                let previous = self.directory.get(&reissue.name)?.ok_or_else(|| {
                    CacheError::Inconsistent(format!("reissued asset {} missing from directory", reissue.name))
                })?;
                let definition = reissue.apply_to(&previous.definition).ok_or_else(|| {
                    CacheError::Inconsistent(format!(
                        "reissue of {} by {} overflows supply {}",
                        reissue.name, reissue.amount, previous.definition.amount
                    ))
                })?;
                batch.puts.push(DirectoryEntry {
                    definition,
                    ..previous.clone()
                });
                undo.push(DirectoryUndo::Reissued { previous });
            }
            None => return Ok(batch),
        }
        batch.undo_put = Some((tx.txid(), undo));
        Ok(batch)
    }

    fn creates_entries(&self, tx: &Transaction) -> Result<bool, CacheError> {
        for output in &tx.outputs {
            if matches!(
                decode_script(&output.script)?,
                AssetScript::Mint { .. } | AssetScript::Reissue { .. } | AssetScript::OwnerMint { .. }
            ) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn undo_batch(&self, tx: &Transaction) -> Result<DirectoryBatch, CacheError> {
        let mut batch = DirectoryBatch::new();
        let txid = tx.txid();
        let records = match self.directory.undo_record(&txid)? {
            Some(records) => records,
            None if self.creates_entries(tx)? => {
                return Err(CacheError::Inconsistent(format!("undo record for {} was pruned", txid)));
            }
            None => return Ok(batch),
        };
        let mut rewind_to: Option<u64> = None;
        for record in records.into_iter().rev() {
            match record {
                DirectoryUndo::Minted { name } => {
                    let entry = self.directory.get(&name)?.ok_or_else(|| {
                        CacheError::Inconsistent(format!("minted asset {} missing from directory", name))
                    })?;
                    rewind_to = Some(rewind_to.map_or(entry.sequence, |s| s.min(entry.sequence)));
                    batch.deletes.push(name);
                }
                DirectoryUndo::Reissued { previous } => batch.puts.push(previous),
            }
        }
        batch.next_sequence = rewind_to;
        batch.undo_delete = Some(txid);
        Ok(batch)
    }

    fn commit(&mut self, changes: PendingChanges) -> Result<(), CacheError> {
        if !changes.directory.is_empty() {
            self.directory.commit(changes.directory)?;
        }

        let balances = Arc::make_mut(&mut self.balances);
        let holders = Arc::make_mut(&mut self.holders);
        for ((name, address), value) in changes.balances {
            if value == 0 {
                balances.remove(&(name.clone(), address.clone()));
                if let Some(set) = holders.get_mut(&name) {
                    set.remove(&address);
                    if set.is_empty() {
                        holders.remove(&name);
                    }
                }
            } else {
                holders.entry(name.clone()).or_default().insert(address.clone());
                balances.insert((name, address), value);
            }
        }

        let my_unspent = Arc::make_mut(&mut self.my_unspent);
        for (name, outpoint) in changes.unspent_remove {
            if let Some(outputs) = my_unspent.get_mut(&name) {
                outputs.remove(&outpoint);
                if outputs.is_empty() {
                    my_unspent.remove(&name);
                }
            }
        }
        for (name, outpoint, amount) in changes.unspent_add {
            my_unspent.entry(name).or_default().insert(outpoint, amount);
        }
        Ok(())
    }

    /// Applies an accepted transaction connected at `height`. `view` must still resolve the coins `tx` spends.
    ///
    /// The transaction is re-validated; a transaction that fails the check is a caller error and is rejected
    /// without touching the cache.
    pub fn apply_transaction<V: CoinView + ?Sized>(
        &mut self,
        tx: &Transaction,
        view: &V,
        height: u32,
    ) -> Result<Accepted, CacheError> {
        let accepted = self.validate(tx, view).map_err(|e| {
            error!("Refusing to apply transaction at height {}: {}", height, e);
            e
        })?;
        if !accepted.touches_assets() {
            return Ok(accepted);
        }

        let spent = self.input_legs(tx, view)?;
        let created = self.output_legs(tx)?;
        let changes = PendingChanges {
            balances: self.resolve_balances(&spent, &created)?,
            unspent_remove: self
                .watched_outputs(&spent)
                .into_iter()
                .map(|(name, outpoint, _)| (name, outpoint))
                .collect(),
            unspent_add: self.watched_outputs(&created),
            directory: self.mint_batch(tx, &accepted, height)?,
        };
        self.commit(changes)?;

        match &accepted.supply {
            Some(SupplyChange::Mint { definition, .. }) => info!(
                "Minted asset {} ({} units, amount {}) at height {}",
                definition.name, definition.units, definition.amount, height
            ),
            Some(SupplyChange::Reissue { reissue, .. }) => info!(
                "Reissued asset {} (+{}) at height {}",
                reissue.name, reissue.amount, height
            ),
            None => {}
        }
        debug!("Applied transaction {} ({} assets moved)", tx.txid(), accepted.moved.len());
        Ok(accepted)
    }

    /// Reverses `apply_transaction`. Must be called in reverse apply order; `view` resolves the coins `tx`
    /// spent (e.g. the block's undo data).
    pub fn undo_transaction<V: CoinView + ?Sized>(&mut self, tx: &Transaction, view: &V) -> Result<(), CacheError> {
        let created = self.output_legs(tx)?;
        let spent = self.input_legs(tx, view)?;
        let directory = self.undo_batch(tx)?;
        if created.is_empty() && spent.is_empty() && directory.is_empty() {
            return Ok(());
        }

        let changes = PendingChanges {
            balances: self.resolve_balances(&created, &spent)?,
            unspent_remove: self
                .watched_outputs(&created)
                .into_iter()
                .map(|(name, outpoint, _)| (name, outpoint))
                .collect(),
            unspent_add: self.watched_outputs(&spent),
            directory,
        };
        self.commit(changes)?;
        debug!("Undid transaction {}", tx.txid());
        Ok(())
    }

    /// Drops all derived state and the directory, ahead of a replay.
    pub fn reset(&mut self) -> Result<(), CacheError> {
        self.directory.clear()?;
        self.balances = Arc::new(BTreeMap::new());
        self.holders = Arc::new(BTreeMap::new());
        self.my_unspent = Arc::new(BTreeMap::new());
        info!("Asset cache reset");
        Ok(())
    }

    /// Rebuilds balances and watched outputs from the live UTXO set, keeping the durable directory.
    pub fn rebuild_from_coins<I>(&mut self, coins: I) -> Result<usize, CacheError>
    where
        I: IntoIterator<Item = (OutPoint, Coin)>,
    {
        let mut balances: BTreeMap<(String, Address), u64> = BTreeMap::new();
        let mut holders: BTreeMap<String, BTreeSet<Address>> = BTreeMap::new();
        let mut my_unspent: BTreeMap<String, BTreeMap<OutPoint, u64>> = BTreeMap::new();
        let mut found = 0usize;
        for (outpoint, coin) in coins {
            let decoded = decode_script(&coin.output.script)?;
            let leg = match decoded.leg() {
                Some(leg) if leg.amount > 0 => leg,
                _ => continue,
            };
            let address = leg.destination.to_address(&self.params.address_prefixes);
            let balance = balances.entry((leg.name.to_string(), address.clone())).or_insert(0);
            *balance = balance.checked_add(leg.amount).ok_or_else(|| {
                CacheError::Inconsistent(format!("balance of {} at {} overflows", leg.name, address))
            })?;
            if self.watched.contains(&address) {
                my_unspent
                    .entry(leg.name.to_string())
                    .or_default()
                    .insert(outpoint, leg.amount);
            }
            holders.entry(leg.name.to_string()).or_default().insert(address);
            found += 1;
        }
        self.balances = Arc::new(balances);
        self.holders = Arc::new(holders);
        self.my_unspent = Arc::new(my_unspent);
        info!("Rebuilt asset balances from {} unspent asset outputs", found);
        Ok(found)
    }

    /// Drops directory undo records for transactions buried below reorg depth. They can no longer be undone.
    pub fn finalize_transactions(&self, txids: &[TxId]) -> Result<usize, CacheError> {
        let pruned = self.directory.prune_undo(txids)?;
        debug!("Pruned {} directory undo records", pruned);
        Ok(pruned)
    }

    pub fn flush(&self) -> Result<(), CacheError> {
        Ok(self.directory.flush()?)
    }

    pub fn balance_of(&self, name: &str, address: &str) -> Option<u64> {
        self.balances.get(&(name.to_string(), address.to_string())).copied()
    }

    /// Sum of all balances of `name`, `None` when nobody holds it.
    pub fn total_balance(&self, name: &str) -> Option<u64> {
        let holders = self.holders.get(name)?;
        Some(
            holders
                .iter()
                .filter_map(|address| self.balance_of(name, address))
                .sum(),
        )
    }

    /// Holders of `name` with their balances, ordered by address.
    pub fn addresses_holding(&self, name: &str) -> Vec<(Address, u64)> {
        self.holders
            .get(name)
            .map(|holders| {
                holders
                    .iter()
                    .filter_map(|address| self.balance_of(name, address).map(|b| (address.clone(), b)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Unspent outputs carrying `name` that pay to watched addresses.
    pub fn unspent_asset_outputs(&self, name: &str) -> Vec<(OutPoint, u64)> {
        self.my_unspent
            .get(name)
            .map(|outputs| outputs.iter().map(|(o, a)| (*o, *a)).collect())
            .unwrap_or_default()
    }

    /// Assets held by `address`, ordered by name.
    pub fn balances_by_address(&self, address: &str) -> Vec<(String, u64)> {
        self.balances
            .iter()
            .filter(|((_, holder), _)| holder == address)
            .map(|((name, _), balance)| (name.clone(), *balance))
            .collect()
    }

    /// Directory listing in mint order.
    pub fn directory_page(
        &self,
        filter: &str,
        count: Option<usize>,
        start: i64,
    ) -> Result<Vec<DirectoryEntry>, CacheError> {
        if count == Some(0) {
            return Err(CacheError::ZeroCount);
        }
        let filter = DirectoryFilter::parse(filter)?;
        let entries = self.directory.scan(&filter)?;
        Ok(paginate(entries, count, start))
    }

    /// Balances held by watched addresses, ordered by name.
    pub fn my_balances(
        &self,
        filter: &str,
        count: Option<usize>,
        start: i64,
    ) -> Result<Vec<MyAssetBalance>, CacheError> {
        if count == Some(0) {
            return Err(CacheError::ZeroCount);
        }
        let filter = DirectoryFilter::parse(filter)?;
        let balances: Vec<MyAssetBalance> = self
            .my_unspent
            .iter()
            .filter(|(name, _)| filter.matches(name))
            .map(|(name, outputs)| MyAssetBalance {
                name: name.clone(),
                balance: outputs.values().sum(),
                outpoints: outputs.keys().copied().collect(),
            })
            .collect();
        Ok(paginate(balances, count, start))
    }

    pub fn asset_definition(&self, name: &str) -> Result<Option<DirectoryEntry>, CacheError> {
        Ok(self.directory.get(name)?)
    }

    pub fn snapshot(&self) -> Result<CacheSnapshot, CacheError> {
        Ok(CacheSnapshot {
            balances: Arc::clone(&self.balances),
            holders: Arc::clone(&self.holders),
            my_unspent: Arc::clone(&self.my_unspent),
            directory: self.directory.scan(&DirectoryFilter::All)?,
            next_sequence: self.directory.next_sequence()?,
        })
    }
}

impl std::fmt::Debug for AssetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetCache")
            .field("network", &self.params.network)
            .field("balances", &self.balances.len())
            .field("watched", &self.watched.len())
            .finish()
    }
}
