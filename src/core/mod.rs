// Asset layer core.
//
// LIFECYCLE:
// ==========
// construct -> load (or replay_from_genesis) -> serve -> shutdown
// Queries and validation are refused with DirectoryUnavailable outside the serving phase.
//
// CONCURRENCY:
// 1. validate_transaction and all queries share the read lock
// 2. connect_block / disconnect_block hold the write lock for the whole block
// 3. apply and undo form a stack: blocks are disconnected in reverse connect order
// 4. finalize_block drops a block's undo records; only call it once the block is beyond reorg depth
//
// DETERMINISM:
// Same block sequence -> same cache snapshot and state root. No randomness or system time.

pub mod asset;
pub mod name;
pub mod script;
pub mod transaction;
pub mod codec;
pub mod ledger;
pub mod directory;
pub mod validation;
pub mod cache;

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};
use crate::config::{AssetParams, CoreConfig};
use crate::core::cache::{Address, AssetCache, CacheSnapshot, MyAssetBalance};
use crate::core::directory::{paginate, DirectoryEntry, DirectoryStore, MemoryDirectory, SledDirectory};
use crate::core::ledger::{connect_transaction, disconnect_transaction, BlockUndo, Coin, CoinView, UtxoSet};
use crate::core::script::Destination;
use crate::core::transaction::{Block, OutPoint, Transaction};
use crate::core::validation::Accepted;
use crate::error::{AssetError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreStatus {
    Constructed,
    Serving,
    ShutDown,
}

/// Owned asset state with an explicit lifecycle, shared by reference between the ledger hooks and the query
/// surface.
#[derive(Debug)]
pub struct AssetCore {
    cache: RwLock<AssetCache>,
    status: RwLock<CoreStatus>,
}

impl AssetCore {
    pub fn new(params: AssetParams, directory: Box<dyn DirectoryStore>) -> Self {
        Self {
            cache: RwLock::new(AssetCache::new(params, directory)),
            status: RwLock::new(CoreStatus::Constructed),
        }
    }

    /// Builds a core from configuration: a sled directory when `directory_path` is set, memory otherwise.
    pub fn open(config: &CoreConfig) -> Result<Self> {
        config.validate()?;
        let directory: Box<dyn DirectoryStore> = match &config.directory_path {
            Some(path) => Box::new(SledDirectory::open(path, config.cache_capacity)?),
            None => Box::new(MemoryDirectory::new()),
        };
        let core = Self::new(config.params.clone(), directory);
        for address in &config.watched_addresses {
            core.watch_address(address.clone())?;
        }
        info!("Asset core constructed for network {}", config.params.network);
        Ok(core)
    }

    fn read_cache(&self) -> Result<RwLockReadGuard<'_, AssetCache>> {
        self.cache
            .read()
            .map_err(|e| AssetError::State(format!("Asset cache lock poisoned: {}", e)))
    }

    fn write_cache(&self) -> Result<RwLockWriteGuard<'_, AssetCache>> {
        self.cache
            .write()
            .map_err(|e| AssetError::State(format!("Asset cache lock poisoned: {}", e)))
    }

    pub fn status(&self) -> Result<CoreStatus> {
        self.status
            .read()
            .map(|status| *status)
            .map_err(|e| AssetError::State(format!("Status lock poisoned: {}", e)))
    }

    fn set_status(&self, next: CoreStatus) -> Result<()> {
        let mut status = self
            .status
            .write()
            .map_err(|e| AssetError::State(format!("Status lock poisoned: {}", e)))?;
        *status = next;
        Ok(())
    }

    fn ensure_serving(&self) -> Result<()> {
        match self.status()? {
            CoreStatus::Serving => Ok(()),
            other => Err(AssetError::DirectoryUnavailable(format!(
                "asset core is {:?}, not serving",
                other
            ))),
        }
    }

    pub fn params(&self) -> Result<AssetParams> {
        Ok(self.read_cache()?.params().clone())
    }

    /// Tracks unspent asset outputs paying to `address`. Register before `load` or replay.
    pub fn watch_address(&self, address: Address) -> Result<()> {
        let mut cache = self.write_cache()?;
        Destination::from_address(&address, &cache.params().address_prefixes)?;
        cache.watch_address(address);
        Ok(())
    }

    /// Loads from a persisted directory and the live UTXO set, then starts serving.
    pub fn load<I>(&self, coins: I) -> Result<()>
    where
        I: IntoIterator<Item = (OutPoint, Coin)>,
    {
        if self.status()? == CoreStatus::ShutDown {
            return Err(AssetError::State("asset core already shut down".to_string()));
        }
        let mut cache = self.write_cache()?;
        let found = cache.rebuild_from_coins(coins)?;
        let assets = cache.directory().len()?;
        drop(cache);
        self.set_status(CoreStatus::Serving)?;
        info!("Asset core serving: {} directory entries, {} asset outputs", assets, found);
        Ok(())
    }

    /// Clears everything and rebuilds by connecting `blocks` in order on top of `utxo`, then starts serving.
    pub fn replay_from_genesis<U: UtxoSet>(&self, blocks: &[Block], utxo: &mut U) -> Result<Vec<BlockUndo>> {
        if self.status()? == CoreStatus::ShutDown {
            return Err(AssetError::State("asset core already shut down".to_string()));
        }
        let mut cache = self.write_cache()?;
        cache.reset()?;
        let mut undos = Vec::with_capacity(blocks.len());
        for block in blocks {
            undos.push(Self::connect_locked(&mut cache, block, utxo)?);
        }
        drop(cache);
        self.set_status(CoreStatus::Serving)?;
        info!("Replayed {} blocks from genesis", blocks.len());
        Ok(undos)
    }

    /// Checks a candidate transaction against the current state.
    pub fn validate_transaction<V: CoinView + ?Sized>(&self, tx: &Transaction, view: &V) -> Result<Accepted> {
        self.ensure_serving()?;
        Ok(self.read_cache()?.validate(tx, view)?)
    }

    fn connect_locked<U: UtxoSet + ?Sized>(cache: &mut AssetCache, block: &Block, utxo: &mut U) -> Result<BlockUndo> {
        let mut undo = BlockUndo {
            height: block.height,
            txs: Vec::with_capacity(block.transactions.len()),
        };
        for tx in &block.transactions {
            let applied: Result<_> = match cache.apply_transaction(tx, &*utxo, block.height) {
                Ok(_) => match connect_transaction(utxo, tx, block.height) {
                    Ok(tx_undo) => Ok(tx_undo),
                    Err(e) => {
                        // connect_transaction fails before spending anything, so utxo still resolves tx's inputs
                        cache.undo_transaction(tx, &*utxo)?;
                        Err(e)
                    }
                },
                Err(e) => Err(e.into()),
            };
            match applied {
                Ok(tx_undo) => undo.txs.push(tx_undo),
                Err(e) => {
                    warn!("Connecting block {} failed, rolling back {} transactions", block.height, undo.txs.len());
                    Self::disconnect_locked(cache, block, &undo, utxo)?;
                    return Err(e);
                }
            }
        }
        Ok(undo)
    }

    fn disconnect_locked<U: UtxoSet + ?Sized>(
        cache: &mut AssetCache,
        block: &Block,
        undo: &BlockUndo,
        utxo: &mut U,
    ) -> Result<()> {
        for (tx, tx_undo) in block.transactions.iter().zip(undo.txs.iter()).rev() {
            disconnect_transaction(utxo, tx, tx_undo)?;
            cache.undo_transaction(tx, tx_undo)?;
        }
        Ok(())
    }

    /// Applies every transaction of `block` in order and keeps `utxo` in step. All or nothing: a rejected
    /// transaction rolls back the ones before it.
    pub fn connect_block<U: UtxoSet + ?Sized>(&self, block: &Block, utxo: &mut U) -> Result<BlockUndo> {
        self.ensure_serving()?;
        let mut cache = self.write_cache()?;
        let undo = Self::connect_locked(&mut cache, block, utxo)?;
        info!("Connected block {} ({} transactions)", block.height, block.transactions.len());
        Ok(undo)
    }

    /// Reverses `connect_block`, undoing transactions in reverse order.
    pub fn disconnect_block<U: UtxoSet + ?Sized>(&self, block: &Block, undo: &BlockUndo, utxo: &mut U) -> Result<()> {
        self.ensure_serving()?;
        if undo.txs.len() != block.transactions.len() || undo.height != block.height {
            return Err(AssetError::State(format!(
                "Undo data does not match block {}",
                block.height
            )));
        }
        let mut cache = self.write_cache()?;
        Self::disconnect_locked(&mut cache, block, undo, utxo)?;
        info!("Disconnected block {}", block.height);
        Ok(())
    }

    /// Marks `block` as beyond reorg depth and drops its directory undo records. A finalized block can no
    /// longer be disconnected if it minted or reissued anything.
    pub fn finalize_block(&self, block: &Block) -> Result<usize> {
        self.ensure_serving()?;
        let txids: Vec<_> = block.transactions.iter().map(|tx| tx.txid()).collect();
        let pruned = self.read_cache()?.finalize_transactions(&txids)?;
        info!("Finalized block {} ({} undo records pruned)", block.height, pruned);
        Ok(pruned)
    }

    pub fn balance_of(&self, name: &str, address: &str) -> Result<Option<u64>> {
        self.ensure_serving()?;
        Ok(self.read_cache()?.balance_of(name, address))
    }

    pub fn total_balance(&self, name: &str) -> Result<Option<u64>> {
        self.ensure_serving()?;
        Ok(self.read_cache()?.total_balance(name))
    }

    pub fn addresses_holding(&self, name: &str) -> Result<Vec<(Address, u64)>> {
        self.ensure_serving()?;
        Ok(self.read_cache()?.addresses_holding(name))
    }

    /// Holders of `name`, paginated like the directory listing.
    pub fn list_addresses_by_asset(&self, name: &str, count: Option<usize>, start: i64) -> Result<Vec<(Address, u64)>> {
        if count == Some(0) {
            return Err(AssetError::Validation("count must be positive".to_string()));
        }
        Ok(paginate(self.addresses_holding(name)?, count, start))
    }

    pub fn unspent_asset_outputs(&self, name: &str) -> Result<Vec<(OutPoint, u64)>> {
        self.ensure_serving()?;
        Ok(self.read_cache()?.unspent_asset_outputs(name))
    }

    pub fn balances_by_address(&self, address: &str) -> Result<Vec<(String, u64)>> {
        self.ensure_serving()?;
        Ok(self.read_cache()?.balances_by_address(address))
    }

    pub fn directory_page(&self, filter: &str, count: Option<usize>, start: i64) -> Result<Vec<DirectoryEntry>> {
        self.ensure_serving()?;
        Ok(self.read_cache()?.directory_page(filter, count, start)?)
    }

    pub fn my_balances(&self, filter: &str, count: Option<usize>, start: i64) -> Result<Vec<MyAssetBalance>> {
        self.ensure_serving()?;
        Ok(self.read_cache()?.my_balances(filter, count, start)?)
    }

    pub fn asset_definition(&self, name: &str) -> Result<Option<DirectoryEntry>> {
        self.ensure_serving()?;
        Ok(self.read_cache()?.asset_definition(name)?)
    }

    pub fn snapshot(&self) -> Result<CacheSnapshot> {
        Ok(self.read_cache()?.snapshot()?)
    }

    /// Flushes the directory and stops serving.
    pub fn shutdown(&self) -> Result<()> {
        let cache = self.write_cache()?;
        cache.flush()?;
        drop(cache);
        self.set_status(CoreStatus::ShutDown)?;
        info!("Asset core shut down");
        Ok(())
    }
}
