//! Durable asset directory: name → definition, with mint order and per-transaction undo records.
//!
//! The cache computes every change a transaction makes, packs the directory part into one `DirectoryBatch`
//! and commits it in a single write, so a crash never leaves half a transaction on disk.
//!
//! Two stores are provided: `MemoryDirectory` for tests and ephemeral nodes, `SledDirectory` for nodes that
//! restart without replaying the chain. Records are `bincode` encoded in a single sled tree under key prefixes
//! (`a` + name, `u` + txid, `m` + meta key).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, info};
use crate::core::asset::AssetDefinition;
use crate::core::name::{is_asset_name_valid, GrammarError};
use crate::core::transaction::TxId;
use crate::error::AssetError;

const ASSET_KEY_PREFIX: u8 = b'a';
const UNDO_KEY_PREFIX: u8 = b'u';
const NEXT_SEQUENCE_KEY: &[u8] = b"mnext_sequence";
const DIRECTORY_TREE: &str = "asset_directory";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Directory unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt directory record: {0}")]
    Corrupt(String),
}

impl From<DirectoryError> for AssetError {
    fn from(err: DirectoryError) -> Self {
        AssetError::DirectoryUnavailable(err.to_string())
    }
}

impl From<sled::Error> for DirectoryError {
    fn from(err: sled::Error) -> Self {
        DirectoryError::Unavailable(err.to_string())
    }
}

impl From<bincode::Error> for DirectoryError {
    fn from(err: bincode::Error) -> Self {
        DirectoryError::Corrupt(err.to_string())
    }
}

/// A minted asset as recorded in the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub definition: AssetDefinition,
    pub mint_height: u32,
    /// Position in mint order, starting at 0.
    pub sequence: u64,
}

/// How to reverse one directory change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectoryUndo {
    /// The entry was created by this transaction; undo deletes it.
    Minted { name: String },
    /// The entry was updated by a reissue; undo restores the previous record.
    Reissued { previous: DirectoryEntry },
}

/// All directory writes of one apply or undo.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryBatch {
    pub puts: Vec<DirectoryEntry>,
    pub deletes: Vec<String>,
    pub next_sequence: Option<u64>,
    pub undo_put: Option<(TxId, Vec<DirectoryUndo>)>,
    pub undo_delete: Option<TxId>,
}

impl DirectoryBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.puts.is_empty()
            && self.deletes.is_empty()
            && self.next_sequence.is_none()
            && self.undo_put.is_none()
            && self.undo_delete.is_none()
    }
}

/// Which names a directory listing covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryFilter {
    All,
    Prefix(String),
    Exact(String),
}

impl DirectoryFilter {
    /// `*` or empty lists everything, `PREFIX*` matches by prefix, anything else must be an exact valid name.
    pub fn parse(text: &str) -> Result<Self, GrammarError> {
        if text.is_empty() || text == "*" {
            return Ok(DirectoryFilter::All);
        }
        if let Some(prefix) = text.strip_suffix('*') {
            return Ok(DirectoryFilter::Prefix(prefix.to_string()));
        }
        if !is_asset_name_valid(text) {
            return Err(GrammarError::InvalidName(text.to_string()));
        }
        Ok(DirectoryFilter::Exact(text.to_string()))
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            DirectoryFilter::All => true,
            DirectoryFilter::Prefix(prefix) => name.starts_with(prefix.as_str()),
            DirectoryFilter::Exact(exact) => name == exact,
        }
    }
}

/// Page of `items`. `start >= 0` skips that many items; `start < 0` begins `|start|` items from the end,
/// clamped to the first item. `count = None` takes everything that remains.
pub fn paginate<T>(items: Vec<T>, count: Option<usize>, start: i64) -> Vec<T> {
    let len = items.len();
    let skip = if start >= 0 {
        usize::try_from(start).unwrap_or(usize::MAX).min(len)
    } else {
        let back = usize::try_from(start.unsigned_abs()).unwrap_or(usize::MAX);
        len.saturating_sub(back)
    };
    let take = count.unwrap_or(usize::MAX);
    items.into_iter().skip(skip).take(take).collect()
}

/// Storage behind the asset directory.
pub trait DirectoryStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<DirectoryEntry>, DirectoryError>;

    /// Entries matching `filter`, ordered by mint sequence.
    fn scan(&self, filter: &DirectoryFilter) -> Result<Vec<DirectoryEntry>, DirectoryError>;

    fn next_sequence(&self) -> Result<u64, DirectoryError>;

    fn undo_record(&self, txid: &TxId) -> Result<Option<Vec<DirectoryUndo>>, DirectoryError>;

    /// Drops the undo records of `txids`, returning how many existed. Those transactions can no longer be undone.
    fn prune_undo(&self, txids: &[TxId]) -> Result<usize, DirectoryError>;

    /// Applies all writes of `batch` at once.
    fn commit(&self, batch: DirectoryBatch) -> Result<(), DirectoryError>;

    fn len(&self) -> Result<usize, DirectoryError>;

    /// Drops every record, used before a replay from genesis.
    fn clear(&self) -> Result<(), DirectoryError>;

    fn flush(&self) -> Result<(), DirectoryError>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: BTreeMap<String, DirectoryEntry>,
    undo: HashMap<TxId, Vec<DirectoryUndo>>,
    next_sequence: u64,
}

/// Directory kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    inner: RwLock<MemoryInner>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryInner>, DirectoryError> {
        self.inner
            .read()
            .map_err(|e| DirectoryError::Unavailable(format!("Lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryInner>, DirectoryError> {
        self.inner
            .write()
            .map_err(|e| DirectoryError::Unavailable(format!("Lock poisoned: {}", e)))
    }
}

impl DirectoryStore for MemoryDirectory {
    fn get(&self, name: &str) -> Result<Option<DirectoryEntry>, DirectoryError> {
        Ok(self.read()?.entries.get(name).cloned())
    }

    fn scan(&self, filter: &DirectoryFilter) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let inner = self.read()?;
        let mut entries: Vec<DirectoryEntry> = inner
            .entries
            .values()
            .filter(|entry| filter.matches(&entry.definition.name))
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.sequence);
        Ok(entries)
    }

    fn next_sequence(&self) -> Result<u64, DirectoryError> {
        Ok(self.read()?.next_sequence)
    }

    fn undo_record(&self, txid: &TxId) -> Result<Option<Vec<DirectoryUndo>>, DirectoryError> {
        Ok(self.read()?.undo.get(txid).cloned())
    }

    fn prune_undo(&self, txids: &[TxId]) -> Result<usize, DirectoryError> {
        let mut inner = self.write()?;
        Ok(txids.iter().filter(|txid| inner.undo.remove(txid).is_some()).count())
    }

    fn commit(&self, batch: DirectoryBatch) -> Result<(), DirectoryError> {
        let mut inner = self.write()?;
        for name in batch.deletes {
            inner.entries.remove(&name);
        }
        for entry in batch.puts {
            inner.entries.insert(entry.definition.name.clone(), entry);
        }
        if let Some(next) = batch.next_sequence {
            inner.next_sequence = next;
        }
        if let Some(txid) = batch.undo_delete {
            inner.undo.remove(&txid);
        }
        if let Some((txid, records)) = batch.undo_put {
            inner.undo.insert(txid, records);
        }
        Ok(())
    }

    fn len(&self) -> Result<usize, DirectoryError> {
        Ok(self.read()?.entries.len())
    }

    fn clear(&self) -> Result<(), DirectoryError> {
        *self.write()? = MemoryInner::default();
        Ok(())
    }

    fn flush(&self) -> Result<(), DirectoryError> {
        Ok(())
    }
}

fn asset_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(name.len() + 1);
    key.push(ASSET_KEY_PREFIX);
    key.extend_from_slice(name.as_bytes());
    key
}

fn undo_key(txid: &TxId) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(UNDO_KEY_PREFIX);
    key.extend_from_slice(&txid.0);
    key
}

/// Directory persisted in sled.
pub struct SledDirectory {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledDirectory {
    pub fn open<P: AsRef<Path>>(path: P, cache_capacity: u64) -> Result<Self, DirectoryError> {
        let db = sled::Config::default()
            .path(path.as_ref())
            .cache_capacity(cache_capacity)
            .open()?;
        let tree = db.open_tree(DIRECTORY_TREE)?;
        info!("Opened asset directory at {:?} ({} entries)", path.as_ref(), tree.scan_prefix([ASSET_KEY_PREFIX]).count());
        Ok(Self { db, tree })
    }

    /// Sled database removed when dropped.
    pub fn temporary() -> Result<Self, DirectoryError> {
        let db = sled::Config::default().temporary(true).open()?;
        let tree = db.open_tree(DIRECTORY_TREE)?;
        Ok(Self { db, tree })
    }

    fn decode_entry(bytes: &[u8]) -> Result<DirectoryEntry, DirectoryError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl DirectoryStore for SledDirectory {
    fn get(&self, name: &str) -> Result<Option<DirectoryEntry>, DirectoryError> {
        match self.tree.get(asset_key(name))? {
            Some(bytes) => Ok(Some(Self::decode_entry(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan(&self, filter: &DirectoryFilter) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let prefix = match filter {
            DirectoryFilter::Exact(name) => return Ok(self.get(name)?.into_iter().collect()),
            DirectoryFilter::Prefix(prefix) => asset_key(prefix),
            DirectoryFilter::All => vec![ASSET_KEY_PREFIX],
        };
        let mut entries = Vec::new();
        for item in self.tree.scan_prefix(prefix) {
            let (_, value) = item?;
            entries.push(Self::decode_entry(&value)?);
        }
        entries.sort_by_key(|entry| entry.sequence);
        Ok(entries)
    }

    fn next_sequence(&self) -> Result<u64, DirectoryError> {
        match self.tree.get(NEXT_SEQUENCE_KEY)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| DirectoryError::Corrupt("next sequence must be 8 bytes".to_string()))?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    fn undo_record(&self, txid: &TxId) -> Result<Option<Vec<DirectoryUndo>>, DirectoryError> {
        match self.tree.get(undo_key(txid))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn prune_undo(&self, txids: &[TxId]) -> Result<usize, DirectoryError> {
        let mut writes = sled::Batch::default();
        let mut pruned = 0;
        for txid in txids {
            let key = undo_key(txid);
            if self.tree.contains_key(&key)? {
                writes.remove(key);
                pruned += 1;
            }
        }
        self.tree.apply_batch(writes)?;
        Ok(pruned)
    }

    fn commit(&self, batch: DirectoryBatch) -> Result<(), DirectoryError> {
        let mut writes = sled::Batch::default();
        for name in &batch.deletes {
            writes.remove(asset_key(name));
        }
        for entry in &batch.puts {
            writes.insert(asset_key(&entry.definition.name), bincode::serialize(entry)?);
        }
        if let Some(next) = batch.next_sequence {
            writes.insert(NEXT_SEQUENCE_KEY, &next.to_be_bytes()[..]);
        }
        if let Some(txid) = &batch.undo_delete {
            writes.remove(undo_key(txid));
        }
        if let Some((txid, records)) = &batch.undo_put {
            writes.insert(undo_key(txid), bincode::serialize(records)?);
        }
        self.tree.apply_batch(writes)?;
        debug!(
            "Directory commit: {} puts, {} deletes",
            batch.puts.len(),
            batch.deletes.len()
        );
        Ok(())
    }

    fn len(&self) -> Result<usize, DirectoryError> {
        Ok(self.tree.scan_prefix([ASSET_KEY_PREFIX]).count())
    }

    fn clear(&self) -> Result<(), DirectoryError> {
        self.tree.clear()?;
        Ok(())
    }

    fn flush(&self) -> Result<(), DirectoryError> {
        self.db.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for SledDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledDirectory").field("tree", &DIRECTORY_TREE).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::asset::COIN;

    fn entry(name: &str, sequence: u64) -> DirectoryEntry {
        DirectoryEntry {
            definition: AssetDefinition::new(name, 10 * COIN, 0, true, None),
            mint_height: 1,
            sequence,
        }
    }

    fn mint_batch(entries: &[DirectoryEntry]) -> DirectoryBatch {
        let mut batch = DirectoryBatch::new();
        batch.puts.extend(entries.iter().cloned());
        batch.next_sequence = Some(entries.len() as u64);
        batch
    }

    fn exercise_store(store: &dyn DirectoryStore) {
        let entries = [entry("ZED", 0), entry("ABC", 1), entry("ABC/SUB", 2)];
        store.commit(mint_batch(&entries)).unwrap();

        assert_eq!(store.len().unwrap(), 3);
        assert_eq!(store.next_sequence().unwrap(), 3);
        assert_eq!(store.get("ABC").unwrap(), Some(entries[1].clone()));
        assert_eq!(store.get("MISSING").unwrap(), None);

        let names: Vec<_> = store
            .scan(&DirectoryFilter::All)
            .unwrap()
            .into_iter()
            .map(|e| e.definition.name)
            .collect();
        assert_eq!(names, vec!["ZED", "ABC", "ABC/SUB"]);

        let prefixed = store.scan(&DirectoryFilter::Prefix("ABC".to_string())).unwrap();
        assert_eq!(prefixed.len(), 2);
        let exact = store.scan(&DirectoryFilter::Exact("ABC".to_string())).unwrap();
        assert_eq!(exact, vec![entries[1].clone()]);

        let txid = TxId([5u8; 32]);
        let mut undo = DirectoryBatch::new();
        undo.undo_put = Some((txid, vec![DirectoryUndo::Minted { name: "ZED".to_string() }]));
        store.commit(undo).unwrap();
        assert_eq!(
            store.undo_record(&txid).unwrap(),
            Some(vec![DirectoryUndo::Minted { name: "ZED".to_string() }])
        );

        let mut delete = DirectoryBatch::new();
        delete.deletes.push("ZED".to_string());
        delete.next_sequence = Some(2);
        delete.undo_delete = Some(txid);
        store.commit(delete).unwrap();
        assert_eq!(store.get("ZED").unwrap(), None);
        assert_eq!(store.next_sequence().unwrap(), 2);
        assert_eq!(store.undo_record(&txid).unwrap(), None);

        let kept = TxId([6u8; 32]);
        let mut record = DirectoryBatch::new();
        record.undo_put = Some((kept, vec![DirectoryUndo::Minted { name: "ABC".to_string() }]));
        store.commit(record).unwrap();
        assert_eq!(store.prune_undo(&[kept, txid]).unwrap(), 1);
        assert_eq!(store.undo_record(&kept).unwrap(), None);
        assert_eq!(store.get("ABC").unwrap(), Some(entries[1].clone()));

        store.clear().unwrap();
        assert_eq!(store.len().unwrap(), 0);
        assert_eq!(store.next_sequence().unwrap(), 0);
    }

    #[test]
    fn test_memory_directory() {
        exercise_store(&MemoryDirectory::new());
    }

    #[test]
    fn test_sled_directory() {
        exercise_store(&SledDirectory::temporary().unwrap());
    }

    #[test]
    fn test_sled_directory_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledDirectory::open(dir.path(), 1024 * 1024).unwrap();
            store.commit(mint_batch(&[entry("ABC", 0)])).unwrap();
            store.flush().unwrap();
        }
        let store = SledDirectory::open(dir.path(), 1024 * 1024).unwrap();
        assert_eq!(store.get("ABC").unwrap(), Some(entry("ABC", 0)));
        assert_eq!(store.next_sequence().unwrap(), 1);
    }

    #[test]
    fn test_filter_parse() {
        assert_eq!(DirectoryFilter::parse("*").unwrap(), DirectoryFilter::All);
        assert_eq!(DirectoryFilter::parse("").unwrap(), DirectoryFilter::All);
        assert_eq!(
            DirectoryFilter::parse("AB*").unwrap(),
            DirectoryFilter::Prefix("AB".to_string())
        );
        assert_eq!(
            DirectoryFilter::parse("ABC/SUB").unwrap(),
            DirectoryFilter::Exact("ABC/SUB".to_string())
        );
        assert!(DirectoryFilter::parse("bad name").is_err());
    }

    #[test]
    fn test_paginate() {
        let items: Vec<u32> = (0..10).collect();
        assert_eq!(paginate(items.clone(), None, 0), items);
        assert_eq!(paginate(items.clone(), Some(3), 0), vec![0, 1, 2]);
        assert_eq!(paginate(items.clone(), Some(3), 8), vec![8, 9]);
        assert!(paginate(items.clone(), None, 10).is_empty());
        assert!(paginate(items.clone(), None, 50).is_empty());
        assert_eq!(paginate(items.clone(), None, -2), vec![8, 9]);
        assert_eq!(paginate(items.clone(), Some(1), -2), vec![8]);
        assert_eq!(paginate(items.clone(), None, -50), items);
        assert_eq!(paginate(items, None, i64::MIN).len(), 10);
    }
}
