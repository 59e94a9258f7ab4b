pub mod config;
pub mod utils;
pub mod error;
pub mod core;

pub use error::{AssetError, Result};
pub use config::{AssetParams, BurnRule, CoreConfig};
pub use utils::{format_amount, parse_amount};

// Core API exports
pub use core::{AssetCore, CoreStatus};
pub use core::asset::{
    AssetDefinition,
    AssetReissue,
    AssetTransfer,
    ContentHash,
    COIN,
    MAX_MONEY,
    MAX_UNITS,
    OWNER_ASSET_AMOUNT,
    UNIQUE_ASSET_AMOUNT,
};
pub use core::name::{
    classify,
    asset_type_of,
    is_asset_name_valid,
    is_owner_name,
    owner_name,
    parent_name,
    AssetType,
    GrammarError,
};
pub use core::script::{AddressPrefixes, Destination, Hash160, Script};
pub use core::codec::{
    decode_script,
    build_mint_script,
    build_reissue_script,
    build_transfer_script,
    build_owner_script,
    issue_outputs,
    reissue_outputs,
    AssetScript,
    CodecError,
};
pub use core::transaction::{Block, OutPoint, Transaction, TxId, TxIn, TxOut};
pub use core::ledger::{BlockUndo, Coin, CoinView, CoinsCache, TxUndo, UtxoSet};
pub use core::directory::{
    DirectoryEntry,
    DirectoryError,
    DirectoryFilter,
    DirectoryStore,
    MemoryDirectory,
    SledDirectory,
};
pub use core::validation::{check_conservation, Accepted, ConservationViolation, SupplyChange};
pub use core::cache::{Address, AssetCache, CacheError, CacheSnapshot, MyAssetBalance};
