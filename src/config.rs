//! Network parameters and node configuration.
//!
//! `AssetParams` carries everything consensus-relevant for the asset layer: address prefixes and, per mint kind,
//! the burn destination and exact burn amount. `CoreConfig` adds the node-local settings (directory location,
//! watched addresses). Both load from JSON.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use crate::core::asset::COIN;
use crate::core::name::AssetType;
use crate::core::script::{AddressPrefixes, Destination, Hash160, HASH160_LEN};
use crate::error::AssetError;

pub const ISSUE_ROOT_BURN_AMOUNT: u64 = 500 * COIN;
pub const ISSUE_SUB_BURN_AMOUNT: u64 = 100 * COIN;
pub const ISSUE_UNIQUE_BURN_AMOUNT: u64 = 5 * COIN;
pub const REISSUE_BURN_AMOUNT: u64 = 100 * COIN;

pub const DEFAULT_CACHE_CAPACITY: u64 = 64 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for AssetError {
    fn from(err: ConfigError) -> Self {
        AssetError::Config(err.to_string())
    }
}

/// Where and how much base currency a mint or reissue must burn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnRule {
    pub destination: Destination,
    pub amount: u64,
}

impl BurnRule {
    /// Unspendable destination derived from a fixed tag, identical on every node.
    fn tagged(tag: &str, amount: u64) -> Self {
        let digest = Sha256::digest(tag.as_bytes());
        let mut hash = [0u8; HASH160_LEN];
        hash.copy_from_slice(&digest[..HASH160_LEN]);
        Self {
            destination: Destination::KeyHash(Hash160(hash)),
            amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetParams {
    pub network: String,
    pub address_prefixes: AddressPrefixes,
    pub issue_root_burn: BurnRule,
    pub issue_sub_burn: BurnRule,
    pub issue_unique_burn: BurnRule,
    pub reissue_burn: BurnRule,
}

impl AssetParams {
    pub fn mainnet() -> Self {
        Self::with_network(
            "main",
            AddressPrefixes {
                pubkey_hash: 63,
                script_hash: 125,
            },
        )
    }

    pub fn regtest() -> Self {
        Self::with_network(
            "regtest",
            AddressPrefixes {
                pubkey_hash: 111,
                script_hash: 196,
            },
        )
    }

    fn with_network(network: &str, address_prefixes: AddressPrefixes) -> Self {
        Self {
            network: network.to_string(),
            address_prefixes,
            issue_root_burn: BurnRule::tagged(&format!("{}/issue-root", network), ISSUE_ROOT_BURN_AMOUNT),
            issue_sub_burn: BurnRule::tagged(&format!("{}/issue-sub", network), ISSUE_SUB_BURN_AMOUNT),
            issue_unique_burn: BurnRule::tagged(&format!("{}/issue-unique", network), ISSUE_UNIQUE_BURN_AMOUNT),
            reissue_burn: BurnRule::tagged(&format!("{}/reissue", network), REISSUE_BURN_AMOUNT),
        }
    }

    /// Parameters for a named network (`main` or `regtest`).
    pub fn for_network(network: &str) -> Result<Self, ConfigError> {
        match network {
            "main" | "mainnet" => Ok(Self::mainnet()),
            "regtest" => Ok(Self::regtest()),
            other => Err(ConfigError::Invalid(format!("Unknown network: {}", other))),
        }
    }

    /// Burn rule for minting an asset of `asset_type`; `None` for types that cannot be minted directly.
    pub fn mint_burn(&self, asset_type: AssetType) -> Option<&BurnRule> {
        match asset_type {
            AssetType::Root => Some(&self.issue_root_burn),
            AssetType::Sub => Some(&self.issue_sub_burn),
            AssetType::Unique => Some(&self.issue_unique_burn),
            _ => None,
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl Default for AssetParams {
    fn default() -> Self {
        Self::mainnet()
    }
}

fn default_cache_capacity() -> u64 {
    DEFAULT_CACHE_CAPACITY
}

/// Node configuration. Without a `directory_path` the directory lives in memory and is rebuilt by replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub params: AssetParams,
    #[serde(default)]
    pub directory_path: Option<PathBuf>,
    /// Sled page cache size in bytes.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
    /// Addresses whose unspent asset outputs are tracked individually.
    #[serde(default)]
    pub watched_addresses: Vec<String>,
}

impl CoreConfig {
    pub fn in_memory(params: AssetParams) -> Self {
        Self {
            params,
            directory_path: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            watched_addresses: Vec::new(),
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_capacity == 0 {
            return Err(ConfigError::Invalid("cache_capacity must be non-zero".to_string()));
        }
        for address in &self.watched_addresses {
            Destination::from_address(address, &self.params.address_prefixes)
                .map_err(|e| ConfigError::Invalid(format!("watched address {}: {}", address, e)))?;
        }
        Ok(())
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::in_memory(AssetParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_burn_amounts() {
        let params = AssetParams::mainnet();
        assert_eq!(params.mint_burn(AssetType::Root).unwrap().amount, 500 * COIN);
        assert_eq!(params.mint_burn(AssetType::Sub).unwrap().amount, 100 * COIN);
        assert_eq!(params.mint_burn(AssetType::Unique).unwrap().amount, 5 * COIN);
        assert_eq!(params.reissue_burn.amount, 100 * COIN);
        assert!(params.mint_burn(AssetType::Owner).is_none());
        assert!(params.mint_burn(AssetType::Channel).is_none());
    }

    #[test]
    fn test_burn_destinations_distinct_and_stable() {
        let params = AssetParams::mainnet();
        let dests = [
            params.issue_root_burn.destination,
            params.issue_sub_burn.destination,
            params.issue_unique_burn.destination,
            params.reissue_burn.destination,
        ];
        for (i, a) in dests.iter().enumerate() {
            for b in &dests[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(params, AssetParams::mainnet());
        assert_ne!(params.issue_root_burn, AssetParams::regtest().issue_root_burn);
    }

    #[test]
    fn test_for_network() {
        assert_eq!(AssetParams::for_network("main").unwrap(), AssetParams::mainnet());
        assert_eq!(AssetParams::for_network("regtest").unwrap(), AssetParams::regtest());
        assert!(AssetParams::for_network("moon").is_err());
    }

    #[test]
    fn test_params_json_round_trip() {
        let params = AssetParams::regtest();
        let json = serde_json::to_string(&params).unwrap();
        let back: AssetParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn test_core_config_defaults() {
        let config: CoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.params, AssetParams::mainnet());
        assert_eq!(config.directory_path, None);
        assert_eq!(config.cache_capacity, DEFAULT_CACHE_CAPACITY);
        assert!(config.watched_addresses.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_core_config_from_file() {
        let params = AssetParams::regtest();
        let address = Destination::KeyHash(Hash160([3u8; 20])).to_address(&params.address_prefixes);
        let config = CoreConfig {
            params,
            directory_path: Some(PathBuf::from("/tmp/assets")),
            cache_capacity: 1024,
            watched_addresses: vec![address],
        };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&config).unwrap().as_bytes()).unwrap();
        assert_eq!(CoreConfig::from_json_file(file.path()).unwrap(), config);
    }

    #[test]
    fn test_core_config_rejects_bad_address() {
        let mut config = CoreConfig::default();
        config.watched_addresses.push("not-an-address".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = AssetParams::from_json_file(Path::new("/nonexistent/params.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
