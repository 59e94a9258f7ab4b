//! Per-transaction conservation and supply authorisation.
//!
//! # Conservation
//! Every asset leg on a spent output counts `+amount`, every transfer output counts `-amount`; per asset name
//! the sum must be exactly zero. Mint, reissue and owner-mint outputs create supply and are exempt from the sum;
//! once created they count like any other leg when spent.
//!
//! # Supply authorisation
//! Checked independently of the sum:
//! - at most one mint or reissue output per transaction
//! - a mint names an unknown asset, pays the exact burn for its type, carries the owner-mint output (roots and
//!   subs) and spends the parent's owner token (subs and uniques)
//! - an owner-mint output always comes with its asset's mint
//! - a reissue names a reissuable asset, spends its owner token, pays the reissue burn and stays within
//!   `MAX_MONEY` and the asset's units
//! - coinbase transactions carry no asset scripts
//!
//! The check is a pure function of the transaction, the spent coins and the directory; calling it twice gives
//! the same answer.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use crate::config::{AssetParams, BurnRule};
use crate::core::asset::{
    check_amount_with_units, AssetDefinition, AssetReissue, MAX_MONEY, OWNER_UNITS,
};
use crate::core::codec::{decode_script, AssetScript, CodecError};
use crate::core::directory::{DirectoryError, DirectoryStore};
use crate::core::ledger::CoinView;
use crate::core::name::{asset_type_of, is_owner_name, owner_name, parent_name, AssetType, OWNER_TAG};
use crate::core::transaction::{OutPoint, Transaction};
use crate::error::AssetError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConservationViolation {
    #[error("Amounts do not balance for asset {asset}: inputs {input}, outputs {output}")]
    AmountMismatch { asset: String, input: u128, output: u128 },

    #[error("Unauthorized supply change for asset {asset}: {reason}")]
    UnauthorizedSupplyChange { asset: String, reason: String },

    #[error("Malformed asset script at {location}: {error}")]
    Malformed { location: String, error: CodecError },

    #[error("Input {0} is not an unspent output")]
    MissingInput(OutPoint),

    #[error("Input {0} is spent more than once")]
    DuplicateInput(OutPoint),

    #[error("Unknown asset {0}")]
    UnknownAsset(String),

    #[error("Asset {0} already exists")]
    AssetAlreadyExists(String),

    #[error("Invalid amount for asset {asset}: {reason}")]
    InvalidAmount { asset: String, reason: String },

    #[error("Asset directory unavailable: {0}")]
    DirectoryUnavailable(String),
}

impl From<DirectoryError> for ConservationViolation {
    fn from(err: DirectoryError) -> Self {
        ConservationViolation::DirectoryUnavailable(err.to_string())
    }
}

impl From<ConservationViolation> for AssetError {
    fn from(err: ConservationViolation) -> Self {
        match err {
            ConservationViolation::DirectoryUnavailable(reason) => AssetError::DirectoryUnavailable(reason),
            other => AssetError::Conservation(other.to_string()),
        }
    }
}

/// Read access to minted asset definitions.
pub trait AssetLookup {
    fn asset_definition(&self, name: &str) -> Result<Option<AssetDefinition>, DirectoryError>;
}

impl<D: DirectoryStore + ?Sized> AssetLookup for D {
    fn asset_definition(&self, name: &str) -> Result<Option<AssetDefinition>, DirectoryError> {
        Ok(self.get(name)?.map(|entry| entry.definition))
    }
}

/// New supply created by an accepted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SupplyChange {
    Mint {
        definition: AssetDefinition,
        /// Owner token minted alongside (roots and subs).
        owner: Option<String>,
    },
    Reissue {
        reissue: AssetReissue,
        previous: AssetDefinition,
    },
}

/// Outcome of a successful check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Accepted {
    /// Units moved per asset name (sum of input legs).
    pub moved: BTreeMap<String, u128>,
    pub supply: Option<SupplyChange>,
}

impl Accepted {
    pub fn touches_assets(&self) -> bool {
        !self.moved.is_empty() || self.supply.is_some()
    }
}

fn unauthorized(asset: &str, reason: impl Into<String>) -> ConservationViolation {
    ConservationViolation::UnauthorizedSupplyChange {
        asset: asset.to_string(),
        reason: reason.into(),
    }
}

/// Decoded outputs of a transaction, split by operation.
#[derive(Default)]
struct OutputLegs<'a> {
    transfers: BTreeMap<&'a str, u128>,
    mints: Vec<&'a AssetDefinition>,
    reissues: Vec<&'a AssetReissue>,
    owner_mints: Vec<&'a str>,
}

impl<'a> OutputLegs<'a> {
    fn collect(decoded: &'a [AssetScript]) -> Self {
        let mut legs = Self::default();
        for script in decoded {
            match script {
                AssetScript::Transfer { transfer, .. } => {
                    *legs.transfers.entry(transfer.name.as_str()).or_insert(0) += u128::from(transfer.amount);
                }
                AssetScript::Mint { definition, .. } => legs.mints.push(definition),
                AssetScript::Reissue { reissue, .. } => legs.reissues.push(reissue),
                AssetScript::OwnerMint { name, .. } => legs.owner_mints.push(name),
                AssetScript::NotAnAsset => {}
            }
        }
        legs
    }

    fn has_assets(&self) -> bool {
        !self.transfers.is_empty() || !self.mints.is_empty() || !self.reissues.is_empty() || !self.owner_mints.is_empty()
    }
}

/// Decodes every output script of `tx`.
pub fn decode_outputs(tx: &Transaction) -> Result<Vec<AssetScript>, ConservationViolation> {
    tx.outputs
        .iter()
        .enumerate()
        .map(|(vout, output)| {
            decode_script(&output.script).map_err(|error| ConservationViolation::Malformed {
                location: format!("output {}", vout),
                error,
            })
        })
        .collect()
}

/// Asset legs of the coins spent by `tx`, summed per name.
fn input_legs<V: CoinView + ?Sized>(
    tx: &Transaction,
    view: &V,
) -> Result<BTreeMap<String, u128>, ConservationViolation> {
    let mut inputs = BTreeMap::new();
    let mut seen = BTreeSet::new();
    for (index, input) in tx.inputs.iter().enumerate() {
        if !seen.insert(input.prevout) {
            return Err(ConservationViolation::DuplicateInput(input.prevout));
        }
        let coin = view
            .coin(&input.prevout)
            .ok_or(ConservationViolation::MissingInput(input.prevout))?;
        let decoded = decode_script(&coin.output.script).map_err(|error| ConservationViolation::Malformed {
            location: format!("input {} ({})", index, input.prevout),
            error,
        })?;
        if let Some(leg) = decoded.leg() {
            *inputs.entry(leg.name.to_string()).or_insert(0u128) += u128::from(leg.amount);
        }
    }
    Ok(inputs)
}

fn check_balances(
    inputs: &BTreeMap<String, u128>,
    outputs: &BTreeMap<&str, u128>,
) -> Result<(), ConservationViolation> {
    let names: BTreeSet<&str> = inputs.keys().map(String::as_str).chain(outputs.keys().copied()).collect();
    for name in names {
        let input = inputs.get(name).copied().unwrap_or(0);
        let output = outputs.get(name).copied().unwrap_or(0);
        if input != output {
            return Err(ConservationViolation::AmountMismatch {
                asset: name.to_string(),
                input,
                output,
            });
        }
    }
    Ok(())
}

fn pays_burn(tx: &Transaction, burn: &BurnRule) -> bool {
    let script = burn.destination.script();
    tx.outputs
        .iter()
        .any(|output| output.value == burn.amount && output.script == script)
}

fn check_mint<L: AssetLookup + ?Sized>(
    tx: &Transaction,
    definition: &AssetDefinition,
    legs: &OutputLegs<'_>,
    inputs: &BTreeMap<String, u128>,
    directory: &L,
    params: &AssetParams,
) -> Result<SupplyChange, ConservationViolation> {
    let name = definition.name.as_str();
    if directory.asset_definition(name)?.is_some() {
        return Err(ConservationViolation::AssetAlreadyExists(name.to_string()));
    }
    let asset_type = asset_type_of(name);
    let burn = params
        .mint_burn(asset_type)
        .ok_or_else(|| unauthorized(name, format!("{} assets cannot be minted", asset_type)))?;
    if !pays_burn(tx, burn) {
        return Err(unauthorized(
            name,
            format!("missing burn of {} to the issue burn address", burn.amount),
        ));
    }

    let owner = match asset_type {
        AssetType::Root | AssetType::Sub => {
            let owner = owner_name(name);
            if !legs.owner_mints.contains(&owner.as_str()) {
                return Err(unauthorized(name, "missing owner token output"));
            }
            if directory.asset_definition(&owner)?.is_some() {
                return Err(ConservationViolation::AssetAlreadyExists(owner));
            }
            Some(owner)
        }
        _ => None,
    };

    if let Some(parent) = parent_name(name) {
        let parent_owner = owner_name(parent);
        if !inputs.contains_key(&parent_owner) {
            return Err(unauthorized(name, format!("parent owner token {} not spent", parent_owner)));
        }
    }

    Ok(SupplyChange::Mint {
        definition: definition.clone(),
        owner,
    })
}

fn check_reissue<L: AssetLookup + ?Sized>(
    tx: &Transaction,
    reissue: &AssetReissue,
    inputs: &BTreeMap<String, u128>,
    directory: &L,
    params: &AssetParams,
) -> Result<SupplyChange, ConservationViolation> {
    let name = reissue.name.as_str();
    let current = directory
        .asset_definition(name)?
        .ok_or_else(|| ConservationViolation::UnknownAsset(name.to_string()))?;
    if !current.reissuable {
        return Err(unauthorized(name, "asset is not reissuable"));
    }
    if !inputs.contains_key(&owner_name(name)) {
        return Err(unauthorized(name, "owner token not spent"));
    }
    if !pays_burn(tx, &params.reissue_burn) {
        return Err(unauthorized(
            name,
            format!("missing burn of {} to the reissue burn address", params.reissue_burn.amount),
        ));
    }
    let total = u128::from(current.amount) + u128::from(reissue.amount);
    if total > u128::from(MAX_MONEY) {
        return Err(ConservationViolation::InvalidAmount {
            asset: name.to_string(),
            reason: format!("total supply {} exceeds maximum", total),
        });
    }
    if !check_amount_with_units(reissue.amount, current.units) {
        return Err(ConservationViolation::InvalidAmount {
            asset: name.to_string(),
            reason: format!("amount {} finer than {} units", reissue.amount, current.units),
        });
    }
    Ok(SupplyChange::Reissue {
        reissue: reissue.clone(),
        previous: current,
    })
}

fn check_supply<L: AssetLookup + ?Sized>(
    tx: &Transaction,
    legs: &OutputLegs<'_>,
    inputs: &BTreeMap<String, u128>,
    directory: &L,
    params: &AssetParams,
) -> Result<Option<SupplyChange>, ConservationViolation> {
    if legs.mints.len() + legs.reissues.len() > 1 {
        let first = legs
            .mints
            .first()
            .map(|d| d.name.as_str())
            .or_else(|| legs.reissues.first().map(|r| r.name.as_str()))
            .unwrap_or_default();
        return Err(unauthorized(first, "more than one mint or reissue in a transaction"));
    }

    let minted = legs.mints.first().map(|d| d.name.as_str());
    let mut seen_owners = BTreeSet::new();
    for &owner in &legs.owner_mints {
        let base = owner.strip_suffix(OWNER_TAG).unwrap_or(owner);
        if minted != Some(base) {
            return Err(unauthorized(owner, "owner token minted without its asset"));
        }
        if !seen_owners.insert(owner) {
            return Err(unauthorized(owner, "owner token minted twice"));
        }
    }

    if let Some(definition) = legs.mints.first() {
        return check_mint(tx, definition, legs, inputs, directory, params).map(Some);
    }
    if let Some(reissue) = legs.reissues.first() {
        return check_reissue(tx, reissue, inputs, directory, params).map(Some);
    }
    Ok(None)
}

/// Transfer amounts must respect the units the asset was minted with.
fn check_transfer_units<L: AssetLookup + ?Sized>(
    outputs: &[AssetScript],
    directory: &L,
) -> Result<(), ConservationViolation> {
    for script in outputs {
        let transfer = match script {
            AssetScript::Transfer { transfer, .. } => transfer,
            _ => continue,
        };
        let units = if is_owner_name(&transfer.name) {
            OWNER_UNITS
        } else {
            directory
                .asset_definition(&transfer.name)?
                .ok_or_else(|| ConservationViolation::UnknownAsset(transfer.name.clone()))?
                .units
        };
        if !check_amount_with_units(transfer.amount, units) {
            return Err(ConservationViolation::InvalidAmount {
                asset: transfer.name.clone(),
                reason: format!("amount {} finer than {} units", transfer.amount, units),
            });
        }
    }
    Ok(())
}

/// Decides whether `tx` may enter the ledger as far as assets are concerned.
///
/// Rules run in a fixed order so a transaction always reports the same violation: script decoding and input
/// resolution, the coinbase rule, per-asset balance, supply authorisation, then transfer precision.
pub fn check_conservation<V, L>(
    tx: &Transaction,
    view: &V,
    directory: &L,
    params: &AssetParams,
) -> Result<Accepted, ConservationViolation>
where
    V: CoinView + ?Sized,
    L: AssetLookup + ?Sized,
{
    let outputs = decode_outputs(tx)?;
    let legs = OutputLegs::collect(&outputs);

    if tx.is_coinbase() {
        if let Some(leg) = outputs.iter().find_map(AssetScript::leg) {
            return Err(unauthorized(leg.name, "coinbase transactions may not carry asset scripts"));
        }
        return Ok(Accepted::default());
    }

    let inputs = input_legs(tx, view)?;
    if inputs.is_empty() && !legs.has_assets() {
        return Ok(Accepted::default());
    }

    check_balances(&inputs, &legs.transfers)?;
    let supply = check_supply(tx, &legs, &inputs, directory, params)?;
    check_transfer_units(&outputs, directory)?;

    Ok(Accepted { moved: inputs, supply })
}
