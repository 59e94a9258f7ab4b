//! Asset operation codec: asset payloads inside output scripts.
//!
//! # Layout
//! ```text
//! destination_script || OP_XSR_ASSET || push(payload) || OP_DROP
//! payload  = "xsr" || kind || body
//! kind     = 'q' mint | 'r' reissue | 't' transfer | 'o' owner-mint
//! mint     = name || amount || units || reissuable || has_hash || [hash]
//! reissue  = name || amount || reissuable || has_hash || [hash]
//! transfer = name || amount
//! owner    = name
//! name     = len:u8 || bytes,  amount = u64 little-endian,  flags = 0|1,  hash = 34 raw bytes
//! ```
//! The push is minimal: a single length byte below 76 bytes, `OP_PUSHDATA1 len` otherwise.
//!
//! Decoding never trusts the bytes: every embedded name is re-classified and checked against the types the
//! operation allows, amounts are range- and precision-checked, and trailing bytes are rejected. Malformed input
//! always yields a `CodecError`, never a panic.

use bytes::{Buf, BufMut};
use serde::Serialize;
use thiserror::Error;
use crate::config::AssetParams;
use crate::core::asset::{
    check_amount_with_units, is_money_range, is_units_valid, AssetDefinition, AssetReissue, AssetTransfer,
    ContentHash, CONTENT_HASH_LEN, OWNER_ASSET_AMOUNT, OWNER_UNITS, UNIQUE_ASSET_AMOUNT, UNIQUE_ASSET_UNITS,
};
use crate::core::name::{asset_type_of, expect_type, owner_name, AssetType, GrammarError, MAX_OWNER_NAME_LENGTH};
use crate::core::script::{Destination, Script, OP_DROP, OP_PUSHDATA1, OP_XSR_ASSET};
use crate::core::transaction::TxOut;
use crate::error::AssetError;

pub const ASSET_MAGIC: &[u8; 3] = b"xsr";
pub const KIND_MINT: u8 = b'q';
pub const KIND_REISSUE: u8 = b'r';
pub const KIND_TRANSFER: u8 = b't';
pub const KIND_OWNER: u8 = b'o';

/// Magic, kind and the name length byte.
const MIN_PAYLOAD_LEN: usize = ASSET_MAGIC.len() + 2;

const MINT_TYPES: &[AssetType] = &[AssetType::Root, AssetType::Sub, AssetType::Unique];
const REISSUE_TYPES: &[AssetType] = &[AssetType::Root, AssetType::Sub];
const OWNER_BASE_TYPES: &[AssetType] = &[AssetType::Root, AssetType::Sub];

/// Errors produced by asset payload encoding and decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Asset payload truncated")]
    Truncated,

    #[error("Unexpected push opcode 0x{0:02x} after asset marker")]
    BadPush(u8),

    #[error("Non-minimal push of {0} bytes")]
    NonMinimalPush(usize),

    #[error("Asset payload not terminated by OP_DROP")]
    MissingDrop,

    #[error("Bad asset payload magic")]
    BadMagic,

    #[error("Unknown asset operation kind 0x{0:02x}")]
    UnknownKind(u8),

    #[error("Asset name length {0} exceeds maximum")]
    NameTooLong(usize),

    #[error("Asset name is not valid UTF-8")]
    NameNotUtf8,

    #[error(transparent)]
    Grammar(#[from] GrammarError),

    #[error("Invalid units {0}")]
    InvalidUnits(u8),

    #[error("Invalid flag byte 0x{0:02x}")]
    InvalidFlag(u8),

    #[error("Amount {amount} out of range for {name}")]
    AmountOutOfRange { name: String, amount: u64 },

    #[error("Amount {amount} of {name} has more precision than {units} units")]
    PrecisionExceedsUnits { name: String, amount: u64, units: u8 },

    #[error("Unique asset {0} must be a single indivisible, non-reissuable unit")]
    InvalidUniqueAsset(String),

    #[error("Trailing bytes after asset payload")]
    TrailingBytes,
}

impl From<CodecError> for AssetError {
    fn from(err: CodecError) -> Self {
        AssetError::Codec(err.to_string())
    }
}

/// What an output script carries, as a single tagged variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssetScript {
    Mint {
        definition: AssetDefinition,
        destination: Destination,
    },
    Reissue {
        reissue: AssetReissue,
        destination: Destination,
    },
    Transfer {
        transfer: AssetTransfer,
        destination: Destination,
    },
    OwnerMint {
        name: String,
        destination: Destination,
    },
    NotAnAsset,
}

/// Asset quantity carried by one output, whatever operation created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetLeg<'a> {
    pub name: &'a str,
    pub amount: u64,
    pub destination: Destination,
}

impl AssetScript {
    pub fn is_asset(&self) -> bool {
        !matches!(self, AssetScript::NotAnAsset)
    }

    pub fn destination(&self) -> Option<Destination> {
        match self {
            AssetScript::Mint { destination, .. }
            | AssetScript::Reissue { destination, .. }
            | AssetScript::Transfer { destination, .. }
            | AssetScript::OwnerMint { destination, .. } => Some(*destination),
            AssetScript::NotAnAsset => None,
        }
    }

    /// The quantity this output holds once it exists: minted supply, reissued supply, transferred amount, or
    /// one owner token.
    pub fn leg(&self) -> Option<AssetLeg<'_>> {
        match self {
            AssetScript::Mint { definition, destination } => Some(AssetLeg {
                name: &definition.name,
                amount: definition.amount,
                destination: *destination,
            }),
            AssetScript::Reissue { reissue, destination } => Some(AssetLeg {
                name: &reissue.name,
                amount: reissue.amount,
                destination: *destination,
            }),
            AssetScript::Transfer { transfer, destination } => Some(AssetLeg {
                name: &transfer.name,
                amount: transfer.amount,
                destination: *destination,
            }),
            AssetScript::OwnerMint { name, destination } => Some(AssetLeg {
                name,
                amount: OWNER_ASSET_AMOUNT,
                destination: *destination,
            }),
            AssetScript::NotAnAsset => None,
        }
    }
}

fn read_u8(buf: &mut &[u8]) -> Result<u8, CodecError> {
    if !buf.has_remaining() {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_u8())
}

fn read_flag(buf: &mut &[u8]) -> Result<bool, CodecError> {
    match read_u8(buf)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(CodecError::InvalidFlag(other)),
    }
}

fn read_amount(buf: &mut &[u8]) -> Result<u64, CodecError> {
    if buf.remaining() < 8 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_u64_le())
}

fn read_name(buf: &mut &[u8]) -> Result<String, CodecError> {
    let len = usize::from(read_u8(buf)?);
    if len > MAX_OWNER_NAME_LENGTH {
        return Err(CodecError::NameTooLong(len));
    }
    if buf.remaining() < len {
        return Err(CodecError::Truncated);
    }
    let name = std::str::from_utf8(&buf[..len])
        .map_err(|_| CodecError::NameNotUtf8)?
        .to_string();
    buf.advance(len);
    Ok(name)
}

fn read_content_hash(buf: &mut &[u8]) -> Result<Option<ContentHash>, CodecError> {
    if !read_flag(buf)? {
        return Ok(None);
    }
    if buf.remaining() < CONTENT_HASH_LEN {
        return Err(CodecError::Truncated);
    }
    let hash = ContentHash::from_slice(&buf[..CONTENT_HASH_LEN]).map_err(|_| CodecError::Truncated)?;
    buf.advance(CONTENT_HASH_LEN);
    Ok(Some(hash))
}

fn check_range(name: &str, amount: u64, allow_zero: bool) -> Result<(), CodecError> {
    if (amount == 0 && !allow_zero) || !is_money_range(amount) {
        return Err(CodecError::AmountOutOfRange {
            name: name.to_string(),
            amount,
        });
    }
    Ok(())
}

fn check_precision(name: &str, amount: u64, units: u8) -> Result<(), CodecError> {
    if !check_amount_with_units(amount, units) {
        return Err(CodecError::PrecisionExceedsUnits {
            name: name.to_string(),
            amount,
            units,
        });
    }
    Ok(())
}

fn decode_mint(buf: &mut &[u8]) -> Result<AssetDefinition, CodecError> {
    let name = read_name(buf)?;
    let asset_type = expect_type(&name, MINT_TYPES)?;
    let amount = read_amount(buf)?;
    let units = read_u8(buf)?;
    let reissuable = read_flag(buf)?;
    let content_hash = read_content_hash(buf)?;

    if !is_units_valid(units) {
        return Err(CodecError::InvalidUnits(units));
    }
    check_range(&name, amount, false)?;
    check_precision(&name, amount, units)?;
    if asset_type == AssetType::Unique
        && (amount != UNIQUE_ASSET_AMOUNT || units != UNIQUE_ASSET_UNITS || reissuable)
    {
        return Err(CodecError::InvalidUniqueAsset(name));
    }
    Ok(AssetDefinition::new(name, amount, units, reissuable, content_hash))
}

fn decode_reissue(buf: &mut &[u8]) -> Result<AssetReissue, CodecError> {
    let name = read_name(buf)?;
    expect_type(&name, REISSUE_TYPES)?;
    let amount = read_amount(buf)?;
    let reissuable = read_flag(buf)?;
    let content_hash = read_content_hash(buf)?;
    check_range(&name, amount, true)?;
    Ok(AssetReissue::new(name, amount, reissuable, content_hash))
}

fn decode_transfer(buf: &mut &[u8]) -> Result<AssetTransfer, CodecError> {
    let name = read_name(buf)?;
    let asset_type = expect_type(
        &name,
        &[
            AssetType::Root,
            AssetType::Sub,
            AssetType::Unique,
            AssetType::Channel,
            AssetType::Owner,
        ],
    )?;
    let amount = read_amount(buf)?;
    check_range(&name, amount, false)?;
    if asset_type == AssetType::Owner {
        check_precision(&name, amount, OWNER_UNITS)?;
    }
    Ok(AssetTransfer::new(name, amount))
}

fn decode_owner(buf: &mut &[u8]) -> Result<String, CodecError> {
    let name = read_name(buf)?;
    expect_type(&name, &[AssetType::Owner])?;
    // Owner tokens are only minted alongside roots and subs.
    let base = name.strip_suffix('!').unwrap_or(&name);
    expect_type(base, OWNER_BASE_TYPES)?;
    Ok(name)
}

/// Splits `push(payload) || OP_DROP` and returns the payload.
fn read_push(bytes: &[u8]) -> Result<&[u8], CodecError> {
    let (len, rest) = match bytes.first() {
        None => return Err(CodecError::Truncated),
        Some(&OP_PUSHDATA1) => {
            let len = usize::from(*bytes.get(1).ok_or(CodecError::Truncated)?);
            if len < usize::from(OP_PUSHDATA1) {
                return Err(CodecError::NonMinimalPush(len));
            }
            (len, &bytes[2..])
        }
        Some(&n) if n < OP_PUSHDATA1 => (usize::from(n), &bytes[1..]),
        Some(&op) => return Err(CodecError::BadPush(op)),
    };
    if rest.len() < len + 1 {
        return Err(CodecError::Truncated);
    }
    if rest[len] != OP_DROP {
        return Err(CodecError::MissingDrop);
    }
    if rest.len() > len + 1 {
        return Err(CodecError::TrailingBytes);
    }
    Ok(&rest[..len])
}

/// Decodes an output script. Plain payments and non-standard scripts are `NotAnAsset`; a script carrying the
/// asset marker must decode completely or the output is rejected.
pub fn decode_script(script: &Script) -> Result<AssetScript, CodecError> {
    let bytes = script.as_bytes();
    let (destination, prefix_len) = match Destination::parse_prefix(bytes) {
        Some(found) => found,
        None => return Ok(AssetScript::NotAnAsset),
    };
    if bytes.get(prefix_len) != Some(&OP_XSR_ASSET) {
        return Ok(AssetScript::NotAnAsset);
    }

    let payload = read_push(&bytes[prefix_len + 1..])?;
    if payload.len() < MIN_PAYLOAD_LEN {
        return Err(CodecError::Truncated);
    }
    if &payload[..ASSET_MAGIC.len()] != ASSET_MAGIC {
        return Err(CodecError::BadMagic);
    }
    let kind = payload[ASSET_MAGIC.len()];
    let mut body = &payload[ASSET_MAGIC.len() + 1..];

    let decoded = match kind {
        KIND_MINT => AssetScript::Mint {
            definition: decode_mint(&mut body)?,
            destination,
        },
        KIND_REISSUE => AssetScript::Reissue {
            reissue: decode_reissue(&mut body)?,
            destination,
        },
        KIND_TRANSFER => AssetScript::Transfer {
            transfer: decode_transfer(&mut body)?,
            destination,
        },
        KIND_OWNER => AssetScript::OwnerMint {
            name: decode_owner(&mut body)?,
            destination,
        },
        other => return Err(CodecError::UnknownKind(other)),
    };
    if body.has_remaining() {
        return Err(CodecError::TrailingBytes);
    }
    Ok(decoded)
}

pub fn is_mint_script(script: &Script) -> bool {
    matches!(decode_script(script), Ok(AssetScript::Mint { .. }))
}

pub fn is_reissue_script(script: &Script) -> bool {
    matches!(decode_script(script), Ok(AssetScript::Reissue { .. }))
}

pub fn is_transfer_script(script: &Script) -> bool {
    matches!(decode_script(script), Ok(AssetScript::Transfer { .. }))
}

pub fn is_owner_script(script: &Script) -> bool {
    matches!(decode_script(script), Ok(AssetScript::OwnerMint { .. }))
}

fn put_name(buf: &mut Vec<u8>, name: &str) -> Result<(), CodecError> {
    if name.len() > MAX_OWNER_NAME_LENGTH {
        return Err(CodecError::NameTooLong(name.len()));
    }
    buf.put_u8(name.len() as u8);
    buf.put_slice(name.as_bytes());
    Ok(())
}

fn put_content_hash(buf: &mut Vec<u8>, hash: &Option<ContentHash>) {
    match hash {
        Some(hash) => {
            buf.put_u8(1);
            buf.put_slice(hash.as_bytes());
        }
        None => buf.put_u8(0),
    }
}

/// Wraps a body into a full script and decodes it back, so a builder can never emit a script the decoder would
/// reject.
fn finish_script(destination: &Destination, kind: u8, body: Vec<u8>) -> Result<(Script, AssetScript), CodecError> {
    let mut payload = Vec::with_capacity(ASSET_MAGIC.len() + 1 + body.len());
    payload.put_slice(ASSET_MAGIC);
    payload.put_u8(kind);
    payload.put_slice(&body);

    let mut bytes = destination.script().as_bytes().to_vec();
    bytes.put_u8(OP_XSR_ASSET);
    if payload.len() < usize::from(OP_PUSHDATA1) {
        bytes.put_u8(payload.len() as u8);
    } else {
        bytes.put_u8(OP_PUSHDATA1);
        bytes.put_u8(payload.len() as u8);
    }
    bytes.put_slice(&payload);
    bytes.put_u8(OP_DROP);

    let script = Script::new(bytes);
    let decoded = decode_script(&script)?;
    Ok((script, decoded))
}

pub fn build_mint_script(definition: &AssetDefinition, destination: &Destination) -> Result<Script, CodecError> {
    let mut body = Vec::new();
    put_name(&mut body, &definition.name)?;
    body.put_u64_le(definition.amount);
    body.put_u8(definition.units);
    body.put_u8(u8::from(definition.reissuable));
    put_content_hash(&mut body, &definition.content_hash);
    finish_script(destination, KIND_MINT, body).map(|(script, _)| script)
}

pub fn build_reissue_script(reissue: &AssetReissue, destination: &Destination) -> Result<Script, CodecError> {
    let mut body = Vec::new();
    put_name(&mut body, &reissue.name)?;
    body.put_u64_le(reissue.amount);
    body.put_u8(u8::from(reissue.reissuable));
    put_content_hash(&mut body, &reissue.content_hash);
    finish_script(destination, KIND_REISSUE, body).map(|(script, _)| script)
}

pub fn build_transfer_script(transfer: &AssetTransfer, destination: &Destination) -> Result<Script, CodecError> {
    let mut body = Vec::new();
    put_name(&mut body, &transfer.name)?;
    body.put_u64_le(transfer.amount);
    finish_script(destination, KIND_TRANSFER, body).map(|(script, _)| script)
}

/// Owner-mint script for `owner`, the full `NAME!` form.
pub fn build_owner_script(owner: &str, destination: &Destination) -> Result<Script, CodecError> {
    let mut body = Vec::new();
    put_name(&mut body, owner)?;
    finish_script(destination, KIND_OWNER, body).map(|(script, _)| script)
}

/// Outputs of a mint in canonical order: burn payment, owner token (roots and subs), then the new asset.
///
/// Sub and unique mints must additionally spend the parent's owner token and send it back with a transfer
/// output; that input selection belongs to the transaction builder.
pub fn issue_outputs(
    definition: &AssetDefinition,
    to: &Destination,
    params: &AssetParams,
) -> Result<Vec<TxOut>, CodecError> {
    let asset_type = expect_type(&definition.name, MINT_TYPES)?;
    let mut outputs = Vec::with_capacity(3);
    if let Some(burn) = params.mint_burn(asset_type) {
        outputs.push(TxOut::new(burn.amount, burn.destination.script()));
    }
    if asset_type != AssetType::Unique {
        outputs.push(TxOut::new(0, build_owner_script(&owner_name(&definition.name), to)?));
    }
    outputs.push(TxOut::new(0, build_mint_script(definition, to)?));
    Ok(outputs)
}

/// Outputs of a reissue: burn payment, the owner token returned to `owner_to`, then the reissue itself.
pub fn reissue_outputs(
    reissue: &AssetReissue,
    to: &Destination,
    owner_to: &Destination,
    params: &AssetParams,
) -> Result<Vec<TxOut>, CodecError> {
    expect_type(&reissue.name, REISSUE_TYPES)?;
    let burn = &params.reissue_burn;
    let owner = AssetTransfer::new(owner_name(&reissue.name), OWNER_ASSET_AMOUNT);
    Ok(vec![
        TxOut::new(burn.amount, burn.destination.script()),
        TxOut::new(0, build_transfer_script(&owner, owner_to)?),
        TxOut::new(0, build_reissue_script(reissue, to)?),
    ])
}

/// Type of the name carried by a decoded script, `None` for plain payments.
pub fn carried_type(decoded: &AssetScript) -> Option<AssetType> {
    decoded.leg().map(|leg| asset_type_of(leg.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::asset::{COIN, CONTENT_HASH_LEN, MAX_MONEY, MAX_UNITS};
    use crate::core::name::is_asset_name_valid;
    use crate::core::script::Hash160;
    use proptest::prelude::*;

    const SAMPLE_HASH: &str = "Qmd286K6pohQcTKYqnS1YhWrCiS4gz7Xi34sdwMe9USZ7u";

    fn dest() -> Destination {
        Destination::KeyHash(Hash160([0x11; 20]))
    }

    /// Hand-assembled script with an arbitrary payload.
    fn raw_script(payload: &[u8]) -> Script {
        let mut bytes = dest().script().as_bytes().to_vec();
        bytes.push(OP_XSR_ASSET);
        if payload.len() < 76 {
            bytes.push(payload.len() as u8);
        } else {
            bytes.push(OP_PUSHDATA1);
            bytes.push(payload.len() as u8);
        }
        bytes.extend_from_slice(payload);
        bytes.push(OP_DROP);
        Script::new(bytes)
    }

    fn transfer_payload(name: &str, amount: u64) -> Vec<u8> {
        let mut payload = b"xsrt".to_vec();
        payload.push(name.len() as u8);
        payload.extend_from_slice(name.as_bytes());
        payload.extend_from_slice(&amount.to_le_bytes());
        payload
    }

    #[test]
    fn test_mint_round_trip() {
        let hash = ContentHash::from_base58(SAMPLE_HASH).unwrap();
        let def = AssetDefinition::new("SUCRE_GOLD", 1000 * COIN, 2, true, Some(hash));
        let script = build_mint_script(&def, &dest()).unwrap();
        assert_eq!(
            decode_script(&script).unwrap(),
            AssetScript::Mint {
                definition: def,
                destination: dest()
            }
        );
        assert!(is_mint_script(&script));
        assert!(!is_transfer_script(&script));
        assert!(!is_reissue_script(&script));
        assert!(!is_owner_script(&script));
    }

    #[test]
    fn test_mint_uses_pushdata1_when_long() {
        let hash = ContentHash::from_base58(SAMPLE_HASH).unwrap();
        let def = AssetDefinition::new("ABCDEFGHIJKLMNOP/QRSTUVWXYZ012", 10 * COIN, 0, false, Some(hash));
        let script = build_mint_script(&def, &dest()).unwrap();
        assert_eq!(script.as_bytes()[26], OP_PUSHDATA1);
        assert_eq!(script.as_bytes()[27], 80);
        assert!(is_mint_script(&script));
    }

    #[test]
    fn test_transfer_round_trip_and_layout() {
        let transfer = AssetTransfer::new("ABC", 1000);
        let script = build_transfer_script(&transfer, &dest()).unwrap();
        assert_eq!(script, raw_script(&transfer_payload("ABC", 1000)));
        assert_eq!(
            decode_script(&script).unwrap(),
            AssetScript::Transfer {
                transfer,
                destination: dest()
            }
        );
    }

    #[test]
    fn test_reissue_round_trip() {
        let reissue = AssetReissue::new("ABC/A", 0, false, None);
        let script = build_reissue_script(&reissue, &dest()).unwrap();
        assert!(is_reissue_script(&script));
        assert_eq!(
            decode_script(&script).unwrap(),
            AssetScript::Reissue {
                reissue,
                destination: dest()
            }
        );
    }

    #[test]
    fn test_owner_round_trip() {
        let script = build_owner_script("ABC!", &dest()).unwrap();
        assert!(is_owner_script(&script));
        let decoded = decode_script(&script).unwrap();
        let leg = decoded.leg().unwrap();
        assert_eq!(leg.name, "ABC!");
        assert_eq!(leg.amount, OWNER_ASSET_AMOUNT);
    }

    #[test]
    fn test_plain_payment_is_not_asset() {
        let script = dest().script();
        assert_eq!(decode_script(&script).unwrap(), AssetScript::NotAnAsset);
        assert_eq!(decode_script(&Script::default()).unwrap(), AssetScript::NotAnAsset);
        assert_eq!(decode_script(&Script::new(vec![0x6a, 0x04, 1, 2, 3, 4])).unwrap(), AssetScript::NotAnAsset);
    }

    #[test]
    fn test_rejects_owner_name_in_mint() {
        let def = AssetDefinition::new("ABC!", COIN, 0, false, None);
        assert!(matches!(
            build_mint_script(&def, &dest()),
            Err(CodecError::Grammar(GrammarError::UnexpectedType { .. }))
        ));
    }

    #[test]
    fn test_rejects_invalid_name_in_transfer() {
        let script = raw_script(&transfer_payload("ab", 1000));
        assert!(matches!(
            decode_script(&script),
            Err(CodecError::Grammar(GrammarError::InvalidName(_)))
        ));
    }

    #[test]
    fn test_rejects_owner_mint_of_unique() {
        let mut payload = b"xsro".to_vec();
        let name = "ABC#TAG!";
        payload.push(name.len() as u8);
        payload.extend_from_slice(name.as_bytes());
        assert!(matches!(
            decode_script(&raw_script(&payload)),
            Err(CodecError::Grammar(GrammarError::UnexpectedType { .. }))
        ));
    }

    #[test]
    fn test_rejects_excess_precision() {
        let def = AssetDefinition::new("ABC", COIN + 1, 0, false, None);
        assert!(matches!(
            build_mint_script(&def, &dest()),
            Err(CodecError::PrecisionExceedsUnits { .. })
        ));
        let owner = AssetTransfer::new("ABC!", COIN / 2);
        assert!(matches!(
            build_transfer_script(&owner, &dest()),
            Err(CodecError::PrecisionExceedsUnits { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_units_and_flags() {
        let def = AssetDefinition::new("ABC", COIN, 9, false, None);
        assert_eq!(build_mint_script(&def, &dest()), Err(CodecError::InvalidUnits(9)));

        let mut payload = b"xsrq".to_vec();
        payload.push(3);
        payload.extend_from_slice(b"ABC");
        payload.extend_from_slice(&COIN.to_le_bytes());
        payload.extend_from_slice(&[0, 2, 0]);
        assert_eq!(decode_script(&raw_script(&payload)), Err(CodecError::InvalidFlag(2)));
    }

    #[test]
    fn test_rejects_zero_and_oversized_amounts() {
        assert!(matches!(
            decode_script(&raw_script(&transfer_payload("ABC", 0))),
            Err(CodecError::AmountOutOfRange { .. })
        ));
        assert!(matches!(
            decode_script(&raw_script(&transfer_payload("ABC", u64::MAX))),
            Err(CodecError::AmountOutOfRange { .. })
        ));
    }

    #[test]
    fn test_unique_mint_constraints() {
        let ok = AssetDefinition::new("ABC#TAG", COIN, 0, false, None);
        assert!(build_mint_script(&ok, &dest()).is_ok());
        let divisible = AssetDefinition::new("ABC#TAG", COIN, 2, false, None);
        assert!(matches!(
            build_mint_script(&divisible, &dest()),
            Err(CodecError::InvalidUniqueAsset(_))
        ));
        let many = AssetDefinition::new("ABC#TAG", 2 * COIN, 0, false, None);
        assert!(build_mint_script(&many, &dest()).is_err());
    }

    #[test]
    fn test_rejects_truncated_and_trailing() {
        let full = transfer_payload("ABC", 1000);
        for cut in 0..full.len() {
            let result = decode_script(&raw_script(&full[..cut]));
            assert!(result.is_err(), "cut at {} should fail", cut);
        }
        let mut long = full.clone();
        long.push(0);
        assert_eq!(decode_script(&raw_script(&long)), Err(CodecError::TrailingBytes));

        let mut bytes = raw_script(&full).as_bytes().to_vec();
        bytes.push(0x00);
        assert_eq!(decode_script(&Script::new(bytes)), Err(CodecError::TrailingBytes));
    }

    #[test]
    fn test_rejects_bad_framing() {
        let mut bad_magic = transfer_payload("ABC", 1000);
        bad_magic[0] = b'b';
        assert_eq!(decode_script(&raw_script(&bad_magic)), Err(CodecError::BadMagic));

        let mut bad_kind = transfer_payload("ABC", 1000);
        bad_kind[3] = b'z';
        assert_eq!(decode_script(&raw_script(&bad_kind)), Err(CodecError::UnknownKind(b'z')));

        let mut no_drop = raw_script(&transfer_payload("ABC", 1000)).as_bytes().to_vec();
        let last = no_drop.len() - 1;
        no_drop[last] = 0x00;
        assert_eq!(decode_script(&Script::new(no_drop)), Err(CodecError::MissingDrop));

        let mut non_minimal = dest().script().as_bytes().to_vec();
        let payload = transfer_payload("ABC", 1000);
        non_minimal.extend_from_slice(&[OP_XSR_ASSET, OP_PUSHDATA1, payload.len() as u8]);
        non_minimal.extend_from_slice(&payload);
        non_minimal.push(OP_DROP);
        assert!(matches!(
            decode_script(&Script::new(non_minimal)),
            Err(CodecError::NonMinimalPush(_))
        ));

        let mut bad_push = dest().script().as_bytes().to_vec();
        bad_push.extend_from_slice(&[OP_XSR_ASSET, 0x4e]);
        assert_eq!(decode_script(&Script::new(bad_push)), Err(CodecError::BadPush(0x4e)));
    }

    #[test]
    fn test_name_length_prefix_cannot_overrun() {
        let mut payload = b"xsrt".to_vec();
        payload.push(200);
        payload.extend_from_slice(b"ABC");
        assert_eq!(decode_script(&raw_script(&payload)), Err(CodecError::NameTooLong(200)));
    }

    #[test]
    fn test_issue_outputs_order() {
        let params = AssetParams::regtest();
        let def = AssetDefinition::new("ABC", 1000 * COIN, 0, true, None);
        let outputs = issue_outputs(&def, &dest(), &params).unwrap();
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0].value, params.issue_root_burn.amount);
        assert_eq!(outputs[0].script, params.issue_root_burn.destination.script());
        assert!(is_owner_script(&outputs[1].script));
        assert!(is_mint_script(&outputs[2].script));
    }

    #[test]
    fn test_reissue_outputs_order() {
        let params = AssetParams::regtest();
        let reissue = AssetReissue::new("ABC", 10 * COIN, true, None);
        let outputs = reissue_outputs(&reissue, &dest(), &dest(), &params).unwrap();
        assert_eq!(outputs[0].value, params.reissue_burn.amount);
        assert!(is_transfer_script(&outputs[1].script));
        assert!(is_reissue_script(&outputs[2].script));
    }

    #[test]
    fn test_decoded_script_serializes_with_kind_tag() {
        let script = build_transfer_script(&AssetTransfer::new("ABC", 5), &dest()).unwrap();
        let json = serde_json::to_value(decode_script(&script).unwrap()).unwrap();
        assert_eq!(json["kind"], "transfer");
        assert_eq!(json["transfer"]["name"], "ABC");
    }

    fn destination_strategy() -> impl Strategy<Value = Destination> {
        (any::<bool>(), any::<[u8; 20]>()).prop_map(|(script_hash, bytes)| {
            if script_hash {
                Destination::ScriptHash(Hash160(bytes))
            } else {
                Destination::KeyHash(Hash160(bytes))
            }
        })
    }

    fn content_hash_strategy() -> impl Strategy<Value = Option<ContentHash>> {
        proptest::option::of(
            prop::collection::vec(any::<u8>(), CONTENT_HASH_LEN)
                .prop_map(|bytes| ContentHash::from_slice(&bytes).unwrap()),
        )
    }

    /// Root or sub names the grammar accepts.
    fn mintable_name() -> impl Strategy<Value = String> {
        "[A-Z][A-Z0-9]{3,11}(/[A-Z0-9]{1,8})?".prop_filter("reserved", |name| is_asset_name_valid(name))
    }

    /// Units and a non-zero in-range amount carrying no more precision than the units allow.
    fn units_and_amount() -> impl Strategy<Value = (u8, u64)> {
        (0..=MAX_UNITS).prop_flat_map(|units| {
            let step = 10u64.pow(u32::from(MAX_UNITS - units));
            (Just(units), (1..=MAX_MONEY / step).prop_map(move |steps| steps * step))
        })
    }

    proptest! {
        #[test]
        fn test_valid_mint_scripts_decode_to_themselves(
            name in mintable_name(),
            (units, amount) in units_and_amount(),
            reissuable in any::<bool>(),
            content_hash in content_hash_strategy(),
            to in destination_strategy(),
        ) {
            let definition = AssetDefinition::new(name, amount, units, reissuable, content_hash);
            let script = build_mint_script(&definition, &to).unwrap();
            prop_assert_eq!(decode_script(&script).unwrap(), AssetScript::Mint { definition, destination: to });
        }

        #[test]
        fn test_valid_reissue_scripts_decode_to_themselves(
            name in mintable_name(),
            amount in 0..=MAX_MONEY,
            reissuable in any::<bool>(),
            content_hash in content_hash_strategy(),
            to in destination_strategy(),
        ) {
            let reissue = AssetReissue::new(name, amount, reissuable, content_hash);
            let script = build_reissue_script(&reissue, &to).unwrap();
            prop_assert_eq!(decode_script(&script).unwrap(), AssetScript::Reissue { reissue, destination: to });
        }

        #[test]
        fn test_valid_transfer_scripts_decode_to_themselves(
            name in mintable_name(),
            amount in 1..=MAX_MONEY,
            to in destination_strategy(),
        ) {
            let transfer = AssetTransfer::new(name, amount);
            let script = build_transfer_script(&transfer, &to).unwrap();
            prop_assert_eq!(decode_script(&script).unwrap(), AssetScript::Transfer { transfer, destination: to });
        }

        #[test]
        fn test_decode_arbitrary_tail_never_panics(tail in prop::collection::vec(any::<u8>(), 0..120)) {
            let mut bytes = dest().script().as_bytes().to_vec();
            bytes.push(OP_XSR_ASSET);
            bytes.extend_from_slice(&tail);
            let _ = decode_script(&Script::new(bytes));
        }

        #[test]
        fn test_decode_arbitrary_payload_never_panics(payload in prop::collection::vec(any::<u8>(), 0..120)) {
            let _ = decode_script(&raw_script(&payload));
        }
    }
}
