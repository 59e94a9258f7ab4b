//! Asset name grammar and type classifier.
//!
//! Names are plain strings; the grammar is evaluated identically when an asset is minted and every time a
//! script carrying the name is decoded. Classification is total: any input string yields a type, with
//! `AssetType::Invalid` for everything the grammar rejects.
//!
//! # Forms
//! - `ROOT`      `[A-Z0-9._]{3,}`
//! - `ROOT/SUB`  one or more `/`-separated sub segments, `[A-Z0-9._]+`
//! - `NAME#TAG`  unique tag from an extended charset
//! - `NAME~TAG`  channel tag, ROOT-style punctuation rules
//! - `NAME!`     owner token of any of the above
//!
//! Punctuation (`.` and `_`) may not lead, trail, or touch another punctuation character in any root, sub or
//! channel segment.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use crate::error::AssetError;

/// Maximum length of any non-owner name.
pub const MAX_NAME_LENGTH: usize = 30;
/// Owner names carry one extra `!`.
pub const MAX_OWNER_NAME_LENGTH: usize = MAX_NAME_LENGTH + 1;
/// Minimum length of a root name.
pub const MIN_ROOT_LENGTH: usize = 3;

pub const SUB_NAME_DELIMITER: char = '/';
pub const UNIQUE_TAG_DELIMITER: char = '#';
pub const CHANNEL_TAG_DELIMITER: char = '~';
pub const OWNER_TAG: char = '!';

lazy_static! {
    static ref ROOT_NAME_CHARACTERS: Regex = Regex::new(r"^[A-Z0-9._]{3,}$").unwrap();
    static ref SUB_NAME_CHARACTERS: Regex = Regex::new(r"^[A-Z0-9._]+$").unwrap();
    static ref UNIQUE_TAG_CHARACTERS: Regex =
        Regex::new(r"^[-A-Za-z0-9@$%&*()\[\]{}<>_.;?\\:]+$").unwrap();
    static ref CHANNEL_TAG_CHARACTERS: Regex = Regex::new(r"^[A-Z0-9._]+$").unwrap();

    static ref DOUBLE_PUNCTUATION: Regex = Regex::new(r"[._]{2,}").unwrap();
    static ref LEADING_PUNCTUATION: Regex = Regex::new(r"^[._]").unwrap();
    static ref TRAILING_PUNCTUATION: Regex = Regex::new(r"[._]$").unwrap();

    static ref UNIQUE_INDICATOR: Regex = Regex::new(r"^[^\^~#!]+#[^~#!/]+$").unwrap();
    static ref CHANNEL_INDICATOR: Regex = Regex::new(r"^[^\^~#!]+~[^~#!/]+$").unwrap();

    /// Base-currency ticker and its look-alikes. Compounds containing them are fine.
    static ref RESERVED_NAMES: Regex =
        Regex::new(r"^XSR$|^SUCRECOIN$|^SUCRECOINC0IN$|^SUCRECOINCO1N$|^SUCRECOINC01N$").unwrap();
}

/// Type of an asset name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AssetType {
    Root,
    Sub,
    Unique,
    Channel,
    Owner,
    Invalid,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Root => "ROOT",
            AssetType::Sub => "SUB",
            AssetType::Unique => "UNIQUE",
            AssetType::Channel => "CHANNEL",
            AssetType::Owner => "OWNER",
            AssetType::Invalid => "INVALID",
        }
    }

    pub fn is_valid(&self) -> bool {
        *self != AssetType::Invalid
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised where a caller requires a valid name (filters, builders).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GrammarError {
    #[error("Invalid asset name: {0}")]
    InvalidName(String),

    #[error("Asset name {name} is {actual}, expected one of {expected}")]
    UnexpectedType {
        name: String,
        actual: AssetType,
        expected: String,
    },
}

impl From<GrammarError> for AssetError {
    fn from(err: GrammarError) -> Self {
        AssetError::Grammar(err.to_string())
    }
}

fn has_bad_punctuation(segment: &str) -> bool {
    DOUBLE_PUNCTUATION.is_match(segment)
        || LEADING_PUNCTUATION.is_match(segment)
        || TRAILING_PUNCTUATION.is_match(segment)
}

fn is_root_name_valid(name: &str) -> bool {
    ROOT_NAME_CHARACTERS.is_match(name)
        && !has_bad_punctuation(name)
        && !RESERVED_NAMES.is_match(name)
}

fn is_sub_name_valid(name: &str) -> bool {
    SUB_NAME_CHARACTERS.is_match(name) && !has_bad_punctuation(name)
}

fn is_unique_tag_valid(tag: &str) -> bool {
    UNIQUE_TAG_CHARACTERS.is_match(tag)
}

fn is_channel_tag_valid(tag: &str) -> bool {
    CHANNEL_TAG_CHARACTERS.is_match(tag) && !has_bad_punctuation(tag)
}

/// Validates the `ROOT[/SUB...]` part in front of any tag.
fn is_name_valid_before_tag(name: &str) -> bool {
    let mut parts = name.split(SUB_NAME_DELIMITER);
    match parts.next() {
        Some(root) if is_root_name_valid(root) => parts.all(is_sub_name_valid),
        _ => false,
    }
}

/// Classifies a non-owner name.
fn classify_plain(name: &str) -> AssetType {
    if name.len() > MAX_NAME_LENGTH {
        return AssetType::Invalid;
    }

    if UNIQUE_INDICATOR.is_match(name) {
        // The indicator guarantees exactly one '#'.
        return match name.split_once(UNIQUE_TAG_DELIMITER) {
            Some((base, tag)) if is_name_valid_before_tag(base) && is_unique_tag_valid(tag) => {
                AssetType::Unique
            }
            _ => AssetType::Invalid,
        };
    }

    if CHANNEL_INDICATOR.is_match(name) {
        return match name.split_once(CHANNEL_TAG_DELIMITER) {
            Some((base, tag)) if is_name_valid_before_tag(base) && is_channel_tag_valid(tag) => {
                AssetType::Channel
            }
            _ => AssetType::Invalid,
        };
    }

    if !is_name_valid_before_tag(name) {
        return AssetType::Invalid;
    }
    if name.contains(SUB_NAME_DELIMITER) {
        AssetType::Sub
    } else {
        AssetType::Root
    }
}

/// Classifies a raw name. Total and deterministic; never fails.
pub fn classify(raw: &str) -> (bool, AssetType) {
    let asset_type = asset_type_of(raw);
    (asset_type.is_valid(), asset_type)
}

/// Type of a raw name, `AssetType::Invalid` when the grammar rejects it.
pub fn asset_type_of(raw: &str) -> AssetType {
    if let Some(base) = raw.strip_suffix(OWNER_TAG) {
        if raw.len() > MAX_OWNER_NAME_LENGTH {
            return AssetType::Invalid;
        }
        return match classify_plain(base) {
            AssetType::Invalid => AssetType::Invalid,
            _ => AssetType::Owner,
        };
    }
    classify_plain(raw)
}

pub fn is_asset_name_valid(raw: &str) -> bool {
    asset_type_of(raw).is_valid()
}

/// True iff the name ends in `!` and the rest is a valid root, sub, unique or channel name.
pub fn is_owner_name(raw: &str) -> bool {
    asset_type_of(raw) == AssetType::Owner
}

/// Name of the owner token controlling `name`.
pub fn owner_name(name: &str) -> String {
    format!("{}{}", name, OWNER_TAG)
}

/// The asset whose owner token authorises minting `name`: the part before the last `/` of a sub asset, the
/// part before `#` of a unique asset. Roots have no parent.
pub fn parent_name(name: &str) -> Option<&str> {
    match asset_type_of(name) {
        AssetType::Sub => name.rsplit_once(SUB_NAME_DELIMITER).map(|(parent, _)| parent),
        AssetType::Unique => name.split_once(UNIQUE_TAG_DELIMITER).map(|(parent, _)| parent),
        _ => None,
    }
}

/// Checks that `name` classifies as one of `allowed`.
pub fn expect_type(name: &str, allowed: &[AssetType]) -> Result<AssetType, GrammarError> {
    let actual = asset_type_of(name);
    if actual == AssetType::Invalid {
        return Err(GrammarError::InvalidName(name.to_string()));
    }
    if !allowed.contains(&actual) {
        return Err(GrammarError::UnexpectedType {
            name: name.to_string(),
            actual,
            expected: allowed
                .iter()
                .map(|t| t.as_str())
                .collect::<Vec<_>>()
                .join("|"),
        });
    }
    Ok(actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn type_of(name: &str) -> AssetType {
        classify(name).1
    }

    #[test]
    fn test_root_names() {
        assert_eq!(classify("MIN"), (true, AssetType::Root));
        assert!(is_asset_name_valid("MAX_ASSET_IS_30_CHARACTERS_LNG"));
        assert_eq!(classify("MAX_ASSET_IS_31_CHARACTERS_LONG"), (false, AssetType::Invalid));
        assert!(is_asset_name_valid("A_BCDEFGHIJKLMNOPQRSTUVWXY.Z"));
        assert!(is_asset_name_valid("0_12345678.9"));

        assert!(!is_asset_name_valid("AB"));
        assert!(!is_asset_name_valid("NO"));
        assert!(!is_asset_name_valid("nolower"));
        assert!(!is_asset_name_valid("NO SPACE"));
        assert!(!is_asset_name_valid("(#&$(&*^%$))"));
        assert!(!is_asset_name_valid(""));
    }

    #[test]
    fn test_root_punctuation() {
        for name in ["_ABC", "ABC_", ".ABC", "ABC.", "AB..C", "A__BC", "A._BC", "AB_.C"] {
            assert!(!is_asset_name_valid(name), "{} should be invalid", name);
        }
    }

    #[test]
    fn test_reserved_names() {
        for name in ["XSR", "SUCRECOIN", "SUCRECOINC0IN", "SUCRECOINCO1N", "SUCRECOINC01N"] {
            assert!(!is_asset_name_valid(name), "{} is reserved", name);
        }
        for name in [
            "SUCRECOIN.COIN",
            "SUCRECOIN_COIN",
            "XSRSPYDER",
            "SPYDERXSR",
            "SUCRECOINSPYDER",
            "SPYDESUCRECOIN",
            "BLACK_SUCRECOINS",
            "SEXSROT",
        ] {
            assert!(is_asset_name_valid(name), "{} should be allowed", name);
        }
    }

    #[test]
    fn test_sub_names() {
        assert_eq!(type_of("ABC/A"), AssetType::Sub);
        assert_eq!(type_of("ABC/A/1"), AssetType::Sub);
        assert_eq!(type_of("ABC/A_1/1.A"), AssetType::Sub);
        assert_eq!(type_of("ABC/AB/XYZ/STILL/MAX/30/123456"), AssetType::Sub);

        for name in [
            "ABC//MIN_1",
            "ABC/",
            "ABC/NOTRAIL/",
            "ABC/_X",
            "ABC/X_",
            "ABC/.X",
            "ABC/X.",
            "ABC/X__X",
            "ABC/X..X",
            "ABC/X_.X",
            "ABC/X._X",
            "ABC/nolower",
            "ABC/NO SPACE",
            "ABC/(*#^&$%)",
            "ABC/AB/XYZ/STILL/MAX/30/OVERALL/1234",
            "AB/CDE",
        ] {
            assert!(!is_asset_name_valid(name), "{} should be invalid", name);
        }
    }

    #[test]
    fn test_unique_names() {
        assert_eq!(type_of("ABC#AZaz09"), AssetType::Unique);
        assert_eq!(type_of("ABC#tag1"), AssetType::Unique);
        assert_eq!(type_of("ABC#@$%&*()[]{}<>-_.;?\\:"), AssetType::Unique);
        assert_eq!(type_of("ABC/THING#_STILL_30_MAX------_"), AssetType::Unique);

        for name in [
            "ABC#no!bangs",
            "MIN#",
            "ABC#NO#HASH",
            "ABC#NO SPACE",
            "ABC#RESERVED/",
            "ABC#RESERVED~",
            "ABC#RESERVED^",
        ] {
            assert!(!is_asset_name_valid(name), "{} should be invalid", name);
        }
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(type_of("ABC~1"), AssetType::Channel);
        assert_eq!(type_of("ABC~STILL_MAX_OF_30.CHARS_1234"), AssetType::Channel);

        for name in [
            "MIN~",
            "ABC~NO~TILDE",
            "ABC~_ANN",
            "ABC~ANN_",
            "ABC~.ANN",
            "ABC~ANN.",
            "ABC~X__X",
            "ABC~X._X",
            "ABC~X_.X",
            "ABC~X..X",
            "ABC~nolower",
        ] {
            assert!(!is_asset_name_valid(name), "{} should be invalid", name);
        }
    }

    #[test]
    fn test_owner_names() {
        assert!(is_owner_name("ABC!"));
        assert!(!is_owner_name("ABC"));
        assert!(!is_owner_name("ABC!COIN"));
        assert!(!is_owner_name("ABC!!"));
        assert!(is_owner_name("MAX_ASSET_IS_30_CHARACTERS_LNG!"));
        assert!(!is_owner_name("MAX_ASSET_IS_31_CHARACTERS_LONG!"));
        assert!(is_owner_name("ABC/A!"));
        assert!(is_owner_name("ABC/A/1!"));
        assert!(is_owner_name("ABC#tag!"));
        assert!(is_owner_name("ABC~1!"));
        assert!(!is_owner_name("XSR!"));
        assert_eq!(classify("ABC!"), (true, AssetType::Owner));
    }

    #[test]
    fn test_parent_and_owner_helpers() {
        assert_eq!(owner_name("ABC"), "ABC!");
        assert_eq!(parent_name("ABC"), None);
        assert_eq!(parent_name("ABC/A"), Some("ABC"));
        assert_eq!(parent_name("ABC/A/B"), Some("ABC/A"));
        assert_eq!(parent_name("ABC/A#tag"), Some("ABC/A"));
        assert_eq!(parent_name("ABC!"), None);
    }

    #[test]
    fn test_expect_type() {
        assert_eq!(expect_type("ABC", &[AssetType::Root]), Ok(AssetType::Root));
        assert!(matches!(
            expect_type("ABC!", &[AssetType::Root, AssetType::Sub]),
            Err(GrammarError::UnexpectedType { .. })
        ));
        assert!(matches!(
            expect_type("ab", &[AssetType::Root]),
            Err(GrammarError::InvalidName(_))
        ));
    }

    #[test]
    fn test_classify_is_deterministic() {
        for name in ["MIN", "ABC/A", "ABC#tag1", "ABC~1", "ABC!", "AB", "", "\u{1F600}\u{1F600}\u{1F600}"] {
            assert_eq!(classify(name), classify(name));
        }
    }

    proptest! {
        #[test]
        fn test_classify_total_on_any_string(raw in any::<String>()) {
            let (valid, asset_type) = classify(&raw);
            prop_assert_eq!(valid, asset_type.is_valid());
            prop_assert_eq!(classify(&raw), (valid, asset_type));
        }

        #[test]
        fn test_classify_total_on_printable_text(raw in "\\PC*") {
            prop_assert_eq!(classify(&raw), classify(&raw));
        }

        #[test]
        fn test_accepted_names_keep_their_type(raw in "[A-Z0-9._]{3,12}([/#~][A-Za-z0-9._]{1,8})?!?") {
            let (valid, asset_type) = classify(&raw);
            if valid {
                prop_assert_eq!(classify(&raw.clone()), (true, asset_type));
                prop_assert_eq!(is_owner_name(&raw), asset_type == AssetType::Owner);
                if let Some(base) = raw.strip_suffix(OWNER_TAG) {
                    prop_assert!(is_asset_name_valid(base));
                }
            } else {
                prop_assert_eq!(asset_type, AssetType::Invalid);
            }
        }
    }
}
