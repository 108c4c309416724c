//! Canonical key layout for custody records.
//!
//! | Record | Key |
//! |--------|-----|
//! | Asset | `assets/{asset_id:020}` |
//! | Ledger entry | `ledger/{asset_id:020}/{revision:020}` |
//! | Sequence counter | `sequences/{name}` |
//! | Location code mint record | `mints/{location}` |
//!
//! Numeric components are zero-padded so lexicographic byte order matches
//! numeric order, which keeps range scans sorted by id and by revision.

use std::ops::Range;

use crate::types::AssetId;

const ASSET_PREFIX: &str = "assets/";
const LEDGER_PREFIX: &str = "ledger/";
const SEQUENCE_PREFIX: &str = "sequences/";
const MINT_PREFIX: &str = "mints/";

/// Key of an asset record.
#[must_use]
pub fn asset_key(id: AssetId) -> Vec<u8> {
    format!("{ASSET_PREFIX}{:020}", id.0).into_bytes()
}

/// Range covering every asset record.
#[must_use]
pub fn asset_range() -> Range<Vec<u8>> {
    prefix_range(ASSET_PREFIX.as_bytes())
}

/// Key of the ledger entry produced by an asset's `revision`.
#[must_use]
pub fn ledger_entry_key(asset_id: AssetId, revision: u64) -> Vec<u8> {
    format!("{LEDGER_PREFIX}{:020}/{revision:020}", asset_id.0).into_bytes()
}

/// Range covering every ledger entry of one asset, in revision order.
#[must_use]
pub fn ledger_range(asset_id: AssetId) -> Range<Vec<u8>> {
    prefix_range(format!("{LEDGER_PREFIX}{:020}/", asset_id.0).as_bytes())
}

/// Key of a named sequence counter.
#[must_use]
pub fn sequence_key(name: &str) -> Vec<u8> {
    format!("{SEQUENCE_PREFIX}{name}").into_bytes()
}

/// Key of the mint record for a location code.
#[must_use]
pub fn mint_key(location: &str) -> Vec<u8> {
    format!("{MINT_PREFIX}{location}").into_bytes()
}

/// Returns the half-open range of all keys starting with `prefix`.
///
/// The prefix must end in a byte below `0xFF`; every prefix in this module
/// ends in `/`.
fn prefix_range(prefix: &[u8]) -> Range<Vec<u8>> {
    let start = prefix.to_vec();
    let mut end = prefix.to_vec();
    if let Some(last) = end.last_mut() {
        *last = last.saturating_add(1);
    }
    start..end
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_key_shapes() {
        assert_eq!(asset_key(AssetId(7)), b"assets/00000000000000000007".to_vec());
        assert_eq!(
            ledger_entry_key(AssetId(7), 2),
            b"ledger/00000000000000000007/00000000000000000002".to_vec()
        );
        assert_eq!(sequence_key("assets"), b"sequences/assets".to_vec());
        assert_eq!(mint_key("Block A"), b"mints/Block A".to_vec());
    }

    #[test]
    fn test_ledger_range_excludes_neighbouring_assets() {
        let range = ledger_range(AssetId(7));
        assert!(range.contains(&ledger_entry_key(AssetId(7), 0)));
        assert!(range.contains(&ledger_entry_key(AssetId(7), u64::MAX)));
        assert!(!range.contains(&ledger_entry_key(AssetId(70), 1)));
        assert!(!range.contains(&ledger_entry_key(AssetId(6), 1)));
        assert!(!range.contains(&asset_key(AssetId(7))));
    }

    proptest! {
        /// Zero padding keeps byte order aligned with numeric order.
        #[test]
        fn ledger_keys_sort_by_revision(asset in 0i64..i64::MAX, a in any::<u64>(), b in any::<u64>()) {
            let ka = ledger_entry_key(AssetId(asset), a);
            let kb = ledger_entry_key(AssetId(asset), b);
            prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
        }

        #[test]
        fn asset_keys_sort_by_id(a in 0i64..i64::MAX, b in 0i64..i64::MAX) {
            prop_assert_eq!(a.cmp(&b), asset_key(AssetId(a)).cmp(&asset_key(AssetId(b))));
            prop_assert!(asset_range().contains(&asset_key(AssetId(a))));
        }
    }
}
