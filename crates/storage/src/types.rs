//! Common types used across storage operations.

use bytes::Bytes;

/// Key-value pair returned from range queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// The key identifying this entry.
    pub key: Bytes,

    /// The value stored at this key.
    pub value: Bytes,
}

impl KeyValue {
    /// Creates a new key-value pair.
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }
}

/// Macro to define a newtype wrapper around `i64` with standard trait
/// implementations.
///
/// Each generated type:
/// - Is a transparent wrapper around `i64`
/// - Derives `Copy`, `Clone`, `Debug`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - Derives `Serialize` and `Deserialize` (transparent)
/// - Implements `From<i64>`, `Into<i64>`, and `Display`
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Identity of a tracked asset (a physical key).
    ///
    /// Allocated from the `assets` sequence on creation and never reused.
    ///
    /// # Examples
    ///
    /// ```
    /// use keyward_storage::AssetId;
    ///
    /// let id = AssetId::from(7);
    /// assert_eq!(i64::from(id), 7);
    /// assert_eq!(id.to_string(), "7");
    /// ```
    AssetId
);

define_id!(
    /// Identity of a custody ledger entry.
    LedgerEntryId
);

define_id!(
    /// Identity of a user, as issued by the external authentication service.
    ///
    /// Passing a `UserId` where an `AssetId` is expected is a compile-time
    /// error.
    UserId
);
