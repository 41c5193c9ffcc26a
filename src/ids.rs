//! Store-assigned identifiers.
//!
//! Every inventory row gets a numeric id from the store's sequences when it is
//! first written. Ids are never reused, including after `clear_hosts`.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! store_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw id value.
            #[must_use]
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the raw id value.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

store_id!(
    /// Identifier of a [`crate::Host`].
    HostId
);
store_id!(
    /// Identifier of a [`crate::Service`].
    ServiceId
);
store_id!(
    /// Identifier of a [`crate::DomainAsset`].
    DomainAssetId
);
store_id!(
    /// Identifier of a [`crate::User`].
    UserId
);

/// The id sequences a store maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sequence {
    /// Host ids.
    Host,
    /// Service ids.
    Service,
    /// Domain asset ids.
    DomainAsset,
    /// User ids.
    User,
}
