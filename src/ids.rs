//! Strongly typed identifiers.
//!
//! Numeric ids are parsed once at the boundary via `FromStr`; past that point
//! the ledger only ever handles the typed values.

use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $entity:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Returns the raw numeric value.
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = LedgerError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                s.trim()
                    .parse::<u64>()
                    .map($name)
                    .map_err(|_| LedgerError::InvalidId {
                        entity: $entity,
                        value: s.to_string(),
                    })
            }
        }
    };
}

numeric_id!(
    /// Identity of an account owner.
    UserId,
    "user"
);

numeric_id!(
    /// Local loyalty account identifier, stable for the account's lifetime.
    AccountId,
    "account"
);

numeric_id!(
    /// Transaction identifier. Unique across the ledger and strictly
    /// increasing in creation order.
    TransactionId,
    "transaction"
);

/// Provider-issued loyalty account handle linked to a local account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalHandle(String);

impl ExternalHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        ExternalHandle(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider-issued customer reference, only used while provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerHandle(String);

impl CustomerHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        CustomerHandle(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CustomerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
