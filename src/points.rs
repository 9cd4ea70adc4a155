//! Validated point quantities.
//!
//! Callers hand the ledger signed integers (request payloads, CSV cells);
//! `Points` is the only form the ledger accepts, and it is always positive.

use crate::error::{LedgerError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A strictly positive number of loyalty points.
///
/// # Examples
///
/// ```
/// use loyalty_ledger::Points;
///
/// let points = Points::new(25).unwrap();
/// assert_eq!(points.get(), 25);
/// assert!(Points::new(0).is_err());
/// assert!(Points::new(-5).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Points(u64);

impl Points {
    /// Validates a signed quantity, rejecting zero and negatives.
    pub fn new(value: i64) -> Result<Self> {
        if value <= 0 {
            return Err(LedgerError::InvalidPoints(value));
        }
        Ok(Points(value as u64))
    }

    /// Returns the quantity.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl FromStr for Points {
    type Err = LedgerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        let value = trimmed.parse::<i64>().map_err(|_| LedgerError::InvalidRecord {
            row: 0,
            message: format!("points '{}' is not an integer", trimmed),
        })?;
        Points::new(value)
    }
}

impl fmt::Display for Points {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Points {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for Points {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = i64::deserialize(deserializer)?;
        Points::new(value).map_err(serde::de::Error::custom)
    }
}
