//! Transaction models and replay record parsing.

use crate::error::LedgerError;
use crate::ids::{AccountId, TransactionId};
use crate::points::Points;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two kinds of ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TxKind {
    /// Adds points to the balance.
    Earn,

    /// Removes points from the balance, if enough are available.
    Redeem,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Earn => "EARN",
            TxKind::Redeem => "REDEEM",
        }
    }
}

impl FromStr for TxKind {
    type Err = LedgerError;

    /// Parses `EARN` / `REDEEM`, case-insensitively.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "EARN" => Ok(TxKind::Earn),
            "REDEEM" => Ok(TxKind::Redeem),
            _ => Err(LedgerError::InvalidKind(s.to_string())),
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable, committed ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    /// Ledger-wide unique id, increasing in append order
    pub id: TransactionId,

    /// Account the transaction belongs to
    pub account_id: AccountId,

    pub kind: TxKind,

    pub points: Points,

    /// When the transaction was committed
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Signed effect on the balance: positive for EARN, negative for REDEEM.
    pub fn signed_points(&self) -> i64 {
        let points = self.points.get() as i64;
        match self.kind {
            TxKind::Earn => points,
            TxKind::Redeem => -points,
        }
    }
}

/// Raw operation record as read from a replay CSV.
#[derive(Debug, Deserialize)]
pub struct OperationRecord {
    /// Operation: register, earn, redeem
    pub op: String,

    /// Email identifying the user
    pub user: String,

    /// Points (present for earn/redeem, absent for register)
    pub points: Option<String>,
}

impl OperationRecord {
    /// Parses the raw CSV record into a typed operation.
    pub fn parse(&self, row: usize) -> std::result::Result<Operation, LedgerError> {
        let user = self.user.trim();
        if user.is_empty() {
            return Err(LedgerError::InvalidRecord {
                row,
                message: "missing user".to_string(),
            });
        }
        let email = user.to_string();

        match self.op.trim().to_lowercase().as_str() {
            "register" => Ok(Operation::Register { email }),
            "earn" => Ok(Operation::Earn {
                email,
                points: self.parse_points(row)?,
            }),
            "redeem" => Ok(Operation::Redeem {
                email,
                points: self.parse_points(row)?,
            }),
            other => Err(LedgerError::InvalidRecord {
                row,
                message: format!("unknown operation '{}'", other),
            }),
        }
    }

    fn parse_points(&self, row: usize) -> std::result::Result<Points, LedgerError> {
        let raw = self
            .points
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| LedgerError::InvalidRecord {
                row,
                message: "missing points".to_string(),
            })?;

        match Points::from_str(raw) {
            Ok(points) => Ok(points),
            Err(LedgerError::InvalidRecord { message, .. }) => {
                Err(LedgerError::InvalidRecord { row, message })
            }
            Err(e) => Err(e),
        }
    }
}

/// A parsed replay operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Register the user and open their loyalty account.
    Register { email: String },

    /// Award points through the provider, then commit locally.
    Earn { email: String, points: Points },

    /// Redeem points through the provider, then commit locally.
    Redeem { email: String, points: Points },
}
