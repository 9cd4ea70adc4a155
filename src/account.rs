//! Loyalty account model and per-account ledger state.
//!
//! Maintains the invariant: `balance == Σ signed points of the log` at all times.

use crate::error::{LedgerError, Result};
use crate::ids::{AccountId, ExternalHandle, TransactionId, UserId};
use crate::points::Points;
use crate::transaction::{Transaction, TxKind};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Largest balance an account may hold. Keeps the signed fold of the log
/// within `i64`.
pub const MAX_BALANCE: u64 = i64::MAX as u64;

/// Snapshot of a loyalty account.
///
/// # Invariants
///
/// - `balance` is never negative and always equals the fold of the account's
///   transaction log
/// - `external_handle` moves from `None` to `Some` at most once
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: AccountId,

    /// Owning identity.
    pub user_id: UserId,

    /// Current points balance.
    pub balance: u64,

    pub created_at: DateTime<Utc>,

    /// Advances on every committed transaction and handle link.
    pub updated_at: DateTime<Utc>,

    /// Provider loyalty account, once linked.
    pub external_handle: Option<ExternalHandle>,
}

/// Mutable state of one account: the account record plus its append-only log.
///
/// Always accessed behind the account's lock in [`crate::LedgerStore`].
#[derive(Debug)]
pub(crate) struct AccountLedger {
    account: Account,
    log: Vec<Transaction>,
}

impl AccountLedger {
    pub(crate) fn new(id: AccountId, user_id: UserId) -> Self {
        let now = Utc::now();
        AccountLedger {
            account: Account {
                id,
                user_id,
                balance: 0,
                created_at: now,
                updated_at: now,
                external_handle: None,
            },
            log: Vec::new(),
        }
    }

    pub(crate) fn snapshot(&self) -> Account {
        self.account.clone()
    }

    pub(crate) fn balance(&self) -> u64 {
        self.account.balance
    }

    pub(crate) fn history(&self) -> &[Transaction] {
        &self.log
    }

    pub(crate) fn external_handle(&self) -> Option<&ExternalHandle> {
        self.account.external_handle.as_ref()
    }

    /// Applies a transaction and appends it to the log.
    ///
    /// `next_id` is only called once every check has passed, so a rejected
    /// transaction consumes no id and leaves no trace.
    pub(crate) fn record(
        &mut self,
        kind: TxKind,
        points: Points,
        next_id: impl FnOnce() -> TransactionId,
    ) -> Result<Transaction> {
        let amount = points.get();
        let new_balance = match kind {
            TxKind::Earn => self
                .account
                .balance
                .checked_add(amount)
                .filter(|balance| *balance <= MAX_BALANCE)
                .ok_or_else(|| LedgerError::InvariantViolation {
                    account: self.account.id.get(),
                    message: format!(
                        "balance {} + {} exceeds {}",
                        self.account.balance, amount, MAX_BALANCE
                    ),
                })?,
            TxKind::Redeem => {
                if amount > self.account.balance {
                    return Err(LedgerError::InsufficientBalance {
                        requested: amount,
                        available: self.account.balance,
                    });
                }
                self.account.balance - amount
            }
        };

        let now = Utc::now();
        let tx = Transaction {
            id: next_id(),
            account_id: self.account.id,
            kind,
            points,
            timestamp: now,
        };

        self.log.push(tx.clone());
        self.account.balance = new_balance;
        self.account.updated_at = now;
        Ok(tx)
    }

    /// Links the provider handle. Relinking the same handle is a no-op;
    /// a different handle is rejected.
    pub(crate) fn link(&mut self, handle: ExternalHandle) -> Result<bool> {
        match &self.account.external_handle {
            Some(existing) if *existing == handle => Ok(false),
            Some(existing) => Err(LedgerError::already_exists(
                "external handle",
                format!("account {} is linked to {}", self.account.id, existing),
            )),
            None => {
                self.account.external_handle = Some(handle);
                self.account.updated_at = Utc::now();
                Ok(true)
            }
        }
    }

    /// Recomputes the balance from the log.
    pub(crate) fn folded_balance(&self) -> i64 {
        self.log.iter().map(Transaction::signed_points).sum()
    }

    /// Verifies the invariant: cached balance equals the fold of the log.
    pub(crate) fn check_invariant(&self) -> bool {
        self.folded_balance() == self.account.balance as i64
    }
}
