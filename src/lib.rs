//! # Loyalty Ledger
//!
//! A concurrent ledger of loyalty-point balances that mirrors every award and
//! redemption to an external loyalty provider.
//!
//! ## Design Principles
//!
//! - **Local authority**: the ledger decides balances; the provider is a mirror
//! - **Strict invariants**: balances never go negative and always equal the
//!   fold of the account's transaction log
//! - **Per-account locking**: operations on different accounts never contend
//! - **Provider first, commit second**: a failed provider call leaves no local
//!   trace
//!
//! ## Example
//!
//! ```no_run
//! use loyalty_ledger::{Config, IdentityStore, InMemoryProvider, LedgerStore, Points, Reconciler};
//! use std::sync::Arc;
//!
//! # async fn demo() -> loyalty_ledger::Result<()> {
//! let ledger = Arc::new(LedgerStore::new(Arc::new(IdentityStore::new())));
//! let reconciler = Reconciler::new(ledger, Arc::new(InMemoryProvider::new()), &Config::default());
//!
//! let (user, _account) = reconciler.open_account("ada@example.com")?;
//! reconciler.earn(user.id, Points::new(50)?).await?;
//! let report = reconciler.get_balance(user.id).await?;
//! assert_eq!(report.balance, 50);
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod config;
pub mod error;
pub mod identity;
pub mod ids;
pub mod ledger;
pub mod points;
pub mod provider;
pub mod reconcile;
pub mod replay;
pub mod transaction;

pub use account::{Account, MAX_BALANCE};
pub use config::Config;
pub use error::{LedgerError, Result};
pub use identity::{IdentityStore, User};
pub use ids::{AccountId, CustomerHandle, ExternalHandle, TransactionId, UserId};
pub use ledger::LedgerStore;
pub use points::Points;
pub use provider::{
    ExternalTransaction, InMemoryProvider, LoyaltyProvider, ProviderError, ProviderOp,
};
pub use reconcile::{
    BalanceReport, ExternalBalance, ExternalHistory, HistoryReport, PointsReceipt, Reconciler,
};
pub use replay::{ReplayEngine, ReplaySummary};
pub use transaction::{Operation, OperationRecord, Transaction, TxKind};
