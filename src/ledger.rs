//! Concurrent loyalty ledger.
//!
//! Owns accounts, balances, external handles and the append-only transaction
//! log. Each account lives behind its own lock: every read and write of one
//! account is serialized, while different accounts never contend.

use crate::account::{Account, AccountLedger};
use crate::error::{LedgerError, Result};
use crate::identity::IdentityStore;
use crate::ids::{AccountId, ExternalHandle, TransactionId, UserId};
use crate::points::Points;
use crate::transaction::{Transaction, TxKind};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The ledger store.
///
/// # Locking
///
/// - `accounts` maps ids to per-account mutexes; the map's shard locks are
///   only held long enough to clone the `Arc`
/// - `owners` is the identity → account index; account creation runs inside
///   its entry so two creations for one identity cannot both succeed
/// - transaction ids are drawn while the account mutex is held, so each
///   account's log is ordered by id
pub struct LedgerStore {
    identities: Arc<IdentityStore>,
    accounts: DashMap<AccountId, Arc<Mutex<AccountLedger>>>,
    owners: DashMap<UserId, AccountId>,
    next_account_id: AtomicU64,
    next_tx_id: AtomicU64,
}

impl LedgerStore {
    /// Creates an empty ledger backed by the given identity store.
    pub fn new(identities: Arc<IdentityStore>) -> Self {
        LedgerStore {
            identities,
            accounts: DashMap::new(),
            owners: DashMap::new(),
            next_account_id: AtomicU64::new(1),
            next_tx_id: AtomicU64::new(1),
        }
    }

    pub fn identities(&self) -> &Arc<IdentityStore> {
        &self.identities
    }

    /// Opens the account for `user_id` with a zero balance.
    ///
    /// Fails with `NotFound` for an unknown identity and `AlreadyExists` when
    /// the identity already owns an account.
    pub fn create_account(&self, user_id: UserId) -> Result<Account> {
        if !self.identities.contains(user_id) {
            return Err(LedgerError::not_found("user", user_id));
        }

        match self.owners.entry(user_id) {
            Entry::Occupied(existing) => Err(LedgerError::already_exists(
                "account",
                format!("user {} owns account {}", user_id, existing.get()),
            )),
            Entry::Vacant(slot) => {
                let id = AccountId(self.next_account_id.fetch_add(1, Ordering::SeqCst));
                let ledger = AccountLedger::new(id, user_id);
                let account = ledger.snapshot();
                self.accounts.insert(id, Arc::new(Mutex::new(ledger)));
                slot.insert(id);
                info!("Opened account {} for user {}", id, user_id);
                Ok(account)
            }
        }
    }

    /// Returns a snapshot of the account.
    pub fn get_account(&self, account_id: AccountId) -> Result<Account> {
        Ok(self.entry(account_id)?.lock().snapshot())
    }

    /// Returns a snapshot of the account owned by `user_id`.
    pub fn get_account_for_user(&self, user_id: UserId) -> Result<Account> {
        self.get_account(self.account_id_for(user_id)?)
    }

    /// Resolves the account id owned by `user_id`.
    pub fn account_id_for(&self, user_id: UserId) -> Result<AccountId> {
        self.owners
            .get(&user_id)
            .map(|id| *id.value())
            .ok_or_else(|| LedgerError::not_found("account for user", user_id))
    }

    /// Appends a transaction and updates the balance atomically.
    ///
    /// A REDEEM larger than the balance fails with `InsufficientBalance` and
    /// leaves neither a log entry nor a balance change.
    pub fn record_transaction(
        &self,
        account_id: AccountId,
        kind: TxKind,
        points: Points,
    ) -> Result<Transaction> {
        let entry = self.entry(account_id)?;
        let mut ledger = entry.lock();

        let tx = ledger.record(kind, points, || {
            TransactionId(self.next_tx_id.fetch_add(1, Ordering::SeqCst))
        })?;

        debug!(
            "Account {}: {} {} (tx {}), balance {}",
            account_id,
            kind,
            points,
            tx.id,
            ledger.balance()
        );
        Ok(tx)
    }

    /// Records a transaction from untyped input, validating kind and points.
    pub fn record_raw(&self, account_id: AccountId, kind: &str, points: i64) -> Result<Transaction> {
        let kind: TxKind = kind.parse()?;
        let points = Points::new(points)?;
        self.record_transaction(account_id, kind, points)
    }

    pub fn get_balance(&self, account_id: AccountId) -> Result<u64> {
        Ok(self.entry(account_id)?.lock().balance())
    }

    /// Returns the account's transactions, oldest first. Empty for an account
    /// that has never transacted.
    pub fn get_history(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        Ok(self.entry(account_id)?.lock().history().to_vec())
    }

    /// Returns balance and history observed under a single lock acquisition.
    pub fn get_statement(&self, account_id: AccountId) -> Result<(u64, Vec<Transaction>)> {
        let entry = self.entry(account_id)?;
        let ledger = entry.lock();
        Ok((ledger.balance(), ledger.history().to_vec()))
    }

    /// Associates the provider handle with the account.
    ///
    /// Idempotent for the handle already linked; fails with `AlreadyExists`
    /// if a different handle is linked.
    pub fn link_external_handle(&self, account_id: AccountId, handle: ExternalHandle) -> Result<()> {
        let entry = self.entry(account_id)?;
        let mut ledger = entry.lock();
        if ledger.link(handle.clone())? {
            info!("Account {} linked to provider handle {}", account_id, handle);
        }
        Ok(())
    }

    /// Returns the linked provider handle, or `None` while unlinked.
    pub fn get_external_handle(&self, account_id: AccountId) -> Result<Option<ExternalHandle>> {
        Ok(self.entry(account_id)?.lock().external_handle().cloned())
    }

    /// Recomputes the balance from the log and compares it to the cached value.
    pub fn verify_balance(&self, account_id: AccountId) -> Result<u64> {
        let entry = self.entry(account_id)?;
        let ledger = entry.lock();
        if !ledger.check_invariant() {
            return Err(LedgerError::InvariantViolation {
                account: account_id.get(),
                message: format!(
                    "cached balance {} != folded balance {}",
                    ledger.balance(),
                    ledger.folded_balance()
                ),
            });
        }
        Ok(ledger.balance())
    }

    /// Snapshots of every account, sorted by account id.
    pub fn accounts(&self) -> Vec<Account> {
        let entries: Vec<_> = self
            .accounts
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();

        let mut accounts: Vec<Account> = entries.iter().map(|e| e.lock().snapshot()).collect();
        accounts.sort_by_key(|a| a.id);
        accounts
    }

    fn entry(&self, account_id: AccountId) -> Result<Arc<Mutex<AccountLedger>>> {
        self.accounts
            .get(&account_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| LedgerError::not_found("account", account_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (LedgerStore, UserId) {
        let identities = Arc::new(IdentityStore::new());
        let user = identities.register("a@example.com").unwrap();
        (LedgerStore::new(identities), user.id)
    }

    fn pts(n: i64) -> Points {
        Points::new(n).unwrap()
    }

    #[test]
    fn test_create_account_starts_at_zero() {
        let (ledger, user) = setup();
        let account = ledger.create_account(user).unwrap();

        assert_eq!(account.user_id, user);
        assert_eq!(account.balance, 0);
        assert_eq!(ledger.get_account(account.id).unwrap(), account);
        assert_eq!(ledger.get_account_for_user(user).unwrap(), account);
    }

    #[test]
    fn test_create_account_twice_fails() {
        let (ledger, user) = setup();
        ledger.create_account(user).unwrap();

        assert!(matches!(
            ledger.create_account(user),
            Err(LedgerError::AlreadyExists { entity: "account", .. })
        ));
    }

    #[test]
    fn test_create_account_unknown_identity() {
        let (ledger, _) = setup();
        assert!(matches!(
            ledger.create_account(UserId(404)),
            Err(LedgerError::NotFound { entity: "user", .. })
        ));
    }

    #[test]
    fn test_unknown_account_is_not_found() {
        let (ledger, user) = setup();
        assert!(ledger.get_account(AccountId(9)).is_err());
        assert!(ledger.get_account_for_user(user).is_err());
        assert!(ledger.get_balance(AccountId(9)).is_err());
        assert!(ledger.get_history(AccountId(9)).is_err());
        assert!(ledger
            .record_transaction(AccountId(9), TxKind::Earn, pts(1))
            .is_err());
    }

    #[test]
    fn test_record_and_read_back() {
        let (ledger, user) = setup();
        let id = ledger.create_account(user).unwrap().id;
        let before = ledger.get_account(id).unwrap().updated_at;

        ledger.record_transaction(id, TxKind::Earn, pts(30)).unwrap();
        ledger.record_transaction(id, TxKind::Redeem, pts(12)).unwrap();

        assert_eq!(ledger.get_balance(id).unwrap(), 18);
        let history = ledger.get_history(id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, TxKind::Earn);
        assert_eq!(history[1].kind, TxKind::Redeem);
        assert!(history[0].id < history[1].id);
        assert!(ledger.get_account(id).unwrap().updated_at >= before);
        assert_eq!(ledger.verify_balance(id).unwrap(), 18);
    }

    #[test]
    fn test_fresh_account_history_is_empty() {
        let (ledger, user) = setup();
        let id = ledger.create_account(user).unwrap().id;
        assert!(ledger.get_history(id).unwrap().is_empty());
    }

    #[test]
    fn test_record_raw_validates_input() {
        let (ledger, user) = setup();
        let id = ledger.create_account(user).unwrap().id;

        assert!(matches!(
            ledger.record_raw(id, "GIFT", 5),
            Err(LedgerError::InvalidKind(_))
        ));
        assert!(matches!(
            ledger.record_raw(id, "EARN", 0),
            Err(LedgerError::InvalidPoints(0))
        ));
        assert!(matches!(
            ledger.record_raw(id, "EARN", -3),
            Err(LedgerError::InvalidPoints(-3))
        ));
        assert!(ledger.get_history(id).unwrap().is_empty());

        ledger.record_raw(id, "earn", 5).unwrap();
        assert_eq!(ledger.get_balance(id).unwrap(), 5);
    }

    #[test]
    fn test_failed_redeem_leaves_no_trace() {
        let (ledger, user) = setup();
        let id = ledger.create_account(user).unwrap().id;
        ledger.record_transaction(id, TxKind::Earn, pts(10)).unwrap();

        let err = ledger
            .record_transaction(id, TxKind::Redeem, pts(11))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(ledger.get_balance(id).unwrap(), 10);
        assert_eq!(ledger.get_history(id).unwrap().len(), 1);
    }

    #[test]
    fn test_earn_past_max_balance_is_rejected() {
        let (ledger, user) = setup();
        let id = ledger.create_account(user).unwrap().id;
        ledger
            .record_transaction(id, TxKind::Earn, pts(i64::MAX))
            .unwrap();

        let err = ledger
            .record_transaction(id, TxKind::Earn, pts(i64::MAX))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvariantViolation { .. }));
        assert_eq!(ledger.get_balance(id).unwrap(), i64::MAX as u64);
        assert_eq!(ledger.get_history(id).unwrap().len(), 1);
        assert_eq!(ledger.verify_balance(id).unwrap(), i64::MAX as u64);
    }

    #[test]
    fn test_external_handle_linking() {
        let (ledger, user) = setup();
        let id = ledger.create_account(user).unwrap().id;
        assert_eq!(ledger.get_external_handle(id).unwrap(), None);

        let handle = ExternalHandle::new("loyalty-customer-a");
        ledger.link_external_handle(id, handle.clone()).unwrap();
        ledger.link_external_handle(id, handle.clone()).unwrap();
        assert_eq!(ledger.get_external_handle(id).unwrap(), Some(handle));

        assert!(ledger
            .link_external_handle(id, ExternalHandle::new("other"))
            .is_err());
        assert!(ledger
            .link_external_handle(AccountId(77), ExternalHandle::new("x"))
            .is_err());
    }

    #[test]
    fn test_accounts_sorted_by_id() {
        let identities = Arc::new(IdentityStore::new());
        let ledger = LedgerStore::new(Arc::clone(&identities));
        for email in ["c@x.io", "a@x.io", "b@x.io"] {
            let user = identities.register(email).unwrap();
            ledger.create_account(user.id).unwrap();
        }

        let ids: Vec<u64> = ledger.accounts().iter().map(|a| a.id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
