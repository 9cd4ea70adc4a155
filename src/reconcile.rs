//! Reconciliation between the local ledger and the external loyalty provider.
//!
//! The ledger stays authoritative. Points operations are mirrored to the
//! provider first and committed locally only once the provider accepts them;
//! read paths merge provider data in as a separate, best-effort supplement.

use crate::account::Account;
use crate::config::Config;
use crate::error::{LedgerError, Result};
use crate::identity::User;
use crate::ids::{AccountId, ExternalHandle, UserId};
use crate::ledger::LedgerStore;
use crate::points::Points;
use crate::provider::{ExternalTransaction, LoyaltyProvider, ProviderError};
use crate::transaction::{Transaction, TxKind};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Result of a successful earn or redeem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointsReceipt {
    /// The committed local transaction.
    pub transaction: Transaction,

    /// Provider account the operation was mirrored to.
    pub external_handle: ExternalHandle,
}

/// Local balance plus, when available, the provider's view of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceReport {
    pub account_id: AccountId,

    /// Authoritative local balance.
    pub balance: u64,

    /// Provider-reported balance; `None` when unlinked or unreachable.
    pub external: Option<ExternalBalance>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalBalance {
    pub handle: ExternalHandle,
    pub balance: i64,
}

/// Local history plus, when available, the provider's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryReport {
    pub account_id: AccountId,

    /// Authoritative local transactions, oldest first.
    pub transactions: Vec<Transaction>,

    /// Provider-reported transactions, kept apart from the local sequence.
    pub external: Option<ExternalHistory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalHistory {
    pub handle: ExternalHandle,
    pub transactions: Vec<ExternalTransaction>,
}

/// Drives points operations against the provider and the ledger.
pub struct Reconciler {
    ledger: Arc<LedgerStore>,
    provider: Arc<dyn LoyaltyProvider>,
    timeout: Duration,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<LedgerStore>,
        provider: Arc<dyn LoyaltyProvider>,
        config: &Config,
    ) -> Self {
        Reconciler {
            ledger,
            provider,
            timeout: config.provider.timeout(),
        }
    }

    pub fn ledger(&self) -> &Arc<LedgerStore> {
        &self.ledger
    }

    /// Registers `email` and opens its loyalty account.
    pub fn open_account(&self, email: &str) -> Result<(User, Account)> {
        let user = self.ledger.identities().register(email)?;
        let account = self.ledger.create_account(user.id)?;
        Ok((user, account))
    }

    /// Awards points.
    ///
    /// The provider must accept the award before anything is committed
    /// locally. A handle provisioned along the way is persisted after the
    /// commit on a best-effort basis.
    pub async fn earn(&self, user_id: UserId, points: Points) -> Result<PointsReceipt> {
        let (user, account_id) = self.resolve(user_id)?;
        let (handle, provisioned) = self.ensure_handle(account_id, &user).await?;

        self.call("earn", self.provider.earn(&handle, points)).await?;

        let transaction = self.commit(account_id, TxKind::Earn, points, &handle)?;

        if provisioned {
            self.persist_handle(account_id, &handle);
        }

        info!(
            "User {}: earned {} points (tx {})",
            user_id, points, transaction.id
        );
        Ok(PointsReceipt {
            transaction,
            external_handle: handle,
        })
    }

    /// Redeems points.
    ///
    /// Sufficiency is decided from the local balance before the provider is
    /// contacted, and checked again atomically at commit time.
    pub async fn redeem(&self, user_id: UserId, points: Points) -> Result<PointsReceipt> {
        let (user, account_id) = self.resolve(user_id)?;

        let available = self.ledger.get_balance(account_id)?;
        if points.get() > available {
            debug!(
                "User {}: redeem of {} rejected locally, balance {}",
                user_id, points, available
            );
            return Err(LedgerError::InsufficientBalance {
                requested: points.get(),
                available,
            });
        }

        let (handle, provisioned) = self.ensure_handle(account_id, &user).await?;
        if provisioned {
            self.persist_handle(account_id, &handle);
        }

        self.call("redeem", self.provider.redeem(&handle, points)).await?;

        let transaction = self.commit(account_id, TxKind::Redeem, points, &handle)?;

        info!(
            "User {}: redeemed {} points (tx {})",
            user_id, points, transaction.id
        );
        Ok(PointsReceipt {
            transaction,
            external_handle: handle,
        })
    }

    /// Returns the local balance, with the provider's balance attached when
    /// the account is linked and the provider answers.
    pub async fn get_balance(&self, user_id: UserId) -> Result<BalanceReport> {
        let account_id = self.ledger.account_id_for(user_id)?;
        let balance = self.ledger.get_balance(account_id)?;

        let external = match self.ledger.get_external_handle(account_id)? {
            Some(handle) => {
                let fetched = self.call("balance", self.provider.get_balance(&handle)).await;
                match fetched {
                    Ok(balance) => Some(ExternalBalance { handle, balance }),
                    Err(e) => {
                        debug!("Account {}: falling back to local balance: {}", account_id, e);
                        None
                    }
                }
            }
            None => None,
        };

        Ok(BalanceReport {
            account_id,
            balance,
            external,
        })
    }

    /// Returns the local history, with the provider's history attached as a
    /// separate sequence when the account is linked and the provider answers.
    pub async fn get_history(&self, user_id: UserId) -> Result<HistoryReport> {
        let account_id = self.ledger.account_id_for(user_id)?;
        let transactions = self.ledger.get_history(account_id)?;

        let external = match self.ledger.get_external_handle(account_id)? {
            Some(handle) => {
                let fetched = self.call("history", self.provider.get_history(&handle)).await;
                match fetched {
                    Ok(transactions) => Some(ExternalHistory {
                        handle,
                        transactions,
                    }),
                    Err(e) => {
                        debug!("Account {}: falling back to local history: {}", account_id, e);
                        None
                    }
                }
            }
            None => None,
        };

        Ok(HistoryReport {
            account_id,
            transactions,
            external,
        })
    }

    fn resolve(&self, user_id: UserId) -> Result<(User, AccountId)> {
        let user = self.ledger.identities().get_user(user_id)?;
        let account_id = self.ledger.account_id_for(user_id)?;
        Ok((user, account_id))
    }

    /// Returns the linked handle, provisioning one through the provider if the
    /// account is still unlinked. The flag is `true` for a fresh handle.
    async fn ensure_handle(
        &self,
        account_id: AccountId,
        user: &User,
    ) -> Result<(ExternalHandle, bool)> {
        if let Some(handle) = self.ledger.get_external_handle(account_id)? {
            return Ok((handle, false));
        }

        let customer = self
            .call("provision customer", self.provider.provision_customer(&user.email))
            .await?;
        let handle = self
            .call(
                "provision loyalty account",
                self.provider.provision_loyalty_account(&customer),
            )
            .await?;

        debug!(
            "Account {}: provisioned provider handle {} for {}",
            account_id, handle, customer
        );
        Ok((handle, true))
    }

    fn commit(
        &self,
        account_id: AccountId,
        kind: TxKind,
        points: Points,
        handle: &ExternalHandle,
    ) -> Result<Transaction> {
        self.ledger
            .record_transaction(account_id, kind, points)
            .map_err(|e| {
                error!(
                    "Account {}: provider applied {} {} on {} but local commit failed: {}",
                    account_id, kind, points, handle, e
                );
                e
            })
    }

    fn persist_handle(&self, account_id: AccountId, handle: &ExternalHandle) {
        if let Err(e) = self.ledger.link_external_handle(account_id, handle.clone()) {
            warn!(
                "Account {}: failed to persist provider handle {}: {}",
                account_id, handle, e
            );
        }
    }

    /// Runs a provider call under the configured timeout. Failure and timeout
    /// both surface as `ProviderUnavailable`.
    async fn call<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, ProviderError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!("Provider {} failed: {}", operation, e);
                Err(LedgerError::ProviderUnavailable {
                    operation,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                warn!("Provider {} timed out after {:?}", operation, self.timeout);
                Err(LedgerError::ProviderUnavailable {
                    operation,
                    reason: format!("timed out after {:?}", self.timeout),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityStore;
    use crate::provider::{InMemoryProvider, ProviderOp};

    fn setup() -> (Reconciler, Arc<InMemoryProvider>, UserId) {
        let ledger = Arc::new(LedgerStore::new(Arc::new(IdentityStore::new())));
        let provider = Arc::new(InMemoryProvider::new());
        let reconciler = Reconciler::new(ledger, provider.clone(), &Config::default());
        let (user, _) = reconciler.open_account("a@example.com").unwrap();
        (reconciler, provider, user.id)
    }

    fn pts(n: i64) -> Points {
        Points::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_earn_provisions_and_links() {
        let (reconciler, provider, user) = setup();

        let receipt = reconciler.earn(user, pts(20)).await.unwrap();
        assert_eq!(receipt.transaction.kind, TxKind::Earn);
        assert_eq!(
            receipt.external_handle.as_str(),
            "loyalty-customer-a@example.com"
        );

        let account = reconciler.ledger().get_account_for_user(user).unwrap();
        assert_eq!(account.balance, 20);
        assert_eq!(account.external_handle, Some(receipt.external_handle));
        assert_eq!(provider.calls(ProviderOp::ProvisionAccount), 1);

        reconciler.earn(user, pts(5)).await.unwrap();
        assert_eq!(provider.calls(ProviderOp::ProvisionAccount), 1);
    }

    #[tokio::test]
    async fn test_redeem_checks_local_balance_first() {
        let (reconciler, provider, user) = setup();
        reconciler.earn(user, pts(10)).await.unwrap();

        let err = reconciler.redeem(user, pts(11)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(provider.calls(ProviderOp::Redeem), 0);

        reconciler.redeem(user, pts(10)).await.unwrap();
        let report = reconciler.get_balance(user).await.unwrap();
        assert_eq!(report.balance, 0);
    }

    #[tokio::test]
    async fn test_provisioning_failure_aborts_earn() {
        let (reconciler, provider, user) = setup();
        provider.set_failing(ProviderOp::ProvisionCustomer, true);

        let err = reconciler.earn(user, pts(5)).await.unwrap_err();
        assert!(matches!(err, LedgerError::ProviderUnavailable { .. }));
        assert_eq!(provider.calls(ProviderOp::Earn), 0);

        let account = reconciler.ledger().get_account_for_user(user).unwrap();
        assert_eq!(account.balance, 0);
        assert!(account.external_handle.is_none());
    }

    #[tokio::test]
    async fn test_unlinked_reads_are_local_only() {
        let (reconciler, provider, user) = setup();

        let balance = reconciler.get_balance(user).await.unwrap();
        assert_eq!(balance.balance, 0);
        assert!(balance.external.is_none());

        let history = reconciler.get_history(user).await.unwrap();
        assert!(history.transactions.is_empty());
        assert!(history.external.is_none());
        assert_eq!(provider.calls(ProviderOp::Balance), 0);
        assert_eq!(provider.calls(ProviderOp::History), 0);
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let (reconciler, _, _) = setup();
        assert!(matches!(
            reconciler.earn(UserId(99), pts(1)).await,
            Err(LedgerError::NotFound { .. })
        ));
        assert!(reconciler.get_balance(UserId(99)).await.is_err());
    }
}
