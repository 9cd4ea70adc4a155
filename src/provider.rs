//! External loyalty provider capability.
//!
//! The ledger never trusts the provider for balances it acts on; provider
//! responses are mirrored and reported only.

use crate::ids::{CustomerHandle, ExternalHandle};
use crate::points::Points;
use crate::transaction::TxKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a loyalty provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Transport or availability failure
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    /// The provider refused the request
    #[error("provider rejected request: {0}")]
    Rejected(String),

    /// The handle is unknown to the provider
    #[error("unknown loyalty account: {0}")]
    UnknownAccount(String),
}

/// A provider-reported transaction. Never merged into the local log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalTransaction {
    pub kind: TxKind,
    pub points: u64,
    pub timestamp: DateTime<Utc>,
}

/// The operations the reconciliation layer needs from a loyalty provider.
#[async_trait]
pub trait LoyaltyProvider: Send + Sync {
    /// Finds or creates the provider customer for `email`.
    async fn provision_customer(&self, email: &str) -> Result<CustomerHandle, ProviderError>;

    /// Finds or creates the loyalty account for a provider customer.
    async fn provision_loyalty_account(
        &self,
        customer: &CustomerHandle,
    ) -> Result<ExternalHandle, ProviderError>;

    async fn earn(&self, handle: &ExternalHandle, points: Points) -> Result<(), ProviderError>;

    async fn redeem(&self, handle: &ExternalHandle, points: Points) -> Result<(), ProviderError>;

    async fn get_balance(&self, handle: &ExternalHandle) -> Result<i64, ProviderError>;

    async fn get_history(
        &self,
        handle: &ExternalHandle,
    ) -> Result<Vec<ExternalTransaction>, ProviderError>;
}

/// Provider operations that can be made to fail in [`InMemoryProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderOp {
    ProvisionCustomer,
    ProvisionAccount,
    Earn,
    Redeem,
    Balance,
    History,
}

#[derive(Default)]
struct ProviderState {
    accounts: HashMap<ExternalHandle, ExternalLedger>,
    failing: HashSet<ProviderOp>,
    latency: Option<Duration>,
    calls: HashMap<ProviderOp, usize>,
}

#[derive(Default)]
struct ExternalLedger {
    balance: i64,
    history: Vec<ExternalTransaction>,
}

/// Process-local loyalty provider.
///
/// Provisions deterministic handles (`customer-<email>`,
/// `loyalty-<customer>`), keeps its own balances, and lets callers inject
/// failures or latency per operation. Redemptions are not balance-checked:
/// the provider mirrors whatever the ledger has already approved.
#[derive(Default)]
pub struct InMemoryProvider {
    state: Mutex<ProviderState>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call of `op` fail (or succeed again).
    pub fn set_failing(&self, op: ProviderOp, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing.insert(op);
        } else {
            state.failing.remove(&op);
        }
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// Number of calls received for `op`, including failed ones.
    pub fn calls(&self, op: ProviderOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of loyalty accounts provisioned so far.
    pub fn account_count(&self) -> usize {
        self.state.lock().accounts.len()
    }

    /// Records the call, then sleeps and fails as configured.
    async fn enter(&self, op: ProviderOp) -> Result<(), ProviderError> {
        let (latency, failing) = {
            let mut state = self.state.lock();
            *state.calls.entry(op).or_insert(0) += 1;
            (state.latency, state.failing.contains(&op))
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if failing {
            return Err(ProviderError::Unreachable(format!("{:?} unavailable", op)));
        }
        Ok(())
    }

    fn apply(
        &self,
        handle: &ExternalHandle,
        kind: TxKind,
        points: Points,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        let account = state
            .accounts
            .get_mut(handle)
            .ok_or_else(|| ProviderError::UnknownAccount(handle.to_string()))?;

        let amount = i64::try_from(points.get())
            .map_err(|_| ProviderError::Rejected(format!("{} points out of range", points)))?;
        account.balance = match kind {
            TxKind::Earn => account.balance.checked_add(amount),
            TxKind::Redeem => account.balance.checked_sub(amount),
        }
        .ok_or_else(|| {
            ProviderError::Rejected(format!(
                "{} {} points would overflow balance {}",
                kind, points, account.balance
            ))
        })?;
        account.history.push(ExternalTransaction {
            kind,
            points: points.get(),
            timestamp: Utc::now(),
        });
        debug!("Provider: {} {} points on {}", kind, points, handle);
        Ok(())
    }
}

#[async_trait]
impl LoyaltyProvider for InMemoryProvider {
    async fn provision_customer(&self, email: &str) -> Result<CustomerHandle, ProviderError> {
        self.enter(ProviderOp::ProvisionCustomer).await?;
        if email.trim().is_empty() {
            return Err(ProviderError::Rejected("empty email".to_string()));
        }
        Ok(CustomerHandle::new(format!("customer-{}", email.trim())))
    }

    async fn provision_loyalty_account(
        &self,
        customer: &CustomerHandle,
    ) -> Result<ExternalHandle, ProviderError> {
        self.enter(ProviderOp::ProvisionAccount).await?;
        let handle = ExternalHandle::new(format!("loyalty-{}", customer));
        self.state
            .lock()
            .accounts
            .entry(handle.clone())
            .or_default();
        Ok(handle)
    }

    async fn earn(&self, handle: &ExternalHandle, points: Points) -> Result<(), ProviderError> {
        self.enter(ProviderOp::Earn).await?;
        self.apply(handle, TxKind::Earn, points)
    }

    async fn redeem(&self, handle: &ExternalHandle, points: Points) -> Result<(), ProviderError> {
        self.enter(ProviderOp::Redeem).await?;
        self.apply(handle, TxKind::Redeem, points)
    }

    async fn get_balance(&self, handle: &ExternalHandle) -> Result<i64, ProviderError> {
        self.enter(ProviderOp::Balance).await?;
        self.state
            .lock()
            .accounts
            .get(handle)
            .map(|a| a.balance)
            .ok_or_else(|| ProviderError::UnknownAccount(handle.to_string()))
    }

    async fn get_history(
        &self,
        handle: &ExternalHandle,
    ) -> Result<Vec<ExternalTransaction>, ProviderError> {
        self.enter(ProviderOp::History).await?;
        self.state
            .lock()
            .accounts
            .get(handle)
            .map(|a| a.history.clone())
            .ok_or_else(|| ProviderError::UnknownAccount(handle.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(n: i64) -> Points {
        Points::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_provisioning_is_deterministic() {
        let provider = InMemoryProvider::new();
        let customer = provider.provision_customer("a@example.com").await.unwrap();
        assert_eq!(customer.as_str(), "customer-a@example.com");

        let first = provider.provision_loyalty_account(&customer).await.unwrap();
        let second = provider.provision_loyalty_account(&customer).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_str(), "loyalty-customer-a@example.com");
        assert_eq!(provider.account_count(), 1);
    }

    #[tokio::test]
    async fn test_earn_redeem_and_reads() {
        let provider = InMemoryProvider::new();
        let customer = provider.provision_customer("a@example.com").await.unwrap();
        let handle = provider.provision_loyalty_account(&customer).await.unwrap();

        provider.earn(&handle, pts(10)).await.unwrap();
        provider.redeem(&handle, pts(4)).await.unwrap();

        assert_eq!(provider.get_balance(&handle).await.unwrap(), 6);
        let history = provider.get_history(&handle).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, TxKind::Earn);
        assert_eq!(history[1].points, 4);
    }

    #[tokio::test]
    async fn test_unknown_handle() {
        let provider = InMemoryProvider::new();
        let handle = ExternalHandle::new("loyalty-ghost");
        assert!(matches!(
            provider.earn(&handle, pts(1)).await,
            Err(ProviderError::UnknownAccount(_))
        ));
        assert!(provider.get_balance(&handle).await.is_err());
    }

    #[tokio::test]
    async fn test_balance_overflow_is_rejected() {
        let provider = InMemoryProvider::new();
        let customer = provider.provision_customer("a@example.com").await.unwrap();
        let handle = provider.provision_loyalty_account(&customer).await.unwrap();

        provider.earn(&handle, pts(i64::MAX)).await.unwrap();
        assert!(matches!(
            provider.earn(&handle, pts(i64::MAX)).await,
            Err(ProviderError::Rejected(_))
        ));

        assert_eq!(provider.get_balance(&handle).await.unwrap(), i64::MAX);
        assert_eq!(provider.get_history(&handle).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let provider = InMemoryProvider::new();
        provider.set_failing(ProviderOp::ProvisionCustomer, true);
        provider.set_failing(ProviderOp::ProvisionCustomer, true);
        assert!(matches!(
            provider.provision_customer("a@example.com").await,
            Err(ProviderError::Unreachable(_))
        ));

        provider.set_failing(ProviderOp::ProvisionCustomer, false);
        assert!(provider.provision_customer("a@example.com").await.is_ok());
        assert_eq!(provider.calls(ProviderOp::ProvisionCustomer), 2);
    }
}
