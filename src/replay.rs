//! Replays a CSV stream of loyalty operations through the reconciler.
//!
//! Records are applied in the order they are read. Invalid records and
//! failed operations are logged at warn level and skipped; they never stop
//! the replay.

use crate::error::{LedgerError, Result};
use crate::reconcile::Reconciler;
use crate::transaction::{Operation, OperationRecord};
use csv::{ReaderBuilder, Trim};
use log::{debug, warn};
use std::io::{Read, Write};

/// Outcome counts of a replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub applied: usize,
    pub rejected: usize,
}

/// CSV front end over a [`Reconciler`].
pub struct ReplayEngine {
    reconciler: Reconciler,
}

impl ReplayEngine {
    pub fn new(reconciler: Reconciler) -> Self {
        ReplayEngine { reconciler }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Processes operations from a CSV reader in streaming fashion.
    pub async fn process_csv<R: Read>(&self, reader: R) -> Result<ReplaySummary> {
        let mut csv_reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(reader);

        let mut summary = ReplaySummary::default();
        for (row_idx, result) in csv_reader.deserialize::<OperationRecord>().enumerate() {
            let row_num = row_idx + 2; // 1-indexed, accounting for header row

            let outcome = match result {
                Ok(record) => match record.parse(row_num) {
                    Ok(op) => self.apply(op, row_num).await,
                    Err(e) => Err(e),
                },
                Err(e) => Err(LedgerError::from(e)),
            };

            match outcome {
                Ok(()) => summary.applied += 1,
                Err(e) => {
                    warn!("Row {}: {}", row_num, e);
                    summary.rejected += 1;
                }
            }
        }

        Ok(summary)
    }

    async fn apply(&self, op: Operation, row: usize) -> Result<()> {
        let identities = self.reconciler.ledger().identities();
        match op {
            Operation::Register { email } => {
                let (user, account) = self.reconciler.open_account(&email)?;
                debug!(
                    "Row {}: registered {} as user {} with account {}",
                    row, email, user.id, account.id
                );
            }
            Operation::Earn { email, points } => {
                let user = identities.get_user_by_email(&email)?;
                let receipt = self.reconciler.earn(user.id, points).await?;
                debug!(
                    "Row {}: {} earned {} (tx {})",
                    row, email, points, receipt.transaction.id
                );
            }
            Operation::Redeem { email, points } => {
                let user = identities.get_user_by_email(&email)?;
                let receipt = self.reconciler.redeem(user.id, points).await?;
                debug!(
                    "Row {}: {} redeemed {} (tx {})",
                    row, email, points, receipt.transaction.id
                );
            }
        }
        Ok(())
    }

    /// Writes final account states to CSV, sorted by user id.
    pub fn write_output<W: Write>(&self, writer: W) -> Result<()> {
        let ledger = self.reconciler.ledger();
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record(["user", "email", "account", "balance", "external_handle"])?;

        let mut accounts = ledger.accounts();
        accounts.sort_by_key(|a| a.user_id);

        for account in accounts {
            let user = ledger.identities().get_user(account.user_id)?;
            csv_writer.write_record([
                account.user_id.to_string(),
                user.email,
                account.id.to_string(),
                account.balance.to_string(),
                account
                    .external_handle
                    .map(|h| h.to_string())
                    .unwrap_or_default(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(())
    }
}
