use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::histogram;
use tracing::debug;
use uuid::Uuid;

use crate::adapters::{BalanceStore, OperationLedger};
use crate::{Balance, Operation, QueryError};

/// Rebuilds what a balance looked like at a past instant.
///
/// This is a lookup, not a replay: every operation carries the balance state
/// right after it, so the state at `t` is the `balance_after` of the last
/// operation committed strictly before `t`. With no such operation the
/// balance is either in its initial zero state, or did not exist yet.
///
/// The cache is never consulted; it only holds current state.
pub struct PointInTimeResolver {
    balances: Arc<dyn BalanceStore>,
    operations: Arc<dyn OperationLedger>,
    timeout: Option<Duration>,
}

impl PointInTimeResolver {
    pub fn new(balances: Arc<dyn BalanceStore>, operations: Arc<dyn OperationLedger>) -> Self {
        Self {
            balances,
            operations,
            timeout: None,
        }
    }

    /// Deadline applied to each lookup separately.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn balance_at(
        &self,
        organization_id: Uuid,
        ledger_id: Uuid,
        balance_id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Result<Balance, QueryError> {
        ensure_not_future(timestamp)?;
        let start = Instant::now();

        let current = bounded(
            self.timeout,
            self.balances
                .find_balance(organization_id, ledger_id, balance_id),
        )
        .await?;

        let last = bounded(
            self.timeout,
            self.operations.find_last_operation_before(
                organization_id,
                ledger_id,
                balance_id,
                timestamp,
            ),
        )
        .await?;

        let resolved = match last {
            Some(op) => {
                debug!(balance_id = %balance_id, operation_id = %op.id, "balance rebuilt from operation");
                op.snapshot_of(&current)
            }
            None if !current.existed_at(timestamp) => {
                return Err(QueryError::NoBalanceDataAtTimestamp {
                    balance_id,
                    timestamp,
                });
            }
            None => {
                debug!(balance_id = %balance_id, "no activity before timestamp, initial state");
                current.initial_state()
            }
        };

        histogram!("ledger_query.balance_at.duration_ms", "mode" => "single")
            .record(start.elapsed().as_millis() as f64);

        Ok(resolved)
    }

    /// Every balance of the account as of `timestamp`, in one read of the
    /// balance store and one read of the operation log.
    ///
    /// Balances created after `timestamp` are left out. Operations whose
    /// balance row no longer exists still produce an entry, rebuilt from the
    /// operation alone. An account with nothing to show yields an empty list.
    pub async fn account_balances_at(
        &self,
        organization_id: Uuid,
        ledger_id: Uuid,
        account_id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<Balance>, QueryError> {
        ensure_not_future(timestamp)?;
        let start = Instant::now();

        let (current, operations) = tokio::try_join!(
            bounded(
                self.timeout,
                self.balances
                    .find_balances_by_account(organization_id, ledger_id, account_id)
            ),
            bounded(
                self.timeout,
                self.operations.find_last_operations_for_account_before(
                    organization_id,
                    ledger_id,
                    account_id,
                    timestamp,
                ),
            ),
        )?;

        let mut last_by_balance: HashMap<Uuid, Operation> = HashMap::with_capacity(operations.len());
        for op in operations {
            let newer = last_by_balance
                .get(&op.balance_id)
                .is_none_or(|kept| op.created_at > kept.created_at);
            if newer {
                last_by_balance.insert(op.balance_id, op);
            }
        }

        let mut resolved = Vec::with_capacity(current.len() + last_by_balance.len());
        for balance in &current {
            match last_by_balance.remove(&balance.id) {
                Some(op) => resolved.push(op.snapshot_of(balance)),
                None if balance.existed_at(timestamp) => resolved.push(balance.initial_state()),
                None => {}
            }
        }

        let mut orphaned: Vec<Operation> = last_by_balance.into_values().collect();
        orphaned.sort_by_key(|op| op.balance_id);
        if !orphaned.is_empty() {
            debug!(
                account_id = %account_id,
                count = orphaned.len(),
                "rebuilding balances without a current row"
            );
        }
        resolved.extend(orphaned.iter().map(Operation::reconstruct_balance));

        histogram!("ledger_query.balance_at.duration_ms", "mode" => "account")
            .record(start.elapsed().as_millis() as f64);

        Ok(resolved)
    }
}

/// Run a lookup under an optional deadline; elapsing yields `Cancelled`.
pub(crate) async fn bounded<T, F>(timeout: Option<Duration>, lookup: F) -> Result<T, QueryError>
where
    F: Future<Output = Result<T, QueryError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, lookup).await?,
        None => lookup.await,
    }
}

fn ensure_not_future(timestamp: DateTime<Utc>) -> Result<(), QueryError> {
    if timestamp > Utc::now() {
        return Err(QueryError::InvalidTimestamp(timestamp));
    }
    Ok(())
}
