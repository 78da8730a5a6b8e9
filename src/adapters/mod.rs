pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "redis")]
pub mod redis;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::{MemoryAdapter, MemoryCache};

use crate::{Balance, Operation, QueryError};

/// -----------------------------
/// Collaborator contracts
/// -----------------------------

/// Current balances, as held by the store of record.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Returns `EntityNotFound` when no such balance exists.
    async fn find_balance(
        &self,
        organization_id: Uuid,
        ledger_id: Uuid,
        balance_id: Uuid,
    ) -> Result<Balance, QueryError>;

    async fn find_balances_by_account(
        &self,
        organization_id: Uuid,
        ledger_id: Uuid,
        account_id: Uuid,
    ) -> Result<Vec<Balance>, QueryError>;
}

/// Append-only operation log.
///
/// Implementors MUST answer "last operation before" with an indexed lookup;
/// the resolvers never scan the log.
#[async_trait]
pub trait OperationLedger: Send + Sync {
    /// Latest operation on the balance with `created_at < before`.
    async fn find_last_operation_before(
        &self,
        organization_id: Uuid,
        ledger_id: Uuid,
        balance_id: Uuid,
        before: DateTime<Utc>,
    ) -> Result<Option<Operation>, QueryError>;

    /// For every balance of the account, its latest operation with
    /// `created_at < before`. At most one operation per balance id.
    async fn find_last_operations_for_account_before(
        &self,
        organization_id: Uuid,
        ledger_id: Uuid,
        account_id: Uuid,
        before: DateTime<Utc>,
    ) -> Result<Vec<Operation>, QueryError>;
}

/// Key/value cache holding the latest balance state written by the command
/// side.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Missing keys are simply absent from the map. Failures are reported
    /// once for the whole call, never per key.
    async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, String>, QueryError>;
}
