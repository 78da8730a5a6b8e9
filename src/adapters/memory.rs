use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::adapters::{BalanceStore, KeyValueCache, OperationLedger};
use crate::{Balance, Operation, QueryError};

fn poisoned<T>(_: PoisonError<T>) -> QueryError {
    QueryError::Storage("memory store lock poisoned".to_string())
}

#[derive(Clone, Default)]
struct MemoryStore {
    balances: Arc<RwLock<HashMap<Uuid, Balance>>>,
    operations: Arc<RwLock<Vec<Operation>>>,
}

/// Store of record and operation log kept in process memory.
#[derive(Clone, Default)]
pub struct MemoryAdapter {
    store: MemoryStore,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_balance(&self, balance: Balance) -> Result<(), QueryError> {
        let mut balances = self.store.balances.write().map_err(poisoned)?;
        balances.insert(balance.id, balance);
        Ok(())
    }

    /// Append to the log and move the current balance to the operation's
    /// `balance_after` state, the way the command side would.
    pub fn record_operation(&self, operation: Operation) -> Result<(), QueryError> {
        {
            let mut balances = self.store.balances.write().map_err(poisoned)?;
            if let Some(current) = balances.get_mut(&operation.balance_id) {
                let (available, on_hold, version) = operation.balance_after.resolve();
                current.overwrite_amounts(available, on_hold, version);
                current.updated_at = current.updated_at.max(operation.created_at);
            }
        }

        let mut operations = self.store.operations.write().map_err(poisoned)?;
        operations.push(operation);
        Ok(())
    }

    /// Drop the current row. Operations referencing it stay in the log.
    pub fn remove_balance(&self, balance_id: Uuid) -> Result<Option<Balance>, QueryError> {
        let mut balances = self.store.balances.write().map_err(poisoned)?;
        Ok(balances.remove(&balance_id))
    }
}

#[async_trait]
impl BalanceStore for MemoryAdapter {
    async fn find_balance(
        &self,
        organization_id: Uuid,
        ledger_id: Uuid,
        balance_id: Uuid,
    ) -> Result<Balance, QueryError> {
        let balances = self.store.balances.read().map_err(poisoned)?;
        balances
            .get(&balance_id)
            .filter(|b| b.organization_id == organization_id && b.ledger_id == ledger_id)
            .cloned()
            .ok_or_else(|| QueryError::balance_not_found(balance_id))
    }

    async fn find_balances_by_account(
        &self,
        organization_id: Uuid,
        ledger_id: Uuid,
        account_id: Uuid,
    ) -> Result<Vec<Balance>, QueryError> {
        let balances = self.store.balances.read().map_err(poisoned)?;

        let mut found: Vec<Balance> = balances
            .values()
            .filter(|b| {
                b.organization_id == organization_id
                    && b.ledger_id == ledger_id
                    && b.account_id == account_id
            })
            .cloned()
            .collect();

        found.sort_by_key(|b| (b.created_at, b.id));
        Ok(found)
    }
}

#[async_trait]
impl OperationLedger for MemoryAdapter {
    async fn find_last_operation_before(
        &self,
        organization_id: Uuid,
        ledger_id: Uuid,
        balance_id: Uuid,
        before: DateTime<Utc>,
    ) -> Result<Option<Operation>, QueryError> {
        let operations = self.store.operations.read().map_err(poisoned)?;

        // Equal commit times: the later append wins.
        Ok(operations
            .iter()
            .enumerate()
            .filter(|(_, op)| {
                op.organization_id == organization_id
                    && op.ledger_id == ledger_id
                    && op.balance_id == balance_id
                    && op.created_at < before
            })
            .max_by_key(|(seq, op)| (op.created_at, *seq))
            .map(|(_, op)| op.clone()))
    }

    async fn find_last_operations_for_account_before(
        &self,
        organization_id: Uuid,
        ledger_id: Uuid,
        account_id: Uuid,
        before: DateTime<Utc>,
    ) -> Result<Vec<Operation>, QueryError> {
        let operations = self.store.operations.read().map_err(poisoned)?;

        let mut latest: HashMap<Uuid, (usize, &Operation)> = HashMap::new();
        for (seq, op) in operations.iter().enumerate() {
            if op.organization_id != organization_id
                || op.ledger_id != ledger_id
                || op.account_id != account_id
                || op.created_at >= before
            {
                continue;
            }

            let newer = latest
                .get(&op.balance_id)
                .is_none_or(|(prev_seq, prev)| (op.created_at, seq) > (prev.created_at, *prev_seq));
            if newer {
                latest.insert(op.balance_id, (seq, op));
            }
        }

        let mut found: Vec<Operation> = latest.into_values().map(|(_, op)| op.clone()).collect();
        found.sort_by_key(|op| op.balance_id);
        Ok(found)
    }
}

/// Cache held in process memory.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: String, value: String) -> Result<(), QueryError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| QueryError::Cache("memory cache lock poisoned".to_string()))?;
        entries.insert(key, value);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<Option<String>, QueryError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| QueryError::Cache("memory cache lock poisoned".to_string()))?;
        Ok(entries.remove(key))
    }
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, String>, QueryError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| QueryError::Cache("memory cache lock poisoned".to_string()))?;

        Ok(keys
            .iter()
            .filter_map(|k| entries.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }
}
