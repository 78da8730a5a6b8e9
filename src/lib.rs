//! # ledger-query
//!
//! Read side of a double-entry ledger: balances as they are now, and as
//! they were at any past instant.
//!
//! ## Point-in-time balances
//!
//! Every ledger operation records the balance state right after it was
//! applied. The balance at `t` is therefore the snapshot of the last
//! operation committed strictly before `t`, found with one indexed lookup
//! instead of a replay of the log.
//!
//! ```rust,ignore
//! let query = BalanceQuery::new(store, operations, cache);
//! let then = query.balance_at(org, ledger, balance_id, march_first).await?;
//! ```
//!
//! ## Cache overlay
//!
//! The command side writes the newest balance state to a key/value cache on
//! every posted operation. Live reads take `available`, `on_hold` and
//! `version` from there when present, and fall back to the store of record
//! on a miss, a corrupt entry, or a cache outage.
//!
//! ## Feature flags
//!
//! | Flag       | Default | Description                          |
//! |------------|---------|--------------------------------------|
//! | `postgres` | ✓       | Store and operation log via sqlx     |
//! | `redis`    | ✓       | Balance cache via Redis `MGET`       |

pub mod adapters;
pub mod balance;
pub mod cache;
pub mod config;
pub mod error;
pub mod operation;
pub mod point_in_time;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use adapters::{BalanceStore, KeyValueCache, OperationLedger};
pub use balance::Balance;
pub use cache::{CacheOverlay, CachedBalance};
pub use config::QueryConfig;
pub use error::QueryError;
pub use operation::{BalanceAfter, Operation};
pub use point_in_time::PointInTimeResolver;

/// Entry point wiring the collaborators together.
pub struct BalanceQuery {
    balances: Arc<dyn BalanceStore>,
    resolver: PointInTimeResolver,
    overlay: CacheOverlay,
    config: QueryConfig,
}

impl BalanceQuery {
    pub fn new(
        balances: Box<dyn BalanceStore>,
        operations: Box<dyn OperationLedger>,
        cache: Box<dyn KeyValueCache>,
    ) -> Self {
        Self::from_parts(
            balances.into(),
            operations.into(),
            cache.into(),
            QueryConfig::default(),
        )
    }

    /// Build from shared handles, e.g. one adapter serving as both the
    /// balance store and the operation log.
    pub fn from_parts(
        balances: Arc<dyn BalanceStore>,
        operations: Arc<dyn OperationLedger>,
        cache: Arc<dyn KeyValueCache>,
        config: QueryConfig,
    ) -> Self {
        let resolver = PointInTimeResolver::new(Arc::clone(&balances), operations)
            .with_timeout(config.lookup_timeout);
        let overlay = CacheOverlay::from_config(cache, &config);

        Self {
            balances,
            resolver,
            overlay,
            config,
        }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// The balance as it was at `timestamp`.
    pub async fn balance_at(
        &self,
        organization_id: Uuid,
        ledger_id: Uuid,
        balance_id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Result<Balance, QueryError> {
        self.resolver
            .balance_at(organization_id, ledger_id, balance_id, timestamp)
            .await
    }

    /// All balances of an account as they were at `timestamp`.
    pub async fn account_balances_at(
        &self,
        organization_id: Uuid,
        ledger_id: Uuid,
        account_id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<Balance>, QueryError> {
        self.resolver
            .account_balances_at(organization_id, ledger_id, account_id, timestamp)
            .await
    }

    /// Current balance, with cached amounts layered on top.
    pub async fn get_balance(
        &self,
        organization_id: Uuid,
        ledger_id: Uuid,
        balance_id: Uuid,
    ) -> Result<Balance, QueryError> {
        let stored = point_in_time::bounded(
            self.config.lookup_timeout,
            self.balances.find_balance(organization_id, ledger_id, balance_id),
        )
        .await?;

        self.overlay(organization_id, ledger_id, vec![stored])
            .await
            .pop()
            .ok_or_else(|| QueryError::balance_not_found(balance_id))
    }

    /// Current balances of an account, with cached amounts layered on top.
    pub async fn account_balances(
        &self,
        organization_id: Uuid,
        ledger_id: Uuid,
        account_id: Uuid,
    ) -> Result<Vec<Balance>, QueryError> {
        let stored = point_in_time::bounded(
            self.config.lookup_timeout,
            self.balances.find_balances_by_account(organization_id, ledger_id, account_id),
        )
        .await?;

        Ok(self.overlay(organization_id, ledger_id, stored).await)
    }

    /// Overlay pass over balances the caller already read. Infallible: cache
    /// trouble only means the stored values are returned as they are.
    pub async fn overlay(
        &self,
        organization_id: Uuid,
        ledger_id: Uuid,
        balances: Vec<Balance>,
    ) -> Vec<Balance> {
        if !self.config.overlay_enabled_for(organization_id, ledger_id) {
            return balances;
        }
        self.overlay.apply(organization_id, ledger_id, balances).await
    }
}
