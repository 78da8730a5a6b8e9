use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use crate::adapters::{BalanceStore, OperationLedger};
use crate::{Balance, BalanceAfter, Operation, QueryError};

const BALANCE_COLUMNS: &str = r#"
    id, organization_id, ledger_id, account_id, alias, key, asset_code,
    available, on_hold, version, account_type, allow_sending, allow_receiving,
    created_at, updated_at
"#;

const OPERATION_COLUMNS: &str = r#"
    id, transaction_id, organization_id, ledger_id, account_id, account_alias,
    balance_id, balance_key, asset_code,
    available_balance_after, on_hold_balance_after, balance_version_after,
    created_at
"#;

fn storage(e: sqlx::Error) -> QueryError {
    QueryError::Storage(e.to_string())
}

pub trait PostgresQueryAdapter {
    fn get_pool(&self) -> sqlx::PgPool;
}

/// Postgres-backed store of record and operation log.
///
/// Schema:
/// ```sql
/// CREATE TABLE balance (
///     id UUID PRIMARY KEY,
///     organization_id UUID NOT NULL,
///     ledger_id UUID NOT NULL,
///     account_id UUID NOT NULL,
///     alias TEXT NOT NULL,
///     key TEXT NOT NULL DEFAULT 'default',
///     asset_code TEXT NOT NULL,
///     available NUMERIC NOT NULL DEFAULT 0,
///     on_hold NUMERIC NOT NULL DEFAULT 0,
///     version BIGINT NOT NULL DEFAULT 0,
///     account_type TEXT NOT NULL,
///     allow_sending BOOLEAN NOT NULL DEFAULT TRUE,
///     allow_receiving BOOLEAN NOT NULL DEFAULT TRUE,
///     created_at TIMESTAMPTZ NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL,
///     deleted_at TIMESTAMPTZ
/// );
///
/// -- balance_after columns are nullable: older rows did not record them
/// CREATE TABLE operation (
///     id UUID PRIMARY KEY,
///     ...
///     available_balance_after NUMERIC,
///     on_hold_balance_after NUMERIC,
///     balance_version_after BIGINT,
///     created_at TIMESTAMPTZ NOT NULL
/// );
/// ```
pub struct PostgresAdapter {
    pub(crate) pool: sqlx::PgPool,
}

impl PostgresAdapter {
    pub fn from_pool(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

impl PostgresQueryAdapter for PostgresAdapter {
    fn get_pool(&self) -> sqlx::PgPool {
        self.pool.clone()
    }
}

#[async_trait::async_trait]
pub trait PostgresSchemaAdapter {
    /// Create the balance and operation tables with their lookup indexes.
    /// Hosts that own their migrations should not call this.
    async fn init_schema(&self) -> Result<(), QueryError>;
}

#[async_trait::async_trait]
impl<T> PostgresSchemaAdapter for T
where
    T: PostgresQueryAdapter + Send + Sync,
{
    async fn init_schema(&self) -> Result<(), QueryError> {
        let mut tx = self.get_pool().begin().await.map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS balance (
                id UUID PRIMARY KEY,
                organization_id UUID NOT NULL,
                ledger_id UUID NOT NULL,
                account_id UUID NOT NULL,
                alias TEXT NOT NULL,
                key TEXT NOT NULL DEFAULT 'default',
                asset_code TEXT NOT NULL,
                available NUMERIC NOT NULL DEFAULT 0,
                on_hold NUMERIC NOT NULL DEFAULT 0,
                version BIGINT NOT NULL DEFAULT 0,
                account_type TEXT NOT NULL,
                allow_sending BOOLEAN NOT NULL DEFAULT TRUE,
                allow_receiving BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                deleted_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_balance_account
            ON balance(organization_id, ledger_id, account_id)
            WHERE deleted_at IS NULL
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS operation (
                id UUID PRIMARY KEY,
                transaction_id UUID NOT NULL,
                organization_id UUID NOT NULL,
                ledger_id UUID NOT NULL,
                account_id UUID NOT NULL,
                account_alias TEXT NOT NULL,
                balance_id UUID NOT NULL,
                balance_key TEXT NOT NULL DEFAULT 'default',
                asset_code TEXT NOT NULL,
                available_balance_after NUMERIC,
                on_hold_balance_after NUMERIC,
                balance_version_after BIGINT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_operation_balance_created
            ON operation(organization_id, ledger_id, balance_id, created_at DESC)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_operation_account_created
            ON operation(organization_id, ledger_id, account_id, created_at DESC)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;

        Ok(())
    }
}

fn balance_from_row(row: &PgRow) -> Result<Balance, QueryError> {
    Ok(Balance {
        id: row.try_get("id").map_err(storage)?,
        organization_id: row.try_get("organization_id").map_err(storage)?,
        ledger_id: row.try_get("ledger_id").map_err(storage)?,
        account_id: row.try_get("account_id").map_err(storage)?,
        alias: row.try_get("alias").map_err(storage)?,
        key: row.try_get("key").map_err(storage)?,
        asset_code: row.try_get("asset_code").map_err(storage)?,
        available: row.try_get("available").map_err(storage)?,
        on_hold: row.try_get("on_hold").map_err(storage)?,
        version: row.try_get("version").map_err(storage)?,
        account_type: row.try_get("account_type").map_err(storage)?,
        allow_sending: row.try_get("allow_sending").map_err(storage)?,
        allow_receiving: row.try_get("allow_receiving").map_err(storage)?,
        created_at: row.try_get("created_at").map_err(storage)?,
        updated_at: row.try_get("updated_at").map_err(storage)?,
    })
}

fn operation_from_row(row: &PgRow) -> Result<Operation, QueryError> {
    Ok(Operation {
        id: row.try_get("id").map_err(storage)?,
        transaction_id: row.try_get("transaction_id").map_err(storage)?,
        organization_id: row.try_get("organization_id").map_err(storage)?,
        ledger_id: row.try_get("ledger_id").map_err(storage)?,
        account_id: row.try_get("account_id").map_err(storage)?,
        account_alias: row.try_get("account_alias").map_err(storage)?,
        balance_id: row.try_get("balance_id").map_err(storage)?,
        balance_key: row.try_get("balance_key").map_err(storage)?,
        asset_code: row.try_get("asset_code").map_err(storage)?,
        balance_after: BalanceAfter {
            available: row.try_get("available_balance_after").map_err(storage)?,
            on_hold: row.try_get("on_hold_balance_after").map_err(storage)?,
            version: row.try_get("balance_version_after").map_err(storage)?,
        },
        created_at: row.try_get("created_at").map_err(storage)?,
    })
}

#[async_trait::async_trait]
impl<T> BalanceStore for T
where
    T: PostgresQueryAdapter + Send + Sync,
{
    async fn find_balance(
        &self,
        organization_id: Uuid,
        ledger_id: Uuid,
        balance_id: Uuid,
    ) -> Result<Balance, QueryError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM balance
            WHERE organization_id = $1 AND ledger_id = $2 AND id = $3
              AND deleted_at IS NULL
            "#,
            BALANCE_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(organization_id)
            .bind(ledger_id)
            .bind(balance_id)
            .fetch_optional(&self.get_pool())
            .await
            .map_err(storage)?
            .ok_or_else(|| QueryError::balance_not_found(balance_id))?;

        balance_from_row(&row)
    }

    async fn find_balances_by_account(
        &self,
        organization_id: Uuid,
        ledger_id: Uuid,
        account_id: Uuid,
    ) -> Result<Vec<Balance>, QueryError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM balance
            WHERE organization_id = $1 AND ledger_id = $2 AND account_id = $3
              AND deleted_at IS NULL
            ORDER BY created_at ASC, id ASC
            "#,
            BALANCE_COLUMNS
        );

        let rows = sqlx::query(&sql)
            .bind(organization_id)
            .bind(ledger_id)
            .bind(account_id)
            .fetch_all(&self.get_pool())
            .await
            .map_err(storage)?;

        rows.iter().map(balance_from_row).collect()
    }
}

#[async_trait::async_trait]
impl<T> OperationLedger for T
where
    T: PostgresQueryAdapter + Send + Sync,
{
    async fn find_last_operation_before(
        &self,
        organization_id: Uuid,
        ledger_id: Uuid,
        balance_id: Uuid,
        before: DateTime<Utc>,
    ) -> Result<Option<Operation>, QueryError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM operation
            WHERE organization_id = $1 AND ledger_id = $2 AND balance_id = $3
              AND created_at < $4
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
            OPERATION_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(organization_id)
            .bind(ledger_id)
            .bind(balance_id)
            .bind(before)
            .fetch_optional(&self.get_pool())
            .await
            .map_err(storage)?;

        row.as_ref().map(operation_from_row).transpose()
    }

    async fn find_last_operations_for_account_before(
        &self,
        organization_id: Uuid,
        ledger_id: Uuid,
        account_id: Uuid,
        before: DateTime<Utc>,
    ) -> Result<Vec<Operation>, QueryError> {
        let sql = format!(
            r#"
            SELECT DISTINCT ON (balance_id) {}
            FROM operation
            WHERE organization_id = $1 AND ledger_id = $2 AND account_id = $3
              AND created_at < $4
            ORDER BY balance_id, created_at DESC, id DESC
            "#,
            OPERATION_COLUMNS
        );

        let rows = sqlx::query(&sql)
            .bind(organization_id)
            .bind(ledger_id)
            .bind(account_id)
            .bind(before)
            .fetch_all(&self.get_pool())
            .await
            .map_err(storage)?;

        rows.iter().map(operation_from_row).collect()
    }
}
