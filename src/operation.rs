use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Balance;

/// Balance state recorded right after an operation was applied.
/// Any field may be missing on older rows; missing means "not recorded".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceAfter {
    pub available: Option<Decimal>,
    pub on_hold: Option<Decimal>,
    pub version: Option<i64>,
}

impl BalanceAfter {
    pub fn new(available: Decimal, on_hold: Decimal, version: i64) -> Self {
        Self {
            available: Some(available),
            on_hold: Some(on_hold),
            version: Some(version),
        }
    }

    /// Resolve to concrete amounts, unrecorded fields count as zero.
    pub fn resolve(&self) -> (Decimal, Decimal, i64) {
        (
            self.available.unwrap_or(Decimal::ZERO),
            self.on_hold.unwrap_or(Decimal::ZERO),
            self.version.unwrap_or(0),
        )
    }
}

/// Immutable ledger entry recording the effect of a posted transaction on
/// one balance.
///
/// For a fixed balance, operations ordered by `created_at` form a replay
/// log: each `balance_after` is the cumulative state including that entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub organization_id: Uuid,
    pub ledger_id: Uuid,
    pub account_id: Uuid,
    pub account_alias: String,
    pub balance_id: Uuid,
    pub balance_key: String,
    pub asset_code: String,
    pub balance_after: BalanceAfter,
    pub created_at: DateTime<Utc>,
}

impl Operation {
    /// An operation against `balance` committed at `created_at`.
    pub fn on(balance: &Balance, balance_after: BalanceAfter, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            transaction_id: Uuid::now_v7(),
            organization_id: balance.organization_id,
            ledger_id: balance.ledger_id,
            account_id: balance.account_id,
            account_alias: balance.alias.clone(),
            balance_id: balance.id,
            balance_key: balance.key.clone(),
            asset_code: balance.asset_code.clone(),
            balance_after,
            created_at,
        }
    }

    /// Historical view of `current` as of this operation.
    ///
    /// Identity and creation metadata come from the current record; amounts
    /// come from the snapshot and `updated_at` is the commit time.
    pub fn snapshot_of(&self, current: &Balance) -> Balance {
        let (available, on_hold, version) = self.balance_after.resolve();
        Balance {
            available,
            on_hold,
            version,
            updated_at: self.created_at,
            ..current.clone()
        }
    }

    /// Historical view rebuilt from this operation alone, for balances whose
    /// current row no longer exists.
    ///
    /// `created_at` is unknown in that case; the operation's commit time is
    /// the earliest instant the balance is known to have existed.
    pub fn reconstruct_balance(&self) -> Balance {
        let (available, on_hold, version) = self.balance_after.resolve();
        Balance {
            id: self.balance_id,
            organization_id: self.organization_id,
            ledger_id: self.ledger_id,
            account_id: self.account_id,
            alias: self.account_alias.clone(),
            key: self.balance_key.clone(),
            asset_code: self.asset_code.clone(),
            available,
            on_hold,
            version,
            account_type: String::new(),
            allow_sending: false,
            allow_receiving: false,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}
