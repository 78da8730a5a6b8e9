// src/balance.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Economic state of one account/alias/key combination.
///
/// Invariants:
/// - `created_at` never changes once set and is the lower bound for
///   "did this balance exist at time T"
/// - `version` only grows; every posted operation bumps it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub ledger_id: Uuid,
    pub account_id: Uuid,
    pub alias: String,
    /// Sub-balance name under the alias, e.g. "default" or "reserved"
    pub key: String,
    pub asset_code: String,
    pub available: Decimal,
    pub on_hold: Decimal,
    pub version: i64,
    pub account_type: String,
    pub allow_sending: bool,
    pub allow_receiving: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    pub const DEFAULT_KEY: &'static str = "default";

    /// A freshly opened balance with nothing posted to it.
    pub fn new(
        organization_id: Uuid,
        ledger_id: Uuid,
        account_id: Uuid,
        alias: &str,
        asset_code: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            organization_id,
            ledger_id,
            account_id,
            alias: alias.to_string(),
            key: Self::DEFAULT_KEY.to_string(),
            asset_code: asset_code.to_string(),
            available: Decimal::ZERO,
            on_hold: Decimal::ZERO,
            version: 0,
            account_type: "deposit".to_string(),
            allow_sending: true,
            allow_receiving: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.key = key.to_string();
        self
    }

    /// State of this balance before any operation touched it.
    pub fn initial_state(&self) -> Self {
        Self {
            available: Decimal::ZERO,
            on_hold: Decimal::ZERO,
            version: 0,
            updated_at: self.created_at,
            ..self.clone()
        }
    }

    /// Replace the mutable economic fields, keeping identity and timestamps.
    pub fn overwrite_amounts(&mut self, available: Decimal, on_hold: Decimal, version: i64) {
        self.available = available;
        self.on_hold = on_hold;
        self.version = version;
    }

    pub fn total(&self) -> Decimal {
        self.available + self.on_hold
    }

    pub fn existed_at(&self, timestamp: DateTime<Utc>) -> bool {
        self.created_at <= timestamp
    }
}
