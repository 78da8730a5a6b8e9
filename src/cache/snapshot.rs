use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{Balance, QueryError};

/// Balance state as the command side writes it to the cache after every
/// posted operation.
///
/// Writers disagree on number encoding, so `available` and `on_hold` accept
/// a JSON number, a numeric string or scientific notation, and all three
/// land on the same exact decimal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedBalance {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub asset_code: String,
    #[serde(deserialize_with = "decimal")]
    pub available: Decimal,
    /// Writers that never hold funds omit it.
    #[serde(default, deserialize_with = "decimal")]
    pub on_hold: Decimal,
    #[serde(deserialize_with = "version")]
    pub version: i64,
    #[serde(default)]
    pub account_type: String,
    #[serde(default, deserialize_with = "flag")]
    pub allow_sending: bool,
    #[serde(default, deserialize_with = "flag")]
    pub allow_receiving: bool,
}

impl CachedBalance {
    pub fn decode(raw: &str) -> Result<Self, QueryError> {
        serde_json::from_str(raw).map_err(|e| QueryError::Decode(e.to_string()))
    }

    /// Full balance rebuilt from the cached entry alone. Timestamps are not
    /// cached, both are set to `observed_at`.
    pub fn to_balance(
        &self,
        organization_id: Uuid,
        ledger_id: Uuid,
        observed_at: DateTime<Utc>,
    ) -> Result<Balance, QueryError> {
        let parse = |field: &str, raw: &str| {
            Uuid::parse_str(raw).map_err(|e| QueryError::Decode(format!("{}: {}", field, e)))
        };

        Ok(Balance {
            id: parse("id", &self.id)?,
            organization_id,
            ledger_id,
            account_id: parse("accountId", &self.account_id)?,
            alias: self.alias.clone(),
            key: self.key.clone(),
            asset_code: self.asset_code.clone(),
            available: self.available,
            on_hold: self.on_hold,
            version: self.version,
            account_type: self.account_type.clone(),
            allow_sending: self.allow_sending,
            allow_receiving: self.allow_receiving,
            created_at: observed_at,
            updated_at: observed_at,
        })
    }
}

/// Exact decimal from its textual form, plain or scientific.
///
/// Both forms are held to the same rule: a value needing more precision than
/// `Decimal` carries is rejected, never rounded.
pub fn parse_decimal(raw: &str) -> Result<Decimal, String> {
    let raw = raw.trim();
    let parsed = match raw.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => scientific(mantissa, exponent),
        None => Decimal::from_str_exact(raw).map_err(|e| e.to_string()),
    };
    parsed.map_err(|e| format!("'{}' is not a decimal: {}", raw, e))
}

/// Largest scale a `Decimal` can carry.
const MAX_SCALE: i64 = 28;

fn scientific(mantissa: &str, exponent: &str) -> Result<Decimal, String> {
    let mantissa = Decimal::from_str_exact(mantissa).map_err(|e| e.to_string())?;
    let exponent: i64 = exponent
        .parse()
        .map_err(|e| format!("exponent '{}': {}", exponent, e))?;

    if mantissa.is_zero() {
        return Ok(Decimal::ZERO);
    }

    let mut digits = mantissa.mantissa();
    let mut scale = i64::from(mantissa.scale())
        .checked_sub(exponent)
        .ok_or("exponent out of range")?;

    while scale < 0 {
        digits = digits.checked_mul(10).ok_or("value out of range")?;
        scale += 1;
    }
    // Trailing zeros carry no precision; anything else past the limit would be lost.
    while scale > MAX_SCALE && digits % 10 == 0 {
        digits /= 10;
        scale -= 1;
    }

    let scale = u32::try_from(scale).map_err(|e| e.to_string())?;
    Decimal::try_from_i128_with_scale(digits, scale).map_err(|e| e.to_string())
}

fn decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    // With `arbitrary_precision` the number keeps its source text, so a JSON
    // number never passes through f64.
    match Value::deserialize(deserializer)? {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(&s),
        other => Err(format!("expected a decimal, found {}", other)),
    }
    .map_err(de::Error::custom)
}

fn version<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| format!("version {} is not an integer", n)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| format!("version '{}': {}", s, e)),
        other => Err(format!("expected a version, found {}", other)),
    }
    .map_err(de::Error::custom)
}

fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(format!("flag {} is neither 0 nor 1", n)),
        },
        Value::Null => Ok(false),
        other => Err(format!("expected a flag, found {}", other)),
    }
    .map_err(de::Error::custom)
}
