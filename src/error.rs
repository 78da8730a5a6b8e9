use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The requested instant lies in the future.
    InvalidTimestamp(DateTime<Utc>),
    /// The named entity was never created.
    EntityNotFound(String),
    /// The balance exists now but did not exist yet at `timestamp`.
    NoBalanceDataAtTimestamp {
        balance_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    Storage(String),
    Cache(String),
    Decode(String),
    /// Malformed settings handed to `QueryConfig`.
    Config(String),
    Cancelled(String),
}

impl QueryError {
    pub fn balance_not_found(balance_id: Uuid) -> Self {
        Self::EntityNotFound(format!("balance {}", balance_id))
    }

    /// Errors the caller has to fix by changing the request.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTimestamp(_) | Self::EntityNotFound(_) | Self::NoBalanceDataAtTimestamp { .. }
        )
    }

    /// Transport-level failures. Retrying belongs to the caller's transport
    /// layer; nothing in this crate retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Cache(_) | Self::Cancelled(_))
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTimestamp(ts) => {
                write!(f, "Invalid timestamp: {} is in the future", ts.to_rfc3339())
            }
            Self::EntityNotFound(what) => write!(f, "Entity not found: {}", what),
            Self::NoBalanceDataAtTimestamp {
                balance_id,
                timestamp,
            } => write!(
                f,
                "No balance data for {} at {}",
                balance_id,
                timestamp.to_rfc3339()
            ),
            Self::Storage(msg) => write!(f, "Storage error: {}", msg),
            Self::Cache(msg) => write!(f, "Cache error: {}", msg),
            Self::Decode(msg) => write!(f, "Decode error: {}", msg),
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::Cancelled(msg) => write!(f, "Cancelled: {}", msg),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<tokio::time::error::Elapsed> for QueryError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::Cancelled(err.to_string())
    }
}
