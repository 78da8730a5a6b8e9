use std::collections::HashMap;

use async_trait::async_trait;
use ::redis::aio::MultiplexedConnection;
use tracing::warn;

use crate::QueryError;
use crate::adapters::KeyValueCache;

fn cache(e: ::redis::RedisError) -> QueryError {
    QueryError::Cache(e.to_string())
}

/// Balance cache backed by Redis (or any server speaking `MGET`).
#[derive(Clone)]
pub struct RedisCache {
    connection: MultiplexedConnection,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, QueryError> {
        let client = ::redis::Client::open(url).map_err(cache)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(cache)?;
        Ok(Self { connection })
    }

    pub fn from_connection(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl KeyValueCache for RedisCache {
    async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, String>, QueryError> {
        // MGET with no keys is a protocol error.
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let mut cmd = ::redis::cmd("MGET");
        for key in keys {
            cmd.arg(key);
        }

        // Raw bytes, so one non-UTF-8 value cannot fail the whole reply.
        let mut conn = self.connection.clone();
        let values: Vec<Option<Vec<u8>>> = cmd.query_async(&mut conn).await.map_err(cache)?;

        Ok(collect_entries(keys, values))
    }
}

/// Pair `MGET` values with their keys. Absent keys and values that are not
/// UTF-8 are left out; the latter read as misses.
fn collect_entries(keys: &[String], values: Vec<Option<Vec<u8>>>) -> HashMap<String, String> {
    keys.iter()
        .zip(values)
        .filter_map(|(key, value)| {
            let bytes = value?;
            match String::from_utf8(bytes) {
                Ok(text) => Some((key.clone(), text)),
                Err(err) => {
                    warn!(key = %key, error = %err, "skipping cached balance that is not UTF-8");
                    None
                }
            }
        })
        .collect()
}
