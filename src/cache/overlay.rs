use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapters::KeyValueCache;
use crate::cache::{CachedBalance, key};
use crate::{Balance, QueryConfig, QueryError};

/// Layers the cached economic state over balances read from the store of
/// record.
///
/// Only `available`, `on_hold` and `version` are ever taken from the cache.
/// A miss, a corrupt entry, or a failing cache all leave the stored values in
/// place: the overlay never turns a successful read into a failed one, and it
/// never writes to the cache.
pub struct CacheOverlay {
    cache: Arc<dyn KeyValueCache>,
    namespace: String,
    timeout: Option<Duration>,
}

impl CacheOverlay {
    pub fn new(cache: Arc<dyn KeyValueCache>) -> Self {
        Self::from_config(cache, &QueryConfig::default())
    }

    pub fn from_config(cache: Arc<dyn KeyValueCache>, config: &QueryConfig) -> Self {
        Self {
            cache,
            namespace: config.cache_namespace.clone(),
            timeout: config.cache_timeout,
        }
    }

    pub fn key_for(&self, organization_id: Uuid, ledger_id: Uuid, balance: &Balance) -> String {
        key::balance_key(
            &self.namespace,
            organization_id,
            ledger_id,
            &balance.alias,
            &balance.key,
        )
    }

    pub async fn apply(
        &self,
        organization_id: Uuid,
        ledger_id: Uuid,
        mut balances: Vec<Balance>,
    ) -> Vec<Balance> {
        if balances.is_empty() {
            return balances;
        }

        let keys: Vec<String> = balances
            .iter()
            .map(|b| self.key_for(organization_id, ledger_id, b))
            .collect();

        let entries = match self.fetch(&keys).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    organization_id = %organization_id,
                    ledger_id = %ledger_id,
                    balances = balances.len(),
                    error = %err,
                    "balance cache unavailable, serving stored values"
                );
                counter!("ledger_query.cache_overlay.failures").increment(1);
                return balances;
            }
        };

        let (mut hits, mut misses, mut corrupt) = (0u64, 0u64, 0u64);

        for (balance, key) in balances.iter_mut().zip(&keys) {
            let Some(raw) = entries.get(key) else {
                misses += 1;
                continue;
            };

            match CachedBalance::decode(raw) {
                Ok(cached) => {
                    balance.overwrite_amounts(cached.available, cached.on_hold, cached.version);
                    hits += 1;
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "skipping corrupt cached balance");
                    corrupt += 1;
                }
            }
        }

        counter!("ledger_query.cache_overlay.hits").increment(hits);
        counter!("ledger_query.cache_overlay.misses").increment(misses);
        counter!("ledger_query.cache_overlay.corrupt").increment(corrupt);
        debug!(hits, misses, corrupt, "cache overlay applied");

        balances
    }

    /// One multi-get for the whole batch, duplicates removed.
    async fn fetch(&self, keys: &[String]) -> Result<HashMap<String, String>, QueryError> {
        let mut seen = HashSet::with_capacity(keys.len());
        let unique: Vec<String> = keys
            .iter()
            .filter(|k| seen.insert(k.as_str()))
            .cloned()
            .collect();

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.cache.multi_get(&unique))
                .await
                .map_err(|e| QueryError::Cache(format!("multi-get timed out: {}", e)))?,
            None => self.cache.multi_get(&unique).await,
        }
    }
}
