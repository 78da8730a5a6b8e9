use std::collections::HashSet;
use std::time::Duration;

use uuid::Uuid;

use crate::QueryError;
use crate::cache::key::DEFAULT_NAMESPACE;

/// Settings injected at construction time. Nothing in this crate reads the
/// process environment.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Deadline for each store / operation-log lookup.
    pub lookup_timeout: Option<Duration>,
    /// Deadline for the cache multi-get. Elapsing counts as a cache failure.
    pub cache_timeout: Option<Duration>,
    pub cache_overlay: bool,
    pub cache_namespace: String,
    /// `(organization_id, ledger_id)` pairs the overlay applies to.
    /// `None` enables every pair.
    pub overlay_scope: Option<HashSet<(Uuid, Uuid)>>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: Some(Duration::from_secs(30)),
            cache_timeout: Some(Duration::from_millis(500)),
            cache_overlay: true,
            cache_namespace: DEFAULT_NAMESPACE.to_string(),
            overlay_scope: None,
        }
    }
}

impl QueryConfig {
    pub fn with_lookup_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn with_cache_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.cache_timeout = timeout;
        self
    }

    pub fn with_cache_overlay(mut self, enabled: bool) -> Self {
        self.cache_overlay = enabled;
        self
    }

    pub fn with_cache_namespace(mut self, namespace: &str) -> Self {
        self.cache_namespace = namespace.to_string();
        self
    }

    pub fn with_overlay_scope(mut self, scope: HashSet<(Uuid, Uuid)>) -> Self {
        self.overlay_scope = Some(scope);
        self
    }

    pub fn overlay_enabled_for(&self, organization_id: Uuid, ledger_id: Uuid) -> bool {
        self.cache_overlay
            && self
                .overlay_scope
                .as_ref()
                .is_none_or(|scope| scope.contains(&(organization_id, ledger_id)))
    }

    /// Parse the flat `org:ledger,org:ledger` list some deployments keep in
    /// their environment. Blank entries are ignored.
    pub fn parse_scope(raw: &str) -> Result<HashSet<(Uuid, Uuid)>, QueryError> {
        let mut scope = HashSet::new();

        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (org, ledger) = entry
                .split_once(':')
                .ok_or_else(|| QueryError::Config(format!("malformed scope entry '{}'", entry)))?;

            let org = Uuid::parse_str(org.trim())
                .map_err(|e| QueryError::Config(format!("organization id in '{}': {}", entry, e)))?;
            let ledger = Uuid::parse_str(ledger.trim())
                .map_err(|e| QueryError::Config(format!("ledger id in '{}': {}", entry, e)))?;

            scope.insert((org, ledger));
        }

        Ok(scope)
    }
}
