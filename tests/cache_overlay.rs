use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ledger_query::{
    Balance, BalanceQuery, BalanceStore, CacheOverlay, KeyValueCache, QueryConfig, QueryError,
    adapters::{MemoryAdapter, MemoryCache},
    cache::balance_key,
    cache::key::DEFAULT_NAMESPACE,
};
use rust_decimal::Decimal;
use uuid::Uuid;

struct Fixture {
    adapter: MemoryAdapter,
    cache: MemoryCache,
    query: BalanceQuery,
    org: Uuid,
    ledger: Uuid,
    account: Uuid,
}

fn setup() -> Fixture {
    setup_with(QueryConfig::default())
}

fn setup_with(config: QueryConfig) -> Fixture {
    let adapter = MemoryAdapter::new();
    let cache = MemoryCache::new();
    let query = BalanceQuery::from_parts(
        Arc::new(adapter.clone()),
        Arc::new(adapter.clone()),
        Arc::new(cache.clone()),
        config,
    );

    Fixture {
        adapter,
        cache,
        query,
        org: Uuid::now_v7(),
        ledger: Uuid::now_v7(),
        account: Uuid::now_v7(),
    }
}

impl Fixture {
    fn stored(&self, alias: &str, key: &str, available: i64, version: i64) -> Balance {
        let mut balance =
            Balance::new(self.org, self.ledger, self.account, alias, "USD").with_key(key);
        balance.available = Decimal::from(available);
        balance.version = version;
        self.adapter.insert_balance(balance.clone()).unwrap();
        balance
    }

    fn cache_raw(&self, alias: &str, key: &str, payload: &str) {
        let k = balance_key(DEFAULT_NAMESPACE, self.org, self.ledger, alias, key);
        self.cache.insert(k, payload.to_string()).unwrap();
    }
}

#[tokio::test]
async fn test_scenario_cached_amounts_win() {
    let f = setup();
    let stored = f.stored("@alice", "default", 10, 1);
    f.cache_raw("@alice", "default", r#"{"available":999,"version":5}"#);

    let balance = f.query.get_balance(f.org, f.ledger, stored.id).await.unwrap();

    assert_eq!(balance.available, Decimal::from(999));
    assert_eq!(balance.version, 5);
    assert_eq!(balance.id, stored.id);
    assert_eq!(balance.alias, stored.alias);
    assert_eq!(balance.key, stored.key);
    assert_eq!(balance.asset_code, stored.asset_code);
    assert_eq!(balance.account_type, stored.account_type);
    assert_eq!(balance.created_at, stored.created_at);
    assert_eq!(balance.updated_at, stored.updated_at);
}

#[tokio::test]
async fn test_cache_identity_fields_are_ignored() {
    let f = setup();
    let stored = f.stored("@alice", "default", 10, 1);
    f.cache_raw(
        "@alice",
        "default",
        r#"{"id":"0190a3f0-0000-7000-8000-00000000000a","alias":"@mallory","key":"other",
            "assetCode":"EUR","accountType":"external","available":"20","onHold":"3","version":2}"#,
    );

    let balance = f.query.get_balance(f.org, f.ledger, stored.id).await.unwrap();

    assert_eq!(balance.available, Decimal::from(20));
    assert_eq!(balance.on_hold, Decimal::from(3));
    assert_eq!(balance.version, 2);
    assert_eq!(balance.id, stored.id);
    assert_eq!(balance.alias, "@alice");
    assert_eq!(balance.key, "default");
    assert_eq!(balance.asset_code, "USD");
    assert_eq!(balance.account_type, stored.account_type);
}

#[tokio::test]
async fn test_partial_overlay() {
    let f = setup();
    let default = f.stored("@bob", "default", 1, 1);
    let reserved = f.stored("@bob", "reserved", 2, 1);
    let savings = f.stored("@bob", "savings", 3, 1);
    f.cache_raw("@bob", "reserved", r#"{"available":"200","onHold":"0","version":9}"#);

    let balances = f
        .query
        .account_balances(f.org, f.ledger, f.account)
        .await
        .unwrap();
    let by_key: HashMap<&str, &Balance> = balances.iter().map(|b| (b.key.as_str(), b)).collect();

    assert_eq!(balances.len(), 3);
    assert_eq!(by_key["default"], &default);
    assert_eq!(by_key["savings"], &savings);

    let overlaid = by_key["reserved"];
    assert_eq!(overlaid.available, Decimal::from(200));
    assert_eq!(overlaid.version, 9);
    assert_eq!(overlaid.id, reserved.id);
    assert_eq!(overlaid.created_at, reserved.created_at);
}

#[tokio::test]
async fn test_corrupt_entry_is_a_miss() {
    let f = setup();
    let good = f.stored("@carol", "default", 1, 1);
    let bad = f.stored("@carol", "reserved", 2, 1);
    f.cache_raw("@carol", "default", r#"{"available":"5","onHold":"0","version":2}"#);
    f.cache_raw("@carol", "reserved", r#"{"available":"five","version":"#);

    let balances = f
        .query
        .overlay(f.org, f.ledger, vec![good.clone(), bad.clone()])
        .await;

    assert_eq!(balances[0].available, Decimal::from(5));
    assert_eq!(balances[0].version, 2);
    assert_eq!(balances[1], bad);
}

#[tokio::test]
async fn test_numeric_encodings_overlay_identically() {
    let f = setup();
    let mut results = Vec::new();

    for (alias, raw) in [
        ("@s", r#""123.45""#),
        ("@n", "123.45"),
        ("@e", "1.2345e2"),
    ] {
        let stored = f.stored(alias, "default", 0, 0);
        f.cache_raw(
            alias,
            "default",
            &format!(r#"{{"available":{},"onHold":0,"version":1}}"#, raw),
        );
        results.push(f.query.get_balance(f.org, f.ledger, stored.id).await.unwrap());
    }

    for balance in &results {
        assert_eq!(balance.available, Decimal::new(12345, 2));
    }
}

#[tokio::test]
async fn test_empty_input_is_untouched() {
    let f = setup();
    let balances = f.query.overlay(f.org, f.ledger, Vec::new()).await;
    assert!(balances.is_empty());
}

#[tokio::test]
async fn test_overlay_switch_and_scope() {
    let disabled = setup_with(QueryConfig::default().with_cache_overlay(false));
    let stored = disabled.stored("@dave", "default", 1, 1);
    disabled.cache_raw("@dave", "default", r#"{"available":50,"version":3}"#);
    let balance = disabled
        .query
        .get_balance(disabled.org, disabled.ledger, stored.id)
        .await
        .unwrap();
    assert_eq!(balance, stored);

    let out_of_scope = setup_with(
        QueryConfig::default().with_overlay_scope(HashSet::from([(Uuid::now_v7(), Uuid::now_v7())])),
    );
    let stored = out_of_scope.stored("@erin", "default", 1, 1);
    out_of_scope.cache_raw("@erin", "default", r#"{"available":50,"version":3}"#);
    let balance = out_of_scope
        .query
        .get_balance(out_of_scope.org, out_of_scope.ledger, stored.id)
        .await
        .unwrap();
    assert_eq!(balance, stored);
}

#[tokio::test]
async fn test_store_error_skips_overlay() {
    let adapter = MemoryAdapter::new();
    let recording = Arc::new(Recording::default());
    let query = BalanceQuery::from_parts(
        Arc::new(adapter.clone()),
        Arc::new(adapter),
        recording.clone(),
        QueryConfig::default(),
    );

    let err = query
        .get_balance(Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7())
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::EntityNotFound(_)));
    assert!(recording.calls.lock().unwrap().is_empty());
}

struct Unavailable;

#[async_trait]
impl KeyValueCache for Unavailable {
    async fn multi_get(&self, _: &[String]) -> Result<HashMap<String, String>, QueryError> {
        Err(QueryError::Cache("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_cache_outage_fails_open() {
    let adapter = MemoryAdapter::new();
    let (org, ledger, account) = (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());
    let mut stored = Vec::new();
    for key in ["default", "reserved"] {
        let mut balance = Balance::new(org, ledger, account, "@frank", "USD").with_key(key);
        balance.available = Decimal::from(42);
        balance.version = 7;
        adapter.insert_balance(balance.clone()).unwrap();
        stored.push(balance);
    }

    let query = BalanceQuery::new(
        Box::new(adapter.clone()),
        Box::new(adapter),
        Box::new(Unavailable),
    );

    let mut balances = query.account_balances(org, ledger, account).await.unwrap();
    balances.sort_by_key(|b| b.key.clone());
    assert_eq!(balances, stored);

    let direct = query.overlay(org, ledger, stored.clone()).await;
    assert_eq!(direct, stored);
}

struct Stalled;

#[async_trait]
impl KeyValueCache for Stalled {
    async fn multi_get(&self, _: &[String]) -> Result<HashMap<String, String>, QueryError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(HashMap::new())
    }
}

#[tokio::test]
async fn test_slow_cache_fails_open() {
    let config = QueryConfig::default().with_cache_timeout(Some(Duration::from_millis(20)));
    let overlay = CacheOverlay::from_config(Arc::new(Stalled), &config);

    let balance = Balance::new(Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7(), "@gina", "USD");
    let out = overlay
        .apply(balance.organization_id, balance.ledger_id, vec![balance.clone()])
        .await;
    assert_eq!(out, vec![balance]);
}

/// Remembers every multi-get it served.
#[derive(Default)]
struct Recording {
    inner: MemoryCache,
    calls: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl KeyValueCache for Recording {
    async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, String>, QueryError> {
        self.calls.lock().unwrap().push(keys.to_vec());
        self.inner.multi_get(keys).await
    }
}

#[tokio::test]
async fn test_one_round_trip_per_batch() {
    let recording = Arc::new(Recording::default());
    let overlay = CacheOverlay::new(recording.clone());
    let (org, ledger, account) = (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());

    let balances: Vec<Balance> = ["default", "reserved", "savings"]
        .iter()
        .map(|key| Balance::new(org, ledger, account, "@hank", "USD").with_key(key))
        .collect();
    let mut duplicated = balances.clone();
    duplicated.push(balances[0].clone());

    let out = overlay.apply(org, ledger, duplicated).await;
    assert_eq!(out.len(), 4);

    let calls = recording.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].len(), 3);
    assert_eq!(
        calls[0][1],
        balance_key(DEFAULT_NAMESPACE, org, ledger, "@hank", "reserved")
    );
}

#[tokio::test]
async fn test_overlay_never_writes_back() {
    let f = setup();
    let stored = f.stored("@ivy", "default", 1, 1);
    let key = balance_key(DEFAULT_NAMESPACE, f.org, f.ledger, "@ivy", "default");
    let payload = r#"{"available":"8","onHold":"0","version":4}"#;
    f.cache_raw("@ivy", "default", payload);

    f.query.get_balance(f.org, f.ledger, stored.id).await.unwrap();

    let entries = f.cache.multi_get(&[key.clone()]).await.unwrap();
    assert_eq!(entries.get(&key).map(String::as_str), Some(payload));
}

#[tokio::test]
async fn test_point_in_time_ignores_cache() {
    let f = setup();
    let stored = f.stored("@jack", "default", 10, 1);
    f.cache_raw("@jack", "default", r#"{"available":999,"version":5}"#);

    let then = f
        .query
        .balance_at(f.org, f.ledger, stored.id, chrono::Utc::now())
        .await
        .unwrap();

    assert_eq!(then.available, Decimal::ZERO);
    assert_eq!(then.version, 0);
}

#[tokio::test]
async fn test_custom_namespace() {
    let f = setup_with(QueryConfig::default().with_cache_namespace("balance:{tenant-a}"));
    assert_eq!(f.query.config().cache_namespace, "balance:{tenant-a}");

    let stored = f.stored("@kim", "default", 1, 1);
    // Written under the default namespace, so invisible here.
    f.cache_raw("@kim", "default", r#"{"available":77,"version":2}"#);
    let balance = f.query.get_balance(f.org, f.ledger, stored.id).await.unwrap();
    assert_eq!(balance, stored);

    let k = balance_key("balance:{tenant-a}", f.org, f.ledger, "@kim", "default");
    f.cache
        .insert(k, r#"{"available":77,"version":2}"#.to_string())
        .unwrap();
    let balance = f.query.get_balance(f.org, f.ledger, stored.id).await.unwrap();
    assert_eq!(balance.available, Decimal::from(77));
    assert_eq!(balance.version, 2);
}

#[tokio::test]
async fn test_evicted_entry_falls_back_to_store() {
    let f = setup();
    let stored = f.stored("@lee", "default", 3, 1);
    f.cache_raw("@lee", "default", r#"{"available":30,"version":2}"#);

    let cached = f.query.get_balance(f.org, f.ledger, stored.id).await.unwrap();
    assert_eq!(cached.available, Decimal::from(30));

    let key = balance_key(DEFAULT_NAMESPACE, f.org, f.ledger, "@lee", "default");
    assert!(f.cache.remove(&key).unwrap().is_some());

    let fallback = f.query.get_balance(f.org, f.ledger, stored.id).await.unwrap();
    assert_eq!(fallback, stored);
}

struct StalledStore;

#[async_trait]
impl BalanceStore for StalledStore {
    async fn find_balance(&self, _: Uuid, _: Uuid, _: Uuid) -> Result<Balance, QueryError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(QueryError::Storage("unreachable".to_string()))
    }

    async fn find_balances_by_account(
        &self,
        _: Uuid,
        _: Uuid,
        _: Uuid,
    ) -> Result<Vec<Balance>, QueryError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_lookup_deadline_skips_overlay() {
    let recording = Arc::new(Recording::default());
    let query = BalanceQuery::from_parts(
        Arc::new(StalledStore),
        Arc::new(MemoryAdapter::new()),
        recording.clone(),
        QueryConfig::default().with_lookup_timeout(Some(Duration::from_millis(20))),
    );
    let (org, ledger) = (Uuid::now_v7(), Uuid::now_v7());

    let single = query.get_balance(org, ledger, Uuid::now_v7()).await.unwrap_err();
    assert!(matches!(single, QueryError::Cancelled(_)));

    let account = query
        .account_balances(org, ledger, Uuid::now_v7())
        .await
        .unwrap_err();
    assert!(matches!(account, QueryError::Cancelled(_)));

    assert!(recording.calls.lock().unwrap().is_empty());
}
