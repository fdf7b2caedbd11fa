/*!
 * # Rate Limiting Module
 *
 * Per-identity, per-endpoint admission control. Every request increments a counter keyed by
 * `(identity, endpoint, window)` and is admitted while the post-increment count stays within
 * the endpoint's budget. The increment and the value it returns come from one atomic store
 * operation, so concurrent requests cannot both observe a stale count.
 *
 * Backends:
 *
 * - `InMemory`: a `DashMap` entry lock, single process only
 * - `Redis`: `MULTI; INCR; EXPIRE; EXEC`
 * - `Database`: `INSERT .. ON CONFLICT DO UPDATE SET request_count = request_count + 1 RETURNING`
 *
 * The limiter fails open: if the counter store errors or times out the request is admitted
 * and the failure is logged.
 */
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use metrics::counter;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use strum::{EnumIter, IntoEnumIterator};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::entities::rate_limit_counter;

/// Upper bound on how long an admission check may wait on its store.
const STORE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Counter store timed out")]
    Timeout,
}

impl From<redis::RedisError> for RateLimitError {
    fn from(err: redis::RedisError) -> Self {
        RateLimitError::StoreUnavailable(err.to_string())
    }
}

impl From<sea_orm::DbErr> for RateLimitError {
    fn from(err: sea_orm::DbErr) -> Self {
        RateLimitError::StoreUnavailable(err.to_string())
    }
}

/// Endpoints with their own request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum Endpoint {
    CreateOrder,
    CreateCodOrder,
    VerifyPayment,
    Default,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::CreateOrder => "create-order",
            Endpoint::CreateCodOrder => "create-cod-order",
            Endpoint::VerifyPayment => "verify-payment",
            Endpoint::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub requests_per_window: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(requests_per_window: u32, window: Duration) -> Self {
        Self {
            requests_per_window,
            window,
        }
    }

    fn window_secs(&self) -> i64 {
        self.window.as_secs().max(1) as i64
    }

    /// Start of the window `now` falls into, aligned to multiples of the window length.
    pub fn window_start(&self, now: DateTime<Utc>) -> i64 {
        let secs = self.window_secs();
        now.timestamp().div_euclid(secs) * secs
    }
}

/// Identifies one counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterKey {
    pub identity: String,
    pub endpoint: Endpoint,
    pub window_start: i64,
}

impl CounterKey {
    pub fn storage_key(&self, namespace: &str) -> String {
        format!(
            "{}:{}:{}:{}",
            namespace,
            self.endpoint.as_str(),
            self.identity,
            self.window_start
        )
    }
}

/// Durable counter with an atomic increment-and-read.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increments the counter and returns the new value. The counter must expire no earlier
    /// than `expires_at`.
    async fn increment(
        &self,
        key: &CounterKey,
        expires_at: DateTime<Utc>,
    ) -> Result<u64, RateLimitError>;

    /// Drops counters whose window has passed. Backends with native expiry do nothing.
    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64, RateLimitError> {
        Ok(0)
    }

    fn backend_name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
struct InMemoryEntry {
    count: u64,
    expires_at: DateTime<Utc>,
}

/// Process-local counters; the `DashMap` entry guard makes the increment atomic.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCounterStore {
    namespace: String,
    entries: Arc<DashMap<String, InMemoryEntry>>,
}

impl InMemoryCounterStore {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            entries: Arc::new(DashMap::new()),
        }
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(
        &self,
        key: &CounterKey,
        expires_at: DateTime<Utc>,
    ) -> Result<u64, RateLimitError> {
        let mut entry = self
            .entries
            .entry(key.storage_key(&self.namespace))
            .or_insert_with(|| InMemoryEntry {
                count: 0,
                expires_at,
            });
        entry.count += 1;
        Ok(entry.count)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RateLimitError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}

#[derive(Clone)]
pub struct RedisCounterStore {
    client: Arc<redis::Client>,
    namespace: String,
}

impl RedisCounterStore {
    pub fn new(client: Arc<redis::Client>, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(
        &self,
        key: &CounterKey,
        expires_at: DateTime<Utc>,
    ) -> Result<u64, RateLimitError> {
        let redis_key = key.storage_key(&self.namespace);
        let ttl_secs = (expires_at - Utc::now()).num_seconds().max(1) as usize;

        let mut conn = self.client.get_async_connection().await?;
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(&redis_key, 1)
            .expire(&redis_key, ttl_secs)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(count.max(0) as u64)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

/// Counters in the `rate_limit_counters` table.
#[derive(Clone)]
pub struct DatabaseCounterStore {
    db: Arc<DatabaseConnection>,
    namespace: String,
}

impl DatabaseCounterStore {
    pub fn new(db: Arc<DatabaseConnection>, namespace: impl Into<String>) -> Self {
        Self {
            db,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl CounterStore for DatabaseCounterStore {
    async fn increment(
        &self,
        key: &CounterKey,
        expires_at: DateTime<Utc>,
    ) -> Result<u64, RateLimitError> {
        use rate_limit_counter::{ActiveModel, Column, Entity};

        let row = ActiveModel {
            bucket_key: Set(key.storage_key(&self.namespace)),
            identity: Set(key.identity.clone()),
            endpoint: Set(key.endpoint.as_str().to_string()),
            window_start: Set(key.window_start),
            request_count: Set(1),
            expires_at: Set(expires_at),
        };

        let counted = Entity::insert(row)
            .on_conflict(
                OnConflict::column(Column::BucketKey)
                    .value(
                        Column::RequestCount,
                        Expr::col((Entity, Column::RequestCount)).add(1),
                    )
                    .to_owned(),
            )
            .exec_with_returning(self.db.as_ref())
            .await?;

        Ok(counted.request_count.max(0) as u64)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RateLimitError> {
        let result = rate_limit_counter::Entity::delete_many()
            .filter(rate_limit_counter::Column::ExpiresAt.lt(now))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    fn backend_name(&self) -> &'static str {
        "database"
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Set when the store could not be consulted and the request was let through.
    pub failed_open: bool,
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    policies: HashMap<Endpoint, RateLimitPolicy>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, policies: HashMap<Endpoint, RateLimitPolicy>) -> Self {
        Self { store, policies }
    }

    /// Builds a limiter with every endpoint's policy taken from configuration.
    pub fn from_config(cfg: &AppConfig, store: Arc<dyn CounterStore>) -> Self {
        let policies = Endpoint::iter()
            .map(|endpoint| (endpoint, cfg.rate_limit_policy(endpoint)))
            .collect();
        Self::new(store, policies)
    }

    pub fn in_memory(cfg: &AppConfig) -> Self {
        Self::from_config(
            cfg,
            Arc::new(InMemoryCounterStore::new(cfg.rate_limit_namespace.clone())),
        )
    }

    pub fn policy(&self, endpoint: Endpoint) -> RateLimitPolicy {
        self.policies
            .get(&endpoint)
            .or_else(|| self.policies.get(&Endpoint::Default))
            .copied()
            .unwrap_or_else(|| RateLimitPolicy::new(100, Duration::from_secs(3600)))
    }

    /// `true` when `identity` may call `endpoint` now.
    pub async fn allow(&self, identity: &str, endpoint: Endpoint) -> bool {
        self.check_at(identity, endpoint, Utc::now()).await.allowed
    }

    pub async fn check_at(
        &self,
        identity: &str,
        endpoint: Endpoint,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let policy = self.policy(endpoint);
        let window_start = policy.window_start(now);
        let key = CounterKey {
            identity: identity.to_string(),
            endpoint,
            window_start,
        };
        let expires_at = DateTime::<Utc>::from_timestamp(window_start, 0).unwrap_or(now)
            + ChronoDuration::seconds(policy.window_secs());

        let outcome = tokio::time::timeout(STORE_TIMEOUT, self.store.increment(&key, expires_at))
            .await
            .unwrap_or(Err(RateLimitError::Timeout));

        match outcome {
            Ok(count) => {
                let limit = u64::from(policy.requests_per_window);
                let allowed = count <= limit;
                if !allowed {
                    counter!("checkout_rate_limit_denied_total", 1, "endpoint" => endpoint.as_str());
                    debug!(identity, endpoint = endpoint.as_str(), count, "rate limit exceeded");
                }
                RateLimitDecision {
                    allowed,
                    limit: policy.requests_per_window,
                    remaining: limit.saturating_sub(count) as u32,
                    failed_open: false,
                }
            }
            Err(err) => {
                counter!("checkout_rate_limit_fail_open_total", 1, "endpoint" => endpoint.as_str());
                warn!(
                    error = %err,
                    backend = self.store.backend_name(),
                    endpoint = endpoint.as_str(),
                    "rate limit store unavailable, admitting request"
                );
                RateLimitDecision {
                    allowed: true,
                    limit: policy.requests_per_window,
                    remaining: policy.requests_per_window,
                    failed_open: true,
                }
            }
        }
    }

    pub async fn purge_expired(&self) -> Result<u64, RateLimitError> {
        tokio::time::timeout(STORE_TIMEOUT, self.store.purge_expired(Utc::now()))
            .await
            .unwrap_or(Err(RateLimitError::Timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct BrokenStore;

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn increment(
            &self,
            _key: &CounterKey,
            _expires_at: DateTime<Utc>,
        ) -> Result<u64, RateLimitError> {
            Err(RateLimitError::StoreUnavailable("connection refused".into()))
        }

        fn backend_name(&self) -> &'static str {
            "broken"
        }
    }

    fn limiter_with(store: Arc<dyn CounterStore>, limit: u32) -> RateLimiter {
        let mut policies = HashMap::new();
        policies.insert(
            Endpoint::CreateOrder,
            RateLimitPolicy::new(limit, Duration::from_secs(60)),
        );
        RateLimiter::new(store, policies)
    }

    #[tokio::test]
    async fn admits_up_to_budget_then_denies() {
        let limiter = limiter_with(Arc::new(InMemoryCounterStore::new("t")), 3);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 5).unwrap();

        for _ in 0..3 {
            assert!(limiter.check_at("user-1", Endpoint::CreateOrder, now).await.allowed);
        }
        let denied = limiter.check_at("user-1", Endpoint::CreateOrder, now).await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
    }

    #[tokio::test]
    async fn identities_and_windows_are_independent() {
        let limiter = limiter_with(Arc::new(InMemoryCounterStore::new("t")), 1);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 5).unwrap();

        assert!(limiter.check_at("a", Endpoint::CreateOrder, now).await.allowed);
        assert!(limiter.check_at("b", Endpoint::CreateOrder, now).await.allowed);
        assert!(!limiter.check_at("a", Endpoint::CreateOrder, now).await.allowed);

        let next_window = now + ChronoDuration::seconds(60);
        assert!(limiter.check_at("a", Endpoint::CreateOrder, next_window).await.allowed);
    }

    #[tokio::test]
    async fn store_failure_fails_open() {
        let limiter = limiter_with(Arc::new(BrokenStore), 1);
        let decision = limiter
            .check_at("user-1", Endpoint::CreateOrder, Utc::now())
            .await;
        assert!(decision.allowed);
        assert!(decision.failed_open);
    }

    #[tokio::test]
    async fn concurrent_requests_cannot_exceed_budget() {
        let limiter = limiter_with(Arc::new(InMemoryCounterStore::new("t")), 10);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 5).unwrap();

        let checks = (0..50).map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter
                    .check_at("racer", Endpoint::CreateOrder, now)
                    .await
                    .allowed
            })
        });
        let admitted = futures::future::join_all(checks)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();
        assert_eq!(admitted, 10);
    }

    #[tokio::test]
    async fn expired_in_memory_counters_are_purged() {
        let store = InMemoryCounterStore::new("t");
        let key = CounterKey {
            identity: "u".into(),
            endpoint: Endpoint::Default,
            window_start: 0,
        };
        let expiry = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        store.increment(&key, expiry).await.unwrap();
        let purged = store
            .purge_expired(expiry + ChronoDuration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);
    }

    #[test]
    fn window_start_is_aligned() {
        let policy = RateLimitPolicy::new(10, Duration::from_secs(60));
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 59).unwrap();
        assert_eq!(policy.window_start(now) % 60, 0);
        assert_eq!(now.timestamp() - policy.window_start(now), 59);
    }
}
