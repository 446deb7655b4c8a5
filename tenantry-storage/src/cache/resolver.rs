//! Bounded tenant resolution cache.
//!
//! Resolution answers from a strict LRU of [`CacheEntry`] values and falls back
//! to a single directory load per tenant on a miss. Every install goes through
//! one critical section that checks the tenant's invalidation generation and
//! revision floor, so a load that raced an invalidation can never put an
//! already-invalidated view back into the cache.
//!
//! Lock order is always the cache state first and the flight map second.
//! Neither lock is held across an `.await`.
//!
//! Hits, installs and invalidations for every tenant share the one state
//! lock, since a strict LRU reorders on every hit. Distinct tenants still
//! load in parallel: directory fetches run outside the lock and the
//! critical sections are a map lookup or insert.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tenantry_core::{
    ConfigError, DirectoryError, Revision, RoutingConfig, RoutingError, RoutingResult, TenantId,
    TenantRecord,
};
use tokio::time::Instant;

use super::entry::{CacheEntry, Resident};
use super::revision::{Generation, RevisionLedger};
use super::single_flight::{FlightHandle, FlightId, SingleFlight};
use super::stats::{CacheStats, StatsRecorder};
use crate::directory::TenantDirectory;

/// The ledger tracks more tenants than the cache holds, so floors survive a
/// while after eviction.
const LEDGER_CAPACITY_FACTOR: usize = 4;
const MIN_LEDGER_CAPACITY: usize = 256;

/// Result of one directory load, shared by every caller attached to it.
#[derive(Debug, Clone)]
pub(crate) enum LoadOutcome {
    /// The load finished; the result is final for this resolve.
    Done(RoutingResult<Arc<CacheEntry>>),
    /// The load was superseded by an invalidation or a newer revision and
    /// nothing was installed.
    StaleWrite,
}

struct CacheState {
    entries: LruCache<TenantId, Resident>,
    ledger: RevisionLedger,
}

struct CacheInner<D> {
    directory: D,
    config: RoutingConfig,
    state: Mutex<CacheState>,
    flights: SingleFlight<TenantId, LoadOutcome>,
    stats: StatsRecorder,
}

enum Lookup {
    Hit(RoutingResult<Arc<CacheEntry>>),
    Wait(FlightHandle<LoadOutcome>),
}

/// Concurrency-safe, bounded map from tenant to routing data.
///
/// Cloning is cheap and yields a handle to the same cache.
pub struct TenantResolutionCache<D> {
    inner: Arc<CacheInner<D>>,
}

impl<D> Clone for TenantResolutionCache<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: TenantDirectory> TenantResolutionCache<D> {
    /// Create a cache in front of `directory`.
    pub fn new(directory: D, config: RoutingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let capacity =
            NonZeroUsize::new(config.capacity).ok_or_else(|| ConfigError::InvalidValue {
                field: "capacity".to_string(),
                value: config.capacity.to_string(),
                reason: "cache capacity must be at least 1".to_string(),
            })?;
        let ledger_capacity = NonZeroUsize::new(
            config
                .capacity
                .saturating_mul(LEDGER_CAPACITY_FACTOR)
                .max(MIN_LEDGER_CAPACITY),
        )
        .unwrap_or(capacity);

        Ok(Self {
            inner: Arc::new(CacheInner {
                directory,
                config,
                state: Mutex::new(CacheState {
                    entries: LruCache::new(capacity),
                    ledger: RevisionLedger::new(ledger_capacity),
                }),
                flights: SingleFlight::new(),
                stats: StatsRecorder::default(),
            }),
        })
    }

    /// Resolve a tenant to its routing entry.
    ///
    /// Only active tenants resolve to `Ok`. Suspended, deleted and unknown
    /// tenants are reported as errors (and cached for `negative_ttl`);
    /// directory failures are reported as `Unavailable` and not cached.
    pub async fn resolve(&self, tenant: &TenantId) -> RoutingResult<Arc<CacheEntry>> {
        let mut stale_retries = 0u32;
        loop {
            let flight = match self.lookup_or_join(tenant) {
                Lookup::Hit(outcome) => return outcome,
                Lookup::Wait(flight) => flight,
            };

            let flight_id = flight.id;
            let outcome = match flight.wait().await {
                Ok(outcome) => outcome,
                Err(aborted) => {
                    self.inner.flights.complete(tenant, flight_id);
                    tracing::error!(
                        tenant = %tenant,
                        error = %aborted,
                        "Tenant load task aborted"
                    );
                    return Err(RoutingError::unavailable(tenant, aborted.to_string()));
                }
            };

            match outcome {
                LoadOutcome::Done(result) => return result,
                LoadOutcome::StaleWrite => {
                    stale_retries += 1;
                    if stale_retries > self.inner.config.max_stale_retries {
                        tracing::warn!(
                            tenant = %tenant,
                            retries = stale_retries - 1,
                            "Tenant kept changing while loading, giving up"
                        );
                        return Err(RoutingError::unavailable(
                            tenant,
                            "tenant record changed repeatedly during load",
                        ));
                    }
                    tracing::debug!(
                        tenant = %tenant,
                        attempt = stale_retries,
                        "Retrying superseded load"
                    );
                }
            }
        }
    }

    fn lookup_or_join(&self, tenant: &TenantId) -> Lookup {
        let inner = &self.inner;
        let now = Instant::now();
        let mut state = inner.state.lock();

        if let Some(resident) = state.entries.get(tenant) {
            if !resident.is_expired(now, inner.config.entry_ttl, inner.config.negative_ttl) {
                inner.stats.hit();
                tracing::debug!(
                    tenant = %tenant,
                    revision = resident.revision().get(),
                    "Tenant cache hit"
                );
                return Lookup::Hit(resident.outcome(tenant));
            }
        }

        inner.stats.miss();
        let flight = inner.flights.join_or_start(tenant, |flight_id| {
            Self::load(Arc::clone(inner), tenant.clone(), flight_id)
        });
        tracing::debug!(
            tenant = %tenant,
            leader = flight.leader,
            "Tenant cache miss"
        );
        drop(state);
        Lookup::Wait(flight)
    }

    async fn load(
        inner: Arc<CacheInner<D>>,
        tenant: TenantId,
        flight_id: FlightId,
    ) -> LoadOutcome {
        inner.stats.load();
        let generation = inner.state.lock().ledger.pin(&tenant);
        let mut pin = LedgerPin {
            inner: &inner,
            tenant: &tenant,
            held: true,
        };
        let started = Instant::now();

        let fetched = match tokio::time::timeout(
            inner.config.load_timeout,
            inner.directory.fetch_tenant(&tenant),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DirectoryError::Timeout {
                elapsed: started.elapsed(),
            }),
        };

        let mut state = inner.state.lock();
        let outcome = match fetched {
            Ok(record) => inner.install(&mut state, &tenant, generation, record),
            Err(err) => {
                inner.stats.load_failure();
                tracing::warn!(
                    tenant = %tenant,
                    error = %err,
                    "Tenant directory lookup failed"
                );
                LoadOutcome::Done(Err(RoutingError::from_directory(&tenant, &err)))
            }
        };
        state.ledger.unpin(&tenant);
        pin.held = false;
        // Tear down while still holding the state lock, so no resolver sees
        // the flight gone before the result is visible.
        inner.flights.complete(&tenant, flight_id);
        outcome
    }

    // ========================================================================
    // INVALIDATION
    // ========================================================================

    /// Drop the cached entry for a tenant. Idempotent.
    ///
    /// Loads already in flight for the tenant are detached and their results
    /// discarded; the next resolve starts a fresh load. Returns whether an
    /// entry was removed.
    pub fn invalidate(&self, tenant: &TenantId) -> bool {
        self.invalidate_with_floor(tenant, None)
    }

    /// Invalidate and additionally refuse any load older than `revision`.
    pub fn invalidate_at(&self, tenant: &TenantId, revision: Revision) -> bool {
        self.invalidate_with_floor(tenant, Some(revision))
    }

    fn invalidate_with_floor(&self, tenant: &TenantId, revision: Option<Revision>) -> bool {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        let removed = state.entries.pop(tenant);
        let floor = removed
            .as_ref()
            .map(Resident::revision)
            .max(revision)
            .filter(|rev| *rev > Revision::ZERO);
        state.ledger.invalidate(tenant, floor);
        let detached = inner.flights.detach(tenant);
        drop(state);

        if removed.is_some() {
            inner.stats.invalidation();
        }
        tracing::debug!(
            tenant = %tenant,
            removed = removed.is_some(),
            detached,
            "Tenant invalidated"
        );
        removed.is_some()
    }

    /// Drop every entry and detach every in-flight load.
    pub fn clear(&self) -> usize {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        let count = state.entries.len();
        state.entries.clear();
        state.ledger.invalidate_all();
        inner.flights.detach_all();
        drop(state);

        for _ in 0..count {
            inner.stats.invalidation();
        }
        tracing::info!(cleared = count, "Tenant cache cleared");
        count
    }

    /// Alias of [`clear`](Self::clear).
    pub fn invalidate_all(&self) -> usize {
        self.clear()
    }

    // ========================================================================
    // INSPECTION
    // ========================================================================

    /// Look at a cached, unexpired entry without updating recency or loading.
    ///
    /// Unlike `resolve`, this also returns suspended and deleted entries.
    pub fn peek(&self, tenant: &TenantId) -> Option<Arc<CacheEntry>> {
        let now = Instant::now();
        let state = self.inner.state.lock();
        let resident = state.entries.peek(tenant)?;
        if resident.is_expired(
            now,
            self.inner.config.entry_ttl,
            self.inner.config.negative_ttl,
        ) {
            return None;
        }
        match resident {
            Resident::Tenant(entry) => Some(Arc::clone(entry)),
            Resident::Missing { .. } => None,
        }
    }

    /// Whether an unexpired entry (including a not-found marker) is cached.
    pub fn contains(&self, tenant: &TenantId) -> bool {
        let now = Instant::now();
        let state = self.inner.state.lock();
        state.entries.peek(tenant).is_some_and(|resident| {
            !resident.is_expired(
                now,
                self.inner.config.entry_ttl,
                self.inner.config.negative_ttl,
            )
        })
    }

    /// Number of resident entries, expired ones included.
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.config.capacity
    }

    /// Number of tenants with a directory load in flight.
    pub fn loads_in_flight(&self) -> usize {
        self.inner.flights.in_flight()
    }

    pub fn stats(&self) -> CacheStats {
        let entry_count = self.len();
        self.inner.stats.snapshot(entry_count, self.inner.config.capacity)
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.inner.config
    }

    pub fn directory(&self) -> &D {
        &self.inner.directory
    }
}

/// Releases a load's ledger pin if the load unwinds before installing.
struct LedgerPin<'a, D> {
    inner: &'a CacheInner<D>,
    tenant: &'a TenantId,
    held: bool,
}

impl<D> Drop for LedgerPin<'_, D> {
    fn drop(&mut self) {
        if self.held {
            self.inner.state.lock().ledger.unpin(self.tenant);
        }
    }
}

impl<D> CacheInner<D> {
    /// Install a load result if it is still current.
    fn install(
        &self,
        state: &mut CacheState,
        tenant: &TenantId,
        generation: Generation,
        record: Option<TenantRecord>,
    ) -> LoadOutcome {
        if state.ledger.generation(tenant) != generation {
            self.stats.stale_discard();
            tracing::debug!(tenant = %tenant, "Discarding load superseded by invalidation");
            return LoadOutcome::StaleWrite;
        }

        let now = Instant::now();
        let resident = match record {
            None => Resident::Missing { loaded_at: now },
            Some(record) => {
                if &record.tenant_id != tenant {
                    self.stats.load_failure();
                    tracing::error!(
                        tenant = %tenant,
                        returned = %record.tenant_id,
                        "Directory returned a record for another tenant"
                    );
                    return LoadOutcome::Done(Err(RoutingError::unavailable(
                        tenant,
                        "directory returned a mismatched record",
                    )));
                }

                let resident_revision = state
                    .entries
                    .peek(tenant)
                    .map(Resident::revision)
                    .unwrap_or(Revision::ZERO);
                let floor = state.ledger.floor(tenant).max(resident_revision);
                if record.revision < floor {
                    self.stats.stale_discard();
                    tracing::debug!(
                        tenant = %tenant,
                        revision = record.revision.get(),
                        floor = floor.get(),
                        "Discarding load older than observed revision"
                    );
                    return LoadOutcome::StaleWrite;
                }
                Resident::Tenant(Arc::new(CacheEntry::from_record(record, now)))
            }
        };

        let outcome = resident.outcome(tenant);
        self.put(state, tenant, resident);
        LoadOutcome::Done(outcome)
    }

    /// Insert or replace, evicting the least recently used entry when full.
    fn put(&self, state: &mut CacheState, tenant: &TenantId, resident: Resident) {
        let new_revision = resident.revision();
        if let Some((key, old)) = state.entries.push(tenant.clone(), resident) {
            if &key == tenant {
                // Replaced in place; keep the floor if the new value carries
                // no revision (not-found marker).
                if old.revision() > new_revision {
                    state.ledger.raise_floor(&key, old.revision());
                }
            } else {
                self.stats.eviction();
                if old.revision() > Revision::ZERO {
                    state.ledger.raise_floor(&key, old.revision());
                }
                tracing::debug!(tenant = %key, "Evicted tenant from cache");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryTenantDirectory;
    use std::time::Duration;
    use tenantry_core::{SchemaName, TenantStatus};

    fn tenant(name: &str) -> TenantId {
        TenantId::parse(name).expect("valid id")
    }

    fn record(name: &str, status: TenantStatus, revision: u64) -> TenantRecord {
        TenantRecord::new(
            tenant(name),
            SchemaName::parse(&format!("tenant_{}", name)).expect("valid schema"),
            status,
            Revision::new(revision),
        )
    }

    fn cache(
        records: Vec<TenantRecord>,
        config: RoutingConfig,
    ) -> TenantResolutionCache<Arc<InMemoryTenantDirectory>> {
        let directory = Arc::new(InMemoryTenantDirectory::with_records(records));
        TenantResolutionCache::new(directory, config).expect("valid config")
    }

    #[test]
    fn test_new_rejects_zero_capacity() {
        let directory = InMemoryTenantDirectory::new();
        let result = TenantResolutionCache::new(directory, RoutingConfig::new().with_capacity(0));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_resolve_hit_after_miss() {
        let cache = cache(
            vec![record("acme", TenantStatus::Active, 1)],
            RoutingConfig::default(),
        );
        let acme = tenant("acme");

        let first = cache.resolve(&acme).await.expect("resolve should succeed");
        let second = cache.resolve(&acme).await.expect("resolve should succeed");
        assert_eq!(first.schema_name.as_str(), "tenant_acme");
        assert!(Arc::ptr_eq(&first, &second));

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.entry_count, 1);
        assert_eq!(cache.loads_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_not_found_is_cached_negatively() {
        let cache = cache(vec![], RoutingConfig::default());
        let wayne = tenant("wayne");

        let err = cache.resolve(&wayne).await.expect_err("unknown tenant");
        assert!(matches!(err, RoutingError::NotFound { .. }));
        assert!(cache.contains(&wayne));
        assert!(cache.peek(&wayne).is_none());

        let again = cache.resolve(&wayne).await.expect_err("unknown tenant");
        assert!(matches!(again, RoutingError::NotFound { .. }));
        assert_eq!(cache.stats().loads, 1);
    }

    #[tokio::test]
    async fn test_suspended_and_deleted_are_rejected_but_peekable() {
        let cache = cache(
            vec![
                record("acme", TenantStatus::Suspended, 3),
                record("globex", TenantStatus::Deleted, 4),
            ],
            RoutingConfig::default(),
        );

        let suspended = cache.resolve(&tenant("acme")).await.expect_err("suspended");
        assert!(matches!(suspended, RoutingError::Suspended { .. }));
        let deleted = cache.resolve(&tenant("globex")).await.expect_err("deleted");
        assert!(matches!(deleted, RoutingError::Deleted { .. }));

        let peeked = cache.peek(&tenant("acme")).expect("negative entry cached");
        assert_eq!(peeked.status, TenantStatus::Suspended);
    }

    #[tokio::test]
    async fn test_lru_eviction_order() {
        let cache = cache(
            vec![
                record("acme", TenantStatus::Active, 1),
                record("globex", TenantStatus::Active, 1),
                record("initech", TenantStatus::Active, 1),
            ],
            RoutingConfig::new().with_capacity(2),
        );

        cache.resolve(&tenant("acme")).await.expect("resolve acme");
        cache.resolve(&tenant("globex")).await.expect("resolve globex");
        // Touch acme so globex becomes least recently used.
        cache.resolve(&tenant("acme")).await.expect("resolve acme");
        cache.resolve(&tenant("initech")).await.expect("resolve initech");

        assert!(cache.contains(&tenant("acme")));
        assert!(!cache.contains(&tenant("globex")));
        assert!(cache.contains(&tenant("initech")));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_reloaded() {
        let directory = Arc::new(InMemoryTenantDirectory::with_records([record(
            "acme",
            TenantStatus::Active,
            1,
        )]));
        let cache = TenantResolutionCache::new(
            Arc::clone(&directory),
            RoutingConfig::new().with_ttl(Duration::from_secs(60)),
        )
        .expect("valid config");
        let acme = tenant("acme");

        cache.resolve(&acme).await.expect("first resolve");
        directory.set_status(&acme, TenantStatus::Active);
        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(!cache.contains(&acme));
        let refreshed = cache.resolve(&acme).await.expect("refresh");
        assert_eq!(refreshed.revision, Revision::new(2));
        assert_eq!(cache.stats().loads, 2);
    }

    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let cache = cache(
            vec![record("acme", TenantStatus::Active, 5)],
            RoutingConfig::default(),
        );
        let acme = tenant("acme");
        cache.resolve(&acme).await.expect("resolve");

        assert!(cache.invalidate(&acme));
        assert!(!cache.invalidate(&acme));
        assert!(!cache.contains(&acme));
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_invalidate_at_rejects_older_revisions() {
        let cache = cache(
            vec![record("acme", TenantStatus::Active, 5)],
            RoutingConfig::new().with_max_stale_retries(2),
        );
        let acme = tenant("acme");
        cache.resolve(&acme).await.expect("resolve");

        // The directory has not caught up with revision 7 yet.
        cache.invalidate_at(&acme, Revision::new(7));
        let err = cache.resolve(&acme).await.expect_err("stale directory");
        assert!(err.is_transient());
        assert_eq!(cache.stats().stale_discards, 3);
        assert!(!cache.contains(&acme));
    }

    #[tokio::test]
    async fn test_clear_drops_everything() {
        let cache = cache(
            vec![
                record("acme", TenantStatus::Active, 1),
                record("globex", TenantStatus::Active, 1),
            ],
            RoutingConfig::default(),
        );
        cache.resolve(&tenant("acme")).await.expect("resolve");
        cache.resolve(&tenant("globex")).await.expect("resolve");

        assert_eq!(cache.clear(), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 1000);
        cache.resolve(&tenant("acme")).await.expect("resolve after clear");
        assert_eq!(cache.stats().loads, 3);
    }
}
