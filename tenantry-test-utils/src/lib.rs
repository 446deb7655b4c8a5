//! Tenantry Test Utilities
//!
//! Shared test infrastructure for the Tenantry workspace:
//! - Scripted tenant directory with latency, failures and call counting
//! - Mock connection pool that tracks checkouts, releases and discards
//! - Proptest generators for identifiers and records
//! - Fixtures for the usual tenants
//! - Assertions over routing results

pub use tenantry_core::{
    DirectoryError, DirectoryResult, Revision, RoutingConfig, RoutingError, RoutingResult,
    SchemaName, TenantId, TenantRecord, TenantStatus,
};
pub use tenantry_router::{ConnectionSource, SchemaConnection, SessionError};
pub use tenantry_storage::{InMemoryTenantDirectory, TenantDirectory};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// SCRIPTED DIRECTORY
// ============================================================================

/// In-memory directory whose behaviour can be scripted per test.
///
/// The record is read when the fetch starts and returned after the configured
/// delay, so a write made during the delay is not seen by that fetch (as with
/// a database snapshot).
#[derive(Debug, Default)]
pub struct ScriptedDirectory {
    records: InMemoryTenantDirectory,
    delay: Mutex<Option<Duration>>,
    failures: Mutex<VecDeque<DirectoryError>>,
    calls: AtomicUsize,
    calls_by_tenant: Mutex<HashMap<TenantId, usize>>,
}

impl ScriptedDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = TenantRecord>) -> Self {
        Self {
            records: InMemoryTenantDirectory::with_records(records),
            ..Default::default()
        }
    }

    /// Delay every fetch by `delay`. Uses tokio time, so paused-clock tests
    /// can step past it.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Make the next fetch fail with `error`. Queued failures are consumed in
    /// order.
    pub fn fail_next(&self, error: DirectoryError) {
        self.failures.lock().push_back(error);
    }

    pub fn put(&self, record: TenantRecord) {
        self.records.put(record);
    }

    pub fn set_status(&self, tenant: &TenantId, status: TenantStatus) -> Option<Revision> {
        self.records.set_status(tenant, status)
    }

    pub fn remove(&self, tenant: &TenantId) -> Option<TenantRecord> {
        self.records.remove(tenant)
    }

    pub fn get(&self, tenant: &TenantId) -> Option<TenantRecord> {
        self.records.get(tenant)
    }

    /// Total number of fetches started.
    pub fn fetch_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of fetches started for one tenant.
    pub fn fetch_count_for(&self, tenant: &TenantId) -> usize {
        self.calls_by_tenant.lock().get(tenant).copied().unwrap_or(0)
    }
}

#[async_trait]
impl TenantDirectory for ScriptedDirectory {
    async fn fetch_tenant(&self, tenant: &TenantId) -> DirectoryResult<Option<TenantRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.calls_by_tenant.lock().entry(tenant.clone()).or_insert(0) += 1;

        let failure = self.failures.lock().pop_front();
        let snapshot = self.records.get(tenant);
        let delay = *self.delay.lock();

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(snapshot),
        }
    }
}

// ============================================================================
// MOCK CONNECTION POOL
// ============================================================================

/// Counters shared by a [`MockPool`] and its connections.
#[derive(Debug, Default)]
pub struct PoolLedger {
    acquired: AtomicUsize,
    released: AtomicUsize,
    discarded: AtomicUsize,
    statements: Mutex<Vec<String>>,
}

impl PoolLedger {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Connections returned to the pool by drop.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn discarded(&self) -> usize {
        self.discarded.load(Ordering::SeqCst)
    }

    /// Connections checked out and not yet returned or discarded.
    pub fn outstanding(&self) -> usize {
        self.acquired() - self.released() - self.discarded()
    }

    /// Every statement executed, in order.
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }
}

/// Connection pool double for router tests.
#[derive(Debug, Clone, Default)]
pub struct MockPool {
    ledger: Arc<PoolLedger>,
    fail_search_path: Arc<AtomicBool>,
    exhausted: Arc<AtomicBool>,
}

impl MockPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ledger(&self) -> Arc<PoolLedger> {
        Arc::clone(&self.ledger)
    }

    /// Make every `SET search_path` fail.
    pub fn fail_search_path(&self, fail: bool) {
        self.fail_search_path.store(fail, Ordering::SeqCst);
    }

    /// Make every checkout fail as if the pool were exhausted.
    pub fn set_exhausted(&self, exhausted: bool) {
        self.exhausted.store(exhausted, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionSource for MockPool {
    type Connection = MockConnection;

    async fn acquire(&self) -> Result<Self::Connection, SessionError> {
        if self.exhausted.load(Ordering::SeqCst) {
            return Err(SessionError::PoolExhausted);
        }
        let id = self.ledger.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            id,
            ledger: Arc::clone(&self.ledger),
            fail_search_path: self.fail_search_path.load(Ordering::SeqCst),
            discarded: false,
        })
    }
}

/// Connection handed out by [`MockPool`].
#[derive(Debug)]
pub struct MockConnection {
    id: usize,
    ledger: Arc<PoolLedger>,
    fail_search_path: bool,
    discarded: bool,
}

impl MockConnection {
    pub fn id(&self) -> usize {
        self.id
    }
}

#[async_trait]
impl SchemaConnection for MockConnection {
    async fn batch_execute(&mut self, sql: &str) -> Result<(), SessionError> {
        self.ledger.statements.lock().push(sql.to_string());
        if self.fail_search_path && sql.starts_with("SET search_path") {
            return Err(SessionError::Database("statement failed".to_string()));
        }
        Ok(())
    }

    fn discard(mut self) {
        self.discarded = true;
        self.ledger.discarded.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        if !self.discarded {
            self.ledger.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for routing types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a valid, already-normalized TenantId.
    pub fn arb_tenant_id() -> impl Strategy<Value = TenantId> {
        "[a-z0-9]([a-z0-9_-]{0,30}[a-z0-9])?"
            .prop_map(|s| TenantId::parse(&s).expect("generated tenant id is valid"))
    }

    /// Generate a valid SchemaName.
    pub fn arb_schema_name() -> impl Strategy<Value = SchemaName> {
        "[a-z_][a-z0-9_]{0,40}"
            .prop_map(|s| SchemaName::parse(&s).expect("generated schema name is valid"))
    }

    pub fn arb_revision() -> impl Strategy<Value = Revision> {
        (0u64..1_000_000).prop_map(Revision::new)
    }

    pub fn arb_status() -> impl Strategy<Value = TenantStatus> {
        prop_oneof![
            Just(TenantStatus::Active),
            Just(TenantStatus::Suspended),
            Just(TenantStatus::Deleted),
        ]
    }

    pub fn arb_record() -> impl Strategy<Value = TenantRecord> {
        (arb_tenant_id(), arb_schema_name(), arb_status(), arb_revision()).prop_map(
            |(tenant_id, schema_name, status, revision)| {
                TenantRecord::new(tenant_id, schema_name, status, revision)
            },
        )
    }

    /// Generate one of a small set of tenants, so sequences
    /// revisit the same keys.
    pub fn arb_small_tenant() -> impl Strategy<Value = TenantId> {
        (0usize..8).prop_map(|i| fixtures::tenant(&format!("t{}", i)))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built tenants for common scenarios.

    use super::*;

    pub fn tenant(name: &str) -> TenantId {
        TenantId::parse(name).expect("fixture tenant id is valid")
    }

    pub fn schema(name: &str) -> SchemaName {
        SchemaName::parse(name).expect("fixture schema name is valid")
    }

    /// Active record for `name` in schema `tenant_<name>`.
    pub fn active(name: &str, revision: u64) -> TenantRecord {
        record(name, TenantStatus::Active, revision)
    }

    pub fn record(name: &str, status: TenantStatus, revision: u64) -> TenantRecord {
        TenantRecord::new(
            tenant(name),
            schema(&format!("tenant_{}", name.replace('-', "_"))),
            status,
            Revision::new(revision),
        )
    }

    pub fn acme() -> TenantRecord {
        active("acme", 5)
    }

    pub fn globex() -> TenantRecord {
        active("globex", 1)
    }

    pub fn initech() -> TenantRecord {
        active("initech", 1)
    }

    pub fn wayne() -> TenantRecord {
        active("wayne", 1)
    }

    /// Directory holding acme, globex, initech and wayne.
    pub fn standard_directory() -> ScriptedDirectory {
        ScriptedDirectory::with_records([acme(), globex(), initech(), wayne()])
    }

    /// Routing config with a one hour TTL and the given capacity.
    pub fn routing_config(capacity: usize) -> RoutingConfig {
        RoutingConfig::new()
            .with_capacity(capacity)
            .with_ttl(Duration::from_secs(3600))
            .with_load_timeout(Duration::from_secs(2))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over routing results.

    use super::*;

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &RoutingResult<T>) {
        match result {
            Err(RoutingError::NotFound { .. }) => {}
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_suspended<T: std::fmt::Debug>(result: &RoutingResult<T>) {
        match result {
            Err(RoutingError::Suspended { .. }) => {}
            other => panic!("Expected Suspended, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_deleted<T: std::fmt::Debug>(result: &RoutingResult<T>) {
        match result {
            Err(RoutingError::Deleted { .. }) => {}
            other => panic!("Expected Deleted, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_unavailable<T: std::fmt::Debug>(result: &RoutingResult<T>) {
        match result {
            Err(e @ RoutingError::Unavailable { .. }) => {
                assert!(e.is_transient(), "Unavailable must be transient");
            }
            other => panic!("Expected Unavailable, got: {:?}", other),
        }
    }

    /// Assert that every connection checked out has been returned exactly
    /// once, either released or discarded.
    #[track_caller]
    pub fn assert_no_outstanding_connections(ledger: &PoolLedger) {
        assert_eq!(
            ledger.acquired(),
            ledger.released() + ledger.discarded(),
            "Connections outstanding: acquired={}, released={}, discarded={}",
            ledger.acquired(),
            ledger.released(),
            ledger.discarded()
        );
    }
}
