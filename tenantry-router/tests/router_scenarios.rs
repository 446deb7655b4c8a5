//! End-to-end routing scenarios over a scripted directory and a mock pool.
//!
//! Every scenario checks the pool ledger: a connection is only checked out
//! for an active tenant and always goes back exactly once.

use std::sync::Arc;
use tenantry_core::{Revision, RoutingConfig};
use tenantry_router::{search_path_statement, SchemaRouter, TenantRouter};
use tenantry_storage::TenantResolutionCache;
use tenantry_test_utils::assertions::{
    assert_deleted, assert_no_outstanding_connections, assert_not_found, assert_suspended,
    assert_unavailable,
};
use tenantry_test_utils::fixtures::{self, schema, tenant};
use tenantry_test_utils::{MockPool, ScriptedDirectory, TenantStatus};

type TestRouter = TenantRouter<Arc<ScriptedDirectory>, MockPool>;

fn router_with(
    directory: ScriptedDirectory,
    config: RoutingConfig,
) -> (Arc<ScriptedDirectory>, MockPool, TestRouter) {
    let directory = Arc::new(directory);
    let pool = MockPool::new();
    let cache = TenantResolutionCache::new(Arc::clone(&directory), config).expect("valid config");
    let schemas = SchemaRouter::new(pool.clone()).with_shared_schemas(vec![schema("public")]);
    (directory, pool, TenantRouter::new(cache, schemas))
}

fn standard_router() -> (Arc<ScriptedDirectory>, MockPool, TestRouter) {
    router_with(fixtures::standard_directory(), fixtures::routing_config(8))
}

// ============================================================================
// BINDING
// ============================================================================

#[tokio::test]
async fn test_active_tenant_gets_scoped_session() {
    let (_directory, pool, router) = standard_router();
    let ledger = pool.ledger();

    let session = router
        .resolve_and_bind(&tenant("acme"))
        .await
        .expect("bind should succeed");
    assert_eq!(session.tenant_id().as_str(), "acme");
    assert_eq!(session.schema().as_str(), "tenant_acme");
    assert_eq!(session.search_path(), "\"tenant_acme\", \"public\"");
    assert_eq!(session.revision().get(), 5);

    assert_eq!(
        ledger.statements(),
        vec![search_path_statement(&schema("tenant_acme"), &[schema("public")])]
    );
    assert_eq!(ledger.outstanding(), 1);

    drop(session);
    assert_no_outstanding_connections(&ledger);
    assert_eq!(ledger.released(), 1);
}

#[tokio::test]
async fn test_every_checkout_reasserts_schema() {
    let (_directory, pool, router) = standard_router();
    let ledger = pool.ledger();

    for name in ["acme", "globex", "acme"] {
        let session = router
            .resolve_and_bind(&tenant(name))
            .await
            .expect("bind should succeed");
        assert_eq!(session.tenant_id().as_str(), name);
    }

    let statements = ledger.statements();
    assert_eq!(statements.len(), 3);
    assert!(statements[0].contains("\"tenant_acme\""));
    assert!(statements[1].contains("\"tenant_globex\""));
    assert!(statements[2].contains("\"tenant_acme\""));
    assert_eq!(ledger.acquired(), 3);
    assert_no_outstanding_connections(&ledger);
}

#[tokio::test]
async fn test_suspended_tenant_never_touches_pool() {
    let (directory, pool, router) = standard_router();
    let ledger = pool.ledger();
    let acme = tenant("acme");
    directory.set_status(&acme, TenantStatus::Suspended);

    let result = router.resolve_and_bind(&acme).await;
    assert_suspended(&result);
    assert_eq!(ledger.acquired(), 0);
    assert!(ledger.statements().is_empty());
}

#[tokio::test]
async fn test_deleted_and_unknown_tenants_rejected() {
    let (directory, pool, router) = standard_router();
    let ledger = pool.ledger();
    let globex = tenant("globex");
    directory.set_status(&globex, TenantStatus::Deleted);

    assert_deleted(&router.resolve_and_bind(&globex).await);
    assert_not_found(&router.resolve_and_bind(&tenant("ghost")).await);
    assert_eq!(ledger.acquired(), 0);
}

#[tokio::test]
async fn test_bind_rejects_non_active_entries_directly() {
    let directory = ScriptedDirectory::with_records([
        fixtures::record("acme", TenantStatus::Suspended, 2),
        fixtures::record("globex", TenantStatus::Deleted, 3),
    ]);
    let (_directory, pool, router) = router_with(directory, fixtures::routing_config(8));
    let ledger = pool.ledger();

    let acme = tenant("acme");
    let _ = router.cache().resolve(&acme).await;
    let entry = router.cache().peek(&acme).expect("suspended entry is cached");
    assert_suspended(&router.schema_router().bind(entry).await);

    let globex = tenant("globex");
    let _ = router.cache().resolve(&globex).await;
    let entry = router.cache().peek(&globex).expect("deleted entry is cached");
    assert_deleted(&router.schema_router().bind(entry).await);

    assert_eq!(ledger.acquired(), 0);
}

// ============================================================================
// FAILURES
// ============================================================================

#[tokio::test]
async fn test_failed_schema_assertion_discards_connection() {
    let (_directory, pool, router) = standard_router();
    let ledger = pool.ledger();
    pool.fail_search_path(true);

    let result = router.resolve_and_bind(&tenant("acme")).await;
    assert_unavailable(&result);
    assert_eq!(ledger.acquired(), 1);
    assert_eq!(ledger.discarded(), 1);
    assert_eq!(ledger.released(), 0);
    assert_no_outstanding_connections(&ledger);

    // The entry stays cached; only the connection was bad.
    pool.fail_search_path(false);
    router
        .resolve_and_bind(&tenant("acme"))
        .await
        .expect("bind should succeed");
    assert_eq!(router.cache().stats().loads, 1);
}

#[tokio::test]
async fn test_exhausted_pool_is_unavailable() {
    let (_directory, pool, router) = standard_router();
    pool.set_exhausted(true);

    let result = router.resolve_and_bind(&tenant("acme")).await;
    assert_unavailable(&result);
    let err = result.expect_err("bind should fail");
    assert_eq!(err.status_code(), 503);
    assert_eq!(err.tenant(), "acme");
}

// ============================================================================
// HOSTS AND INVALIDATION
// ============================================================================

#[tokio::test]
async fn test_resolve_and_bind_from_host_header() {
    let (_directory, pool, router) = standard_router();

    let session = router
        .resolve_and_bind_host("Globex.example.com:8000")
        .await
        .expect("bind should succeed");
    assert_eq!(session.schema().as_str(), "tenant_globex");
    drop(session);

    let result = router.resolve_and_bind_host("example.com").await;
    assert_not_found(&result);
    assert_eq!(pool.ledger().acquired(), 1);
}

#[tokio::test]
async fn test_invalidate_reroutes_renamed_schema() {
    let (directory, _pool, router) = standard_router();
    let acme = tenant("acme");

    let before = router.resolve_and_bind(&acme).await.expect("bind should succeed");
    assert_eq!(before.schema().as_str(), "tenant_acme");

    let mut renamed = fixtures::acme();
    renamed.schema_name = schema("tenant_acme_v2");
    renamed.revision = Revision::new(6);
    directory.put(renamed);
    assert!(router.invalidate(&acme));

    let after = router.resolve_and_bind(&acme).await.expect("bind should succeed");
    assert_eq!(after.schema().as_str(), "tenant_acme_v2");
    // A session bound earlier keeps the schema it was bound to.
    assert_eq!(before.schema().as_str(), "tenant_acme");
}
