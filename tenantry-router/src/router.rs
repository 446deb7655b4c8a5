//! Request routing: tenant resolution followed by schema binding.

use deadpool_postgres::Pool;
use std::sync::Arc;
use tenantry_core::{
    tenant_from_host, RoutingConfig, RoutingError, RoutingResult, SchemaName, TenantId,
};
use tenantry_storage::{CacheEntry, TenantDirectory, TenantResolutionCache};

use crate::db::DbConfig;
use crate::directory::PgTenantDirectory;
use crate::error::DbSetupError;
use crate::session::{search_path_value, ConnectionSource, SchemaConnection, TenantSession};

// ============================================================================
// SCHEMA ROUTER
// ============================================================================

/// Hands out connections scoped to a resolved tenant's schema.
pub struct SchemaRouter<P> {
    pool: P,
    shared_schemas: Vec<SchemaName>,
}

impl<P: ConnectionSource> SchemaRouter<P> {
    pub fn new(pool: P) -> Self {
        Self {
            pool,
            shared_schemas: Vec::new(),
        }
    }

    /// Append shared schemas (such as `public`) after the tenant schema in
    /// every session's `search_path`.
    pub fn with_shared_schemas(mut self, shared: Vec<SchemaName>) -> Self {
        self.shared_schemas = shared;
        self
    }

    pub fn shared_schemas(&self) -> &[SchemaName] {
        &self.shared_schemas
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Check out a connection and bind it to `entry`'s schema.
    ///
    /// Non-active entries are rejected before the pool is touched. If the
    /// schema cannot be asserted the connection is discarded and no session
    /// is returned.
    pub async fn bind(
        &self,
        entry: Arc<CacheEntry>,
    ) -> RoutingResult<TenantSession<P::Connection>> {
        entry.ensure_routable()?;

        let mut connection = self
            .pool
            .acquire()
            .await
            .map_err(|e| e.into_routing(&entry.tenant_id))?;

        let search_path = search_path_value(&entry.schema_name, &self.shared_schemas);
        let statement = format!("SET search_path TO {}", search_path);
        if let Err(e) = connection.batch_execute(&statement).await {
            tracing::warn!(
                tenant = %entry.tenant_id,
                schema = %entry.schema_name,
                error = %e,
                "Failed to assert tenant schema, discarding connection"
            );
            connection.discard();
            return Err(e.into_routing(&entry.tenant_id));
        }

        Ok(TenantSession::new(connection, entry, search_path))
    }
}

// ============================================================================
// TENANT ROUTER
// ============================================================================

/// Entry point for request handling: resolves a tenant and binds a session.
pub struct TenantRouter<D, P> {
    cache: TenantResolutionCache<D>,
    schemas: SchemaRouter<P>,
}

impl<D: TenantDirectory, P: ConnectionSource> TenantRouter<D, P> {
    pub fn new(cache: TenantResolutionCache<D>, schemas: SchemaRouter<P>) -> Self {
        Self { cache, schemas }
    }

    /// Resolve `tenant` and return a session bound to its schema.
    pub async fn resolve_and_bind(
        &self,
        tenant: &TenantId,
    ) -> RoutingResult<TenantSession<P::Connection>> {
        let entry = self.cache.resolve(tenant).await.inspect_err(|e| {
            if e.is_transient() {
                tracing::warn!(tenant = %tenant, error = %e, "Tenant resolution unavailable");
            } else {
                tracing::debug!(tenant = %tenant, code = e.code(), "Tenant rejected");
            }
        })?;
        self.schemas.bind(entry).await
    }

    /// Extract the tenant from a `Host` header value, then resolve and bind.
    ///
    /// A host without a tenant subdomain is reported as `NotFound`.
    pub async fn resolve_and_bind_host(
        &self,
        host: &str,
    ) -> RoutingResult<TenantSession<P::Connection>> {
        let tenant = tenant_from_host(host).ok_or_else(|| {
            tracing::debug!(host = %host, "No tenant subdomain in host");
            RoutingError::NotFound {
                tenant: host.to_string(),
            }
        })?;
        self.resolve_and_bind(&tenant).await
    }

    /// Forward an invalidation to the cache.
    pub fn invalidate(&self, tenant: &TenantId) -> bool {
        self.cache.invalidate(tenant)
    }

    pub fn cache(&self) -> &TenantResolutionCache<D> {
        &self.cache
    }

    pub fn schema_router(&self) -> &SchemaRouter<P> {
        &self.schemas
    }
}

impl TenantRouter<PgTenantDirectory, Pool> {
    /// Build a router over one PostgreSQL pool shared by the directory and
    /// tenant sessions.
    pub fn from_config(db: &DbConfig, routing: RoutingConfig) -> Result<Self, DbSetupError> {
        let shared = db.shared_schema_names()?;
        let pool = db.create_pool()?;
        let directory = PgTenantDirectory::from_config(pool.clone(), db)?;
        let cache = TenantResolutionCache::new(directory, routing)?;
        let schemas = SchemaRouter::new(pool).with_shared_schemas(shared);

        tracing::info!(
            capacity = cache.capacity(),
            shared_schemas = schemas.shared_schemas().len(),
            "Tenant router ready"
        );
        Ok(Self::new(cache, schemas))
    }
}
