//! Tenant-scoped database sessions.
//!
//! A [`TenantSession`] owns one pooled connection whose `search_path` was set
//! to a single tenant's schema at checkout. The schema cannot be changed
//! through the session, and the connection goes back to the pool when the
//! session is dropped.

use async_trait::async_trait;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tenantry_core::{Revision, SchemaName, TenantId};
use tenantry_storage::CacheEntry;

use crate::error::SessionError;

// ============================================================================
// CONNECTION PORTS
// ============================================================================

/// A pooled connection the router can scope to a schema.
#[async_trait]
pub trait SchemaConnection: Send + Sized + 'static {
    /// Run one or more statements that return no rows.
    async fn batch_execute(&mut self, sql: &str) -> Result<(), SessionError>;

    /// Drop a connection that failed mid-setup so it is not reused.
    ///
    /// The default just drops it, which hands it back to the pool.
    fn discard(self) {
        drop(self);
    }
}

/// Source of pooled connections.
#[async_trait]
pub trait ConnectionSource: Send + Sync + 'static {
    type Connection: SchemaConnection;

    /// Check a connection out of the pool.
    async fn acquire(&self) -> Result<Self::Connection, SessionError>;
}

#[async_trait]
impl SchemaConnection for deadpool_postgres::Object {
    async fn batch_execute(&mut self, sql: &str) -> Result<(), SessionError> {
        let client: &tokio_postgres::Client = self;
        client.batch_execute(sql).await?;
        Ok(())
    }

    fn discard(self) {
        // Detach from the pool; the client is closed when dropped.
        let _client = deadpool_postgres::Object::take(self);
    }
}

#[async_trait]
impl ConnectionSource for deadpool_postgres::Pool {
    type Connection = deadpool_postgres::Object;

    async fn acquire(&self) -> Result<Self::Connection, SessionError> {
        Ok(self.get().await?)
    }
}

#[async_trait]
impl<S: ConnectionSource> ConnectionSource for Arc<S> {
    type Connection = S::Connection;

    async fn acquire(&self) -> Result<Self::Connection, SessionError> {
        (**self).acquire().await
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// A connection bound to one tenant's schema for the duration of a request.
///
/// Dereferences to the underlying connection for queries. Only shared access
/// is exposed, but a `tokio_postgres::Client` runs statements through `&self`,
/// so nothing stops a caller from issuing its own `SET search_path`. Callers
/// must not change the search path mid-session. A changed path never leaks to
/// the next tenant: the pool runs `RESET search_path` on recycle and every
/// checkout sets the path again before the session is handed out.
pub struct TenantSession<C: SchemaConnection> {
    connection: C,
    entry: Arc<CacheEntry>,
    search_path: String,
}

impl<C: SchemaConnection> TenantSession<C> {
    pub(crate) fn new(connection: C, entry: Arc<CacheEntry>, search_path: String) -> Self {
        tracing::debug!(
            tenant = %entry.tenant_id,
            schema = %entry.schema_name,
            "Tenant session acquired"
        );
        Self {
            connection,
            entry,
            search_path,
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.entry.tenant_id
    }

    pub fn schema(&self) -> &SchemaName {
        &self.entry.schema_name
    }

    /// Directory revision the session was bound at.
    pub fn revision(&self) -> Revision {
        self.entry.revision
    }

    /// The cache entry the session was bound from.
    pub fn entry(&self) -> &CacheEntry {
        &self.entry
    }

    /// The `search_path` value asserted at checkout.
    pub fn search_path(&self) -> &str {
        &self.search_path
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }
}

impl<C: SchemaConnection> Deref for TenantSession<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl<C: SchemaConnection> fmt::Debug for TenantSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantSession")
            .field("tenant_id", &self.entry.tenant_id)
            .field("schema", &self.entry.schema_name)
            .field("revision", &self.entry.revision)
            .finish()
    }
}

impl<C: SchemaConnection> Drop for TenantSession<C> {
    fn drop(&mut self) {
        tracing::debug!(tenant = %self.entry.tenant_id, "Tenant session released");
    }
}

/// Build the `SET search_path` statement for a tenant schema followed by the
/// shared schemas. Identifiers are always quoted.
pub fn search_path_statement(schema: &SchemaName, shared: &[SchemaName]) -> String {
    format!("SET search_path TO {}", search_path_value(schema, shared))
}

pub(crate) fn search_path_value(schema: &SchemaName, shared: &[SchemaName]) -> String {
    std::iter::once(schema)
        .chain(shared.iter().filter(|s| *s != schema))
        .map(SchemaName::quoted)
        .collect::<Vec<_>>()
        .join(", ")
}
