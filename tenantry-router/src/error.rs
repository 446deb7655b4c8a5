//! Error handling for the PostgreSQL side of routing.
//!
//! Driver errors are logged in full here and replaced with short, generic
//! messages before they reach a `RoutingError`, so callers never see SQL or
//! connection details.

use tenantry_core::{ConfigError, DirectoryError, RoutingError, TenantId};
use thiserror::Error;

/// Failure acquiring or preparing a pooled connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Failed to acquire database connection")]
    Pool,

    #[error("Database operation failed: {0}")]
    Database(String),
}

impl SessionError {
    /// Convert into the routing error reported for `tenant`.
    pub fn into_routing(self, tenant: &TenantId) -> RoutingError {
        RoutingError::unavailable(tenant, self.to_string())
    }
}

/// Convert from tokio_postgres::Error to SessionError.
impl From<tokio_postgres::Error> for SessionError {
    fn from(err: tokio_postgres::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        SessionError::Database("statement failed".to_string())
    }
}

/// Convert from deadpool_postgres::PoolError to SessionError.
impl From<deadpool_postgres::PoolError> for SessionError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        tracing::error!("Connection pool error: {:?}", err);

        match err {
            deadpool_postgres::PoolError::Timeout(_) => SessionError::PoolExhausted,
            deadpool_postgres::PoolError::Closed => SessionError::PoolClosed,
            _ => SessionError::Pool,
        }
    }
}

/// Map a pool error raised during a directory lookup.
pub(crate) fn directory_pool_error(err: deadpool_postgres::PoolError) -> DirectoryError {
    DirectoryError::Connection {
        reason: SessionError::from(err).to_string(),
    }
}

/// Map a driver error raised during a directory lookup.
pub(crate) fn directory_query_error(err: tokio_postgres::Error) -> DirectoryError {
    tracing::error!("Tenant directory query error: {:?}", err);
    if err.is_closed() {
        DirectoryError::Connection {
            reason: "connection closed".to_string(),
        }
    } else {
        DirectoryError::Query {
            reason: "tenant lookup failed".to_string(),
        }
    }
}

/// Errors raised while building the pool and router from configuration.
#[derive(Debug, Error)]
pub enum DbSetupError {
    #[error("Invalid database configuration: {0}")]
    Config(String),

    #[error("Failed to create pool: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    #[error(transparent)]
    Routing(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_into_routing_is_transient() {
        let tenant = TenantId::parse("acme").expect("valid id");
        let err = SessionError::PoolExhausted.into_routing(&tenant);
        assert!(err.is_transient());
        assert_eq!(err.code(), "TENANT_DIRECTORY_UNAVAILABLE");
        assert!(err.to_string().contains("pool exhausted"));
    }

    #[test]
    fn test_pool_error_mapping() {
        let closed = SessionError::from(deadpool_postgres::PoolError::Closed);
        assert_eq!(closed, SessionError::PoolClosed);
        let no_runtime = SessionError::from(deadpool_postgres::PoolError::NoRuntimeSpecified);
        assert_eq!(no_runtime, SessionError::Pool);
    }
}
