//! Error types for tenant routing

use crate::TenantId;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while constructing identity types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Tenant identifier is empty")]
    EmptyTenantId,

    #[error("Tenant identifier too long: {len} characters (max {max})")]
    TenantIdTooLong { len: usize, max: usize },

    #[error("Tenant identifier {value:?} contains invalid character {found:?}")]
    InvalidTenantChar { value: String, found: char },

    #[error("Tenant identifier {value:?} must not start or end with '-'")]
    TenantIdHyphenEdge { value: String },

    #[error("Schema name is empty")]
    EmptySchemaName,

    #[error("Schema name too long: {len} bytes (max {max})")]
    SchemaNameTooLong { len: usize, max: usize },

    #[error("Invalid schema name: {value:?}")]
    InvalidSchemaName { value: String },

    #[error("Revision must be non-negative, got {value}")]
    NegativeRevision { value: i64 },

    #[error("Unknown tenant status: {value:?}")]
    UnknownStatus { value: String },
}

/// Errors reported by a tenant directory implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Directory lookup timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("Directory connection failed: {reason}")]
    Connection { reason: String },

    #[error("Directory query failed: {reason}")]
    Query { reason: String },

    #[error("Directory returned an invalid record: {reason}")]
    InvalidRecord { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Outcome of a failed tenant resolution or bind.
///
/// `Unavailable` is the only transient class; everything else describes the
/// tenant itself and will not change on retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("Tenant not found: {tenant}")]
    NotFound { tenant: String },

    #[error("Tenant suspended: {tenant}")]
    Suspended { tenant: String },

    #[error("Tenant deleted: {tenant}")]
    Deleted { tenant: String },

    #[error("Tenant directory unavailable for {tenant}: {reason}")]
    Unavailable { tenant: String, reason: String },
}

impl RoutingError {
    pub fn not_found(tenant: &TenantId) -> Self {
        Self::NotFound {
            tenant: tenant.to_string(),
        }
    }

    pub fn suspended(tenant: &TenantId) -> Self {
        Self::Suspended {
            tenant: tenant.to_string(),
        }
    }

    pub fn deleted(tenant: &TenantId) -> Self {
        Self::Deleted {
            tenant: tenant.to_string(),
        }
    }

    pub fn unavailable(tenant: &TenantId, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            tenant: tenant.to_string(),
            reason: reason.into(),
        }
    }

    /// Wrap a directory failure for the given tenant.
    pub fn from_directory(tenant: &TenantId, err: &DirectoryError) -> Self {
        Self::unavailable(tenant, err.to_string())
    }

    /// Whether a retry might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "TENANT_NOT_FOUND",
            Self::Suspended { .. } => "TENANT_SUSPENDED",
            Self::Deleted { .. } => "TENANT_DELETED",
            Self::Unavailable { .. } => "TENANT_DIRECTORY_UNAVAILABLE",
        }
    }

    /// HTTP status code the web layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Suspended { .. } => 403,
            Self::Deleted { .. } => 410,
            Self::Unavailable { .. } => 503,
        }
    }

    /// The tenant the error refers to.
    pub fn tenant(&self) -> &str {
        match self {
            Self::NotFound { tenant }
            | Self::Suspended { tenant }
            | Self::Deleted { tenant }
            | Self::Unavailable { tenant, .. } => tenant,
        }
    }
}

/// Result type alias for routing operations.
pub type RoutingResult<T> = Result<T, RoutingError>;

/// Result type alias for directory lookups.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

// =============================================================================
// TESTS
// =============================================================================
