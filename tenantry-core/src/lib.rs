//! Tenantry Core - Tenant Routing Types
//!
//! Pure data structures shared by the cache and the PostgreSQL router:
//! validated identifiers, directory records, the error taxonomy and
//! routing configuration. No I/O lives here.

pub mod config;
pub mod entities;
pub mod error;
pub mod host;
pub mod identity;

pub use config::RoutingConfig;
pub use entities::{TenantRecord, TenantStatus};
pub use error::{
    ConfigError, DirectoryError, DirectoryResult, IdentityError, RoutingError, RoutingResult,
};
pub use host::tenant_from_host;
pub use identity::{Revision, SchemaName, TenantId, MAX_SCHEMA_NAME_LEN, MAX_TENANT_ID_LEN};
