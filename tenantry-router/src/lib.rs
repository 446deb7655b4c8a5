//! Tenantry Router - Schema-per-Tenant PostgreSQL Routing
//!
//! Resolves a request's tenant through the resolution cache and hands back a
//! pooled connection whose `search_path` is scoped to that tenant's schema.
//! Also provides the PostgreSQL tenant directory, the LISTEN/NOTIFY
//! invalidation listener and tracing setup.

pub mod db;
pub mod directory;
pub mod error;
pub mod listener;
pub mod router;
pub mod session;
pub mod telemetry;

pub use db::{DbConfig, RECYCLE_STATEMENT};
pub use directory::{DirectoryTable, PgTenantDirectory, DEFAULT_DIRECTORY_TABLE};
pub use error::{DbSetupError, SessionError};
pub use listener::{parse_payload, ListenerError, PgInvalidationListener, DEFAULT_NOTIFY_CHANNEL};
pub use router::{SchemaRouter, TenantRouter};
pub use session::{search_path_statement, ConnectionSource, SchemaConnection, TenantSession};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig, TelemetryError};
