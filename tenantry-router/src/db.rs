//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling using deadpool-postgres. Every pooled
//! connection is shared between tenants, so recycling resets `search_path`
//! before a connection is handed out again; the schema router then sets it
//! for the tenant on each checkout.

use deadpool_postgres::{
    Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts,
};
use std::time::Duration;
use tenantry_core::{ConfigError, SchemaName};
use tokio_postgres::NoTls;

use crate::directory::DEFAULT_DIRECTORY_TABLE;
use crate::error::DbSetupError;

/// Statement run when a connection is returned to the pool and recycled.
pub const RECYCLE_STATEMENT: &str = "RESET search_path";

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection timeout
    pub timeout: Duration,
    /// Schemas appended after the tenant schema in `search_path`
    pub shared_schemas: Vec<String>,
    /// Qualified name of the tenant directory table
    pub directory_table: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "tenantry".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
            shared_schemas: vec!["public".to_string()],
            directory_table: DEFAULT_DIRECTORY_TABLE.to_string(),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("TENANTRY_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("TENANTRY_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("TENANTRY_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("TENANTRY_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("TENANTRY_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("TENANTRY_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: std::env::var("TENANTRY_DB_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            shared_schemas: std::env::var("TENANTRY_SHARED_SCHEMAS")
                .map(|s| parse_schema_list(&s))
                .unwrap_or(defaults.shared_schemas),
            directory_table: std::env::var("TENANTRY_DIRECTORY_TABLE")
                .unwrap_or(defaults.directory_table),
        }
    }

    /// Validated shared schemas, in `search_path` order.
    pub fn shared_schema_names(&self) -> Result<Vec<SchemaName>, ConfigError> {
        self.shared_schemas
            .iter()
            .map(|raw| {
                SchemaName::parse(raw).map_err(|e| ConfigError::InvalidValue {
                    field: "shared_schemas".to_string(),
                    value: raw.clone(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    fn deadpool_config(&self) -> Config {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.connect_timeout = Some(self.timeout);

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Custom(RECYCLE_STATEMENT.to_string()),
        });

        let mut pool = PoolConfig::new(self.max_size.max(1));
        pool.timeouts = Timeouts {
            wait: Some(self.timeout),
            create: Some(self.timeout),
            recycle: Some(self.timeout),
        };
        cfg.pool = Some(pool);
        cfg
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> Result<Pool, DbSetupError> {
        let pool = self
            .deadpool_config()
            .create_pool(Some(Runtime::Tokio1), NoTls)?;

        tracing::info!(
            host = %self.host,
            port = self.port,
            dbname = %self.dbname,
            max_size = self.max_size,
            "Database pool created"
        );
        Ok(pool)
    }

    /// Driver configuration for dedicated connections (such as `LISTEN`).
    pub fn pg_config(&self) -> Result<tokio_postgres::Config, DbSetupError> {
        self.deadpool_config()
            .get_pg_config()
            .map_err(|e| DbSetupError::Config(e.to_string()))
    }
}

fn parse_schema_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_schema_list() {
        assert_eq!(
            parse_schema_list(" public, shared ,,"),
            vec!["public".to_string(), "shared".to_string()]
        );
        assert!(parse_schema_list("").is_empty());
    }

    #[test]
    fn test_shared_schema_validation() {
        let config = DbConfig {
            shared_schemas: vec!["public".to_string(), "bad schema".to_string()],
            ..Default::default()
        };
        let err = config
            .shared_schema_names()
            .expect_err("invalid schema rejected");
        assert!(matches!(err, ConfigError::InvalidValue { ref value, .. } if value == "bad schema"));

        let names = DbConfig::default()
            .shared_schema_names()
            .expect("defaults are valid");
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].as_str(), "public");
    }

    #[test]
    fn test_pg_config_carries_settings() {
        let config = DbConfig {
            host: "db.internal".to_string(),
            port: 6543,
            dbname: "tenants".to_string(),
            ..Default::default()
        };
        let pg = config.pg_config().expect("valid pg config");
        assert_eq!(pg.get_ports(), &[6543]);
        assert_eq!(pg.get_dbname(), Some("tenants"));
    }

    #[test]
    fn test_recycling_resets_search_path() {
        let manager = DbConfig::default()
            .deadpool_config()
            .manager
            .expect("manager config set");
        assert!(matches!(
            manager.recycling_method,
            RecyclingMethod::Custom(ref sql) if sql == "RESET search_path"
        ));
    }

    #[tokio::test]
    async fn test_create_pool_is_lazy() {
        // No connection is opened until the first checkout.
        let pool = DbConfig::default().create_pool().expect("pool builds");
        assert_eq!(pool.status().max_size, 16);
        assert_eq!(pool.status().size, 0);
    }
}
