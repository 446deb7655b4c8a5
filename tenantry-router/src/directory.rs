//! PostgreSQL tenant directory.
//!
//! Reads tenant rows from the shared directory table (by default
//! `shared.tenants`). Subdomains are stored lowercase, so the lookup is a
//! plain equality on the indexed `sub_domain` column.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use tenantry_core::{
    ConfigError, DirectoryError, DirectoryResult, Revision, SchemaName, TenantId, TenantRecord,
    TenantStatus,
};
use tenantry_storage::TenantDirectory;
use tokio_postgres::Row;

use crate::db::DbConfig;
use crate::error::{directory_pool_error, directory_query_error};

/// Default qualified name of the tenant directory table.
pub const DEFAULT_DIRECTORY_TABLE: &str = "shared.tenants";

/// A validated, quoted `schema.table` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryTable {
    schema: SchemaName,
    table: SchemaName,
}

impl DirectoryTable {
    /// Parse a `schema.table` name. Both parts must be plain identifiers.
    pub fn parse(qualified: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidValue {
            field: "directory_table".to_string(),
            value: qualified.to_string(),
            reason,
        };
        let (schema, table) = qualified
            .split_once('.')
            .ok_or_else(|| invalid("expected schema.table".to_string()))?;
        Ok(Self {
            schema: SchemaName::parse(schema).map_err(|e| invalid(e.to_string()))?,
            table: SchemaName::parse(table).map_err(|e| invalid(e.to_string()))?,
        })
    }

    /// Quoted SQL reference.
    pub fn quoted(&self) -> String {
        format!("{}.{}", self.schema.quoted(), self.table.quoted())
    }
}

/// Tenant directory backed by a PostgreSQL table.
pub struct PgTenantDirectory {
    pool: Pool,
    query: String,
}

impl PgTenantDirectory {
    pub fn new(pool: Pool, table: &DirectoryTable) -> Self {
        Self {
            pool,
            query: lookup_query(table),
        }
    }

    /// Directory reading from the table named in `config`.
    pub fn from_config(pool: Pool, config: &DbConfig) -> Result<Self, ConfigError> {
        let table = DirectoryTable::parse(&config.directory_table)?;
        Ok(Self::new(pool, &table))
    }

    /// The lookup statement issued for every directory fetch.
    pub fn query(&self) -> &str {
        &self.query
    }
}

fn lookup_query(table: &DirectoryTable) -> String {
    format!(
        "SELECT sub_domain, tenant_schema_name, status, deleted_at IS NOT NULL AS deleted, revision \
         FROM {} WHERE sub_domain = $1",
        table.quoted()
    )
}

#[async_trait]
impl TenantDirectory for PgTenantDirectory {
    async fn fetch_tenant(&self, tenant: &TenantId) -> DirectoryResult<Option<TenantRecord>> {
        let conn = self.pool.get().await.map_err(directory_pool_error)?;
        let statement = conn
            .prepare_cached(&self.query)
            .await
            .map_err(directory_query_error)?;
        let row = conn
            .query_opt(&statement, &[&tenant.as_str()])
            .await
            .map_err(directory_query_error)?;

        match row {
            Some(row) => {
                let record = record_from_row(&row)?;
                tracing::debug!(
                    tenant = %tenant,
                    schema = %record.schema_name,
                    status = %record.status,
                    revision = record.revision.get(),
                    "Loaded tenant from directory"
                );
                Ok(Some(record))
            }
            None => {
                tracing::debug!(tenant = %tenant, "Tenant not in directory");
                Ok(None)
            }
        }
    }
}

fn record_from_row(row: &Row) -> DirectoryResult<TenantRecord> {
    let sub_domain: String = column(row, "sub_domain")?;
    let schema_name: String = column(row, "tenant_schema_name")?;
    let status: String = column(row, "status")?;
    let deleted: bool = column(row, "deleted")?;
    let revision: i64 = column(row, "revision")?;

    parse_record(&sub_domain, &schema_name, &status, deleted, revision)
}

fn column<'a, T: tokio_postgres::types::FromSql<'a>>(
    row: &'a Row,
    name: &str,
) -> DirectoryResult<T> {
    row.try_get(name).map_err(|e| DirectoryError::InvalidRecord {
        reason: format!("column {}: {}", name, e),
    })
}

/// Validate raw column values into a record.
pub(crate) fn parse_record(
    sub_domain: &str,
    schema_name: &str,
    status: &str,
    deleted: bool,
    revision: i64,
) -> DirectoryResult<TenantRecord> {
    let invalid = |e: tenantry_core::IdentityError| DirectoryError::InvalidRecord {
        reason: e.to_string(),
    };
    Ok(TenantRecord::new(
        TenantId::parse(sub_domain).map_err(invalid)?,
        SchemaName::parse(schema_name).map_err(invalid)?,
        TenantStatus::from_row(status, deleted).map_err(invalid)?,
        Revision::from_db(revision).map_err(invalid)?,
    ))
}
