//! Tenant directory entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::IdentityError;
use crate::{Revision, SchemaName, TenantId};

/// Lifecycle status of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    /// Tenant is routable.
    Active,
    /// Tenant exists but must not be served (includes "inactive").
    Suspended,
    /// Tenant has been soft- or hard-deleted.
    Deleted,
}

impl TenantStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
            TenantStatus::Deleted => "deleted",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, IdentityError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(TenantStatus::Active),
            "suspended" | "inactive" => Ok(TenantStatus::Suspended),
            "deleted" => Ok(TenantStatus::Deleted),
            _ => Err(IdentityError::UnknownStatus {
                value: s.to_string(),
            }),
        }
    }

    /// Derive status from a directory row. A set `deleted_at` always wins
    /// over the status column.
    pub fn from_row(status: &str, deleted: bool) -> Result<Self, IdentityError> {
        if deleted {
            return Ok(TenantStatus::Deleted);
        }
        Self::from_db_str(status)
    }

    pub fn is_routable(&self) -> bool {
        matches!(self, TenantStatus::Active)
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

impl FromStr for TenantStatus {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Authoritative tenant row as returned by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub tenant_id: TenantId,
    pub schema_name: SchemaName,
    pub status: TenantStatus,
    pub revision: Revision,
}

impl TenantRecord {
    pub fn new(
        tenant_id: TenantId,
        schema_name: SchemaName,
        status: TenantStatus,
        revision: Revision,
    ) -> Self {
        Self {
            tenant_id,
            schema_name,
            status,
            revision,
        }
    }

    /// Copy of this record at a later revision with a different status.
    pub fn with_status(&self, status: TenantStatus, revision: Revision) -> Self {
        Self {
            status,
            revision,
            ..self.clone()
        }
    }
}
