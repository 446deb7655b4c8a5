//! Identity types for tenant routing.
//!
//! `TenantId` and `SchemaName` are validated newtypes: once constructed they
//! are guaranteed to satisfy the subdomain and PostgreSQL identifier rules, so
//! nothing downstream has to re-check them before building SQL.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::IdentityError;

/// Maximum length of a tenant identifier (one DNS label).
pub const MAX_TENANT_ID_LEN: usize = 63;

/// Maximum length of a PostgreSQL identifier (NAMEDATALEN - 1).
pub const MAX_SCHEMA_NAME_LEN: usize = 63;

static SCHEMA_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").expect("schema name pattern is valid")
});

// ============================================================================
// TENANT IDENTIFIER
// ============================================================================

/// Externally supplied tenant identifier (the tenant's subdomain or slug).
///
/// Identifiers are case-insensitive and stored lowercased, so `Acme` and
/// `acme` resolve to the same cache slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Parse and validate a tenant identifier.
    ///
    /// Accepts 1..=63 ASCII alphanumerics, `-` and `_`. A leading or trailing
    /// `-` is rejected.
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IdentityError::EmptyTenantId);
        }
        if trimmed.len() > MAX_TENANT_ID_LEN {
            return Err(IdentityError::TenantIdTooLong {
                len: trimmed.len(),
                max: MAX_TENANT_ID_LEN,
            });
        }
        if let Some(bad) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(IdentityError::InvalidTenantChar {
                value: trimmed.to_string(),
                found: bad,
            });
        }
        if trimmed.starts_with('-') || trimmed.ends_with('-') {
            return Err(IdentityError::TenantIdHyphenEdge {
                value: trimmed.to_string(),
            });
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// SCHEMA NAME
// ============================================================================

/// Physical PostgreSQL schema a tenant's data lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaName(String);

impl SchemaName {
    /// Parse and validate a schema name.
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        if raw.is_empty() {
            return Err(IdentityError::EmptySchemaName);
        }
        if raw.len() > MAX_SCHEMA_NAME_LEN {
            return Err(IdentityError::SchemaNameTooLong {
                len: raw.len(),
                max: MAX_SCHEMA_NAME_LEN,
            });
        }
        if !SCHEMA_NAME_RE.is_match(raw) {
            return Err(IdentityError::InvalidSchemaName {
                value: raw.to_string(),
            });
        }
        Ok(Self(raw.to_string()))
    }

    /// Get the raw (unquoted) schema name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Render as a quoted SQL identifier, safe to interpolate into statements
    /// that cannot take bind parameters (such as `SET search_path`).
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0.replace('"', "\"\""))
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SchemaName {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SchemaName {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SchemaName> for String {
    fn from(name: SchemaName) -> Self {
        name.0
    }
}

// ============================================================================
// REVISION
// ============================================================================

/// Monotonic revision counter assigned by the tenant directory.
///
/// Every committed change to a tenant record bumps its revision. Revisions
/// are compared to reject stale routing data.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(u64);

impl Revision {
    /// The revision before any change was recorded.
    pub const ZERO: Revision = Revision(0);

    /// Create a revision from its numeric value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Convert from a database `bigint`, rejecting negative values.
    pub fn from_db(value: i64) -> Result<Self, IdentityError> {
        u64::try_from(value)
            .map(Self)
            .map_err(|_| IdentityError::NegativeRevision { value })
    }

    /// Numeric value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Check if this revision is strictly newer than another.
    pub fn is_newer_than(self, other: Revision) -> bool {
        self.0 > other.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_id_normalizes_case_and_whitespace() {
        let id = TenantId::parse("  Acme ").expect("valid tenant id");
        assert_eq!(id.as_str(), "acme");
        assert_eq!(id, TenantId::parse("ACME").expect("valid tenant id"));
    }

    #[test]
    fn test_tenant_id_rejects_invalid_input() {
        assert_eq!(TenantId::parse(""), Err(IdentityError::EmptyTenantId));
        assert!(matches!(
            TenantId::parse("-acme"),
            Err(IdentityError::TenantIdHyphenEdge { .. })
        ));
        assert!(matches!(
            TenantId::parse("acme-"),
            Err(IdentityError::TenantIdHyphenEdge { .. })
        ));
        assert!(matches!(
            TenantId::parse("ac.me"),
            Err(IdentityError::InvalidTenantChar { found: '.', .. })
        ));
        assert!(matches!(
            TenantId::parse(&"a".repeat(64)),
            Err(IdentityError::TenantIdTooLong { len: 64, .. })
        ));
        assert!(TenantId::parse("globex_corp-2").is_ok());
    }

    #[test]
    fn test_tenant_id_serde_validates() {
        let id: TenantId = serde_json::from_str("\"Initech\"").expect("valid json id");
        assert_eq!(id.as_str(), "initech");
        assert!(serde_json::from_str::<TenantId>("\"bad id\"").is_err());
    }

    #[test]
    fn test_schema_name_validation() {
        assert!(SchemaName::parse("tenant_acme").is_ok());
        assert!(SchemaName::parse("_t$1").is_ok());
        assert!(SchemaName::parse("1tenant").is_err());
        assert!(SchemaName::parse("acme; DROP TABLE x").is_err());
        assert!(SchemaName::parse("").is_err());
        assert!(SchemaName::parse(&"s".repeat(64)).is_err());
    }

    #[test]
    fn test_schema_name_quoted() {
        let schema = SchemaName::parse("Tenant_Acme").expect("valid schema");
        assert_eq!(schema.quoted(), "\"Tenant_Acme\"");
    }

    #[test]
    fn test_revision_ordering() {
        let r5 = Revision::new(5);
        let r6 = Revision::new(6);
        assert!(r6.is_newer_than(r5));
        assert!(!r5.is_newer_than(r5));
        assert!(r5 < r6);
        assert_eq!(Revision::from_db(7), Ok(Revision::new(7)));
        assert!(Revision::from_db(-1).is_err());
    }
}
