//! Cached routing data.

use std::sync::Arc;
use std::time::Duration;
use tenantry_core::{
    Revision, RoutingError, RoutingResult, SchemaName, TenantId, TenantRecord, TenantStatus,
};
use tokio::time::Instant;

/// Resolved routing data for one tenant.
///
/// Entries are immutable and shared behind `Arc`; a refresh installs a new
/// entry rather than mutating the old one, so a session bound from an entry
/// keeps a consistent view for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub tenant_id: TenantId,
    pub schema_name: SchemaName,
    pub status: TenantStatus,
    pub revision: Revision,
    /// When this entry was loaded from the directory.
    pub loaded_at: Instant,
}

impl CacheEntry {
    pub fn from_record(record: TenantRecord, loaded_at: Instant) -> Self {
        Self {
            tenant_id: record.tenant_id,
            schema_name: record.schema_name,
            status: record.status,
            revision: record.revision,
            loaded_at,
        }
    }

    /// Age of this entry relative to `now`.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.loaded_at)
    }

    pub fn is_routable(&self) -> bool {
        self.status.is_routable()
    }

    /// Reject non-active entries with the matching routing error.
    pub fn ensure_routable(&self) -> RoutingResult<()> {
        match self.status {
            TenantStatus::Active => Ok(()),
            TenantStatus::Suspended => Err(RoutingError::suspended(&self.tenant_id)),
            TenantStatus::Deleted => Err(RoutingError::deleted(&self.tenant_id)),
        }
    }
}

/// What the cache holds for a key: a directory record or a not-found marker.
#[derive(Debug, Clone)]
pub(crate) enum Resident {
    Tenant(Arc<CacheEntry>),
    Missing { loaded_at: Instant },
}

impl Resident {
    pub(crate) fn loaded_at(&self) -> Instant {
        match self {
            Resident::Tenant(entry) => entry.loaded_at,
            Resident::Missing { loaded_at } => *loaded_at,
        }
    }

    pub(crate) fn revision(&self) -> Revision {
        match self {
            Resident::Tenant(entry) => entry.revision,
            Resident::Missing { .. } => Revision::ZERO,
        }
    }

    /// Only active entries get the full TTL; every rejection outcome is a
    /// negative entry.
    pub(crate) fn is_expired(
        &self,
        now: Instant,
        entry_ttl: Duration,
        negative_ttl: Duration,
    ) -> bool {
        let ttl = match self {
            Resident::Tenant(entry) if entry.is_routable() => entry_ttl,
            _ => negative_ttl,
        };
        now.saturating_duration_since(self.loaded_at()) >= ttl
    }

    /// The resolve outcome this resident stands for.
    pub(crate) fn outcome(&self, tenant: &TenantId) -> RoutingResult<Arc<CacheEntry>> {
        match self {
            Resident::Tenant(entry) => {
                entry.ensure_routable()?;
                Ok(Arc::clone(entry))
            }
            Resident::Missing { .. } => Err(RoutingError::not_found(tenant)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(status: TenantStatus) -> CacheEntry {
        CacheEntry::from_record(
            TenantRecord::new(
                TenantId::parse("acme").expect("valid id"),
                SchemaName::parse("tenant_acme").expect("valid schema"),
                status,
                Revision::new(5),
            ),
            Instant::now(),
        )
    }

    #[test]
    fn test_ensure_routable() {
        assert!(entry(TenantStatus::Active).ensure_routable().is_ok());
        assert!(matches!(
            entry(TenantStatus::Suspended).ensure_routable(),
            Err(RoutingError::Suspended { .. })
        ));
        assert!(matches!(
            entry(TenantStatus::Deleted).ensure_routable(),
            Err(RoutingError::Deleted { .. })
        ));
    }

    #[test]
    fn test_negative_entries_use_negative_ttl() {
        let ttl = Duration::from_secs(3600);
        let negative = Duration::from_secs(10);
        let active = Resident::Tenant(Arc::new(entry(TenantStatus::Active)));
        let suspended = Resident::Tenant(Arc::new(entry(TenantStatus::Suspended)));
        let later = active.loaded_at() + Duration::from_secs(60);

        assert!(!active.is_expired(later, ttl, negative));
        assert!(suspended.is_expired(later, ttl, negative));

        let missing = Resident::Missing {
            loaded_at: Instant::now(),
        };
        assert!(missing.is_expired(missing.loaded_at() + negative, ttl, negative));
    }

    #[test]
    fn test_missing_outcome_is_not_found() {
        let tenant = TenantId::parse("wayne").expect("valid id");
        let missing = Resident::Missing {
            loaded_at: Instant::now(),
        };
        assert!(matches!(
            missing.outcome(&tenant),
            Err(RoutingError::NotFound { .. })
        ));
        assert_eq!(missing.revision(), Revision::ZERO);
    }
}
