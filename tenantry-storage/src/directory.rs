//! Tenant directory port.
//!
//! The directory is the authoritative store of tenant metadata. The cache
//! only ever reads from it; tenant lifecycle changes are committed elsewhere
//! and announced through invalidation.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tenantry_core::{DirectoryResult, Revision, TenantId, TenantRecord, TenantStatus};

/// Read-only lookup of tenant records.
///
/// `Ok(None)` means the tenant does not exist. Errors are reserved for
/// failures of the store itself and are treated as transient by callers.
#[async_trait]
pub trait TenantDirectory: Send + Sync + 'static {
    /// Fetch the current record for a tenant.
    async fn fetch_tenant(&self, tenant: &TenantId) -> DirectoryResult<Option<TenantRecord>>;
}

#[async_trait]
impl<D: TenantDirectory + ?Sized> TenantDirectory for Arc<D> {
    async fn fetch_tenant(&self, tenant: &TenantId) -> DirectoryResult<Option<TenantRecord>> {
        (**self).fetch_tenant(tenant).await
    }
}

// ============================================================================
// IN-MEMORY DIRECTORY
// ============================================================================

/// Directory backed by a map, for embedding and tests.
///
/// Mutators bump the record's revision the way the database trigger does, so
/// callers get realistic revision sequences without tracking them by hand.
#[derive(Debug, Default)]
pub struct InMemoryTenantDirectory {
    records: RwLock<HashMap<TenantId, TenantRecord>>,
}

impl InMemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory pre-populated with records.
    pub fn with_records(records: impl IntoIterator<Item = TenantRecord>) -> Self {
        let directory = Self::new();
        for record in records {
            directory.put(record);
        }
        directory
    }

    /// Insert or replace a record as given.
    pub fn put(&self, record: TenantRecord) {
        self.records.write().insert(record.tenant_id.clone(), record);
    }

    /// Change a tenant's status, bumping its revision.
    ///
    /// Returns the new revision, or `None` if the tenant is unknown.
    pub fn set_status(&self, tenant: &TenantId, status: TenantStatus) -> Option<Revision> {
        let mut records = self.records.write();
        let record = records.get_mut(tenant)?;
        record.status = status;
        record.revision = Revision::new(record.revision.get() + 1);
        Some(record.revision)
    }

    /// Remove a tenant entirely (hard delete).
    pub fn remove(&self, tenant: &TenantId) -> Option<TenantRecord> {
        self.records.write().remove(tenant)
    }

    pub fn get(&self, tenant: &TenantId) -> Option<TenantRecord> {
        self.records.read().get(tenant).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl TenantDirectory for InMemoryTenantDirectory {
    async fn fetch_tenant(&self, tenant: &TenantId) -> DirectoryResult<Option<TenantRecord>> {
        Ok(self.get(tenant))
    }
}
