//! Tenantry Storage - Tenant Directory Port and Resolution Cache
//!
//! Defines the read-only directory abstraction the cache loads from, plus the
//! in-memory cache that sits on every request's critical path. The PostgreSQL
//! directory lives in tenantry-router.

pub mod cache;
pub mod directory;

pub use cache::{
    CacheEntry, CacheStats, Invalidation, InvalidationChannel, InvalidationEvent, SingleFlight,
    TenantResolutionCache,
};
pub use directory::{InMemoryTenantDirectory, TenantDirectory};
