//! Tenant resolution cache.
//!
//! A bounded, strict-LRU map from tenant identifier to [`CacheEntry`], loaded
//! through a per-tenant single-flight so concurrent misses cost one directory
//! round trip. Entries carry the directory revision they were loaded at, and
//! installs are checked against invalidation generations and revision floors
//! so the cache never moves a tenant backwards.
//!
//! # Example
//!
//! ```ignore
//! let cache = TenantResolutionCache::new(directory, RoutingConfig::from_env())?;
//! let entry = cache.resolve(&tenant).await?;
//!
//! // After committing a tenant change:
//! cache.invalidate(&tenant);
//! ```

pub mod entry;
pub mod invalidation;
pub mod resolver;
pub mod revision;
pub mod single_flight;
pub mod stats;

pub use entry::CacheEntry;
pub use invalidation::{
    Invalidation, InvalidationChannel, InvalidationEvent, DEFAULT_CHANNEL_CAPACITY,
};
pub use resolver::TenantResolutionCache;
pub use revision::{Generation, RevisionLedger};
pub use single_flight::{FlightAborted, FlightHandle, FlightId, SingleFlight};
pub use stats::CacheStats;
