//! Per-key deduplication of in-flight loads.
//!
//! The first caller for a key spawns the load as its own task and registers
//! a shared handle to it; later callers clone the handle and await the same
//! result. Because the load runs on its own task it finishes even when every
//! caller that was waiting on it has been cancelled.
//!
//! Slots are removed with [`SingleFlight::complete`], which only removes the
//! flight it was given. A flight that was detached and replaced is never torn
//! down by its predecessor.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Identifier distinguishing successive flights for the same key.
pub type FlightId = u64;

/// The spawned load task panicked or was cancelled by the runtime.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("load task aborted: {reason}")]
pub struct FlightAborted {
    pub reason: String,
}

type FlightFuture<V> = Shared<BoxFuture<'static, Result<V, FlightAborted>>>;

struct Flight<V: Clone> {
    id: FlightId,
    future: FlightFuture<V>,
}

/// Handle returned to each caller joining a flight.
pub struct FlightHandle<V: Clone> {
    pub id: FlightId,
    /// True for the caller whose request spawned the load.
    pub leader: bool,
    future: FlightFuture<V>,
}

impl<V: Clone> FlightHandle<V> {
    /// Wait for the flight's result.
    pub async fn wait(self) -> Result<V, FlightAborted> {
        self.future.await
    }
}

/// Map of in-flight loads keyed by `K`.
pub struct SingleFlight<K, V: Clone> {
    flights: Mutex<HashMap<K, Flight<V>>>,
    next_id: AtomicU64,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Join the flight for `key`, or spawn `start(id)` as a new one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn join_or_start<F, Fut>(&self, key: &K, start: F) -> FlightHandle<V>
    where
        F: FnOnce(FlightId) -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let mut flights = self.flights.lock();
        if let Some(flight) = flights.get(key) {
            return FlightHandle {
                id: flight.id,
                leader: false,
                future: flight.future.clone(),
            };
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(start(id));
        let future = async move {
            task.await.map_err(|e| FlightAborted {
                reason: e.to_string(),
            })
        }
        .boxed()
        .shared();

        flights.insert(
            key.clone(),
            Flight {
                id,
                future: future.clone(),
            },
        );
        FlightHandle {
            id,
            leader: true,
            future,
        }
    }

    /// Remove the slot for `key` if it still belongs to flight `id`.
    pub fn complete(&self, key: &K, id: FlightId) -> bool {
        let mut flights = self.flights.lock();
        match flights.get(key) {
            Some(flight) if flight.id == id => {
                flights.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Forget the flight for `key` so the next caller starts a fresh one.
    /// Callers already attached keep waiting on the old flight.
    pub fn detach(&self, key: &K) -> bool {
        self.flights.lock().remove(key).is_some()
    }

    /// Forget every in-flight load.
    pub fn detach_all(&self) -> usize {
        let mut flights = self.flights.lock();
        let count = flights.len();
        flights.clear();
        count
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.flights.lock().contains_key(key)
    }

    /// Number of keys with a load in flight.
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }
}
