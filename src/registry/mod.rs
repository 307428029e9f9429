//! Downstream registry
//!
//! `Registry` is the set of downstream endpoints eligible to receive relayed
//! messages. It is a cheap-to-clone handle over shared state: the transport
//! adds and removes endpoints as clients come and go while the broadcaster
//! iterates.
//!
//! Concurrency notes:
//! - Mutation may race with a broadcast. `for_each` copies the membership
//!   under the lock and runs the callback after releasing it, so callbacks
//!   may freely call `add`/`remove`.
//! - The lock is a `std::sync::Mutex`; it is never held across an `.await`.

pub mod endpoint;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use endpoint::{Endpoint, EndpointId};

#[derive(Debug, Clone, Default)]
pub struct Registry {
    endpoints: Arc<Mutex<HashMap<EndpointId, Endpoint>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint. Re-adding an id replaces the previous entry.
    pub fn add(&self, endpoint: Endpoint) {
        self.lock().insert(endpoint.id.clone(), endpoint);
    }

    /// Remove an endpoint, returning whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Point-in-time copy of the membership.
    pub fn snapshot(&self) -> Vec<Endpoint> {
        self.lock().values().cloned().collect()
    }

    /// Run `f` for every endpoint present when the call started.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Endpoint),
    {
        for endpoint in self.snapshot() {
            f(&endpoint);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EndpointId, Endpoint>> {
        // The map stays consistent even if a holder panicked.
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
