//! Registry of queries running outside the tick loop.
//!
//! Blocking queries never enter the running set, but their generators and
//! tests may still look up named parameters by query id. The registry holds
//! non-owning handles to them; a handle whose query has been dropped simply
//! stops resolving.

use crate::engine::QueryEntry;
use envquery_core::QueryId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Outcome of an id lookup.
#[derive(Debug)]
pub(crate) enum ExternalLookup {
    /// Id not registered
    Unknown,
    /// Registered but the query is gone
    Expired,
    /// Registered and alive
    Live(Arc<QueryEntry>),
}

/// Non-owning id to query map.
#[derive(Default)]
pub struct ExternalQueryRegistry {
    entries: Mutex<HashMap<QueryId, Weak<QueryEntry>>>,
}

impl ExternalQueryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `entry` until the returned guard is dropped.
    pub(crate) fn register(&self, entry: &Arc<QueryEntry>) -> Registration<'_> {
        self.entries.lock().insert(entry.id, Arc::downgrade(entry));
        Registration {
            registry: self,
            id: entry.id,
        }
    }

    /// Remove `id`. Returns whether it was registered.
    pub fn unregister(&self, id: QueryId) -> bool {
        self.entries.lock().remove(&id).is_some()
    }

    /// Whether `id` is registered, alive or not.
    pub fn contains(&self, id: QueryId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    /// Number of registered ids.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub(crate) fn lookup(&self, id: QueryId) -> ExternalLookup {
        match self.entries.lock().get(&id) {
            None => ExternalLookup::Unknown,
            Some(weak) => weak
                .upgrade()
                .map_or(ExternalLookup::Expired, ExternalLookup::Live),
        }
    }
}

/// Keeps a query registered; unregisters on drop.
#[must_use = "the query is unregistered when the guard is dropped"]
pub(crate) struct Registration<'a> {
    registry: &'a ExternalQueryRegistry,
    id: QueryId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}
