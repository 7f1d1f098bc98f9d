//! Cancellation and world teardown.

use crate::engine::{QueryEngine, QueryEntry};
use envquery_core::{OwnerId, QueryId};
use std::sync::Arc;
use tracing::{debug, info};

impl QueryEngine {
    /// Abort a scheduled query and notify its caller.
    ///
    /// Returns whether the id was scheduled. A query that already finished
    /// is removed without a second notification.
    pub fn abort_query(&self, id: QueryId) -> bool {
        let removed = {
            let mut running = self.running.lock();
            running
                .iter()
                .position(|entry| entry.id == id)
                .map(|index| running.remove(index))
        };
        let Some(entry) = removed else {
            return false;
        };

        if entry.abort() {
            info!(target: "envquery", "Aborted query {}", id);
            entry.notify();
        }
        true
    }

    /// Remove every scheduled query owned by `owner`.
    ///
    /// Unfinished queries are marked aborted; their callbacks run only when
    /// `notify` is set. Returns the number of queries removed.
    pub fn abort_all_by_owner(&self, owner: &OwnerId, notify: bool) -> usize {
        let removed: Vec<Arc<QueryEntry>> = {
            let mut running = self.running.lock();
            let (owned, kept): (Vec<_>, Vec<_>) = running.drain(..).partition(|entry| entry.owner == *owner);
            *running = kept;
            owned
        };

        for entry in &removed {
            if entry.abort() && notify {
                entry.notify();
            }
        }

        debug!(target: "envquery", "Removed {} queries owned by {}", removed.len(), owner);
        removed.len()
    }

    /// Abort and notify every scheduled query, then clear the scheduled
    /// set. Call when the world/session this engine serves goes away.
    /// Safe to call more than once. Returns the number of queries aborted.
    pub fn on_world_cleanup(&self) -> usize {
        let removed: Vec<Arc<QueryEntry>> = std::mem::take(&mut *self.running.lock());

        let mut aborted = 0;
        for entry in &removed {
            if entry.abort() {
                entry.notify();
                aborted += 1;
            }
        }

        if !removed.is_empty() {
            info!(
                target: "envquery",
                "World cleanup for {}: aborted {} of {} queries",
                self.context(), aborted, removed.len()
            );
        }
        aborted
    }
}
