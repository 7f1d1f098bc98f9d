//! Identifiers for queries, requesters and owning contexts.

use serde::{Deserialize, Serialize};

/// Identifier of a query instance.
///
/// Assigned from a per-engine monotonic counter, so ids are unique for the
/// lifetime of the engine that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueryId(u64);

impl QueryId {
    /// Sentinel returned by entry points that could not produce an instance.
    pub const NONE: QueryId = QueryId(u64::MAX);

    /// Wrap a raw id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this is the [`QueryId::NONE`] sentinel.
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }
}

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            f.write_str("none")
        } else {
            write!(f, "q{}", self.0)
        }
    }
}

/// Opaque identity of whoever asked for a query (an agent, a controller...).
///
/// Used only for equality, e.g. to cancel every query an agent owns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl OwnerId {
    /// Create a new owner ID.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the world/session an engine belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub u64);

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx{}", self.0)
    }
}
