//! Query lifecycle states and the public result view.

use crate::error::RuntimeFailure;
use crate::id::{OwnerId, QueryId};
use crate::item::ItemValue;
use crate::mode::RunMode;
use crate::Time;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle state of a query instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryStatus {
    /// Accepted, not stepped yet
    Created,
    /// Stepped at least once
    Running,
    /// Terminal
    Finished(QueryOutcome),
}

impl QueryStatus {
    /// Whether the instance reached a terminal state.
    pub fn is_finished(self) -> bool {
        matches!(self, QueryStatus::Finished(_))
    }

    /// Terminal outcome, if any.
    pub fn outcome(self) -> Option<QueryOutcome> {
        match self {
            QueryStatus::Finished(outcome) => Some(outcome),
            _ => None,
        }
    }
}

/// How a query ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryOutcome {
    /// At least one item survived
    Success,
    /// Runtime failure
    Failed(RuntimeFailure),
    /// Cancelled by the caller or by context teardown
    Aborted,
}

impl std::fmt::Display for QueryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryOutcome::Success => write!(f, "success"),
            QueryOutcome::Failed(reason) => write!(f, "failed ({})", reason),
            QueryOutcome::Aborted => write!(f, "aborted"),
        }
    }
}

/// A result item with its final score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    /// Raw value
    pub value: ItemValue,

    /// Accumulated score
    pub score: f32,
}

/// Time spent on one option.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionTiming {
    /// Generator name
    pub generator: String,

    /// Time spent generating
    pub generation: Duration,

    /// Time spent per test, in execution order
    pub tests: Vec<Duration>,

    /// Items generated
    pub item_count: usize,
}

/// Execution counters of a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    /// Time spent inside step calls
    pub total_time: Duration,

    /// Number of step calls
    pub step_count: usize,

    /// Whether the slow-query warning was already logged
    pub time_warning_logged: bool,

    /// Per-option breakdown, for options that were started
    pub options: Vec<OptionTiming>,
}

impl ExecutionStats {
    /// Human-readable breakdown for diagnostics.
    pub fn describe(&self) -> String {
        let mut out = format!(
            "total {:.2}ms over {} steps",
            self.total_time.as_secs_f64() * 1000.0,
            self.step_count
        );
        for (index, option) in self.options.iter().enumerate() {
            out.push_str(&format!(
                "; option {} [{}] generate {:.2}ms ({} items)",
                index,
                option.generator,
                option.generation.as_secs_f64() * 1000.0,
                option.item_count
            ));
            for (test, time) in option.tests.iter().enumerate() {
                out.push_str(&format!(", test {} {:.2}ms", test, time.as_secs_f64() * 1000.0));
            }
        }
        out
    }
}

/// Public view of a query instance handed to finish callbacks and to
/// blocking callers.
///
/// Failed and aborted queries carry whatever valid items had been produced
/// so far, so a non-success outcome does not imply an empty item list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Query id
    pub query_id: QueryId,

    /// Definition name
    pub query_name: String,

    /// Run mode
    pub mode: RunMode,

    /// Requester
    pub owner: OwnerId,

    /// Lifecycle state when the view was taken
    pub status: QueryStatus,

    /// Option that produced the items, if any was started
    pub option_index: Option<usize>,

    /// Result items, best first for successful queries
    pub items: Vec<ScoredItem>,

    /// Execution counters
    pub stats: ExecutionStats,

    /// When the view was taken
    pub reported_at: Time,
}

impl QueryResult {
    /// Terminal outcome, `None` while still running.
    pub fn outcome(&self) -> Option<QueryOutcome> {
        self.status.outcome()
    }

    /// Whether the query finished successfully.
    pub fn is_success(&self) -> bool {
        self.outcome() == Some(QueryOutcome::Success)
    }

    /// Best item, if any.
    pub fn best(&self) -> Option<&ScoredItem> {
        self.items.first()
    }
}
