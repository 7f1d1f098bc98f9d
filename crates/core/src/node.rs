//! Generator and test contract.
//!
//! Query authors implement [`QueryGenerator`] and [`QueryTest`]. The engine
//! only ever calls their incremental step function and reads their static
//! metadata; how items are produced or scored is entirely up to them.
//!
//! Each running query owns private copies of its generator and tests (see
//! `box_clone`), so implementations may keep mutable working state between
//! steps, e.g. a cursor into the item list.

use crate::id::QueryId;
use crate::item::{ItemStore, ItemType, ItemValue, QueryItem};
use crate::mode::{RunMode, TestCost, TestPurpose};
use crate::request::NamedParams;
use crate::time::TimeSource;
use std::time::Duration;

/// Outcome of one step call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// More work remains; call again.
    Continue,
    /// This generator/test is done with the current option.
    Done,
}

/// Lookup of named parameters by query id.
///
/// Implemented by the engine. Reads never block on the stepping of the
/// query being looked up, so a test may call this for its own query.
pub trait NamedParamLookup: Send + Sync {
    /// Value of `name` on query `query`, or `0.0` when either is unknown.
    fn find_named_param(&self, query: QueryId, name: &str) -> f32;
}

/// Lookup that knows no queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoParamLookup;

impl NamedParamLookup for NoParamLookup {
    fn find_named_param(&self, _query: QueryId, _name: &str) -> f32 {
        0.0
    }
}

/// Everything a generator or test may touch during one step.
pub struct StepContext<'a> {
    query_id: QueryId,
    mode: RunMode,
    params: &'a NamedParams,
    lookup: &'a dyn NamedParamLookup,
    items: &'a mut ItemStore,
    clock: &'a dyn TimeSource,
    step_deadline: Option<Duration>,
}

impl<'a> StepContext<'a> {
    /// Build a context for one step call.
    ///
    /// `step_deadline` is an absolute time on `clock`; `None` means the step
    /// may run to completion.
    pub fn new(
        query_id: QueryId,
        mode: RunMode,
        params: &'a NamedParams,
        lookup: &'a dyn NamedParamLookup,
        items: &'a mut ItemStore,
        clock: &'a dyn TimeSource,
        step_deadline: Option<Duration>,
    ) -> Self {
        Self {
            query_id,
            mode,
            params,
            lookup,
            items,
            clock,
            step_deadline,
        }
    }

    /// Id of the query being executed.
    pub fn query_id(&self) -> QueryId {
        self.query_id
    }

    /// Run mode of the query being executed.
    pub fn run_mode(&self) -> RunMode {
        self.mode
    }

    /// Named parameter of this query, `0.0` if unset.
    pub fn named_param(&self, name: &str) -> f32 {
        self.params.get(name).copied().unwrap_or(0.0)
    }

    /// Named parameter of any live query, through the engine.
    pub fn find_named_param(&self, query: QueryId, name: &str) -> f32 {
        self.lookup.find_named_param(query, name)
    }

    /// Append a generated item.
    pub fn add_item(&mut self, value: ItemValue) -> usize {
        self.items.push(value)
    }

    /// All items of the current option.
    pub fn items(&self) -> &[QueryItem] {
        self.items.items()
    }

    /// Indices of items that have not been discarded.
    pub fn valid_indices(&self) -> Vec<usize> {
        self.items.iter_valid().map(|(index, _)| index).collect()
    }

    /// Mark an item as failing a condition.
    pub fn discard(&mut self, index: usize) {
        self.items.discard(index);
    }

    /// Add to an item's score.
    pub fn add_score(&mut self, index: usize, value: f32) {
        self.items.add_score(index, value);
    }

    /// Remaining time for this step, `None` if unbounded.
    pub fn time_left(&self) -> Option<Duration> {
        self.step_deadline
            .map(|deadline| deadline.saturating_sub(self.clock.now()))
    }

    /// Whether the step's time hint has been used up.
    ///
    /// Long-running generators and tests should check this between work
    /// units and return [`StepStatus::Continue`] when it is set.
    pub fn is_out_of_time(&self) -> bool {
        self.time_left().is_some_and(|left| left.is_zero())
    }
}

/// Produces candidate items for an option.
///
/// Steps run while the engine holds the query's own lock. From inside a
/// step, only read the engine through [`StepContext`]; calling back into
/// the engine about the same query (status, abort) deadlocks.
pub trait QueryGenerator: Send + Sync {
    /// Display name, used in diagnostics.
    fn name(&self) -> &str;

    /// Type of the items produced, `None` if misconfigured.
    fn item_type(&self) -> Option<ItemType>;

    /// Whether the compiler may reorder this option's tests.
    fn auto_sort_tests(&self) -> bool {
        true
    }

    /// Produce items. Called until it returns [`StepStatus::Done`].
    fn generate(&mut self, ctx: &mut StepContext<'_>) -> StepStatus;

    /// Fresh copy for a new query instance.
    fn box_clone(&self) -> Box<dyn QueryGenerator>;
}

/// Scores or filters the items of an option.
///
/// The same re-entrancy rule as [`QueryGenerator`] applies: named-param
/// lookups through [`StepContext`] are safe, engine calls about the running
/// query are not.
pub trait QueryTest: Send + Sync {
    /// Display name, used in diagnostics.
    fn name(&self) -> &str;

    /// Declared cost class.
    fn cost(&self) -> TestCost;

    /// Whether the test filters, scores, or both.
    fn purpose(&self) -> TestPurpose;

    /// Whether the test can evaluate items of `item_type`.
    fn supports_item(&self, item_type: &ItemType) -> bool;

    /// Evaluate items. Called until it returns [`StepStatus::Done`].
    fn run_step(&mut self, ctx: &mut StepContext<'_>) -> StepStatus;

    /// Fresh copy for a new query instance.
    fn box_clone(&self) -> Box<dyn QueryTest>;
}

impl Clone for Box<dyn QueryGenerator> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

impl Clone for Box<dyn QueryTest> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

impl std::fmt::Debug for dyn QueryGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryGenerator")
            .field("name", &self.name())
            .field("item_type", &self.item_type())
            .finish()
    }
}

impl std::fmt::Debug for dyn QueryTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryTest")
            .field("name", &self.name())
            .field("cost", &self.cost())
            .field("purpose", &self.purpose())
            .finish()
    }
}
