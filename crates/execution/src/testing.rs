//! Generators and tests used by the unit tests.

use crate::compiler::compile_template;
use crate::engine::QueryEntry;
use crate::instance::QueryInstance;
use envquery_core::{
    ItemType, ItemValue, Location, NamedParams, OwnerId, QueryDefinition, QueryGenerator, QueryId,
    QueryOption, QueryTest, RunMode, StepContext, StepStatus, TestCost, TestPurpose, VirtualClock,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Shared log of which tests started, in order.
pub(crate) type RunLog = Arc<Mutex<Vec<String>>>;

/// Simulated cost of one step, charged to a virtual clock.
#[derive(Clone, Default)]
pub(crate) struct StepCost {
    clock: Option<Arc<VirtualClock>>,
    per_step: Duration,
}

impl StepCost {
    fn charge(&self) {
        if let Some(clock) = &self.clock {
            clock.advance(self.per_step);
        }
    }
}

/// Produces locations `(i, 0, 0)` for `i` in `0..count`.
#[derive(Clone)]
pub(crate) struct GridGenerator {
    name: String,
    item_type: Option<ItemType>,
    count: usize,
    per_step: usize,
    cursor: usize,
    auto_sort: bool,
    cost: StepCost,
}

impl GridGenerator {
    pub(crate) fn new(name: &str, count: usize) -> Self {
        Self {
            name: name.to_string(),
            item_type: Some(ItemType::LOCATION),
            count,
            per_step: usize::MAX,
            cursor: 0,
            auto_sort: true,
            cost: StepCost::default(),
        }
    }

    pub(crate) fn per_step(mut self, per_step: usize) -> Self {
        self.per_step = per_step.max(1);
        self
    }

    pub(crate) fn without_item_type(mut self) -> Self {
        self.item_type = None;
        self
    }

    pub(crate) fn unsorted(mut self) -> Self {
        self.auto_sort = false;
        self
    }

    pub(crate) fn with_cost(mut self, clock: Arc<VirtualClock>, per_step: Duration) -> Self {
        self.cost = StepCost {
            clock: Some(clock),
            per_step,
        };
        self
    }
}

impl QueryGenerator for GridGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn item_type(&self) -> Option<ItemType> {
        self.item_type.clone()
    }

    fn auto_sort_tests(&self) -> bool {
        self.auto_sort
    }

    fn generate(&mut self, ctx: &mut StepContext<'_>) -> StepStatus {
        self.cost.charge();
        let end = self.count.min(self.cursor.saturating_add(self.per_step));
        for i in self.cursor..end {
            ctx.add_item(ItemValue::Location(Location::new(i as f32, 0.0, 0.0)));
        }
        self.cursor = end;
        if self.cursor >= self.count {
            StepStatus::Done
        } else {
            StepStatus::Continue
        }
    }

    fn box_clone(&self) -> Box<dyn QueryGenerator> {
        Box::new(self.clone())
    }
}

/// What a [`FakeTest`] does to each valid item when it completes.
#[derive(Clone)]
pub(crate) enum Action {
    /// Add the item's x coordinate to its score
    ScoreByX,
    /// Add 1/x to the score; x = 0 scores +inf
    ScoreInverseX,
    /// Add NaN to every score
    ScoreNan,
    /// Discard items with x at or above the bound
    KeepBelow(f32),
    /// Discard every item
    RejectAll,
    /// Add the named parameter of the running query, looked up by id
    ScoreByParam(String),
    /// Do nothing
    Nothing,
}

/// Test with configurable metadata and behaviour.
#[derive(Clone)]
pub(crate) struct FakeTest {
    name: String,
    cost_class: TestCost,
    purpose: TestPurpose,
    supported: Option<ItemType>,
    action: Action,
    steps_needed: usize,
    steps_taken: usize,
    log: Option<RunLog>,
    cost: StepCost,
}

impl FakeTest {
    pub(crate) fn new(name: &str, cost_class: TestCost, purpose: TestPurpose) -> Self {
        Self {
            name: name.to_string(),
            cost_class,
            purpose,
            supported: None,
            action: Action::Nothing,
            steps_needed: 1,
            steps_taken: 0,
            log: None,
            cost: StepCost::default(),
        }
    }

    pub(crate) fn supporting(mut self, item_type: ItemType) -> Self {
        self.supported = Some(item_type);
        self
    }

    pub(crate) fn action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    pub(crate) fn steps(mut self, steps: usize) -> Self {
        self.steps_needed = steps.max(1);
        self
    }

    pub(crate) fn logged(mut self, log: &RunLog) -> Self {
        self.log = Some(Arc::clone(log));
        self
    }

    pub(crate) fn with_cost(mut self, clock: Arc<VirtualClock>, per_step: Duration) -> Self {
        self.cost = StepCost {
            clock: Some(clock),
            per_step,
        };
        self
    }
}

impl QueryTest for FakeTest {
    fn name(&self) -> &str {
        &self.name
    }

    fn cost(&self) -> TestCost {
        self.cost_class
    }

    fn purpose(&self) -> TestPurpose {
        self.purpose
    }

    fn supports_item(&self, item_type: &ItemType) -> bool {
        self.supported.as_ref().map_or(true, |supported| supported == item_type)
    }

    fn run_step(&mut self, ctx: &mut StepContext<'_>) -> StepStatus {
        if self.steps_taken == 0 {
            if let Some(log) = &self.log {
                log.lock().push(self.name.clone());
            }
        }
        self.cost.charge();
        self.steps_taken += 1;
        if self.steps_taken < self.steps_needed {
            return StepStatus::Continue;
        }

        for index in ctx.valid_indices() {
            let x = ctx.items()[index].value.location().x;
            match &self.action {
                Action::ScoreByX => ctx.add_score(index, x),
                Action::ScoreInverseX => ctx.add_score(index, 1.0 / x),
                Action::ScoreNan => ctx.add_score(index, f32::NAN),
                Action::KeepBelow(bound) if x >= *bound => ctx.discard(index),
                Action::KeepBelow(_) => {}
                Action::RejectAll => ctx.discard(index),
                Action::ScoreByParam(name) => {
                    let value = ctx.find_named_param(ctx.query_id(), name);
                    ctx.add_score(index, value);
                }
                Action::Nothing => {}
            }
        }
        StepStatus::Done
    }

    fn box_clone(&self) -> Box<dyn QueryTest> {
        Box::new(self.clone())
    }
}

/// A registered-but-idle query entry with the given parameters.
pub(crate) fn idle_entry(id: u64, params: NamedParams) -> Arc<QueryEntry> {
    let definition = QueryDefinition::new("Idle").with_option(
        QueryOption::new(GridGenerator::new("G", 1))
            .with_test(FakeTest::new("T", TestCost::Low, TestPurpose::Score)),
    );
    let template = compile_template(&definition, RunMode::AllMatching).unwrap();
    let instance = QueryInstance::from_template(
        &template,
        QueryId::new(id),
        OwnerId::new("idle"),
        Arc::new(params),
        Arc::new(VirtualClock::new()),
    );
    Arc::new(QueryEntry::new(instance, None))
}
