//! Demo generators and tests over a synthetic grid world.
//!
//! Named parameters read by the demo query:
//! `OriginX`/`OriginY` (querier position), `Range` (max distance).

use envquery_core::{
    ItemType, ItemValue, Location, QueryDefinition, QueryGenerator, QueryOption, QueryTest,
    StepContext, StepStatus, TestCost, TestPurpose,
};
use std::sync::Arc;

/// Name of the demo definition.
pub const FIND_COVER: &str = "FindCover";

fn origin(ctx: &StepContext<'_>) -> Location {
    Location::new(ctx.named_param("OriginX"), ctx.named_param("OriginY"), 0.0)
}

/// Square grid of points around the querier, one row per work unit.
#[derive(Clone)]
pub struct PointGrid {
    half_extent: i32,
    spacing: f32,
    next_row: i32,
}

impl PointGrid {
    pub fn new(half_extent: i32, spacing: f32) -> Self {
        Self {
            half_extent,
            spacing,
            next_row: -half_extent,
        }
    }
}

impl QueryGenerator for PointGrid {
    fn name(&self) -> &str {
        "PointGrid"
    }

    fn item_type(&self) -> Option<ItemType> {
        Some(ItemType::LOCATION)
    }

    fn generate(&mut self, ctx: &mut StepContext<'_>) -> StepStatus {
        let center = origin(ctx);
        while self.next_row <= self.half_extent {
            let y = center.y + self.next_row as f32 * self.spacing;
            for column in -self.half_extent..=self.half_extent {
                let x = center.x + column as f32 * self.spacing;
                ctx.add_item(ItemValue::Location(Location::new(x, y, 0.0)));
            }
            self.next_row += 1;
            if ctx.is_out_of_time() {
                return StepStatus::Continue;
            }
        }
        StepStatus::Done
    }

    fn box_clone(&self) -> Box<dyn QueryGenerator> {
        Box::new(self.clone())
    }
}

/// Drops points farther than `Range` from the querier.
#[derive(Clone)]
pub struct RangeFilter;

impl QueryTest for RangeFilter {
    fn name(&self) -> &str {
        "RangeFilter"
    }

    fn cost(&self) -> TestCost {
        TestCost::Low
    }

    fn purpose(&self) -> TestPurpose {
        TestPurpose::Condition
    }

    fn supports_item(&self, _item_type: &ItemType) -> bool {
        true
    }

    fn run_step(&mut self, ctx: &mut StepContext<'_>) -> StepStatus {
        let center = origin(ctx);
        let range = ctx.named_param("Range");
        for index in ctx.valid_indices() {
            if ctx.items()[index].value.location().distance(&center) > range {
                ctx.discard(index);
            }
        }
        StepStatus::Done
    }

    fn box_clone(&self) -> Box<dyn QueryTest> {
        Box::new(self.clone())
    }
}

/// Prefers points close to the querier.
#[derive(Clone)]
pub struct Proximity;

impl QueryTest for Proximity {
    fn name(&self) -> &str {
        "Proximity"
    }

    fn cost(&self) -> TestCost {
        TestCost::Low
    }

    fn purpose(&self) -> TestPurpose {
        TestPurpose::Score
    }

    fn supports_item(&self, _item_type: &ItemType) -> bool {
        true
    }

    fn run_step(&mut self, ctx: &mut StepContext<'_>) -> StepStatus {
        let center = origin(ctx);
        for index in ctx.valid_indices() {
            let distance = ctx.items()[index].value.location().distance(&center);
            ctx.add_score(index, 1.0 / (1.0 + distance));
        }
        StepStatus::Done
    }

    fn box_clone(&self) -> Box<dyn QueryTest> {
        Box::new(self.clone())
    }
}

/// Cover value of a point from a fixed pseudo-random field.
#[derive(Clone)]
pub struct CoverScore;

fn cover_at(location: Location) -> f32 {
    let (x, y) = (location.x.round() as i64, location.y.round() as i64);
    let hash = (x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663)).rem_euclid(100);
    hash as f32 / 100.0
}

impl QueryTest for CoverScore {
    fn name(&self) -> &str {
        "CoverScore"
    }

    fn cost(&self) -> TestCost {
        TestCost::Medium
    }

    fn purpose(&self) -> TestPurpose {
        TestPurpose::Score
    }

    fn supports_item(&self, item_type: &ItemType) -> bool {
        *item_type == ItemType::LOCATION
    }

    fn run_step(&mut self, ctx: &mut StepContext<'_>) -> StepStatus {
        for index in ctx.valid_indices() {
            let cover = cover_at(ctx.items()[index].value.location());
            ctx.add_score(index, cover);
        }
        StepStatus::Done
    }

    fn box_clone(&self) -> Box<dyn QueryTest> {
        Box::new(self.clone())
    }
}

/// Expensive reachability check; walks items in chunks and yields when the
/// step's time hint runs out.
#[derive(Clone, Default)]
pub struct Reachable {
    cursor: usize,
}

impl Reachable {
    pub fn new() -> Self {
        Self { cursor: 0 }
    }

    fn blocked(location: Location) -> bool {
        let cells = (location.x.abs() + location.y.abs()).round() as i64;
        cells % 7 == 3
    }
}

impl QueryTest for Reachable {
    fn name(&self) -> &str {
        "Reachable"
    }

    fn cost(&self) -> TestCost {
        TestCost::High
    }

    fn purpose(&self) -> TestPurpose {
        TestPurpose::Condition
    }

    fn supports_item(&self, _item_type: &ItemType) -> bool {
        true
    }

    fn run_step(&mut self, ctx: &mut StepContext<'_>) -> StepStatus {
        const CHUNK: usize = 32;
        while self.cursor < ctx.items().len() {
            let end = (self.cursor + CHUNK).min(ctx.items().len());
            for index in self.cursor..end {
                let item = &ctx.items()[index];
                if item.is_valid && Self::blocked(item.value.location()) {
                    ctx.discard(index);
                }
            }
            self.cursor = end;
            if ctx.is_out_of_time() {
                return StepStatus::Continue;
            }
        }
        StepStatus::Done
    }

    fn box_clone(&self) -> Box<dyn QueryTest> {
        Box::new(self.clone())
    }
}

/// Nearby covered spot, falling back to the nearest open point.
pub fn find_cover() -> Arc<QueryDefinition> {
    Arc::new(
        QueryDefinition::new(FIND_COVER)
            .with_option(
                QueryOption::new(PointGrid::new(8, 1.0))
                    .with_test(CoverScore)
                    .with_test(Reachable::new())
                    .with_test(RangeFilter)
                    .with_test(Proximity),
            )
            .with_option(
                QueryOption::new(PointGrid::new(16, 2.0))
                    .with_test(Reachable::new())
                    .with_test(Proximity),
            ),
    )
}
