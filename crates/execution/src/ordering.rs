//! Test ordering policies.
//!
//! Tests of an option run in an order chosen at compile time from their
//! declared cost and purpose. All policies are stable: tests that compare
//! equal keep their declaration order, which is observable through early
//! exits and must not change between compilations.

use envquery_core::{QueryTest, RunMode, TestCost, TestPurpose};

/// How the tests of one option are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOrdering {
    /// Cheaper first; within a cost class conditions before scores.
    AllMatching,
    /// Cheaper first; conditions before scores, except on the most expensive
    /// cost class present, where scores go first so the final pass can stop
    /// at the first candidate that passes.
    SingleResult {
        /// Most expensive cost class among the option's tests
        highest_cost: TestCost,
    },
    /// Declaration order, for generators that opt out of sorting.
    Declaration,
}

impl TestOrdering {
    /// Policy for `mode` over the given test metadata.
    pub fn for_mode(mode: RunMode, tests: impl IntoIterator<Item = TestCost>) -> Self {
        match mode {
            RunMode::AllMatching => TestOrdering::AllMatching,
            RunMode::SingleResult | RunMode::RandomBestPercentile(_) => {
                let highest_cost = tests.into_iter().max().unwrap_or(TestCost::Low);
                TestOrdering::SingleResult { highest_cost }
            }
        }
    }

    /// Sort key; smaller runs first.
    fn key(&self, cost: TestCost, purpose: TestPurpose) -> (TestCost, u8) {
        let condition = purpose.is_condition();
        let rank = match self {
            TestOrdering::Declaration => return (TestCost::Low, 0),
            TestOrdering::AllMatching => !condition,
            TestOrdering::SingleResult { highest_cost } if cost == *highest_cost => condition,
            TestOrdering::SingleResult { .. } => !condition,
        };
        (cost, rank as u8)
    }

    /// Stable sort of arbitrary elements given their metadata.
    pub fn sort_by_metadata<T, F>(&self, items: &mut [T], metadata: F)
    where
        F: Fn(&T) -> (TestCost, TestPurpose),
    {
        items.sort_by_key(|item| {
            let (cost, purpose) = metadata(item);
            self.key(cost, purpose)
        });
    }

    /// Stable sort of test objects.
    pub fn sort_tests(&self, tests: &mut [Box<dyn QueryTest>]) {
        self.sort_by_metadata(tests, |test| (test.cost(), test.purpose()));
    }
}
