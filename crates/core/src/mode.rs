//! Run modes and test metadata used by the ordering policy.

use serde::{Deserialize, Serialize};

/// How a query picks its result, which also decides how tests are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunMode {
    /// Single best-scoring item.
    SingleResult,
    /// A random item among the top `p` percent of the score range.
    RandomBestPercentile(u8),
    /// Every item that passes all conditions, best first.
    AllMatching,
}

impl RunMode {
    /// Random pick among the best 5%.
    pub const RANDOM_BEST_5_PCT: RunMode = RunMode::RandomBestPercentile(5);

    /// Random pick among the best 25%.
    pub const RANDOM_BEST_25_PCT: RunMode = RunMode::RandomBestPercentile(25);

    /// Whether the query stops at a single item.
    pub fn is_single_item(self) -> bool {
        !matches!(self, RunMode::AllMatching)
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::SingleResult => write!(f, "single-result"),
            RunMode::RandomBestPercentile(p) => write!(f, "random-best-{}pct", p),
            RunMode::AllMatching => write!(f, "all-matching"),
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" | "single-result" => Ok(RunMode::SingleResult),
            "all" | "all-matching" => Ok(RunMode::AllMatching),
            "best5" => Ok(RunMode::RANDOM_BEST_5_PCT),
            "best25" => Ok(RunMode::RANDOM_BEST_25_PCT),
            other => other
                .strip_prefix("best")
                .and_then(|p| p.parse::<u8>().ok())
                .filter(|p| (1..=100).contains(p))
                .map(RunMode::RandomBestPercentile)
                .ok_or_else(|| format!("unknown run mode: {}", s)),
        }
    }
}

/// Declared cost class of a test. Ordered from cheapest to most expensive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TestCost {
    /// Cheap per-item math
    Low,
    /// Moderate work, e.g. lookups
    Medium,
    /// Expensive, e.g. traces or pathfinding
    High,
}

/// What a test contributes to an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestPurpose {
    /// Pass/fail only.
    Condition,
    /// Score only.
    Score,
    /// Both filters and scores.
    ConditionAndScore,
}

impl TestPurpose {
    /// Anything that can discard items counts as a condition for ordering.
    pub fn is_condition(self) -> bool {
        self != TestPurpose::Score
    }
}
