//! Candidate items and the per-instance working storage that holds them.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Tag naming the kind of item a generator produces.
///
/// Tests declare which tags they can evaluate; an option whose tests do not
/// support its generator's tag loses those tests at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemType(Cow<'static, str>);

impl ItemType {
    /// World-space locations.
    pub const LOCATION: ItemType = ItemType(Cow::Borrowed("location"));

    /// Actors in the world.
    pub const ACTOR: ItemType = ItemType(Cow::Borrowed("actor"));

    /// Custom item type.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// Tag name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A point in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    /// X coordinate
    pub x: f32,
    /// Y coordinate
    pub y: f32,
    /// Z coordinate
    pub z: f32,
}

impl Location {
    /// Create a location.
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another location.
    pub fn distance(&self, other: &Location) -> f32 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Raw value of a candidate item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ItemValue {
    /// A location
    Location(Location),
    /// An actor handle, with its location at generation time
    Actor {
        /// Opaque actor handle
        handle: u64,
        /// Where the actor was
        location: Location,
    },
}

impl ItemValue {
    /// Location of the item.
    pub fn location(&self) -> Location {
        match self {
            ItemValue::Location(location) => *location,
            ItemValue::Actor { location, .. } => *location,
        }
    }
}

/// One candidate item plus its scoring state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryItem {
    /// Raw value
    pub value: ItemValue,

    /// Accumulated score across all tests
    pub score: f32,

    /// Cleared when a condition test discards the item
    pub is_valid: bool,

    /// Score contributed by each test, in execution order
    pub test_scores: Vec<f32>,
}

impl QueryItem {
    fn new(value: ItemValue, test_count: usize) -> Self {
        Self {
            value,
            score: 0.0,
            is_valid: true,
            test_scores: vec![0.0; test_count],
        }
    }
}

/// Working storage of a query instance for the option being executed.
///
/// Generators append items; tests discard and score them. The store tracks
/// which test is currently running so per-test scores land in the right
/// column.
#[derive(Debug, Clone, Default)]
pub struct ItemStore {
    items: Vec<QueryItem>,
    test_count: usize,
    current_test: Option<usize>,
}

impl ItemStore {
    /// Empty store sized for `test_count` tests per item.
    pub fn new(test_count: usize) -> Self {
        Self {
            items: Vec::new(),
            test_count,
            current_test: None,
        }
    }

    /// Drop every item and resize for the next option.
    pub fn reset(&mut self, test_count: usize) {
        self.items.clear();
        self.test_count = test_count;
        self.current_test = None;
    }

    /// Select which test column scores are written to.
    pub fn begin_test(&mut self, index: usize) {
        self.current_test = Some(index);
    }

    /// Append a generated item and return its index.
    pub fn push(&mut self, value: ItemValue) -> usize {
        self.items.push(QueryItem::new(value, self.test_count));
        self.items.len() - 1
    }

    /// Number of items, valid or not.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no item has been generated.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of items still valid.
    pub fn valid_count(&self) -> usize {
        self.items.iter().filter(|item| item.is_valid).count()
    }

    /// Item by index.
    pub fn get(&self, index: usize) -> Option<&QueryItem> {
        self.items.get(index)
    }

    /// All items in generation order.
    pub fn items(&self) -> &[QueryItem] {
        &self.items
    }

    /// Valid items with their indices.
    pub fn iter_valid(&self) -> impl Iterator<Item = (usize, &QueryItem)> + '_ {
        self.items.iter().enumerate().filter(|(_, item)| item.is_valid)
    }

    /// Discard an item. Out-of-range indices are ignored.
    pub fn discard(&mut self, index: usize) {
        if let Some(item) = self.items.get_mut(index) {
            item.is_valid = false;
        }
    }

    /// Add `value` to an item's score, attributed to the current test.
    pub fn add_score(&mut self, index: usize, value: f32) {
        let column = self.current_test;
        if let Some(item) = self.items.get_mut(index) {
            item.score += value;
            if let Some(slot) = column.and_then(|c| item.test_scores.get_mut(c)) {
                *slot += value;
            }
        }
    }

    /// Move the items out, leaving the store empty.
    pub fn take(&mut self) -> Vec<QueryItem> {
        std::mem::take(&mut self.items)
    }
}
