//! Query definitions: the authored, immutable description of a query.

use crate::node::{QueryGenerator, QueryTest};

/// A query definition: one or more options tried in order.
///
/// Definitions are owned outside the engine (usually behind an `Arc`) and
/// are never mutated by it. The engine compiles them into templates keyed by
/// [`QueryDefinition::name`].
#[derive(Debug)]
pub struct QueryDefinition {
    /// Unique name, also the template cache key
    pub name: String,

    /// Options in priority order
    pub options: Vec<QueryOption>,
}

impl QueryDefinition {
    /// Create an empty definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: Vec::new(),
        }
    }

    /// Add an option.
    pub fn with_option(mut self, option: QueryOption) -> Self {
        self.options.push(option);
        self
    }
}

/// One generator paired with the tests evaluating its items.
#[derive(Debug, Default)]
pub struct QueryOption {
    /// Item source, `None` if the author left it unset
    pub generator: Option<Box<dyn QueryGenerator>>,

    /// Tests in declaration order
    pub tests: Vec<Box<dyn QueryTest>>,
}

impl QueryOption {
    /// Create an option around a generator.
    pub fn new(generator: impl QueryGenerator + 'static) -> Self {
        Self {
            generator: Some(Box::new(generator)),
            tests: Vec::new(),
        }
    }

    /// Create an option without a generator.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a test.
    pub fn with_test(mut self, test: impl QueryTest + 'static) -> Self {
        self.tests.push(Box::new(test));
        self
    }

    /// Generator display name, for diagnostics.
    pub fn generator_name(&self) -> &str {
        self.generator.as_deref().map(|g| g.name()).unwrap_or("<none>")
    }
}
