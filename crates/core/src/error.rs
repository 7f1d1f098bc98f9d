//! Error types.

use serde::{Deserialize, Serialize};

/// Errors found while compiling a definition into a template.
///
/// Everything except [`CompileError::EmptyTemplate`] is resolved locally by
/// dropping the offending option or test; those variants are only recorded
/// as diagnostics on the template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// No option survived validation
    #[error("query [{query}] doesn't have any valid options")]
    EmptyTemplate {
        /// Definition name
        query: String,
    },

    /// Option with a missing generator or item type
    #[error("query [{query}] option {option} is broken (generator: {generator}, item type: {item_type})")]
    InvalidOption {
        /// Definition name
        query: String,
        /// Option index in declaration order
        option: usize,
        /// Generator state
        generator: &'static str,
        /// Item type state
        item_type: &'static str,
    },

    /// Test that cannot evaluate the option's item type
    #[error("query [{query}] can't use test [{test}] in option {option} [{generator}], removing it")]
    UnsupportedTest {
        /// Definition name
        query: String,
        /// Option index in declaration order
        option: usize,
        /// Generator name
        generator: String,
        /// Test name
        test: String,
    },

    /// Option left with zero tests
    #[error("query [{query}] doesn't have any tests in option {option} [{generator}]")]
    OptionWithoutTests {
        /// Definition name
        query: String,
        /// Option index in declaration order
        option: usize,
        /// Generator name
        generator: String,
    },
}

/// Errors rejecting a request before any instance exists.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// The definition did not compile to a usable template
    #[error("invalid template: {0}")]
    InvalidTemplate(#[from] CompileError),

    /// The request targets another world/session
    #[error("request for context {requested} sent to engine of context {engine}")]
    ContextMismatch {
        /// Context named by the request
        requested: crate::ContextId,
        /// Context the engine serves
        engine: crate::ContextId,
    },
}

/// Why a query ended in the failed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RuntimeFailure {
    /// The query's deadline passed before it finished
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Every option ran out of items
    #[error("no valid items")]
    NoValidItems,
}
