//! envquery core data models.
//!
//! This crate defines the types shared by the environment query engine:
//! definitions and their generator/test contract, requests, results,
//! lifecycle states and errors.

#![warn(missing_docs)]

// Identities
mod id;

// Authoring
mod definition;
mod mode;
mod node;

// Execution data
mod item;
mod request;
mod result;
mod time;

mod error;

// Re-exports
pub use id::*;

pub use definition::{QueryDefinition, QueryOption};
pub use mode::{RunMode, TestCost, TestPurpose};
pub use node::{NamedParamLookup, NoParamLookup, QueryGenerator, QueryTest, StepContext, StepStatus};

pub use item::{ItemStore, ItemType, ItemValue, Location, QueryItem};
pub use request::{FinishCallback, NamedParams, QueryRequest};
pub use result::{ExecutionStats, OptionTiming, QueryOutcome, QueryResult, QueryStatus, ScoredItem};
pub use time::{TimeSource, VirtualClock, WallClock};

pub use error::{CompileError, RequestError, RuntimeFailure};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
