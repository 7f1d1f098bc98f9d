//! Query requests.

use crate::definition::QueryDefinition;
use crate::id::{ContextId, OwnerId};
use crate::result::QueryResult;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Named numeric parameters supplied with a request.
pub type NamedParams = HashMap<String, f32>;

/// Callback invoked exactly once when a scheduled query finishes.
pub type FinishCallback = Box<dyn FnOnce(&QueryResult) + Send + 'static>;

/// Everything needed to start a query, short of the run mode.
///
/// Consumed when submitted; the engine keeps nothing but the copies it
/// puts on the instance.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Definition to run
    pub definition: Arc<QueryDefinition>,

    /// Who asked; used for bulk cancellation
    pub owner: OwnerId,

    /// World/session the request targets, `None` for whichever engine gets it
    pub context: Option<ContextId>,

    /// Named parameters visible to the query's generators and tests
    pub named_params: NamedParams,

    /// Wall-time limit for the whole query, measured from submission
    pub time_limit: Option<Duration>,

    /// Seed for randomized result selection
    pub seed: Option<u64>,
}

impl QueryRequest {
    /// Create a request.
    pub fn new(definition: Arc<QueryDefinition>, owner: OwnerId) -> Self {
        Self {
            definition,
            owner,
            context: None,
            named_params: NamedParams::new(),
            time_limit: None,
            seed: None,
        }
    }

    /// Set one named parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: f32) -> Self {
        self.named_params.insert(name.into(), value);
        self
    }

    /// Set several named parameters. Later values win.
    pub fn with_named_params<I, K>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, f32)>,
        K: Into<String>,
    {
        self.named_params
            .extend(params.into_iter().map(|(name, value)| (name.into(), value)));
        self
    }

    /// Target a specific world/session.
    pub fn with_context(mut self, context: ContextId) -> Self {
        self.context = Some(context);
        self
    }

    /// Bound the query's total run time.
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    /// Seed randomized result selection.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}
