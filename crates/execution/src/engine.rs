//! The query engine: request façade and shared state.
//!
//! One engine exists per world/session. It owns the template cache, the set
//! of scheduled queries and the external registry. Queries enter either
//! through [`QueryEngine::run_query`], which schedules them for
//! [`QueryEngine::tick`], or through [`QueryEngine::run_instant_query`],
//! which drives them to completion on the calling thread.
//!
//! All methods take `&self`. No lock is held while a finish callback runs,
//! so callbacks may submit or abort queries. Generator and test steps run
//! under their own query's lock.

use crate::cache::{CacheStats, TemplateCache};
use crate::config::EngineConfig;
use crate::instance::QueryInstance;
use crate::registry::{ExternalLookup, ExternalQueryRegistry};
use envquery_core::{
    ContextId, FinishCallback, NamedParamLookup, NamedParams, OwnerId, QueryDefinition, QueryId,
    QueryRequest, QueryResult, QueryStatus, RequestError, RunMode, TimeSource, WallClock,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A scheduled or synchronously driven query.
pub(crate) struct QueryEntry {
    pub(crate) id: QueryId,
    pub(crate) owner: OwnerId,
    pub(crate) params: Arc<NamedParams>,
    pub(crate) instance: Mutex<QueryInstance>,
    on_finished: Mutex<Option<FinishCallback>>,
}

impl QueryEntry {
    pub(crate) fn new(instance: QueryInstance, on_finished: Option<FinishCallback>) -> Self {
        Self {
            id: instance.id(),
            owner: instance.owner().clone(),
            params: Arc::clone(instance.params()),
            instance: Mutex::new(instance),
            on_finished: Mutex::new(on_finished),
        }
    }

    pub(crate) fn status(&self) -> QueryStatus {
        self.instance.lock().status()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.status().is_finished()
    }

    /// Invoke the finish callback, at most once over the entry's life.
    pub(crate) fn notify(&self) -> bool {
        let Some(callback) = self.on_finished.lock().take() else {
            return false;
        };
        let result = self.instance.lock().result();
        callback(&result);
        true
    }

    /// Abort if unfinished. Returns whether the state changed.
    pub(crate) fn abort(&self) -> bool {
        let mut instance = self.instance.lock();
        if instance.is_finished() {
            return false;
        }
        instance.mark_aborted();
        true
    }
}

impl std::fmt::Debug for QueryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEntry")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("params", &self.params.len())
            .finish_non_exhaustive()
    }
}

/// A query built from a request but not yet scheduled.
#[derive(Debug)]
pub struct PreparedQuery {
    instance: QueryInstance,
}

impl PreparedQuery {
    /// Id the query will run under.
    pub fn id(&self) -> QueryId {
        self.instance.id()
    }

    /// The instance as prepared.
    pub fn instance(&self) -> &QueryInstance {
        &self.instance
    }
}

/// Environment query engine for one world/session.
pub struct QueryEngine {
    context: ContextId,
    pub(crate) config: EngineConfig,
    allow_time_slicing: AtomicBool,
    pub(crate) clock: Arc<dyn TimeSource>,
    next_id: AtomicU64,
    cache: Mutex<TemplateCache>,
    pub(crate) running: Mutex<Vec<Arc<QueryEntry>>>,
    external: ExternalQueryRegistry,
}

impl QueryEngine {
    /// Create an engine for `context` on the wall clock.
    pub fn new(context: ContextId, config: EngineConfig) -> Self {
        Self {
            context,
            allow_time_slicing: AtomicBool::new(config.allow_time_slicing),
            config,
            clock: Arc::new(WallClock::new()),
            next_id: AtomicU64::new(0),
            cache: Mutex::new(TemplateCache::new()),
            running: Mutex::new(Vec::new()),
            external: ExternalQueryRegistry::new(),
        }
    }

    /// Use `clock` for budgets, deadlines and timing.
    pub fn with_clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    /// World/session this engine serves.
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Clock the engine measures with.
    pub fn clock(&self) -> &Arc<dyn TimeSource> {
        &self.clock
    }

    /// Enable or disable time slicing. When disabled every step runs
    /// without a time hint and the tick budget is not enforced.
    pub fn set_allow_time_slicing(&self, allow: bool) {
        self.allow_time_slicing.store(allow, Ordering::Relaxed);
        info!(target: "envquery", "Time slicing {}", if allow { "enabled" } else { "disabled" });
    }

    /// Whether time slicing is enabled.
    pub fn allow_time_slicing(&self) -> bool {
        self.allow_time_slicing.load(Ordering::Relaxed)
    }

    /// Build an instance for `request` without scheduling it.
    pub fn prepare_query(
        &self,
        request: QueryRequest,
        mode: RunMode,
    ) -> Result<PreparedQuery, RequestError> {
        if let Some(requested) = request.context {
            if requested != self.context {
                warn!(
                    target: "envquery",
                    "Query [{}] targets {} but this engine serves {}",
                    request.definition.name, requested, self.context
                );
                return Err(RequestError::ContextMismatch {
                    requested,
                    engine: self.context,
                });
            }
        }

        let template = self.cache.lock().get_or_compile(&request.definition, mode)?;

        let id = QueryId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut instance = QueryInstance::from_template(
            &template,
            id,
            request.owner,
            Arc::new(request.named_params),
            Arc::clone(&self.clock),
        );
        if let Some(limit) = request.time_limit {
            instance = instance.with_deadline(self.clock.now().saturating_add(limit));
        }
        if let Some(seed) = request.seed {
            instance = instance.with_seed(seed);
        }

        Ok(PreparedQuery { instance })
    }

    /// Schedule a prepared query. `on_finished` is called exactly once,
    /// from the tick or cancellation call that finishes it.
    pub fn run_prepared<F>(&self, prepared: PreparedQuery, on_finished: F) -> QueryId
    where
        F: FnOnce(&QueryResult) + Send + 'static,
    {
        let entry = Arc::new(QueryEntry::new(prepared.instance, Some(Box::new(on_finished))));
        let id = entry.id;
        debug!(target: "envquery", "Scheduled query {} for {}", id, entry.owner);
        self.running.lock().push(entry);
        id
    }

    /// Prepare and schedule a query.
    pub fn run_query<F>(
        &self,
        request: QueryRequest,
        mode: RunMode,
        on_finished: F,
    ) -> Result<QueryId, RequestError>
    where
        F: FnOnce(&QueryResult) + Send + 'static,
    {
        let prepared = self.prepare_query(request, mode)?;
        Ok(self.run_prepared(prepared, on_finished))
    }

    /// Run a query to completion on the calling thread.
    ///
    /// Ignores the tick budget and time slicing. The query is visible to
    /// named-parameter lookups while it runs but never enters the
    /// scheduled set, so cancellation calls do not affect it.
    pub fn run_instant_query(
        &self,
        request: QueryRequest,
        mode: RunMode,
    ) -> Result<QueryResult, RequestError> {
        let prepared = self.prepare_query(request, mode)?;
        let entry = Arc::new(QueryEntry::new(prepared.instance, None));
        let _registration = self.external.register(&entry);

        let result = loop {
            let mut instance = entry.instance.lock();
            if instance.is_finished() {
                break instance.result();
            }
            instance.execute_one_step(None, self);
        };

        if result.stats.total_time > self.config.execution_time_warning() {
            warn!(
                target: "envquery",
                "Finished query {} [{}] over execution time warning. {}",
                result.query_id, result.query_name, result.stats.describe()
            );
        }
        Ok(result)
    }

    /// A cached definition by name.
    pub fn find_definition(&self, name: &str) -> Option<Arc<QueryDefinition>> {
        self.cache.lock().find_definition(name)
    }

    /// Drop every compiled template, e.g. after definitions were edited.
    /// Queries already scheduled keep running on their own copies.
    pub fn clear_template_cache(&self) {
        self.cache.lock().clear();
        info!(target: "envquery", "Template cache cleared");
    }

    /// Template cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    /// Number of scheduled queries, finished ones included until the next
    /// tick sweeps them.
    pub fn running_query_count(&self) -> usize {
        self.running.lock().len()
    }

    /// Whether `id` is scheduled and unfinished.
    pub fn is_running(&self, id: QueryId) -> bool {
        self.find_entry(id).is_some_and(|entry| !entry.is_finished())
    }

    /// Lifecycle state of a scheduled query.
    pub fn query_status(&self, id: QueryId) -> Option<QueryStatus> {
        self.find_entry(id).map(|entry| entry.status())
    }

    pub(crate) fn find_entry(&self, id: QueryId) -> Option<Arc<QueryEntry>> {
        self.running
            .lock()
            .iter()
            .find(|entry| entry.id == id)
            .cloned()
    }
}

impl NamedParamLookup for QueryEngine {
    /// Synchronously driven queries are checked first, then the scheduled
    /// set. Unknown ids and names read as `0.0`.
    fn find_named_param(&self, query: QueryId, name: &str) -> f32 {
        let params = match self.external.lookup(query) {
            ExternalLookup::Live(entry) => Some(Arc::clone(&entry.params)),
            ExternalLookup::Expired => None,
            ExternalLookup::Unknown => self.find_entry(query).map(|entry| Arc::clone(&entry.params)),
        };
        params
            .and_then(|params| params.get(name).copied())
            .unwrap_or(0.0)
    }
}

/// Submit a request straight from the request value.
pub trait QueryRequestExt {
    /// Schedule the query on `engine`. Returns [`QueryId::NONE`] if it
    /// could not be started; the reason is logged.
    fn execute<F>(self, engine: &QueryEngine, mode: RunMode, on_finished: F) -> QueryId
    where
        F: FnOnce(&QueryResult) + Send + 'static;
}

impl QueryRequestExt for QueryRequest {
    fn execute<F>(self, engine: &QueryEngine, mode: RunMode, on_finished: F) -> QueryId
    where
        F: FnOnce(&QueryResult) + Send + 'static,
    {
        let name = self.definition.name.clone();
        match engine.run_query(self, mode, on_finished) {
            Ok(id) => id,
            Err(e) => {
                warn!(target: "envquery", "Failed to start query [{}]: {}", name, e);
                QueryId::NONE
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Action, FakeTest, GridGenerator};
    use envquery_core::{
        CompileError, QueryOption, QueryOutcome, RuntimeFailure, TestCost, TestPurpose,
        VirtualClock,
    };
    use std::time::Duration;

    fn engine() -> QueryEngine {
        QueryEngine::new(ContextId(1), EngineConfig::default()).with_clock(Arc::new(VirtualClock::new()))
    }

    fn scored_definition(name: &str, count: usize) -> Arc<QueryDefinition> {
        Arc::new(QueryDefinition::new(name).with_option(
            QueryOption::new(GridGenerator::new("G", count))
                .with_test(FakeTest::new("X", TestCost::Low, TestPurpose::Score).action(Action::ScoreByX)),
        ))
    }

    fn request(definition: &Arc<QueryDefinition>) -> QueryRequest {
        QueryRequest::new(Arc::clone(definition), OwnerId::new("agent"))
    }

    #[test]
    fn test_instant_query_runs_to_completion() {
        let engine = engine();
        let result = engine
            .run_instant_query(request(&scored_definition("Q", 5)), RunMode::SingleResult)
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.best().unwrap().value.location().x, 4.0);
        assert_eq!(engine.running_query_count(), 0);
        assert!(engine.external.is_empty());
    }

    #[test]
    fn test_run_query_returns_id_without_stepping() {
        let engine = engine();
        let id = engine
            .run_query(request(&scored_definition("Q", 5)), RunMode::AllMatching, |_| {})
            .unwrap();

        assert_eq!(engine.running_query_count(), 1);
        assert!(engine.is_running(id));
        assert_eq!(engine.query_status(id), Some(QueryStatus::Created));
    }

    #[test]
    fn test_ids_are_unique() {
        let engine = engine();
        let definition = scored_definition("Q", 1);
        let a = engine.run_query(request(&definition), RunMode::AllMatching, |_| {}).unwrap();
        let b = engine.run_query(request(&definition), RunMode::AllMatching, |_| {}).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_template_is_rejected() {
        let engine = engine();
        let broken = Arc::new(QueryDefinition::new("Broken"));

        let err = engine
            .run_query(request(&broken), RunMode::AllMatching, |_| {})
            .unwrap_err();
        assert!(matches!(err, RequestError::InvalidTemplate(CompileError::EmptyTemplate { .. })));
        assert_eq!(engine.running_query_count(), 0);

        let id = request(&broken).execute(&engine, RunMode::AllMatching, |_| {});
        assert!(id.is_none());
        assert!(!engine.is_running(id));
        let report = engine.tick();
        assert_eq!(report.steps, 0);
        assert_eq!(report.finished, 0);
        assert!(engine.run_instant_query(request(&broken), RunMode::AllMatching).is_err());
    }

    #[test]
    fn test_context_mismatch_is_rejected() {
        let engine = engine();
        let definition = scored_definition("Q", 1);

        let err = engine
            .run_instant_query(request(&definition).with_context(ContextId(2)), RunMode::AllMatching)
            .unwrap_err();
        assert!(matches!(
            err,
            RequestError::ContextMismatch { requested: ContextId(2), engine: ContextId(1) }
        ));

        assert!(engine
            .run_instant_query(request(&definition).with_context(ContextId(1)), RunMode::AllMatching)
            .is_ok());
    }

    #[test]
    fn test_cache_is_reused_and_clearable() {
        let engine = engine();
        let definition = scored_definition("Q", 2);
        engine.run_instant_query(request(&definition), RunMode::AllMatching).unwrap();
        engine.run_instant_query(request(&definition), RunMode::AllMatching).unwrap();
        assert_eq!(engine.cache_stats(), CacheStats { hits: 1, misses: 1 });

        assert!(engine.find_definition("Q").is_some());
        engine.clear_template_cache();
        assert!(engine.find_definition("Q").is_none());
    }

    #[test]
    fn test_blocking_query_sees_own_params() {
        let engine = engine();
        let definition = Arc::new(QueryDefinition::new("Q").with_option(
            QueryOption::new(GridGenerator::new("G", 2)).with_test(
                FakeTest::new("P", TestCost::Low, TestPurpose::Score)
                    .action(Action::ScoreByParam("Bonus".to_string())),
            ),
        ));

        let result = engine
            .run_instant_query(request(&definition).with_param("Bonus", 7.5), RunMode::AllMatching)
            .unwrap();
        assert!(result.items.iter().all(|item| item.score == 7.5));
    }

    #[test]
    fn test_lookup_scans_scheduled_queries() {
        let engine = engine();
        let id = engine
            .run_query(
                request(&scored_definition("Q", 1)).with_param("Range", 12.0),
                RunMode::AllMatching,
                |_| {},
            )
            .unwrap();

        assert_eq!(engine.find_named_param(id, "Range"), 12.0);
        assert_eq!(engine.find_named_param(id, "Missing"), 0.0);
        assert_eq!(engine.find_named_param(QueryId::new(999), "Range"), 0.0);
    }

    #[test]
    fn test_expired_external_entry_shadows_running_set() {
        let engine = engine();
        let id = engine
            .run_query(
                request(&scored_definition("Q", 1)).with_param("Range", 12.0),
                RunMode::AllMatching,
                |_| {},
            )
            .unwrap();

        let stale = crate::testing::idle_entry(id.get(), NamedParams::new());
        let registration = engine.external.register(&stale);
        drop(stale);

        assert_eq!(engine.find_named_param(id, "Range"), 0.0);
        drop(registration);
        assert_eq!(engine.find_named_param(id, "Range"), 12.0);
    }

    #[test]
    fn test_time_limit_fails_blocking_query() {
        let clock = Arc::new(VirtualClock::new());
        let engine = QueryEngine::new(ContextId(1), EngineConfig::default()).with_clock(Arc::clone(&clock) as Arc<dyn TimeSource>);
        let definition = Arc::new(QueryDefinition::new("Slow").with_option(
            QueryOption::new(GridGenerator::new("G", 10).per_step(1).with_cost(Arc::clone(&clock), Duration::from_millis(4)))
                .with_test(FakeTest::new("X", TestCost::Low, TestPurpose::Score)),
        ));

        let result = engine
            .run_instant_query(
                request(&definition).with_time_limit(Duration::from_millis(10)),
                RunMode::AllMatching,
            )
            .unwrap();

        assert_eq!(result.outcome(), Some(QueryOutcome::Failed(RuntimeFailure::DeadlineExceeded)));
        assert_eq!(result.items.len(), 3);
    }

    #[test]
    fn test_time_slicing_switch() {
        let engine = engine();
        assert!(engine.allow_time_slicing());
        engine.set_allow_time_slicing(false);
        assert!(!engine.allow_time_slicing());
    }
}
