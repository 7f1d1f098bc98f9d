//! Tick loop: time-sliced stepping of scheduled queries.

use crate::engine::{QueryEngine, QueryEntry};
use envquery_core::QueryId;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Step calls made
    pub steps: usize,

    /// Queries that finished and were notified
    pub finished: usize,

    /// Time spent stepping, charged to the budget
    pub work_time: Duration,

    /// Time spent in finish callbacks, not charged
    pub notify_time: Duration,

    /// Budget the tick started with, `None` with time slicing disabled
    pub budget: Option<Duration>,
}

impl QueryEngine {
    /// Advance scheduled queries until the tick budget is spent or every
    /// query that was scheduled when the tick began has finished.
    ///
    /// Queries are stepped round-robin in submission order. Queries
    /// submitted from callbacks during the tick wait for the next one.
    pub fn tick(&self) -> TickReport {
        // 1. Snapshot
        let snapshot: Vec<Arc<QueryEntry>> = self.running.lock().clone();
        let budget = self.allow_time_slicing().then(|| self.config.tick_budget());
        let warning = self.config.execution_time_warning();

        let mut report = TickReport {
            budget,
            ..TickReport::default()
        };
        let mut remaining = budget;
        let mut active: Vec<&Arc<QueryEntry>> = snapshot.iter().collect();

        // 2. Step round-robin
        'passes: while !active.is_empty() {
            let mut index = 0;
            while index < active.len() {
                if remaining.is_some_and(|left| left.is_zero()) {
                    break 'passes;
                }

                let entry = active[index];
                // Aborted by a callback earlier in this tick
                if entry.is_finished() {
                    active.remove(index);
                    continue;
                }

                let step_start = self.clock.now();
                let finished = self.step_entry(entry, remaining, warning);
                let work = self.clock.now().saturating_sub(step_start);
                report.steps += 1;
                report.work_time += work;
                if let Some(left) = remaining.as_mut() {
                    *left = left.saturating_sub(work);
                }

                if finished {
                    let notify_start = self.clock.now();
                    entry.notify();
                    report.notify_time += self.clock.now().saturating_sub(notify_start);
                    report.finished += 1;
                    active.remove(index);
                } else {
                    index += 1;
                }
            }
        }

        // 3. Sweep finished queries
        let done: HashSet<QueryId> = snapshot
            .iter()
            .filter(|entry| entry.is_finished())
            .map(|entry| entry.id)
            .collect();
        if !done.is_empty() {
            self.running.lock().retain(|entry| !done.contains(&entry.id));
        }

        trace!(
            target: "envquery",
            "Tick: {} steps, {} finished, {:?} work, {:?} in callbacks",
            report.steps, report.finished, report.work_time, report.notify_time
        );
        report
    }

    /// One step of one query. Returns whether it is now finished.
    fn step_entry(&self, entry: &QueryEntry, time_limit: Option<Duration>, warning: Duration) -> bool {
        let mut instance = entry.instance.lock();
        instance.execute_one_step(time_limit, self);

        let over_warning = instance.total_execution_time() > warning;
        if instance.is_finished() {
            if over_warning {
                warn!(
                    target: "envquery",
                    "Finished query {} [{}] over execution time warning. {}",
                    instance.id(), instance.query_name(), instance.stats().describe()
                );
            }
            true
        } else {
            if over_warning && !instance.has_logged_time_warning() {
                warn!(
                    target: "envquery",
                    "Query {} [{}] has been running for {:?}, over execution time warning. {}",
                    instance.id(), instance.query_name(), instance.total_execution_time(), instance.stats().describe()
                );
                instance.set_logged_time_warning();
            }
            false
        }
    }
}
