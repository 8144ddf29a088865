//! Time-budgeted status polling for individual runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::UpdateResult;
use crate::completion::RunCompletionHandler;
use crate::config::PollerConfig;
use crate::engine::WorkflowEngine;
use crate::metrics::MetricsSink;
use crate::models::Run;

/// Polls the execution engine for status changes on in-flight runs.
///
/// Within one batch, runs are always attempted in ascending
/// `last_polled_timestamp` order (most overdue first), regardless of input
/// order. A wall-clock deadline bounds the loop: the check happens at
/// iteration boundaries only, so an in-flight engine call is never aborted,
/// and runs the budget did not reach come back unchanged.
pub struct SmartRunsPoller {
    engine: Arc<dyn WorkflowEngine>,
    completion: Arc<RunCompletionHandler>,
    config: PollerConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl SmartRunsPoller {
    pub fn new(
        engine: Arc<dyn WorkflowEngine>,
        completion: Arc<RunCompletionHandler>,
        config: PollerConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            engine,
            completion,
            config,
            metrics,
        }
    }

    /// Poll the given runs within the configured budget.
    pub async fn update_runs(&self, runs: Vec<Run>) -> UpdateResult<Run> {
        let deadline = Utc::now() + Duration::seconds(self.config.max_poll_seconds as i64);
        self.update_runs_until(runs, deadline).await
    }

    /// Poll the given runs until `deadline`. The run set poller passes a
    /// shared deadline here so one set cannot starve the others.
    pub async fn update_runs_until(
        &self,
        runs: Vec<Run>,
        deadline: DateTime<Utc>,
    ) -> UpdateResult<Run> {
        let started = Instant::now();

        let input_order: Vec<Uuid> = runs.iter().map(|r| r.run_id).collect();
        let mut by_id: HashMap<Uuid, Run> =
            runs.into_iter().map(|r| (r.run_id, r)).collect();

        // Poll order is a hard contract: oldest-polled first.
        let mut poll_order: Vec<Uuid> = by_id.keys().copied().collect();
        poll_order.sort_by_key(|id| by_id[id].last_polled_timestamp);

        let min_poll_age = Duration::seconds(self.config.min_seconds_between_polls);
        let mut total_eligible = 0;
        let mut total_updated = 0;

        for run_id in poll_order {
            if !self.eligible(&by_id[&run_id], min_poll_age) {
                continue;
            }
            total_eligible += 1;

            // Budget check only between iterations; a query already in
            // flight runs to completion.
            if Utc::now() >= deadline {
                continue;
            }

            let run = by_id.remove(&run_id).expect("poll order out of sync");
            let updated = self.try_update_run(run).await;
            by_id.insert(run_id, updated);
            total_updated += 1;
        }

        self.metrics.count_event("run_updates_required", total_eligible as u64);
        self.metrics.count_event("run_updates_polled", total_updated as u64);
        let fully_updated = total_updated == total_eligible;
        self.metrics
            .record_method_completion("update_runs", fully_updated, started.elapsed());

        info!(
            polled = total_updated,
            eligible = total_eligible,
            elapsed_ms = started.elapsed().as_millis(),
            "run status update pass completed"
        );

        let updated_list = input_order
            .into_iter()
            .map(|id| by_id.remove(&id).expect("input order out of sync"))
            .collect();

        UpdateResult {
            updated_list,
            total_eligible,
            total_updated,
            fully_updated,
        }
    }

    /// A run is worth an engine query when it is still in flight, has been
    /// submitted (carries an engine id), and was not polled a moment ago.
    /// Terminal runs are skipped outright, including ones that turned
    /// terminal via push-callback between selection and polling.
    fn eligible(&self, run: &Run, min_poll_age: Duration) -> bool {
        run.status.non_terminal()
            && run.engine_id.is_some()
            && match run.last_polled_timestamp {
                Some(last_polled) => last_polled < Utc::now() - min_poll_age,
                None => true,
            }
    }

    async fn try_update_run(&self, run: Run) -> Run {
        // Eligibility guarantees an engine id.
        let Some(engine_id) = run.engine_id.clone() else {
            return run;
        };

        debug!(run_id = %run.run_id, %engine_id, "fetching run update from engine");
        let summary = self.engine.run_summary(&engine_id).await;
        self.metrics
            .record_outbound_request("engine_run_summary", summary.is_ok());

        let summary = match summary {
            Ok(summary) => summary,
            Err(err) => {
                // Transient: the run stays eligible and is re-selected next
                // cycle. Refresh the poll timestamp through the handler's
                // no-op path so it drops to the back of the queue.
                warn!(run_id = %run.run_id, ?err, "unable to fetch run summary from engine");
                let _ = self
                    .completion
                    .update_results(&run, run.status, None, None)
                    .await;
                return self.refreshed(run);
            }
        };

        let new_status = summary.status;
        let result = self
            .completion
            .update_results(&run, new_status, None, summary.status_changed_at)
            .await;

        if !result.is_success() {
            warn!(
                run_id = %run.run_id,
                to = %new_status,
                ?result,
                "completion handler did not persist run update"
            );
            return self.refreshed(run);
        }

        let mut run = self.refreshed(run);
        if run.status != new_status {
            run.last_modified_timestamp = summary.status_changed_at.unwrap_or_else(Utc::now);
            run.status = new_status;
        }
        run
    }

    fn refreshed(&self, mut run: Run) -> Run {
        run.last_polled_timestamp = Some(Utc::now());
        run
    }
}
