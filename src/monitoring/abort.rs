//! Cascading cancellation of a run set and its member runs.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::WorkflowEngine;
use crate::metrics::MetricsSink;
use crate::models::{RunSetStatus, NON_TERMINAL_RUN_STATUSES};
use crate::store::{RunSetStore, RunStore, RunsFilter, StoreResult};

/// Outcome of an abort request: which run cancellations were handed to the
/// engine and which could not be submitted.
#[derive(Debug, Default, Clone)]
pub struct AbortRequestDetails {
    pub submitted_ids: Vec<Uuid>,
    pub failed_ids: Vec<String>,
}

/// Fans a run-set abort out to the engine, one cancel request per
/// non-terminal member run. Individual failures never short-circuit the
/// fan-out; the poller converges each run's local status afterwards.
pub struct RunSetAbortManager {
    run_store: Arc<dyn RunStore>,
    run_set_store: Arc<dyn RunSetStore>,
    engine: Arc<dyn WorkflowEngine>,
    metrics: Arc<dyn MetricsSink>,
}

impl RunSetAbortManager {
    pub fn new(
        run_store: Arc<dyn RunStore>,
        run_set_store: Arc<dyn RunSetStore>,
        engine: Arc<dyn WorkflowEngine>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            run_store,
            run_set_store,
            engine,
            metrics,
        }
    }

    /// Request cancellation of every non-terminal run in the set. Loading
    /// or marking the set is a hard failure; per-run engine failures are
    /// collected into `failed_ids`.
    pub async fn abort_run_set(&self, run_set_id: Uuid) -> StoreResult<AbortRequestDetails> {
        let run_set = self.run_set_store.get_run_set(run_set_id).await?;

        if run_set.status.non_terminal() && run_set.status != RunSetStatus::Canceling {
            let changes = self
                .run_set_store
                .update_state_and_run_details(
                    run_set_id,
                    RunSetStatus::Canceling,
                    run_set.run_count,
                    run_set.error_count,
                    Utc::now(),
                )
                .await?;
            if changes != 1 {
                warn!(
                    %run_set_id,
                    changes,
                    "marking run set as canceling affected an unexpected number of rows"
                );
            }
        }

        let runs = self
            .run_store
            .get_runs(&RunsFilter::for_run_set(run_set_id).with_statuses(NON_TERMINAL_RUN_STATUSES))
            .await?;

        let mut details = AbortRequestDetails::default();
        for run in &runs {
            match self.engine.cancel_run(run).await {
                Ok(()) => {
                    self.metrics.record_outbound_request("cancel_run", true);
                    details.submitted_ids.push(run.run_id);
                }
                Err(err) => {
                    self.metrics.record_outbound_request("cancel_run", false);
                    error!(
                        run_id = %run.run_id,
                        engine_id = run.engine_id.as_deref().unwrap_or("<none>"),
                        ?err,
                        "failed to submit cancellation to the engine"
                    );
                    details.failed_ids.push(run.run_id.to_string());
                }
            }
        }

        info!(
            %run_set_id,
            submitted = details.submitted_ids.len(),
            failed = details.failed_ids.len(),
            "run set abort fan-out completed"
        );
        Ok(details)
    }
}
