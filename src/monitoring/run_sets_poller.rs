//! Run-set-level aggregation built on top of the runs poller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{pick_updatable_runs, SmartRunsPoller, UpdateResult};
use crate::config::PollerConfig;
use crate::metrics::MetricsSink;
use crate::models::{RunSet, RunSetStatus, RunStatus, NON_TERMINAL_RUN_STATUSES};
use crate::store::{RunSetStore, RunStore, RunsFilter, StoreResult};

/// Refreshes run sets by polling their member runs and re-deriving the
/// aggregate status and run/error counts from the store.
pub struct RunSetsPoller {
    runs_poller: Arc<SmartRunsPoller>,
    run_store: Arc<dyn RunStore>,
    run_set_store: Arc<dyn RunSetStore>,
    config: PollerConfig,
    metrics: Arc<dyn MetricsSink>,
}

struct StatusAndCounts {
    status: RunSetStatus,
    total_runs: i32,
    run_errors: i32,
    canceled_runs: i64,
    last_modified: Option<DateTime<Utc>>,
}

impl RunSetsPoller {
    pub fn new(
        runs_poller: Arc<SmartRunsPoller>,
        run_store: Arc<dyn RunStore>,
        run_set_store: Arc<dyn RunSetStore>,
        config: PollerConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            runs_poller,
            run_store,
            run_set_store,
            config,
            metrics,
        }
    }

    /// Load every non-terminal run set and refresh it. Loading the working
    /// set is the only hard failure; per-set update failures are contained.
    pub async fn update_all(&self) -> StoreResult<UpdateResult<RunSet>> {
        let run_sets = self.run_set_store.get_run_sets(true).await?;
        Ok(self.update_run_sets(run_sets).await)
    }

    /// Refresh the given run sets within the configured budget, most
    /// overdue first.
    pub async fn update_run_sets(&self, run_sets: Vec<RunSet>) -> UpdateResult<RunSet> {
        let started = Instant::now();
        let deadline =
            Utc::now() + Duration::seconds(self.config.max_run_set_poll_seconds as i64);

        let input_order: Vec<Uuid> = run_sets.iter().map(|rs| rs.run_set_id).collect();
        let mut by_id: HashMap<Uuid, RunSet> = run_sets
            .into_iter()
            .map(|rs| (rs.run_set_id, rs))
            .collect();

        let mut poll_order: Vec<Uuid> = by_id.keys().copied().collect();
        poll_order.sort_by_key(|id| by_id[id].last_polled_timestamp);

        let mut total_eligible = 0;
        let mut total_updated = 0;

        for run_set_id in poll_order {
            if by_id[&run_set_id].status.is_terminal() {
                continue;
            }
            total_eligible += 1;

            if Utc::now() >= deadline {
                continue;
            }

            let run_set = by_id.remove(&run_set_id).expect("poll order out of sync");
            match self.update_run_set(run_set, deadline).await {
                Ok(updated) => {
                    by_id.insert(run_set_id, updated);
                    total_updated += 1;
                }
                Err((run_set, err)) => {
                    // Contained: the set is retried on the next pass.
                    error!(%run_set_id, ?err, "failed to refresh run set");
                    by_id.insert(run_set_id, run_set);
                }
            }
        }

        self.metrics
            .count_event("run_set_updates_required", total_eligible as u64);
        self.metrics
            .count_event("run_set_updates_polled", total_updated as u64);
        let fully_updated = total_updated == total_eligible;
        self.metrics
            .record_method_completion("update_run_sets", fully_updated, started.elapsed());

        info!(
            polled = total_updated,
            eligible = total_eligible,
            elapsed_ms = started.elapsed().as_millis(),
            "run set status update pass completed"
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

    async fn update_run_set(
        &self,
        run_set: RunSet,
        overall_deadline: DateTime<Utc>,
    ) -> Result<RunSet, (RunSet, crate::store::StoreError)> {
        match self.refresh_run_set(&run_set, overall_deadline).await {
            Ok(updated) => Ok(updated),
            Err(err) => Err((run_set, err)),
        }
    }

    async fn refresh_run_set(
        &self,
        run_set: &RunSet,
        overall_deadline: DateTime<Utc>,
    ) -> StoreResult<RunSet> {
        let run_set_id = run_set.run_set_id;

        let member_runs = self
            .run_store
            .get_runs(&RunsFilter::for_run_set(run_set_id).with_statuses(NON_TERMINAL_RUN_STATUSES))
            .await?;

        // Narrow to the batch limit before burning budget on engine calls;
        // the eligible-pool size is the backlog signal.
        let picked = pick_updatable_runs(&member_runs, self.config.batch_size);
        self.metrics
            .count_event("poll_candidate_pool_size", picked.eligible_count as u64);

        // Neither the per-run nor the per-pass budget may be exceeded.
        let run_deadline = (Utc::now()
            + Duration::seconds(self.config.max_poll_seconds as i64))
        .min(overall_deadline);
        self.runs_poller
            .update_runs_until(picked.runs, run_deadline)
            .await;

        let aggregate = self.new_status_and_counts(run_set_id).await?;

        if run_set.status == RunSetStatus::Canceling
            && aggregate.status == RunSetStatus::Canceling
        {
            info!(
                %run_set_id,
                canceled = aggregate.canceled_runs,
                total = aggregate.total_runs,
                "run set cancellation still in progress"
            );
        }

        if aggregate.status != run_set.status
            || aggregate.total_runs != run_set.run_count
            || aggregate.run_errors != run_set.error_count
        {
            let changes = self
                .run_set_store
                .update_state_and_run_details(
                    run_set_id,
                    aggregate.status,
                    aggregate.total_runs,
                    aggregate.run_errors,
                    aggregate.last_modified.unwrap_or_else(Utc::now),
                )
                .await?;
            if changes != 1 {
                warn!(
                    %run_set_id,
                    changes,
                    "run set update affected an unexpected number of rows"
                );
            }
        } else {
            self.run_set_store.update_last_polled(&[run_set_id]).await?;
        }

        self.run_set_store.get_run_set(run_set_id).await
    }

    /// Recompute the aggregate status and counts from store-side status
    /// counts; counts are derived, never incremented. A canceling set whose
    /// runs have all reached the canceled state derives straight to
    /// canceled via the status precedence.
    async fn new_status_and_counts(&self, run_set_id: Uuid) -> StoreResult<StatusAndCounts> {
        let counts = self
            .run_store
            .get_run_status_counts(&RunsFilter::for_run_set(run_set_id))
            .await?;

        let by_status: HashMap<RunStatus, i64> =
            counts.iter().map(|(s, c)| (*s, c.count)).collect();

        let total_runs: i64 = by_status.values().sum();
        let run_errors: i64 = by_status
            .get(&RunStatus::SystemError)
            .copied()
            .unwrap_or(0)
            + by_status
                .get(&RunStatus::ExecutorError)
                .copied()
                .unwrap_or(0);
        let canceled_runs = by_status
            .get(&RunStatus::Canceled)
            .copied()
            .unwrap_or(0);
        let last_modified = counts
            .values()
            .filter_map(|c| c.last_modified)
            .max();

        Ok(StatusAndCounts {
            status: RunSetStatus::from_run_status_counts(&by_status),
            total_runs: total_runs as i32,
            run_errors: run_errors as i32,
            canceled_runs,
            last_modified,
        })
    }
}
