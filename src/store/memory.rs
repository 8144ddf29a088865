//! In-memory store for tests and local runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{RunSetStore, RunStore, RunsFilter, StatusCount, StoreError, StoreResult};
use crate::models::{truncate_error_message, Run, RunSet, RunSetStatus, RunStatus};

/// Store that keeps runs and run sets in process memory.
///
/// Mirrors the Postgres store's row-count semantics so orchestrator tests
/// exercise the same conditional-update paths.
#[derive(Clone, Default)]
pub struct MemoryStore {
    runs: Arc<Mutex<HashMap<Uuid, Run>>>,
    run_sets: Arc<Mutex<HashMap<Uuid, RunSet>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot one run, with its embedded run set refreshed.
    pub fn run(&self, run_id: Uuid) -> Option<Run> {
        let run = self.runs.lock().expect("runs poisoned").get(&run_id).cloned()?;
        Some(self.with_current_run_set(run))
    }

    /// Snapshot one run set.
    pub fn run_set(&self, run_set_id: Uuid) -> Option<RunSet> {
        self.run_sets
            .lock()
            .expect("run sets poisoned")
            .get(&run_set_id)
            .cloned()
    }

    fn with_current_run_set(&self, mut run: Run) -> Run {
        let run_sets = self.run_sets.lock().expect("run sets poisoned");
        if let Some(run_set) = run_sets.get(&run.run_set_id()) {
            run.run_set = run_set.clone();
        }
        run
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create_run(&self, run: &Run) -> StoreResult<()> {
        self.runs
            .lock()
            .expect("runs poisoned")
            .insert(run.run_id, run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> StoreResult<Option<Run>> {
        Ok(self.run(run_id))
    }

    async fn get_runs(&self, filter: &RunsFilter) -> StoreResult<Vec<Run>> {
        let matching: Vec<Run> = {
            let runs = self.runs.lock().expect("runs poisoned");
            runs.values().filter(|r| filter.matches(r)).cloned().collect()
        };
        let mut matching: Vec<Run> = matching
            .into_iter()
            .map(|r| self.with_current_run_set(r))
            .collect();
        matching.sort_by_key(|r| r.submission_timestamp);
        Ok(matching)
    }

    async fn get_run_status_counts(
        &self,
        filter: &RunsFilter,
    ) -> StoreResult<HashMap<RunStatus, StatusCount>> {
        let runs = self.runs.lock().expect("runs poisoned");
        let mut counts: HashMap<RunStatus, StatusCount> = HashMap::new();
        for run in runs.values().filter(|r| filter.matches(r)) {
            let entry = counts.entry(run.status).or_default();
            entry.count += 1;
            entry.last_modified = match entry.last_modified {
                Some(existing) => Some(existing.max(run.last_modified_timestamp)),
                None => Some(run.last_modified_timestamp),
            };
        }
        Ok(counts)
    }

    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        changed_at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut runs = self.runs.lock().expect("runs poisoned");
        match runs.get_mut(&run_id) {
            Some(run) => {
                run.status = status;
                run.last_modified_timestamp = changed_at;
                run.last_polled_timestamp = Some(Utc::now());
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn update_run_status_with_error(
        &self,
        run_id: Uuid,
        status: RunStatus,
        changed_at: DateTime<Utc>,
        error_messages: &str,
    ) -> StoreResult<u64> {
        let mut runs = self.runs.lock().expect("runs poisoned");
        match runs.get_mut(&run_id) {
            Some(run) => {
                run.status = status;
                run.last_modified_timestamp = changed_at;
                run.last_polled_timestamp = Some(Utc::now());
                run.error_messages = Some(truncate_error_message(error_messages));
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn update_last_polled(&self, run_id: Uuid) -> StoreResult<u64> {
        let mut runs = self.runs.lock().expect("runs poisoned");
        match runs.get_mut(&run_id) {
            Some(run) => {
                run.last_polled_timestamp = Some(Utc::now());
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

#[async_trait]
impl RunSetStore for MemoryStore {
    async fn create_run_set(&self, run_set: &RunSet) -> StoreResult<()> {
        self.run_sets
            .lock()
            .expect("run sets poisoned")
            .insert(run_set.run_set_id, run_set.clone());
        Ok(())
    }

    async fn get_run_set(&self, run_set_id: Uuid) -> StoreResult<RunSet> {
        self.run_sets
            .lock()
            .expect("run sets poisoned")
            .get(&run_set_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("run set {run_set_id}")))
    }

    async fn get_run_sets(&self, non_terminal_only: bool) -> StoreResult<Vec<RunSet>> {
        let run_sets = self.run_sets.lock().expect("run sets poisoned");
        let mut matching: Vec<RunSet> = run_sets
            .values()
            .filter(|rs| !non_terminal_only || rs.status.non_terminal())
            .cloned()
            .collect();
        matching.sort_by_key(|rs| rs.submission_timestamp);
        Ok(matching)
    }

    async fn update_state_and_run_details(
        &self,
        run_set_id: Uuid,
        status: RunSetStatus,
        run_count: i32,
        error_count: i32,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut run_sets = self.run_sets.lock().expect("run sets poisoned");
        match run_sets.get_mut(&run_set_id) {
            Some(run_set) => {
                run_set.status = status;
                run_set.run_count = run_count;
                run_set.error_count = error_count;
                run_set.last_modified_timestamp = timestamp;
                run_set.last_polled_timestamp = Some(Utc::now());
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn update_last_polled(&self, run_set_ids: &[Uuid]) -> StoreResult<u64> {
        let mut run_sets = self.run_sets.lock().expect("run sets poisoned");
        let mut affected = 0;
        for id in run_set_ids {
            if let Some(run_set) = run_sets.get_mut(id) {
                run_set.last_polled_timestamp = Some(Utc::now());
                affected += 1;
            }
        }
        Ok(affected)
    }
}
