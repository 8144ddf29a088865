//! Persistence seam for runs and run sets.
//!
//! The orchestrator talks to the database only through [`RunStore`] and
//! [`RunSetStore`]. Every mutating operation returns the number of rows it
//! affected: conditional update-by-id with an affected-row check is the
//! concurrency-control primitive used throughout instead of locking, so
//! callers always verify the count rather than trusting the write.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Run, RunSet, RunSetStatus, RunStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid stored value: {0}")]
    InvalidValue(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Filter for run queries: by owning run set, by status set, by engine id.
/// An unset field matches everything.
#[derive(Debug, Clone, Default)]
pub struct RunsFilter {
    pub run_set_id: Option<Uuid>,
    pub statuses: Option<Vec<RunStatus>>,
    pub engine_id: Option<String>,
}

impl RunsFilter {
    pub fn for_run_set(run_set_id: Uuid) -> Self {
        Self {
            run_set_id: Some(run_set_id),
            ..Self::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[RunStatus]) -> Self {
        self.statuses = Some(statuses.to_vec());
        self
    }

    pub fn matches(&self, run: &Run) -> bool {
        if let Some(run_set_id) = self.run_set_id {
            if run.run_set_id() != run_set_id {
                return false;
            }
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&run.status) {
                return false;
            }
        }
        if let Some(engine_id) = &self.engine_id {
            if run.engine_id.as_deref() != Some(engine_id.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Per-status aggregate over a set of runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusCount {
    pub count: i64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Persistence operations for individual runs.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, run: &Run) -> StoreResult<()>;

    async fn get_run(&self, run_id: Uuid) -> StoreResult<Option<Run>>;

    async fn get_runs(&self, filter: &RunsFilter) -> StoreResult<Vec<Run>>;

    /// Group member runs by status, with the latest modification time seen
    /// per status. The run set poller recomputes counts from this, never
    /// increments them.
    async fn get_run_status_counts(
        &self,
        filter: &RunsFilter,
    ) -> StoreResult<HashMap<RunStatus, StatusCount>>;

    /// Conditionally update status; sets `last_modified_timestamp` to
    /// `changed_at` and bumps `last_polled_timestamp`. Returns rows affected.
    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        changed_at: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Like [`RunStore::update_run_status`], also storing the (pre-truncated)
    /// error message. Returns rows affected.
    async fn update_run_status_with_error(
        &self,
        run_id: Uuid,
        status: RunStatus,
        changed_at: DateTime<Utc>,
        error_messages: &str,
    ) -> StoreResult<u64>;

    /// Bump only `last_polled_timestamp`. Returns rows affected.
    async fn update_last_polled(&self, run_id: Uuid) -> StoreResult<u64>;
}

/// Persistence operations for run sets.
#[async_trait]
pub trait RunSetStore: Send + Sync {
    async fn create_run_set(&self, run_set: &RunSet) -> StoreResult<()>;

    async fn get_run_set(&self, run_set_id: Uuid) -> StoreResult<RunSet>;

    /// All run sets, or only the non-terminal ones.
    async fn get_run_sets(&self, non_terminal_only: bool) -> StoreResult<Vec<RunSet>>;

    /// Persist the aggregate status together with recomputed run/error
    /// counts. Returns rows affected.
    async fn update_state_and_run_details(
        &self,
        run_set_id: Uuid,
        status: RunSetStatus,
        run_count: i32,
        error_count: i32,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Bump `last_polled_timestamp` for the given sets. Returns rows affected.
    async fn update_last_polled(&self, run_set_ids: &[Uuid]) -> StoreResult<u64>;
}
