//! Runtrack - run lifecycle orchestration over an external workflow engine.
//!
//! Tracks workflow runs and run sets in Postgres, polls the engine for
//! status changes within wall-clock budgets, writes completed outputs back
//! to a record store, and fans out run-set cancellation.

pub mod completion;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod models;
pub mod monitoring;
pub mod observability;
pub mod records;
pub mod store;

pub use completion::{RunCompletionHandler, RunCompletionResult};
pub use config::{Config, PollerConfig};
pub use engine::{EngineError, HttpEngineClient, RunSummary, WorkflowEngine};
pub use metrics::{MetricsSink, NoopMetrics, Telemetry};
pub use models::{Run, RunSet, RunSetStatus, RunStatus};
pub use monitoring::{
    AbortRequestDetails, PickedUpdatableRuns, RunSetAbortManager, RunSetsPoller, SmartRunsPoller,
    UpdateResult, pick_updatable_runs,
};
pub use records::{CoercionError, HttpRecordStore, OutputBuilder, RecordStore};
pub use store::{MemoryStore, PgStore, RunSetStore, RunStore, RunsFilter, StoreError};
