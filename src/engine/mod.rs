//! Execution engine client seam.
//!
//! The orchestrator only ever talks to the engine through [`WorkflowEngine`];
//! the HTTP implementation lives in [`http`] and tests substitute
//! programmable fakes.

mod http;

pub use http::HttpEngineClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::models::{Run, RunStatus};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("engine returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("run {run_id} has no engine id")]
    MissingEngineId { run_id: uuid::Uuid },

    #[error("unexpected engine response: {0}")]
    Malformed(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Lightweight status summary for one engine-side run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub engine_id: String,
    pub status: RunStatus,
    /// When the engine last changed the run's state: end time if present,
    /// else start time, else submission time.
    pub status_changed_at: Option<DateTime<Utc>>,
}

/// Client for the external workflow execution engine.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Fetch the current status summary for a run by its engine id.
    async fn run_summary(&self, engine_id: &str) -> EngineResult<RunSummary>;

    /// Fetch the output payload of a completed run.
    async fn get_outputs(&self, engine_id: &str) -> EngineResult<Value>;

    /// Fetch a human-readable failure explanation for an errored run.
    /// Returns an empty string when the engine reports no failures.
    async fn get_run_errors(&self, run: &Run) -> EngineResult<String>;

    /// Request cancellation of an in-flight run. The engine's own terminal
    /// state, observed by later polls, is the source of truth for whether
    /// the cancellation took effect.
    async fn cancel_run(&self, run: &Run) -> EngineResult<()>;
}
