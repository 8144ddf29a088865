//! Run completion and results handling.
//!
//! [`RunCompletionHandler::update_results`] is the single funnel through
//! which every run status transition is persisted. Two independent triggers
//! feed it: the pull-based runs poller, and a push-based callback through
//! which the engine itself reports completion. Both paths are idempotent
//! against the no-op case, so a duplicate push after a successful poll (or
//! vice versa) is a harmless timestamp refresh.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::WorkflowEngine;
use crate::metrics::MetricsSink;
use crate::models::{Run, RunStatus};
use crate::records::{has_output_definitions, OutputBuilder, RecordStore};
use crate::store::RunStore;

/// Outcome of one completion attempt, mapped by HTTP callers onto a status
/// code (`Success` → 200, `Error` → 500, `Validation` → 400).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunCompletionResult {
    /// The transition (or timestamp refresh) was persisted.
    Success,
    /// A retriable failure: the engine, store, or database did not cooperate;
    /// the caller decides whether to retry.
    Error,
    /// A permanent failure for this payload: the output schema did not match
    /// the run's output definition, or the run id is unknown.
    Validation,
}

impl RunCompletionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// How output processing failed, and whether a retry could help.
enum OutputFailure {
    /// Coercion/schema mismatch; retrying the same payload cannot succeed.
    Validation(String),
    /// Output fetch or record-store write failure; retriable upstream.
    Retriable(String),
}

pub struct RunCompletionHandler {
    run_store: Arc<dyn RunStore>,
    engine: Arc<dyn WorkflowEngine>,
    record_store: Arc<dyn RecordStore>,
    output_builder: Arc<dyn OutputBuilder>,
    metrics: Arc<dyn MetricsSink>,
}

impl RunCompletionHandler {
    pub fn new(
        run_store: Arc<dyn RunStore>,
        engine: Arc<dyn WorkflowEngine>,
        record_store: Arc<dyn RecordStore>,
        output_builder: Arc<dyn OutputBuilder>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            run_store,
            engine,
            record_store,
            output_builder,
            metrics,
        }
    }

    /// Push-callback entry point: resolve the run by id, then delegate to
    /// [`Self::update_results`]. An unknown run id is a validation failure.
    pub async fn update_results_by_run_id(
        &self,
        run_id: Uuid,
        new_status: RunStatus,
        outputs: Option<Value>,
    ) -> RunCompletionResult {
        let run = match self.run_store.get_run(run_id).await {
            Ok(run) => run,
            Err(err) => {
                error!(%run_id, ?err, "failed to load run for completion callback");
                return RunCompletionResult::Error;
            }
        };
        match run {
            Some(run) => self.update_results(&run, new_status, outputs, None).await,
            None => {
                warn!(%run_id, "completion callback for unknown run");
                RunCompletionResult::Validation
            }
        }
    }

    /// Reconcile an engine-reported status against the persisted run.
    ///
    /// `outputs` is an inline output payload when the caller already has one;
    /// for a completed run without one, the outputs are fetched from the
    /// engine. `engine_changed_at` is the engine-side state change time and
    /// defaults to now.
    pub async fn update_results(
        &self,
        run: &Run,
        new_status: RunStatus,
        outputs: Option<Value>,
        engine_changed_at: Option<DateTime<Utc>>,
    ) -> RunCompletionResult {
        let started = Instant::now();
        let result = self
            .update_results_inner(run, new_status, outputs, engine_changed_at)
            .await;
        self.metrics.record_method_completion(
            "update_results",
            result.is_success(),
            started.elapsed(),
        );
        result
    }

    async fn update_results_inner(
        &self,
        run: &Run,
        new_status: RunStatus,
        outputs: Option<Value>,
        engine_changed_at: Option<DateTime<Utc>>,
    ) -> RunCompletionResult {
        let changed_at = engine_changed_at.unwrap_or_else(Utc::now);

        // Idempotent no-op: nothing changed, nothing to write back. A second
        // poll or a duplicate push lands here and only refreshes the poll
        // timestamp, which keeps the run off the front of the candidate queue.
        if run.status == new_status && outputs.is_none() {
            return self.refresh_last_polled(run).await;
        }

        let mut errors: Vec<String> = Vec::new();
        let mut final_status = new_status;

        if new_status == RunStatus::Complete {
            if let Err(failure) = self.process_outputs(run, outputs).await {
                // A completed workflow whose outputs cannot be delivered is
                // not COMPLETE from the caller's point of view: demote to a
                // system error and keep the failure text.
                let (message, result_on_persist) = match failure {
                    OutputFailure::Validation(message) => {
                        (message, RunCompletionResult::Validation)
                    }
                    OutputFailure::Retriable(message) => (message, RunCompletionResult::Error),
                };
                error!(run_id = %run.run_id, %message, "output write-back failed, demoting run");
                errors.push(message);
                final_status = RunStatus::SystemError;
                let persisted = self
                    .persist_status(run, final_status, &errors, changed_at)
                    .await;
                return match persisted {
                    RunCompletionResult::Success => result_on_persist,
                    other => other,
                };
            }
        } else if new_status.in_error_state() {
            errors = self.collect_engine_errors(run).await;
        }

        self.metrics.record_status_update(final_status);
        self.persist_status(run, final_status, &errors, changed_at)
            .await
    }

    /// Deliver a completed run's outputs to the record store, when the run
    /// set defines any.
    async fn process_outputs(
        &self,
        run: &Run,
        inline: Option<Value>,
    ) -> Result<(), OutputFailure> {
        let has_definitions = has_output_definitions(&run.run_set.output_definition)
            .map_err(|err| {
                OutputFailure::Validation(format!(
                    "invalid output definition for run {}: {err}",
                    run.run_id
                ))
            })?;

        if !has_definitions {
            if inline.as_ref().is_some_and(payload_has_entries) {
                warn!(
                    run_id = %run.run_id,
                    "engine supplied outputs but the run set defines none; ignoring"
                );
            }
            return Ok(());
        }

        let payload = match inline {
            Some(payload) => payload,
            None => {
                let engine_id = run.engine_id.as_deref().ok_or_else(|| {
                    OutputFailure::Retriable(format!(
                        "run {} completed without an engine id; cannot fetch outputs",
                        run.run_id
                    ))
                })?;
                let fetched = self.engine.get_outputs(engine_id).await;
                self.metrics
                    .record_outbound_request("engine_get_outputs", fetched.is_ok());
                fetched.map_err(|err| {
                    OutputFailure::Retriable(format!(
                        "error retrieving workflow outputs for record {} from run {} (engine id {engine_id}): {err}",
                        run.record_id, run.run_id
                    ))
                })?
            }
        };

        let attributes = self
            .output_builder
            .build_outputs(&run.run_set.output_definition, &payload)
            .map_err(|err| {
                OutputFailure::Validation(format!(
                    "error processing workflow output attributes for record {} from run {}: {err}",
                    run.record_id, run.run_id
                ))
            })?;

        if attributes.is_empty() {
            return Ok(());
        }

        info!(
            run_id = %run.run_id,
            record_id = %run.record_id,
            "writing output attributes back to record store"
        );
        let written = self
            .record_store
            .update_record(&attributes, &run.run_set.record_type, &run.record_id)
            .await;
        self.metrics
            .record_outbound_request("record_store_update", written.is_ok());
        written.map_err(|err| {
            OutputFailure::Retriable(format!(
                "error updating record {} from run {}: {err}",
                run.record_id, run.run_id
            ))
        })
    }

    /// Fetch failure text from the engine; a failed retrieval is itself
    /// captured rather than losing the error entirely.
    async fn collect_engine_errors(&self, run: &Run) -> Vec<String> {
        let fetched = self.engine.get_run_errors(run).await;
        self.metrics
            .record_outbound_request("engine_get_run_errors", fetched.is_ok());
        match fetched {
            Ok(message) if message.is_empty() => Vec::new(),
            Ok(message) => vec![message],
            Err(err) => {
                error!(run_id = %run.run_id, ?err, "failed to fetch engine-level error");
                vec![format!("Error fetching engine-level error. Details: {err}")]
            }
        }
    }

    async fn refresh_last_polled(&self, run: &Run) -> RunCompletionResult {
        match self.run_store.update_last_polled(run.run_id).await {
            Ok(1) => RunCompletionResult::Success,
            Ok(changes) => {
                warn!(
                    run_id = %run.run_id,
                    status = %run.status,
                    changes,
                    "expected 1 row refreshing last_polled_timestamp"
                );
                RunCompletionResult::Error
            }
            Err(err) => {
                error!(run_id = %run.run_id, ?err, "failed to refresh last_polled_timestamp");
                RunCompletionResult::Error
            }
        }
    }

    async fn persist_status(
        &self,
        run: &Run,
        status: RunStatus,
        errors: &[String],
        changed_at: DateTime<Utc>,
    ) -> RunCompletionResult {
        let changes = if errors.is_empty() {
            info!(
                run_id = %run.run_id,
                from = %run.status,
                to = %status,
                "updating run status"
            );
            self.run_store
                .update_run_status(run.run_id, status, changed_at)
                .await
        } else {
            info!(
                run_id = %run.run_id,
                from = %run.status,
                to = %status,
                error_count = errors.len(),
                "updating run status with errors"
            );
            self.run_store
                .update_run_status_with_error(run.run_id, status, changed_at, &errors.join(", "))
                .await
        };

        match changes {
            Ok(1) => RunCompletionResult::Success,
            Ok(changes) => {
                // A concurrent update raced us; the row count is how lost
                // updates are detected, so report it instead of retrying.
                warn!(
                    run_id = %run.run_id,
                    from = %run.status,
                    to = %status,
                    changes,
                    "run status update affected an unexpected number of rows"
                );
                RunCompletionResult::Error
            }
            Err(err) => {
                error!(run_id = %run.run_id, ?err, "failed to persist run status");
                RunCompletionResult::Error
            }
        }
    }
}

fn payload_has_entries(payload: &Value) -> bool {
    match payload {
        Value::Object(map) => !map.is_empty(),
        Value::Null => false,
        _ => true,
    }
}
