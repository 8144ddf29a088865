//! Shared fakes and builders for the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use uuid::Uuid;

use runtrack::engine::{EngineError, EngineResult, RunSummary, WorkflowEngine};
use runtrack::records::{
    CoercionError, OutputBuilder, RecordAttributes, RecordStore, RecordStoreError,
};
use runtrack::{PollerConfig, Run, RunSet, RunSetStatus, RunStatus};

/// Output definition naming one output mapped onto one record attribute.
pub const SINGLE_OUTPUT_DEFINITION: &str = r#"[
    {"output_name": "wf.out", "destination": {"type": "record_update", "record_attribute": "out"}}
]"#;

// ============================================================================
// Builders
// ============================================================================

pub fn test_run_set() -> RunSet {
    RunSet {
        run_set_id: Uuid::new_v4(),
        method_version_id: Uuid::new_v4(),
        name: "test run set".to_string(),
        description: String::new(),
        is_template: false,
        status: RunSetStatus::Running,
        submission_timestamp: Utc::now(),
        last_modified_timestamp: Utc::now(),
        last_polled_timestamp: None,
        run_count: 0,
        error_count: 0,
        input_definition: "[]".to_string(),
        output_definition: "[]".to_string(),
        record_type: "sample".to_string(),
        user_id: "test-user".to_string(),
        original_workspace_id: None,
    }
}

pub fn run_set_with_outputs() -> RunSet {
    RunSet {
        output_definition: SINGLE_OUTPUT_DEFINITION.to_string(),
        ..test_run_set()
    }
}

pub fn make_run(run_set: &RunSet, status: RunStatus, engine_id: &str) -> Run {
    Run {
        run_id: Uuid::new_v4(),
        engine_id: Some(engine_id.to_string()),
        run_set: run_set.clone(),
        record_id: format!("rec-{engine_id}"),
        submission_timestamp: Utc::now(),
        status,
        last_modified_timestamp: Utc::now(),
        last_polled_timestamp: None,
        error_messages: None,
    }
}

pub fn polled_seconds_ago(mut run: Run, seconds: i64) -> Run {
    run.last_polled_timestamp = Some(Utc::now() - ChronoDuration::seconds(seconds));
    run
}

pub fn summary(engine_id: &str, status: RunStatus) -> RunSummary {
    RunSummary {
        engine_id: engine_id.to_string(),
        status,
        status_changed_at: Some(Utc::now()),
    }
}

/// Poller budgets loose enough that only tests that program a delay ever
/// hit the deadline.
pub fn test_poller_config() -> PollerConfig {
    PollerConfig {
        max_poll_seconds: 5,
        max_run_set_poll_seconds: 10,
        batch_size: 50,
        min_seconds_between_polls: 0,
    }
}

// ============================================================================
// Fake engine
// ============================================================================

/// Programmable engine double. Responses are keyed by engine id; calls are
/// recorded in order so tests can assert on poll ordering and fan-out.
#[derive(Default)]
pub struct FakeEngine {
    summaries: Mutex<HashMap<String, Result<RunSummary, String>>>,
    outputs: Mutex<HashMap<String, Result<Value, String>>>,
    run_errors: Mutex<HashMap<String, Result<String, String>>>,
    cancel_failures: Mutex<HashSet<String>>,
    summary_delays: Mutex<HashMap<String, Duration>>,
    polled: Mutex<Vec<String>>,
    canceled: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_summary(&self, engine_id: &str, status: RunStatus) {
        self.summaries
            .lock()
            .unwrap()
            .insert(engine_id.to_string(), Ok(summary(engine_id, status)));
    }

    pub fn fail_summary(&self, engine_id: &str, message: &str) {
        self.summaries
            .lock()
            .unwrap()
            .insert(engine_id.to_string(), Err(message.to_string()));
    }

    pub fn set_outputs(&self, engine_id: &str, payload: Value) {
        self.outputs
            .lock()
            .unwrap()
            .insert(engine_id.to_string(), Ok(payload));
    }

    pub fn fail_outputs(&self, engine_id: &str, message: &str) {
        self.outputs
            .lock()
            .unwrap()
            .insert(engine_id.to_string(), Err(message.to_string()));
    }

    pub fn set_run_errors(&self, engine_id: &str, message: &str) {
        self.run_errors
            .lock()
            .unwrap()
            .insert(engine_id.to_string(), Ok(message.to_string()));
    }

    pub fn fail_run_errors(&self, engine_id: &str, message: &str) {
        self.run_errors
            .lock()
            .unwrap()
            .insert(engine_id.to_string(), Err(message.to_string()));
    }

    pub fn fail_cancel(&self, engine_id: &str) {
        self.cancel_failures
            .lock()
            .unwrap()
            .insert(engine_id.to_string());
    }

    pub fn delay_summary(&self, engine_id: &str, delay: Duration) {
        self.summary_delays
            .lock()
            .unwrap()
            .insert(engine_id.to_string(), delay);
    }

    /// Engine ids queried for a status summary, in call order.
    pub fn polled(&self) -> Vec<String> {
        self.polled.lock().unwrap().clone()
    }

    /// Engine ids whose cancellation was accepted, in call order.
    pub fn canceled(&self) -> Vec<String> {
        self.canceled.lock().unwrap().clone()
    }
}

fn api_error(message: &str) -> EngineError {
    EngineError::Api {
        status: 503,
        message: message.to_string(),
    }
}

#[async_trait]
impl WorkflowEngine for FakeEngine {
    async fn run_summary(&self, engine_id: &str) -> EngineResult<RunSummary> {
        self.polled.lock().unwrap().push(engine_id.to_string());
        let delay = self.summary_delays.lock().unwrap().get(engine_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.summaries.lock().unwrap().get(engine_id) {
            Some(Ok(summary)) => Ok(summary.clone()),
            Some(Err(message)) => Err(api_error(message)),
            None => Err(EngineError::Malformed(format!(
                "no summary programmed for {engine_id}"
            ))),
        }
    }

    async fn get_outputs(&self, engine_id: &str) -> EngineResult<Value> {
        match self.outputs.lock().unwrap().get(engine_id) {
            Some(Ok(payload)) => Ok(payload.clone()),
            Some(Err(message)) => Err(api_error(message)),
            None => Err(EngineError::Malformed(format!(
                "no outputs programmed for {engine_id}"
            ))),
        }
    }

    async fn get_run_errors(&self, run: &Run) -> EngineResult<String> {
        let engine_id = run.engine_id.clone().unwrap_or_default();
        match self.run_errors.lock().unwrap().get(&engine_id) {
            Some(Ok(message)) => Ok(message.clone()),
            Some(Err(message)) => Err(api_error(message)),
            None => Ok(String::new()),
        }
    }

    async fn cancel_run(&self, run: &Run) -> EngineResult<()> {
        let engine_id = run
            .engine_id
            .clone()
            .ok_or(EngineError::MissingEngineId { run_id: run.run_id })?;
        if self.cancel_failures.lock().unwrap().contains(&engine_id) {
            return Err(api_error("abort rejected"));
        }
        self.canceled.lock().unwrap().push(engine_id);
        Ok(())
    }
}

// ============================================================================
// Fake record store
// ============================================================================

#[derive(Debug, Clone)]
pub struct RecordUpdate {
    pub record_type: String,
    pub record_id: String,
    pub attributes: RecordAttributes,
}

/// Record-store double that captures every write, or fails all of them.
#[derive(Default)]
pub struct FakeRecordStore {
    updates: Mutex<Vec<RecordUpdate>>,
    failure: Mutex<Option<String>>,
}

impl FakeRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn updates(&self) -> Vec<RecordUpdate> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordStore for FakeRecordStore {
    async fn update_record(
        &self,
        attributes: &RecordAttributes,
        record_type: &str,
        record_id: &str,
    ) -> Result<(), RecordStoreError> {
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(RecordStoreError::Api {
                status: 500,
                message,
            });
        }
        self.updates.lock().unwrap().push(RecordUpdate {
            record_type: record_type.to_string(),
            record_id: record_id.to_string(),
            attributes: attributes.clone(),
        });
        Ok(())
    }
}

// ============================================================================
// Fake output builder
// ============================================================================

/// Coercion double: passes the payload's `outputs` object through as record
/// attributes, or fails every build with a programmed detail.
#[derive(Default)]
pub struct FakeOutputBuilder {
    failure: Mutex<Option<String>>,
}

impl FakeOutputBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, detail: &str) {
        *self.failure.lock().unwrap() = Some(detail.to_string());
    }
}

impl OutputBuilder for FakeOutputBuilder {
    fn build_outputs(
        &self,
        _output_definition: &str,
        payload: &Value,
    ) -> Result<RecordAttributes, CoercionError> {
        if let Some(detail) = self.failure.lock().unwrap().clone() {
            return Err(CoercionError::Incompatible {
                name: "wf.out".to_string(),
                expected: "String".to_string(),
                detail,
            });
        }
        payload
            .get("outputs")
            .and_then(Value::as_object)
            .or_else(|| payload.as_object())
            .cloned()
            .ok_or(CoercionError::MissingOutput {
                name: "wf.out".to_string(),
            })
    }
}
