//! HTTP client for a Cromwell-style execution engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{EngineError, EngineResult, RunSummary, WorkflowEngine};
use crate::models::{Run, RunStatus};

const API_VERSION: &str = "v1";

/// Engine-side failure messages cap out well below the run error column; the
/// engine often nests megabytes of caused-by chains.
const MAX_ENGINE_ERROR_CHARS: usize = 100;

pub struct HttpEngineClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    results: Vec<QueryResult>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    id: String,
    status: Option<String>,
    submission: Option<DateTime<Utc>>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct OutputsResponse {
    outputs: Value,
}

#[derive(Debug, Deserialize)]
struct MetadataResponse {
    #[serde(default)]
    failures: Vec<FailureMessage>,
}

#[derive(Debug, Deserialize)]
struct FailureMessage {
    message: Option<String>,
    #[serde(default, rename = "causedBy")]
    caused_by: Vec<FailureMessage>,
}

impl HttpEngineClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn workflows_url(&self, path: &str) -> String {
        format!("{}/api/workflows/{API_VERSION}/{path}", self.base_url)
    }

    async fn check(response: reqwest::Response) -> EngineResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(EngineError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Render a failure tree as `message (caused-by message (...))`, capped
    /// at [`MAX_ENGINE_ERROR_CHARS`].
    fn render_failures(failures: &[FailureMessage]) -> String {
        fn render(failures: &[FailureMessage]) -> String {
            let Some(first) = failures.first() else {
                return String::new();
            };
            let mut out = first.message.clone().unwrap_or_default();
            let caused_by = render(&first.caused_by);
            if !caused_by.is_empty() {
                out.push_str(" (");
                out.push_str(&caused_by);
                out.push(')');
            }
            out
        }

        let rendered = render(failures);
        if rendered.chars().count() > MAX_ENGINE_ERROR_CHARS {
            let cut = rendered
                .char_indices()
                .nth(MAX_ENGINE_ERROR_CHARS - 3)
                .map(|(idx, _)| idx)
                .unwrap_or(rendered.len());
            format!("{}...", &rendered[..cut])
        } else {
            rendered
        }
    }

    fn engine_id_of(run: &Run) -> EngineResult<&str> {
        run.engine_id
            .as_deref()
            .ok_or(EngineError::MissingEngineId { run_id: run.run_id })
    }
}

#[async_trait]
impl WorkflowEngine for HttpEngineClient {
    async fn run_summary(&self, engine_id: &str) -> EngineResult<RunSummary> {
        let url = self.workflows_url("query");
        debug!(engine_id, "querying engine run summary");
        let response = self
            .client
            .get(&url)
            .query(&[("id", engine_id)])
            .send()
            .await?;
        let body: QueryResponse = Self::check(response).await?.json().await?;

        let result = body.results.into_iter().next().ok_or_else(|| {
            EngineError::Malformed(format!("engine query returned no results for {engine_id}"))
        })?;

        let status = result
            .status
            .as_deref()
            .map(RunStatus::from_engine_status)
            .unwrap_or(RunStatus::Unknown);
        let status_changed_at = result.end.or(result.start).or(result.submission);

        Ok(RunSummary {
            engine_id: result.id,
            status,
            status_changed_at,
        })
    }

    async fn get_outputs(&self, engine_id: &str) -> EngineResult<Value> {
        let url = self.workflows_url(&format!("{engine_id}/outputs"));
        let response = self.client.get(&url).send().await?;
        let body: OutputsResponse = Self::check(response).await?.json().await?;
        Ok(body.outputs)
    }

    async fn get_run_errors(&self, run: &Run) -> EngineResult<String> {
        let engine_id = Self::engine_id_of(run)?;
        let url = self.workflows_url(&format!("{engine_id}/metadata"));
        let response = self
            .client
            .get(&url)
            .query(&[("includeKey", "failures")])
            .send()
            .await?;
        let body: MetadataResponse = Self::check(response).await?.json().await?;
        Ok(Self::render_failures(&body.failures))
    }

    async fn cancel_run(&self, run: &Run) -> EngineResult<()> {
        let engine_id = Self::engine_id_of(run)?;
        let url = self.workflows_url(&format!("{engine_id}/abort"));
        let response = self.client.post(&url).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}
