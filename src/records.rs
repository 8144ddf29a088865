//! External record store and output coercion seams.
//!
//! The type-coercion engine that converts engine output payloads into typed
//! record attributes is an external collaborator: this core consumes
//! [`OutputBuilder`] and never re-implements the conversion rules. The record
//! store is the external data-table service the coerced attributes are
//! written back to.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Attributes written back onto one record of the external store.
pub type RecordAttributes = serde_json::Map<String, Value>;

#[derive(Debug, Error)]
pub enum CoercionError {
    #[error("output {name} is missing from the engine payload")]
    MissingOutput { name: String },

    #[error("output {name} cannot be coerced to {expected}: {detail}")]
    Incompatible {
        name: String,
        expected: String,
        detail: String,
    },

    #[error("invalid output definition: {0}")]
    InvalidDefinition(#[from] serde_json::Error),
}

/// The external type-coercion engine: turns an engine output payload into
/// typed record attributes according to a serialized output definition.
pub trait OutputBuilder: Send + Sync {
    fn build_outputs(
        &self,
        output_definition: &str,
        payload: &Value,
    ) -> Result<RecordAttributes, CoercionError>;
}

/// True when the serialized output definition names at least one output.
///
/// Runs whose definition is empty complete without any record-store write.
pub fn has_output_definitions(output_definition: &str) -> Result<bool, serde_json::Error> {
    let definitions: Vec<Value> = serde_json::from_str(output_definition)?;
    Ok(!definitions.is_empty())
}

#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("record store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("record store returned status {status}: {message}")]
    Api { status: u16, message: String },
}

/// Client for the external record store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Merge `attributes` onto the record identified by type and id.
    async fn update_record(
        &self,
        attributes: &RecordAttributes,
        record_type: &str,
        record_id: &str,
    ) -> Result<(), RecordStoreError>;
}

/// HTTP implementation that PATCHes record attributes onto the store.
pub struct HttpRecordStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRecordStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn update_record(
        &self,
        attributes: &RecordAttributes,
        record_type: &str,
        record_id: &str,
    ) -> Result<(), RecordStoreError> {
        let url = format!("{}/records/{record_type}/{record_id}", self.base_url);
        debug!(record_type, record_id, "updating record attributes");
        let body = serde_json::json!({ "attributes": attributes });
        let response = self.client.patch(&url).json(&body).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        Err(RecordStoreError::Api {
            status: status.as_u16(),
            message,
        })
    }
}
