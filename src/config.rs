//! Configuration loading from environment variables.
//!
//! Uses the following environment variables:
//! - `RUNTRACK_DATABASE_URL`: PostgreSQL connection string (required for the Postgres store)
//! - `RUNTRACK_ENGINE_URL`: base URL of the workflow execution engine (required)
//! - `RUNTRACK_RECORD_STORE_URL`: base URL of the external record store (optional)
//! - `RUNTRACK_MAX_POLL_SECONDS`: wall-clock budget for one runs poll batch (default: 20)
//! - `RUNTRACK_MAX_RUN_SET_POLL_SECONDS`: wall-clock budget for one run-set poll pass (default: 60)
//! - `RUNTRACK_POLL_BATCH_SIZE`: maximum runs selected per poll pass (default: 100)
//! - `RUNTRACK_MIN_SECONDS_BETWEEN_POLLS`: a run polled more recently than this is skipped (default: 1)

use std::env;

use anyhow::{Context, Result};

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,

    /// Base URL of the workflow execution engine
    pub engine_url: String,

    /// Base URL of the external record store, if write-back is wired up
    pub record_store_url: Option<String>,

    /// Poller budgets and batch limits
    pub poller: PollerConfig,
}

/// Budgets and limits for the polling loops.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Wall-clock budget for one runs poll batch, in seconds
    pub max_poll_seconds: u64,

    /// Wall-clock budget for one run-set poll pass, in seconds
    pub max_run_set_poll_seconds: u64,

    /// Maximum number of runs selected per poll pass
    pub batch_size: usize,

    /// Minimum seconds between status polls for the same run
    pub min_seconds_between_polls: i64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_poll_seconds: 20,
            max_run_set_poll_seconds: 60,
            batch_size: 100,
            min_seconds_between_polls: 1,
        }
    }
}

impl PollerConfig {
    fn from_env() -> Self {
        let defaults = Self::default();

        let max_poll_seconds = env::var("RUNTRACK_MAX_POLL_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_poll_seconds);

        let max_run_set_poll_seconds = env::var("RUNTRACK_MAX_RUN_SET_POLL_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_run_set_poll_seconds);

        let batch_size = env::var("RUNTRACK_POLL_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.batch_size);

        let min_seconds_between_polls = env::var("RUNTRACK_MIN_SECONDS_BETWEEN_POLLS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.min_seconds_between_polls);

        Self {
            max_poll_seconds,
            max_run_set_poll_seconds,
            batch_size,
            min_seconds_between_polls,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Loads `.env` file if present, then reads from environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("RUNTRACK_DATABASE_URL")
            .context("RUNTRACK_DATABASE_URL environment variable is required")?;

        let engine_url = env::var("RUNTRACK_ENGINE_URL")
            .context("RUNTRACK_ENGINE_URL environment variable is required")?;

        let record_store_url = env::var("RUNTRACK_RECORD_STORE_URL").ok();

        Ok(Self {
            database_url,
            engine_url,
            record_store_url,
            poller: PollerConfig::from_env(),
        })
    }

    /// Create a test configuration with defaults and tight budgets.
    pub fn test_config(database_url: &str) -> Self {
        Self {
            database_url: database_url.to_string(),
            engine_url: "http://localhost:8000".to_string(),
            record_store_url: None,
            poller: PollerConfig {
                max_poll_seconds: 5,
                max_run_set_poll_seconds: 10,
                batch_size: 50,
                min_seconds_between_polls: 0,
            },
        }
    }
}
