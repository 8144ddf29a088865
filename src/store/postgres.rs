//! PostgreSQL store built on sqlx.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use super::{RunSetStore, RunStore, RunsFilter, StatusCount, StoreError, StoreResult};
use crate::models::{truncate_error_message, Run, RunSet, RunSetStatus, RunStatus};

/// Store backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the database and run migrations.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        Self::connect_with_pool_size(database_url, 10).await
    }

    /// Connect with a custom pool size.
    pub async fn connect_with_pool_size(
        database_url: &str,
        max_connections: u32,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_run_status(raw: &str) -> StoreResult<RunStatus> {
    RunStatus::parse(raw)
        .ok_or_else(|| StoreError::InvalidValue(format!("unknown run status {raw:?}")))
}

fn parse_run_set_status(raw: &str) -> StoreResult<RunSetStatus> {
    RunSetStatus::parse(raw)
        .ok_or_else(|| StoreError::InvalidValue(format!("unknown run set status {raw:?}")))
}

fn run_set_from_row(row: &PgRow) -> StoreResult<RunSet> {
    let status: String = row.try_get("rs_status")?;
    Ok(RunSet {
        run_set_id: row.try_get("run_set_id")?,
        method_version_id: row.try_get("method_version_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        is_template: row.try_get("is_template")?,
        status: parse_run_set_status(&status)?,
        submission_timestamp: row.try_get("rs_submission_timestamp")?,
        last_modified_timestamp: row.try_get("rs_last_modified_timestamp")?,
        last_polled_timestamp: row.try_get("rs_last_polled_timestamp")?,
        run_count: row.try_get("run_count")?,
        error_count: row.try_get("error_count")?,
        input_definition: row.try_get("input_definition")?,
        output_definition: row.try_get("output_definition")?,
        record_type: row.try_get("record_type")?,
        user_id: row.try_get("user_id")?,
        original_workspace_id: row.try_get("original_workspace_id")?,
    })
}

fn run_from_row(row: &PgRow) -> StoreResult<Run> {
    let status: String = row.try_get("status")?;
    Ok(Run {
        run_id: row.try_get("run_id")?,
        engine_id: row.try_get("engine_id")?,
        run_set: run_set_from_row(row)?,
        record_id: row.try_get("record_id")?,
        submission_timestamp: row.try_get("submission_timestamp")?,
        status: parse_run_status(&status)?,
        last_modified_timestamp: row.try_get("last_modified_timestamp")?,
        last_polled_timestamp: row.try_get("last_polled_timestamp")?,
        error_messages: row.try_get("error_messages")?,
    })
}

/// Columns selected for every run query; the run set is joined in so a run
/// always carries its owning set.
const RUN_SELECT: &str = r#"
    SELECT runs.run_id, runs.engine_id, runs.record_id,
           runs.submission_timestamp, runs.status,
           runs.last_modified_timestamp, runs.last_polled_timestamp,
           runs.error_messages,
           run_sets.run_set_id, run_sets.method_version_id, run_sets.name,
           run_sets.description, run_sets.is_template,
           run_sets.status AS rs_status,
           run_sets.submission_timestamp AS rs_submission_timestamp,
           run_sets.last_modified_timestamp AS rs_last_modified_timestamp,
           run_sets.last_polled_timestamp AS rs_last_polled_timestamp,
           run_sets.run_count, run_sets.error_count,
           run_sets.input_definition, run_sets.output_definition,
           run_sets.record_type, run_sets.user_id, run_sets.original_workspace_id
    FROM runs
    INNER JOIN run_sets ON runs.run_set_id = run_sets.run_set_id
"#;

const RUN_SET_SELECT: &str = r#"
    SELECT run_set_id, method_version_id, name, description, is_template,
           status AS rs_status,
           submission_timestamp AS rs_submission_timestamp,
           last_modified_timestamp AS rs_last_modified_timestamp,
           last_polled_timestamp AS rs_last_polled_timestamp,
           run_count, error_count, input_definition, output_definition,
           record_type, user_id, original_workspace_id
    FROM run_sets
"#;

fn status_strings(statuses: &[RunStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait]
impl RunStore for PgStore {
    async fn create_run(&self, run: &Run) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO runs (run_id, engine_id, run_set_id, record_id,
                              submission_timestamp, status,
                              last_modified_timestamp, last_polled_timestamp,
                              error_messages)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(run.run_id)
        .bind(&run.engine_id)
        .bind(run.run_set_id())
        .bind(&run.record_id)
        .bind(run.submission_timestamp)
        .bind(run.status.as_str())
        .bind(run.last_modified_timestamp)
        .bind(run.last_polled_timestamp)
        .bind(&run.error_messages)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> StoreResult<Option<Run>> {
        let sql = format!("{RUN_SELECT} WHERE runs.run_id = $1");
        let row = sqlx::query(&sql)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn get_runs(&self, filter: &RunsFilter) -> StoreResult<Vec<Run>> {
        let sql = format!(
            "{RUN_SELECT}
             WHERE ($1::uuid IS NULL OR runs.run_set_id = $1)
               AND ($2::text[] IS NULL OR runs.status = ANY($2))
               AND ($3::text IS NULL OR runs.engine_id = $3)
             ORDER BY runs.submission_timestamp"
        );
        let rows = sqlx::query(&sql)
            .bind(filter.run_set_id)
            .bind(filter.statuses.as_deref().map(status_strings))
            .bind(&filter.engine_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(run_from_row).collect()
    }

    async fn get_run_status_counts(
        &self,
        filter: &RunsFilter,
    ) -> StoreResult<HashMap<RunStatus, StatusCount>> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(1) AS status_count,
                   MAX(last_modified_timestamp) AS last_modified
            FROM runs
            WHERE ($1::uuid IS NULL OR run_set_id = $1)
              AND ($2::text[] IS NULL OR status = ANY($2))
              AND ($3::text IS NULL OR engine_id = $3)
            GROUP BY status
            "#,
        )
        .bind(filter.run_set_id)
        .bind(filter.statuses.as_deref().map(status_strings))
        .bind(&filter.engine_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::new();
        for row in rows {
            let raw: String = row.try_get("status")?;
            let status = parse_run_status(&raw)?;
            counts.insert(
                status,
                StatusCount {
                    count: row.try_get("status_count")?,
                    last_modified: row.try_get("last_modified")?,
                },
            );
        }
        Ok(counts)
    }

    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        changed_at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = $2, last_modified_timestamp = $3, last_polled_timestamp = NOW()
            WHERE run_id = $1
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(changed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_run_status_with_error(
        &self,
        run_id: Uuid,
        status: RunStatus,
        changed_at: DateTime<Utc>,
        error_messages: &str,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = $2, last_modified_timestamp = $3,
                last_polled_timestamp = NOW(), error_messages = $4
            WHERE run_id = $1
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(changed_at)
        .bind(truncate_error_message(error_messages))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_last_polled(&self, run_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE runs SET last_polled_timestamp = NOW() WHERE run_id = $1",
        )
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RunSetStore for PgStore {
    async fn create_run_set(&self, run_set: &RunSet) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO run_sets (run_set_id, method_version_id, name, description,
                                  is_template, status, submission_timestamp,
                                  last_modified_timestamp, last_polled_timestamp,
                                  run_count, error_count, input_definition,
                                  output_definition, record_type, user_id,
                                  original_workspace_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(run_set.run_set_id)
        .bind(run_set.method_version_id)
        .bind(&run_set.name)
        .bind(&run_set.description)
        .bind(run_set.is_template)
        .bind(run_set.status.as_str())
        .bind(run_set.submission_timestamp)
        .bind(run_set.last_modified_timestamp)
        .bind(run_set.last_polled_timestamp)
        .bind(run_set.run_count)
        .bind(run_set.error_count)
        .bind(&run_set.input_definition)
        .bind(&run_set.output_definition)
        .bind(&run_set.record_type)
        .bind(&run_set.user_id)
        .bind(run_set.original_workspace_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_run_set(&self, run_set_id: Uuid) -> StoreResult<RunSet> {
        let sql = format!("{RUN_SET_SELECT} WHERE run_set_id = $1");
        let row = sqlx::query(&sql)
            .bind(run_set_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("run set {run_set_id}")))?;
        run_set_from_row(&row)
    }

    async fn get_run_sets(&self, non_terminal_only: bool) -> StoreResult<Vec<RunSet>> {
        let sql = format!(
            "{RUN_SET_SELECT}
             WHERE ($1 = FALSE OR status NOT IN ('COMPLETE', 'ERROR', 'CANCELED'))
             ORDER BY submission_timestamp"
        );
        let rows = sqlx::query(&sql)
            .bind(non_terminal_only)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(run_set_from_row).collect()
    }

    async fn update_state_and_run_details(
        &self,
        run_set_id: Uuid,
        status: RunSetStatus,
        run_count: i32,
        error_count: i32,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE run_sets
            SET status = $2, run_count = $3, error_count = $4,
                last_modified_timestamp = $5, last_polled_timestamp = NOW()
            WHERE run_set_id = $1
            "#,
        )
        .bind(run_set_id)
        .bind(status.as_str())
        .bind(run_count)
        .bind(error_count)
        .bind(timestamp)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_last_polled(&self, run_set_ids: &[Uuid]) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE run_sets SET last_polled_timestamp = NOW() WHERE run_set_id = ANY($1)",
        )
        .bind(run_set_ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
