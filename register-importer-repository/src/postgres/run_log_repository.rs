//! PostgreSQL implementation of the run-log repository.
//!
//! Run records deliberately use their own pool connections rather than the
//! import's data transaction, so a failed import still leaves its run row
//! and log behind after the rollback.

use async_trait::async_trait;
use register_importer_shared::types::{ImportRun, RunStatus};
use sqlx::Row;
use sqlx::postgres::PgRow;

use crate::RunLogRepository;
use crate::errors::RunLogRepositoryError;

pub struct PostgresRunLogRepository {
    pool: sqlx::PgPool,
}

impl PostgresRunLogRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

fn run_from_row(row: &PgRow) -> Result<ImportRun, RunLogRepositoryError> {
    let status_code: i16 = row.try_get("status")?;
    Ok(ImportRun {
        id: row.try_get("id")?,
        command: row.try_get("command")?,
        cmd_options: row.try_get("cmd_options")?,
        started: row.try_get("started")?,
        updated: row.try_get("updated")?,
        completed: row.try_get("completed")?,
        status: RunStatus::from_i16(status_code).unwrap_or(RunStatus::Failed),
        log: row.try_get("log")?,
    })
}

const RUN_COLUMNS: &str = "id, command, cmd_options, started, updated, completed, status, log";

#[async_trait]
impl RunLogRepository for PostgresRunLogRepository {
    async fn start_run(
        &self,
        command: &str,
        cmd_options: &str,
    ) -> Result<ImportRun, RunLogRepositoryError> {
        let row = sqlx::query(&format!(
            "INSERT INTO import_runs (command, cmd_options, started, updated, status, log) \
             VALUES ($1, $2, now(), now(), $3, '') RETURNING {RUN_COLUMNS}"
        ))
        .bind(command)
        .bind(cmd_options)
        .bind(RunStatus::Running as i16)
        .fetch_one(&self.pool)
        .await?;
        run_from_row(&row)
    }

    async fn append_log(&self, run_id: i64, line: &str) -> Result<(), RunLogRepositoryError> {
        let result = sqlx::query(
            "UPDATE import_runs SET log = log || $2 || E'\\n', updated = now() WHERE id = $1",
        )
        .bind(run_id)
        .bind(line)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RunLogRepositoryError::RunNotFound(run_id));
        }
        Ok(())
    }

    async fn complete_run(&self, run_id: i64) -> Result<(), RunLogRepositoryError> {
        let result = sqlx::query(
            "UPDATE import_runs SET status = $2, completed = now(), updated = now() WHERE id = $1",
        )
        .bind(run_id)
        .bind(RunStatus::Completed as i16)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RunLogRepositoryError::RunNotFound(run_id));
        }
        Ok(())
    }

    async fn fail_run(&self, run_id: i64, message: &str) -> Result<(), RunLogRepositoryError> {
        let result = sqlx::query(
            "UPDATE import_runs SET status = $2, completed = now(), updated = now(), \
             log = log || $3 || E'\\n' WHERE id = $1",
        )
        .bind(run_id)
        .bind(RunStatus::Failed as i16)
        .bind(message)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RunLogRepositoryError::RunNotFound(run_id));
        }
        Ok(())
    }

    async fn get_run(&self, run_id: i64) -> Result<ImportRun, RunLogRepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM import_runs WHERE id = $1"
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RunLogRepositoryError::RunNotFound(run_id))?;
        run_from_row(&row)
    }

    async fn sweep_stale(&self, stale_hours: i64) -> Result<u64, RunLogRepositoryError> {
        let result = sqlx::query(
            "UPDATE import_runs SET status = $1, completed = now(), updated = now(), \
             log = log || 'marked failed: no update within the stale window' || E'\\n' \
             WHERE status = $2 AND updated < now() - make_interval(hours => $3::int)",
        )
        .bind(RunStatus::Failed as i16)
        .bind(RunStatus::Running as i16)
        .bind(stale_hours)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
