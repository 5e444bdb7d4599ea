use register_importer_shared::types::ImportRun;

use crate::errors::RunLogRepositoryError;

/// Trait for tracking import runs in the `import_runs` table.
///
/// Run records live outside the data transaction on their own
/// connections, so a failed run still leaves a `failed` row with its
/// accumulated log behind after the data rollback.
#[async_trait::async_trait]
pub trait RunLogRepository: Send + Sync {
    /// Create a run in `running` status and return it.
    async fn start_run(
        &self,
        command: &str,
        cmd_options: &str,
    ) -> Result<ImportRun, RunLogRepositoryError>;

    /// Append one line to the run's log text.
    async fn append_log(&self, run_id: i64, line: &str) -> Result<(), RunLogRepositoryError>;

    async fn complete_run(&self, run_id: i64) -> Result<(), RunLogRepositoryError>;

    async fn fail_run(&self, run_id: i64, message: &str) -> Result<(), RunLogRepositoryError>;

    async fn get_run(&self, run_id: i64) -> Result<ImportRun, RunLogRepositoryError>;

    /// Mark runs stuck in `running` for longer than `stale_hours` as
    /// failed, returning how many were swept.
    async fn sweep_stale(&self, stale_hours: i64) -> Result<u64, RunLogRepositoryError>;
}
