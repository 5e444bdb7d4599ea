//! Integration tests for the PostgreSQL run-log repository.
//!
//! Run with: `cargo test --test postgres_run_log`

use register_importer_repository::{
    PostgresRunLogRepository, RunLogRepository, RunLogRepositoryError,
};
use register_importer_shared::types::RunStatus;

#[sqlx::test(migrations = "src/postgres/migrations")]
async fn run_lifecycle_completed(pool: sqlx::PgPool) {
    let repository = PostgresRunLogRepository::new(pool);

    let run = repository
        .start_run("import_oscr", "--sample 200")
        .await
        .unwrap();
    assert_eq!(run.command, "import_oscr");
    assert_eq!(run.status, RunStatus::Running);
    assert!(run.completed.is_none());

    repository
        .append_log(run.id, "fetched 3 files")
        .await
        .unwrap();
    repository
        .append_log(run.id, "staged 200 charities")
        .await
        .unwrap();
    repository.complete_run(run.id).await.unwrap();

    let finished = repository.get_run(run.id).await.unwrap();
    assert_eq!(finished.status, RunStatus::Completed);
    assert!(finished.completed.is_some());
    assert_eq!(finished.log, "fetched 3 files\nstaged 200 charities\n");
}

#[sqlx::test(migrations = "src/postgres/migrations")]
async fn failed_run_keeps_the_error_in_the_log(pool: sqlx::PgPool) {
    let repository = PostgresRunLogRepository::new(pool);

    let run = repository.start_run("import_companies", "").await.unwrap();
    repository
        .fail_run(run.id, "bulk statement failed on company")
        .await
        .unwrap();

    let failed = repository.get_run(run.id).await.unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert!(failed.log.contains("bulk statement failed on company"));
    assert!(failed.completed.is_some());
}

#[sqlx::test(migrations = "src/postgres/migrations")]
async fn unknown_run_id_is_an_error(pool: sqlx::PgPool) {
    let repository = PostgresRunLogRepository::new(pool);
    let err = repository.append_log(9999, "line").await.unwrap_err();
    assert!(matches!(err, RunLogRepositoryError::RunNotFound(9999)));
    let err = repository.get_run(9999).await.unwrap_err();
    assert!(matches!(err, RunLogRepositoryError::RunNotFound(9999)));
}

#[sqlx::test(migrations = "src/postgres/migrations")]
async fn sweep_marks_only_stale_running_runs(pool: sqlx::PgPool) {
    let repository = PostgresRunLogRepository::new(pool.clone());

    let fresh = repository.start_run("import_ccni", "").await.unwrap();
    let stale = repository.start_run("import_ccew", "").await.unwrap();
    sqlx::query("UPDATE import_runs SET updated = now() - interval '2 days' WHERE id = $1")
        .bind(stale.id)
        .execute(&pool)
        .await
        .unwrap();

    let swept = repository.sweep_stale(24).await.unwrap();
    assert_eq!(swept, 1);
    assert_eq!(
        repository.get_run(stale.id).await.unwrap().status,
        RunStatus::Failed
    );
    assert_eq!(
        repository.get_run(fresh.id).await.unwrap().status,
        RunStatus::Running
    );
}
