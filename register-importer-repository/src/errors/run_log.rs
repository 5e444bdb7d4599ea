use thiserror::Error;

#[derive(Debug, Error)]
/// Represents errors that can occur within the run-log repository.
pub enum RunLogRepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("No import run with id {0}")]
    RunNotFound(i64),
}
