use thiserror::Error;

#[derive(Debug, Error)]
/// Represents errors that can occur within the register repository.
///
/// Statement-level failures carry the failing SQL so the caller's log shows
/// what was executed; the offending row sample is logged at the call site
/// before the error propagates.
pub enum RegisterRepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Statement failed: {statement}: {source}")]
    StatementFailed {
        statement: String,
        source: sqlx::Error,
    },
    #[error("Reconciler for \"{table}\" is {found}, expected {expected}")]
    ReconcilerState {
        table: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    #[error("Table \"{0}\" has no freshness column declared")]
    MissingFreshnessColumn(&'static str),
}
