//! Error types for the Register Importer application.
//! Consolidates errors from the pipeline, repository and configuration
//! into one top-level type the binary can exit with.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] register_importer_pipeline::errors::OrchestratorError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Repository error: {0}")]
    Repository(#[from] register_importer_repository::RegisterRepositoryError),
    #[error("Run log error: {0}")]
    RunLog(#[from] register_importer_repository::RunLogRepositoryError),
    #[error("{name} must be set")]
    MissingEnv { name: &'static str },
}
