//! Error types for the orchestrator module of the Register Importer Pipeline.
use register_importer_repository::RegisterRepositoryError;
use thiserror::Error;

use crate::errors::consumer::ConsumerError;
use crate::errors::normalize::NormalizeError;

/// Represents errors that can abort an import run.
///
/// Any of these unwinds through the run transaction: the rollback leaves
/// every target table as it was before the run began.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] feedfetch::FetchError),
    #[error("Consumer error: {0}")]
    Consumer(#[from] ConsumerError),
    #[error("Normalize error: {0}")]
    Normalize(#[from] NormalizeError),
    #[error("Repository error: {0}")]
    Repository(#[from] RegisterRepositoryError),
    #[error("Invalid spec for table \"{table}\": {message}")]
    InvalidSpec {
        table: &'static str,
        message: String,
    },
    #[error("Feed \"{feed}\" has no table named \"{table}\"")]
    UnknownTable { feed: &'static str, table: String },
    #[error("Source discovery for \"{feed}\" failed: {message}")]
    Discovery { feed: &'static str, message: String },
}
