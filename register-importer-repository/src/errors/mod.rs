//! Error types for the register importer repository.
//! Consolidates and re-exports error types related to sink operations.
mod register;
mod run_log;

pub use register::RegisterRepositoryError;
pub use run_log::RunLogRepositoryError;
