//! # Register Importer Repository
//! This crate provides traits and implementations for writing imported
//! register rows and run records to the relational sink. It includes
//! definitions for errors, interfaces, and concrete implementations for
//! PostgreSQL.
pub mod errors;
pub mod interfaces;
pub mod postgres;

pub use errors::{RegisterRepositoryError, RunLogRepositoryError};
pub use interfaces::{PgTransaction, RegisterRepository, RunLogRepository};
pub use postgres::{GenerationReconciler, PostgresRegisterRepository, PostgresRunLogRepository};
