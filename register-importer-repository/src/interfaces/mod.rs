//! This module defines and re-exports the interfaces for the relational sink.
//! It serves as a central point for accessing traits related to row loading
//! and run tracking.
mod register;
mod run_log;

pub use register::{PgTransaction, RegisterRepository};
pub use run_log::RunLogRepository;
