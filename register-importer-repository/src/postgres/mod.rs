//! PostgreSQL implementations of the sink interfaces.
mod reconcile;
mod register_repository;
mod run_log_repository;

pub use reconcile::GenerationReconciler;
pub use register_repository::PostgresRegisterRepository;
pub use run_log_repository::PostgresRunLogRepository;
