use std::collections::HashSet;

use register_importer_shared::types::{NormalizedRecord, TableSpec};

use crate::errors::RegisterRepositoryError;

/// Transaction handle shared across a whole import run.
///
/// An import is all-or-nothing: every delete, bulk load and post-load
/// statement runs inside one transaction held open by the caller, so a
/// failed run leaves the tables exactly as they were.
pub type PgTransaction = sqlx::Transaction<'static, sqlx::Postgres>;

/// Trait for loading normalized register rows into the relational sink.
///
/// This trait provides a clean abstraction over the underlying data store.
/// Methods take the run transaction explicitly; the repository never
/// commits or rolls back on its own.
#[async_trait::async_trait]
pub trait RegisterRepository: Send + Sync {
    /// Whether the sink supports multi-row `INSERT .. ON CONFLICT` upserts.
    /// When false, callers get the per-row prepared-statement path instead.
    fn supports_native_upsert(&self) -> bool;

    /// Open the transaction for an import run.
    async fn begin(&self) -> Result<PgTransaction, RegisterRepositoryError>;

    /// Delete every row of a table, returning the number removed.
    async fn delete_all(
        &self,
        tx: &mut PgTransaction,
        table: &str,
    ) -> Result<u64, RegisterRepositoryError>;

    /// Delete the rows where `column` equals `value`, for tables shared
    /// between feeds that each reload only their own slice.
    async fn delete_where(
        &self,
        tx: &mut PgTransaction,
        table: &str,
        column: &str,
        value: &str,
    ) -> Result<u64, RegisterRepositoryError>;

    /// Bulk-insert staged rows. With `ignore_conflicts`, rows whose key
    /// already exists are skipped rather than failing the statement.
    async fn insert_rows(
        &self,
        tx: &mut PgTransaction,
        spec: &TableSpec,
        rows: &[NormalizedRecord],
        ignore_conflicts: bool,
    ) -> Result<u64, RegisterRepositoryError>;

    /// Bulk-upsert staged rows on the table's declared natural key,
    /// updating every non-key column from the incoming row.
    async fn upsert_rows(
        &self,
        tx: &mut PgTransaction,
        spec: &TableSpec,
        rows: &[NormalizedRecord],
    ) -> Result<u64, RegisterRepositoryError>;

    /// Realign a table's serial-id sequence with its current max id.
    async fn reset_sequence(
        &self,
        tx: &mut PgTransaction,
        table: &str,
    ) -> Result<(), RegisterRepositoryError>;

    /// Execute one post-load or pre-upsert statement, logging it under
    /// `title`, returning the number of rows affected.
    async fn execute_sql(
        &self,
        tx: &mut PgTransaction,
        title: &str,
        sql: &str,
    ) -> Result<u64, RegisterRepositoryError>;

    /// Load the distinct values of one text column, for run-scoped
    /// reference caches.
    async fn load_key_set(
        &self,
        tx: &mut PgTransaction,
        table: &str,
        column: &str,
    ) -> Result<HashSet<String>, RegisterRepositoryError>;
}
