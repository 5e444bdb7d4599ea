//! PostgreSQL implementation of the register repository.
//!
//! Bulk loads go through multi-row `INSERT .. ON CONFLICT` statements built
//! with `QueryBuilder`, paginated to bound statement size. Sinks without
//! native upsert support fall back to one prepared statement per row.

use std::collections::HashSet;

use async_trait::async_trait;
use register_importer_shared::types::{FieldKind, FieldValue, NormalizedRecord, TableSpec};
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{Execute, Postgres, QueryBuilder, Row};
use tracing::{error, info};

use crate::RegisterRepository;
use crate::errors::RegisterRepositoryError;
use crate::interfaces::PgTransaction;

/// Upper bound on rows per bulk statement.
const PAGE_SIZE: usize = 10_000;
/// Postgres caps bind parameters per statement at u16::MAX.
const BIND_LIMIT: usize = 65_535;

/// PostgreSQL-backed register repository.
pub struct PostgresRegisterRepository {
    pool: sqlx::PgPool,
    native_upsert: bool,
}

impl PostgresRegisterRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self {
            pool,
            native_upsert: true,
        }
    }

    /// Force the per-row prepared-statement path.
    pub fn without_native_upsert(mut self) -> Self {
        self.native_upsert = false;
        self
    }

    fn page_rows(spec: &TableSpec) -> usize {
        (BIND_LIMIT / spec.columns.len().max(1)).min(PAGE_SIZE)
    }

    fn column_list(spec: &TableSpec) -> String {
        spec.columns
            .iter()
            .map(|c| format!("\"{}\"", c.column))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn conflict_clause(spec: &TableSpec, ignore: bool) -> String {
        let key = spec
            .key
            .iter()
            .map(|k| format!("\"{k}\""))
            .collect::<Vec<_>>()
            .join(", ");
        if ignore {
            return format!(" ON CONFLICT ({key}) DO NOTHING");
        }
        let updates = spec
            .non_key_columns()
            .map(|c| format!("\"{0}\" = EXCLUDED.\"{0}\"", c.column))
            .collect::<Vec<_>>()
            .join(", ");
        if updates.is_empty() {
            format!(" ON CONFLICT ({key}) DO NOTHING")
        } else {
            format!(" ON CONFLICT ({key}) DO UPDATE SET {updates}")
        }
    }

    /// Run one multi-row statement for a page of rows. On failure the
    /// statement head and a sample of the page are logged before the error
    /// propagates; the caller rolls back the enclosing transaction.
    async fn execute_page(
        &self,
        tx: &mut PgTransaction,
        spec: &TableSpec,
        page: &[NormalizedRecord],
        conflict: &str,
    ) -> Result<u64, RegisterRepositoryError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO \"{}\" ({}) ",
            spec.table,
            Self::column_list(spec)
        ));
        builder.push_values(page, |mut b, row| {
            for (column, value) in spec.columns.iter().zip(row.values()) {
                match value {
                    FieldValue::Null => match column.kind {
                        FieldKind::Integer => b.push_bind(Option::<i64>::None),
                        FieldKind::Float => b.push_bind(Option::<f64>::None),
                        FieldKind::Boolean => b.push_bind(Option::<bool>::None),
                        FieldKind::Date { .. } => b.push_bind(Option::<chrono::NaiveDate>::None),
                        _ => b.push_bind(Option::<String>::None),
                    },
                    FieldValue::Text(s) => b.push_bind(s.clone()),
                    FieldValue::Integer(i) => b.push_bind(*i),
                    FieldValue::Float(f) => b.push_bind(*f),
                    FieldValue::Boolean(v) => b.push_bind(*v),
                    FieldValue::Date(d) => b.push_bind(*d),
                };
            }
        });
        builder.push(conflict);

        let query = builder.build();
        let statement = query.sql().to_string();
        match query.execute(&mut **tx).await {
            Ok(result) => Ok(result.rows_affected()),
            Err(source) => {
                let head: String = statement.chars().take(500).collect();
                error!(table = spec.table, statement = %head, "bulk statement failed");
                for row in page.iter().take(10) {
                    error!(table = spec.table, row = ?row.values(), "offending row sample");
                }
                Err(RegisterRepositoryError::StatementFailed {
                    statement: head,
                    source,
                })
            }
        }
    }

    /// Per-row path: one prepared single-row insert reused for every row.
    async fn execute_rows(
        &self,
        tx: &mut PgTransaction,
        spec: &TableSpec,
        rows: &[NormalizedRecord],
        conflict: &str,
    ) -> Result<u64, RegisterRepositoryError> {
        let placeholders = (1..=spec.columns.len())
            .map(|n| format!("${n}"))
            .collect::<Vec<_>>()
            .join(", ");
        let statement = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({placeholders}){conflict}",
            spec.table,
            Self::column_list(spec)
        );

        let mut affected = 0;
        for row in rows {
            let mut query = sqlx::query(&statement);
            for (column, value) in spec.columns.iter().zip(row.values()) {
                query = bind_field(query, column.kind, value);
            }
            match query.execute(&mut **tx).await {
                Ok(result) => affected += result.rows_affected(),
                Err(source) => {
                    error!(table = spec.table, statement = %statement, row = ?row.values(), "row statement failed");
                    return Err(RegisterRepositoryError::StatementFailed {
                        statement,
                        source,
                    });
                }
            }
        }
        Ok(affected)
    }

    async fn load(
        &self,
        tx: &mut PgTransaction,
        spec: &TableSpec,
        rows: &[NormalizedRecord],
        conflict: &str,
    ) -> Result<u64, RegisterRepositoryError> {
        let mut affected = 0;
        if self.native_upsert {
            for page in rows.chunks(Self::page_rows(spec)) {
                affected += self.execute_page(tx, spec, page, conflict).await?;
            }
        } else {
            affected += self.execute_rows(tx, spec, rows, conflict).await?;
        }
        info!(
            table = spec.table,
            rows = rows.len(),
            affected,
            "bulk load complete"
        );
        Ok(affected)
    }
}

fn bind_field<'q>(
    query: Query<'q, Postgres, PgArguments>,
    kind: FieldKind,
    value: &'q FieldValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        FieldValue::Null => match kind {
            FieldKind::Integer => query.bind(Option::<i64>::None),
            FieldKind::Float => query.bind(Option::<f64>::None),
            FieldKind::Boolean => query.bind(Option::<bool>::None),
            FieldKind::Date { .. } => query.bind(Option::<chrono::NaiveDate>::None),
            _ => query.bind(Option::<String>::None),
        },
        FieldValue::Text(s) => query.bind(s.as_str()),
        FieldValue::Integer(i) => query.bind(*i),
        FieldValue::Float(f) => query.bind(*f),
        FieldValue::Boolean(v) => query.bind(*v),
        FieldValue::Date(d) => query.bind(*d),
    }
}

#[async_trait]
impl RegisterRepository for PostgresRegisterRepository {
    fn supports_native_upsert(&self) -> bool {
        self.native_upsert
    }

    async fn begin(&self) -> Result<PgTransaction, RegisterRepositoryError> {
        Ok(self.pool.begin().await?)
    }

    async fn delete_all(
        &self,
        tx: &mut PgTransaction,
        table: &str,
    ) -> Result<u64, RegisterRepositoryError> {
        let result = sqlx::query(&format!("DELETE FROM \"{table}\""))
            .execute(&mut **tx)
            .await?;
        info!(table, deleted = result.rows_affected(), "cleared table");
        Ok(result.rows_affected())
    }

    async fn delete_where(
        &self,
        tx: &mut PgTransaction,
        table: &str,
        column: &str,
        value: &str,
    ) -> Result<u64, RegisterRepositoryError> {
        let result = sqlx::query(&format!("DELETE FROM \"{table}\" WHERE \"{column}\" = $1"))
            .bind(value)
            .execute(&mut **tx)
            .await?;
        info!(
            table,
            column,
            value,
            deleted = result.rows_affected(),
            "cleared table slice"
        );
        Ok(result.rows_affected())
    }

    async fn insert_rows(
        &self,
        tx: &mut PgTransaction,
        spec: &TableSpec,
        rows: &[NormalizedRecord],
        ignore_conflicts: bool,
    ) -> Result<u64, RegisterRepositoryError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let conflict = if ignore_conflicts {
            Self::conflict_clause(spec, true)
        } else {
            String::new()
        };
        self.load(tx, spec, rows, &conflict).await
    }

    async fn upsert_rows(
        &self,
        tx: &mut PgTransaction,
        spec: &TableSpec,
        rows: &[NormalizedRecord],
    ) -> Result<u64, RegisterRepositoryError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let conflict = Self::conflict_clause(spec, false);
        self.load(tx, spec, rows, &conflict).await
    }

    async fn reset_sequence(
        &self,
        tx: &mut PgTransaction,
        table: &str,
    ) -> Result<(), RegisterRepositoryError> {
        let statement = format!(
            "SELECT setval(pg_get_serial_sequence('\"{table}\"', 'id'), \
             COALESCE((SELECT MAX(\"id\") FROM \"{table}\"), 0) + 1, false)"
        );
        sqlx::query(&statement).execute(&mut **tx).await?;
        info!(table, "reset id sequence");
        Ok(())
    }

    async fn execute_sql(
        &self,
        tx: &mut PgTransaction,
        title: &str,
        sql: &str,
    ) -> Result<u64, RegisterRepositoryError> {
        let result = sqlx::query(sql).execute(&mut **tx).await.map_err(|source| {
            error!(title, statement = %sql, "statement failed");
            RegisterRepositoryError::StatementFailed {
                statement: sql.to_string(),
                source,
            }
        })?;
        info!(title, affected = result.rows_affected(), "executed statement");
        Ok(result.rows_affected())
    }

    async fn load_key_set(
        &self,
        tx: &mut PgTransaction,
        table: &str,
        column: &str,
    ) -> Result<HashSet<String>, RegisterRepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT DISTINCT \"{column}\" FROM \"{table}\" WHERE \"{column}\" IS NOT NULL"
        ))
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows.iter().map(|row| row.get::<String, _>(0)).collect())
    }
}
