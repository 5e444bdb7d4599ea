//! Update-generation reconciler for full-refresh tables.
//!
//! A refreshed table keeps rows that dropped out of the latest feed, marked
//! stale via the table's freshness column. The reconciler walks an explicit
//! state machine inside the run transaction:
//!
//! stable → shadow-copied → emptied → repopulated → reconciled → stable
//!
//! The shadow copy holds the pre-run contents with freshness forced false.
//! After the new feed is loaded (freshness true), shadow rows absent from
//! the reload are merged back by anti-join on the natural key. Rows present
//! in both generations keep the freshly loaded values.

use register_importer_shared::types::TableSpec;
use tracing::info;

use crate::errors::RegisterRepositoryError;
use crate::interfaces::PgTransaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Stable,
    ShadowCopied,
    Emptied,
    Repopulated,
    Reconciled,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            State::Stable => "stable",
            State::ShadowCopied => "shadow-copied",
            State::Emptied => "emptied",
            State::Repopulated => "repopulated",
            State::Reconciled => "reconciled",
        }
    }
}

#[derive(Debug)]
pub struct GenerationReconciler {
    spec: &'static TableSpec,
    freshness: &'static str,
    state: State,
}

impl GenerationReconciler {
    pub fn new(spec: &'static TableSpec) -> Result<Self, RegisterRepositoryError> {
        let freshness = spec
            .freshness_column
            .ok_or(RegisterRepositoryError::MissingFreshnessColumn(spec.table))?;
        Ok(Self {
            spec,
            freshness,
            state: State::Stable,
        })
    }

    pub fn table(&self) -> &'static str {
        self.spec.table
    }

    fn shadow_table(&self) -> String {
        format!("{}_shadow", self.spec.table)
    }

    fn expect(&self, expected: State) -> Result<(), RegisterRepositoryError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RegisterRepositoryError::ReconcilerState {
                table: self.spec.table,
                expected: expected.name(),
                found: self.state.name(),
            })
        }
    }

    /// Column list with the freshness column pinned to the given literal.
    fn projected_columns(&self, prefix: &str, freshness_literal: &str) -> (String, String) {
        let mut targets = Vec::with_capacity(self.spec.columns.len());
        let mut sources = Vec::with_capacity(self.spec.columns.len());
        for column in self.spec.columns {
            targets.push(format!("\"{}\"", column.column));
            if column.column == self.freshness {
                sources.push(format!("{freshness_literal} AS \"{}\"", column.column));
            } else {
                sources.push(format!("{prefix}\"{}\"", column.column));
            }
        }
        (targets.join(", "), sources.join(", "))
    }

    /// Copy the current table contents into the shadow table, with
    /// freshness forced false.
    pub async fn shadow_copy(
        &mut self,
        tx: &mut PgTransaction,
    ) -> Result<(), RegisterRepositoryError> {
        self.expect(State::Stable)?;
        let (_, sources) = self.projected_columns("", "false");
        sqlx::query(&format!(
            "CREATE TABLE \"{shadow}\" AS SELECT {sources} FROM \"{table}\"",
            shadow = self.shadow_table(),
            table = self.spec.table,
        ))
        .execute(&mut **tx)
        .await?;
        info!(table = self.spec.table, "shadow copy created");
        self.state = State::ShadowCopied;
        Ok(())
    }

    /// Empty the live table ahead of the reload.
    pub async fn truncate(&mut self, tx: &mut PgTransaction) -> Result<(), RegisterRepositoryError> {
        self.expect(State::ShadowCopied)?;
        let result = sqlx::query(&format!("DELETE FROM \"{}\"", self.spec.table))
            .execute(&mut **tx)
            .await?;
        info!(
            table = self.spec.table,
            deleted = result.rows_affected(),
            "table emptied for reload"
        );
        self.state = State::Emptied;
        Ok(())
    }

    /// Record that the new feed has been loaded into the emptied table.
    pub fn mark_repopulated(&mut self) -> Result<(), RegisterRepositoryError> {
        self.expect(State::Emptied)?;
        self.state = State::Repopulated;
        Ok(())
    }

    /// Re-insert shadow rows whose natural key is absent from the reload.
    /// Rows present in both generations keep the new feed's values.
    pub async fn merge_back(
        &mut self,
        tx: &mut PgTransaction,
    ) -> Result<u64, RegisterRepositoryError> {
        self.expect(State::Repopulated)?;
        let join = self
            .spec
            .key
            .iter()
            .map(|k| format!("a.\"{k}\" = b.\"{k}\""))
            .collect::<Vec<_>>()
            .join(" AND ");
        let absent = format!("b.\"{}\" IS NULL", self.spec.key[0]);
        let (targets, sources) = self.projected_columns("a.", "false");
        let result = sqlx::query(&format!(
            "INSERT INTO \"{table}\" ({targets}) \
             SELECT DISTINCT {sources} FROM \"{shadow}\" a \
             LEFT OUTER JOIN \"{table}\" b ON {join} WHERE {absent}",
            table = self.spec.table,
            shadow = self.shadow_table(),
        ))
        .execute(&mut **tx)
        .await?;
        info!(
            table = self.spec.table,
            restored = result.rows_affected(),
            "stale rows merged back"
        );
        self.state = State::Reconciled;
        Ok(result.rows_affected())
    }

    /// Drop the shadow table, returning the reconciler to stable.
    pub async fn finish(&mut self, tx: &mut PgTransaction) -> Result<(), RegisterRepositoryError> {
        self.expect(State::Reconciled)?;
        sqlx::query(&format!("DROP TABLE \"{}\"", self.shadow_table()))
            .execute(&mut **tx)
            .await?;
        self.state = State::Stable;
        Ok(())
    }
}
