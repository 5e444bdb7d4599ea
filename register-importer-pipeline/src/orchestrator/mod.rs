//! This module defines the `Orchestrator` responsible for coordinating a
//! whole import run.
//! It wires the fetcher, consumer, staging accumulator, and repository
//! together and owns the run's single transaction, so a failure at any
//! point rolls the target tables back to their pre-run state.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use feedfetch::{Fetcher, archive};
use register_importer_repository::postgres::GenerationReconciler;
use register_importer_repository::{
    PgTransaction, RegisterRepository, RegisterRepositoryError,
};
use register_importer_shared::types::{
    FeedSpec, LoadStrategy, NormalizedRecord, SourceRecord, TableSpec,
};
use tracing::info;

use crate::consumer::FeedRows;
use crate::errors::{ConsumerError, OrchestratorError};
use crate::resolve::Decision;
use crate::stage::Accumulator;

/// One downloadable input of a feed.
#[derive(Debug, Clone)]
pub enum FeedSource {
    /// A bare delimited file.
    File { url: String },
    /// A zip whose members are delimited files. `scrub_embedded_breaks`
    /// rewrites `\r\n\t` sequences to a tab during extraction, for feeds
    /// that wrap long fields across physical lines.
    Archive {
        url: String,
        scrub_embedded_breaks: bool,
    },
}

impl FeedSource {
    pub fn url(&self) -> &str {
        match self {
            FeedSource::File { url } => url,
            FeedSource::Archive { url, .. } => url,
        }
    }
}

/// Options of one import invocation.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Import only the first N distinct primary entities encountered.
    pub sample: Option<usize>,
}

/// Keeps the first N distinct sample keys and everything belonging to
/// them. Child rows carry their parent's key, so a sampled import never
/// stages an orphan side-table row.
pub struct Sampler {
    limit: usize,
    kept: HashSet<String>,
}

impl Sampler {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            kept: HashSet::new(),
        }
    }

    pub fn admit(&mut self, key: &str) -> bool {
        if self.kept.contains(key) {
            return true;
        }
        if self.kept.len() < self.limit {
            self.kept.insert(key.to_string());
            return true;
        }
        false
    }
}

/// Run-scoped reference key sets, by table name.
pub type References = HashMap<&'static str, HashSet<String>>;

fn empty_keys() -> &'static HashSet<String> {
    static EMPTY: OnceLock<HashSet<String>> = OnceLock::new();
    EMPTY.get_or_init(HashSet::new)
}

/// The handler's window onto the staging area during row fan-out.
pub struct RowSink<'a> {
    feed: &'static str,
    accumulator: &'a mut Accumulator,
    references: &'a References,
}

impl RowSink<'_> {
    /// Stage one normalized row for a target table.
    pub fn stage(
        &mut self,
        table: &str,
        record: NormalizedRecord,
    ) -> Result<Decision, OrchestratorError> {
        self.accumulator
            .add(table, record)
            .ok_or_else(|| OrchestratorError::UnknownTable {
                feed: self.feed,
                table: table.to_string(),
            })
    }

    /// Known keys preloaded for a reference table, empty if none were.
    pub fn known_keys(&self, table: &str) -> &HashSet<String> {
        self.references.get(table).unwrap_or_else(|| empty_keys())
    }
}

/// Trait implemented once per feed: where its files come from and how one
/// raw row fans out into staged table rows.
#[async_trait::async_trait]
pub trait FeedHandler: Send {
    fn spec(&self) -> &'static FeedSpec;

    /// Resolve the feed's source list. Async because some feeds discover
    /// their download URLs through an API call.
    async fn sources(&self, fetcher: &dyn Fetcher) -> Result<Vec<FeedSource>, OrchestratorError>;

    /// `(table, column)` pairs whose current values are preloaded into the
    /// run's reference key sets before any row is processed.
    fn reference_preloads(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    /// `(column, value)` limiting this feed's delete-and-reinsert to its
    /// own slice of tables shared between feeds. Applies to the tables
    /// that declare the column; the rest are cleared whole.
    fn replace_scope(&self) -> Option<(&'static str, &'static str)> {
        None
    }

    /// Whether an archive member or file is part of the feed's data.
    fn wants_file(&self, _source: &str) -> bool {
        true
    }

    /// Validate a file's header row before any of its rows are handled.
    fn check_headers(&self, _source: &str, _headers: &[String]) -> Result<(), ConsumerError> {
        Ok(())
    }

    /// The sampling identity of a raw row, usually the primary register
    /// number. Rows without one are always processed.
    fn sample_key(&self, _source: &str, _row: &SourceRecord) -> Option<String> {
        None
    }

    fn handle_row(
        &mut self,
        source: &str,
        row: &SourceRecord,
        sink: &mut RowSink<'_>,
    ) -> Result<(), OrchestratorError>;

    /// `(title, sql)` statements executed after the load, inside the run
    /// transaction.
    fn post_load_sql(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// Counters of one completed run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub files: u64,
    pub rows_read: u64,
    pub rows_sampled_out: u64,
    pub skipped_stale: u64,
    pub written: HashMap<&'static str, u64>,
    pub restored_stale: HashMap<&'static str, u64>,
}

/// `Orchestrator` is responsible for coordinating the fetch, parse, stage,
/// and load of one feed inside one transaction.
pub struct Orchestrator<'a> {
    repository: &'a dyn RegisterRepository,
    fetcher: &'a dyn Fetcher,
}

impl<'a> Orchestrator<'a> {
    pub fn new(repository: &'a dyn RegisterRepository, fetcher: &'a dyn Fetcher) -> Self {
        Self {
            repository,
            fetcher,
        }
    }

    /// Runs one import end to end. Any error unwinds through the dropped
    /// transaction, leaving every target table untouched.
    pub async fn run(
        &self,
        handler: &mut dyn FeedHandler,
        options: &ImportOptions,
    ) -> Result<RunSummary, OrchestratorError> {
        let spec = handler.spec();
        validate_spec(spec)?;
        info!(feed = spec.name, "starting import");

        let sources = handler.sources(self.fetcher).await?;
        let mut tx = self.repository.begin().await?;

        let mut reconcilers = Vec::new();
        for table in spec.tables {
            if matches!(table.strategy, LoadStrategy::Generations) {
                let mut reconciler = GenerationReconciler::new(table)?;
                reconciler.shadow_copy(&mut tx).await?;
                reconciler.truncate(&mut tx).await?;
                reconcilers.push(reconciler);
            }
        }
        // children are declared after their parent, so clear in reverse
        let scope = handler.replace_scope();
        for table in spec.tables.iter().rev() {
            if matches!(table.strategy, LoadStrategy::Replace { .. }) {
                match scope {
                    Some((column, value)) if table.column(column).is_some() => {
                        self.repository
                            .delete_where(&mut tx, table.table, column, value)
                            .await?;
                    }
                    _ => {
                        self.repository.delete_all(&mut tx, table.table).await?;
                    }
                }
            }
        }

        let mut references = References::new();
        for (table, column) in handler.reference_preloads() {
            let keys = self.repository.load_key_set(&mut tx, table, column).await?;
            info!(table, keys = keys.len(), "preloaded reference keys");
            references.insert(table, keys);
        }

        let mut summary = RunSummary::default();
        let mut accumulator = Accumulator::new(spec.tables);
        let mut sampler = options.sample.map(Sampler::new);
        let mut prepared: HashSet<&'static str> = HashSet::new();

        for source in &sources {
            let bytes = self.fetcher.get(source.url()).await?;
            let files: Vec<(String, Vec<u8>)> = match source {
                FeedSource::File { url } => vec![(file_name_of(url), bytes)],
                FeedSource::Archive {
                    scrub_embedded_breaks,
                    ..
                } => {
                    let archive = archive::extract_zip(&bytes, *scrub_embedded_breaks)?;
                    let mut members = Vec::with_capacity(archive.files().len());
                    for (name, path) in archive.files() {
                        if !handler.wants_file(name) {
                            continue;
                        }
                        let contents = std::fs::read(path).map_err(feedfetch::FetchError::from)?;
                        members.push((name.clone(), contents));
                    }
                    members
                }
            };

            for (name, bytes) in files {
                if !handler.wants_file(&name) {
                    continue;
                }
                let rows = FeedRows::new(
                    &name,
                    &bytes,
                    spec.dialect,
                    spec.encoding,
                    spec.strict_column_count,
                )?;
                handler.check_headers(&name, rows.headers())?;
                info!(feed = spec.name, file = name, "processing file");
                summary.files += 1;

                for row in rows {
                    let row = row?;
                    summary.rows_read += 1;
                    if let Some(sampler) = sampler.as_mut() {
                        if let Some(key) = handler.sample_key(&name, &row) {
                            if !sampler.admit(&key) {
                                summary.rows_sampled_out += 1;
                                continue;
                            }
                        }
                    }
                    let mut sink = RowSink {
                        feed: spec.name,
                        accumulator: &mut accumulator,
                        references: &references,
                    };
                    handler.handle_row(&name, &row, &mut sink)?;

                    for table in accumulator.full_tables() {
                        self.flush(&mut tx, &mut accumulator, table, &mut prepared, &mut summary)
                            .await?;
                    }
                }
            }
        }

        for table in spec.tables {
            if !accumulator.is_empty(table.table) {
                self.flush(&mut tx, &mut accumulator, table, &mut prepared, &mut summary)
                    .await?;
            }
        }
        summary.skipped_stale = accumulator.skipped_stale();

        for reconciler in &mut reconcilers {
            reconciler.mark_repopulated()?;
            let restored = reconciler.merge_back(&mut tx).await?;
            summary.restored_stale.insert(reconciler.table(), restored);
            reconciler.finish(&mut tx).await?;
        }

        for (title, sql) in handler.post_load_sql() {
            self.repository.execute_sql(&mut tx, &title, &sql).await?;
        }

        tx.commit().await.map_err(RegisterRepositoryError::from)?;
        info!(
            feed = spec.name,
            files = summary.files,
            rows = summary.rows_read,
            skipped_stale = summary.skipped_stale,
            "import committed"
        );
        Ok(summary)
    }

    async fn flush(
        &self,
        tx: &mut PgTransaction,
        accumulator: &mut Accumulator,
        spec: &'static TableSpec,
        prepared: &mut HashSet<&'static str>,
        summary: &mut RunSummary,
    ) -> Result<(), OrchestratorError> {
        let rows = accumulator.take(spec.table);
        if rows.is_empty() {
            return Ok(());
        }
        let first_flush = prepared.insert(spec.table);
        if first_flush && spec.reset_sequence {
            self.repository.reset_sequence(tx, spec.table).await?;
        }
        let written = match spec.strategy {
            LoadStrategy::Replace { ignore_conflicts } => {
                self.repository
                    .insert_rows(tx, spec, &rows, ignore_conflicts)
                    .await?
            }
            LoadStrategy::Generations => {
                self.repository.insert_rows(tx, spec, &rows, false).await?
            }
            LoadStrategy::Upsert { pre_upsert_sql } => {
                if first_flush {
                    if let Some(sql) = pre_upsert_sql {
                        let sql = sql.replace("{table}", spec.table);
                        self.repository.execute_sql(tx, "pre-upsert", &sql).await?;
                    }
                }
                self.repository.upsert_rows(tx, spec, &rows).await?
            }
        };
        *summary.written.entry(spec.table).or_default() += written;
        Ok(())
    }
}

fn file_name_of(url: &str) -> String {
    url.rsplit('/').next().unwrap_or(url).to_string()
}

fn validate_spec(spec: &'static FeedSpec) -> Result<(), OrchestratorError> {
    for table in spec.tables {
        let fail = |message: String| OrchestratorError::InvalidSpec {
            table: table.table,
            message,
        };
        if table.columns.is_empty() {
            return Err(fail("no columns declared".to_string()));
        }
        if table.key.is_empty() {
            return Err(fail("no key columns declared".to_string()));
        }
        if table.batch_size == 0 {
            return Err(fail("batch size must be positive".to_string()));
        }
        let mut seen = HashSet::new();
        for column in table.columns {
            if !seen.insert(column.column) {
                return Err(fail(format!("duplicate column \"{}\"", column.column)));
            }
        }
        for key in table.key {
            if table.column_index(key).is_none() {
                return Err(fail(format!("key column \"{key}\" is not declared")));
            }
        }
        if let Some(period) = table.period_column {
            if table.column_index(period).is_none() {
                return Err(fail(format!("period column \"{period}\" is not declared")));
            }
        }
        if matches!(table.strategy, LoadStrategy::Generations) {
            match table.freshness_column {
                Some(freshness) if table.column_index(freshness).is_some() => {}
                Some(freshness) => {
                    return Err(fail(format!(
                        "freshness column \"{freshness}\" is not declared"
                    )));
                }
                None => return Err(fail("no freshness column declared".to_string())),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use register_importer_shared::types::{ColumnSpec, CsvDialect, SourceEncoding};

    static BAD_KEY_TABLE: TableSpec = TableSpec {
        table: "charity",
        columns: &[ColumnSpec::text("Charity Number", "charity_number")],
        key: &["registration_number"],
        period_column: None,
        strategy: LoadStrategy::Replace {
            ignore_conflicts: false,
        },
        batch_size: 1000,
        reset_sequence: false,
        freshness_column: None,
    };

    static BAD_KEY_FEED: FeedSpec = FeedSpec {
        name: "broken",
        dialect: CsvDialect::COMMA,
        encoding: SourceEncoding::Utf8,
        tables: &[&BAD_KEY_TABLE],
        cache_expiry_days: 1,
        strict_column_count: false,
    };

    static NO_FRESHNESS_TABLE: TableSpec = TableSpec {
        table: "company",
        columns: &[ColumnSpec::text("CompanyNumber", "company_number")],
        key: &["company_number"],
        period_column: None,
        strategy: LoadStrategy::Generations,
        batch_size: 1000,
        reset_sequence: false,
        freshness_column: None,
    };

    static NO_FRESHNESS_FEED: FeedSpec = FeedSpec {
        name: "broken",
        dialect: CsvDialect::COMMA,
        encoding: SourceEncoding::Utf8,
        tables: &[&NO_FRESHNESS_TABLE],
        cache_expiry_days: 1,
        strict_column_count: false,
    };

    #[test]
    fn undeclared_key_column_fails_validation() {
        let err = validate_spec(&BAD_KEY_FEED).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidSpec { .. }));
    }

    #[test]
    fn generations_without_freshness_fails_validation() {
        let err = validate_spec(&NO_FRESHNESS_FEED).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidSpec { .. }));
    }

    #[test]
    fn sampler_keeps_members_and_rejects_overflow() {
        let mut sampler = Sampler::new(2);
        assert!(sampler.admit("SC000001"));
        assert!(sampler.admit("SC000002"));
        assert!(!sampler.admit("SC000003"));
        // members stay admitted, e.g. child rows arriving later
        assert!(sampler.admit("SC000001"));
    }
}
