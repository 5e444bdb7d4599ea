//! Declarative feed, table and column specifications.
//!
//! Each feed declares its tabular dialect and a static column-mapping table
//! per target table. The mapping is validated once at startup against the
//! declared key and tie-break columns, so feed-format drift is caught early
//! and deterministically rather than computed ad hoc per row.

/// Static source-vocabulary to canonical-value lookup for enumerated fields.
///
/// An unknown source value is a feed-contract break, not a data-quality
/// issue: the normalizer fails the run rather than papering over drift.
#[derive(Debug)]
pub struct Vocabulary {
    pub name: &'static str,
    pub entries: &'static [(&'static str, &'static str)],
}

impl Vocabulary {
    pub fn lookup(&self, source: &str) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|(from, _)| *from == source)
            .map(|(_, to)| *to)
    }
}

/// Type/format directive for a single field.
#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Boolean,
    Date {
        /// Ordered list of format strings; first successful parse wins.
        formats: &'static [&'static str],
        /// Treat a parsed `1970-01-01` as "no data".
        epoch_is_null: bool,
    },
    Enum {
        vocabulary: &'static Vocabulary,
    },
}

/// Mapping of one raw source column onto a target schema column.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    /// Raw header name in the source feed.
    pub source: &'static str,
    /// Column name in the target table.
    pub column: &'static str,
    pub kind: FieldKind,
    /// Exact-match "no data" sentinels beyond the empty string.
    pub null_values: &'static [&'static str],
    /// A suffix marking "no data" (e.g. NSPL's `999999` coordinates).
    pub null_suffix: Option<&'static str>,
}

impl ColumnSpec {
    pub const fn new(source: &'static str, column: &'static str, kind: FieldKind) -> Self {
        Self {
            source,
            column,
            kind,
            null_values: &[],
            null_suffix: None,
        }
    }

    pub const fn text(source: &'static str, column: &'static str) -> Self {
        Self::new(source, column, FieldKind::Text)
    }

    pub const fn integer(source: &'static str, column: &'static str) -> Self {
        Self::new(source, column, FieldKind::Integer)
    }

    pub const fn float(source: &'static str, column: &'static str) -> Self {
        Self::new(source, column, FieldKind::Float)
    }

    pub const fn boolean(source: &'static str, column: &'static str) -> Self {
        Self::new(source, column, FieldKind::Boolean)
    }

    pub const fn date(
        source: &'static str,
        column: &'static str,
        formats: &'static [&'static str],
    ) -> Self {
        Self::new(
            source,
            column,
            FieldKind::Date {
                formats,
                epoch_is_null: false,
            },
        )
    }

    pub const fn date_epoch_null(
        source: &'static str,
        column: &'static str,
        formats: &'static [&'static str],
    ) -> Self {
        Self::new(
            source,
            column,
            FieldKind::Date {
                formats,
                epoch_is_null: true,
            },
        )
    }

    pub const fn enumerated(
        source: &'static str,
        column: &'static str,
        vocabulary: &'static Vocabulary,
    ) -> Self {
        Self::new(source, column, FieldKind::Enum { vocabulary })
    }

    pub const fn with_nulls(mut self, null_values: &'static [&'static str]) -> Self {
        self.null_values = null_values;
        self
    }

    pub const fn with_null_suffix(mut self, suffix: &'static str) -> Self {
        self.null_suffix = Some(suffix);
        self
    }
}

/// How staged rows reach the target table.
#[derive(Debug, Clone, Copy)]
pub enum LoadStrategy {
    /// Delete all existing rows first, then bulk insert the new feed.
    Replace {
        /// Skip rather than fail rows whose key already exists, for feeds
        /// that repeat a record across source files.
        ignore_conflicts: bool,
    },
    /// Conflict-aware bulk upsert on the declared natural key.
    Upsert {
        /// SQL executed once before the first upsert batch, e.g. to nullify
        /// volatile "latest submission" columns superseded by the new feed.
        /// `{table}` is substituted with the table name.
        pre_upsert_sql: Option<&'static str>,
    },
    /// Full refresh via the update-generation reconciler: shadow copy,
    /// truncate, repopulate with the freshness flag set, then merge back
    /// rows absent from the new feed as stale.
    Generations,
}

/// Declarative description of one target table within a feed.
#[derive(Debug)]
pub struct TableSpec {
    pub table: &'static str,
    pub columns: &'static [ColumnSpec],
    /// Natural-key column names (target-side), unique across refreshes.
    pub key: &'static [&'static str],
    /// Tie-break column for duplicate keys within a batch: the row with the
    /// latest value wins; `None` means last-seen wins.
    pub period_column: Option<&'static str>,
    pub strategy: LoadStrategy,
    /// Staged rows are flushed once this many accumulate.
    pub batch_size: usize,
    /// Reset the table's serial-id sequence before inserting, avoiding
    /// collisions from a prior truncate-and-reload cycle.
    pub reset_sequence: bool,
    /// Column carrying the freshness flag under `LoadStrategy::Generations`.
    pub freshness_column: Option<&'static str>,
}

impl TableSpec {
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.column == column)
    }

    pub fn column(&self, column: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.column == column)
    }

    /// Non-key columns, i.e. those updated from `EXCLUDED` on conflict.
    pub fn non_key_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| !self.key.contains(&c.column))
    }
}

/// Tabular dialect of a source file.
#[derive(Debug, Clone, Copy)]
pub struct CsvDialect {
    pub delimiter: u8,
    pub quote: Option<u8>,
    pub escape: Option<u8>,
}

impl CsvDialect {
    pub const COMMA: CsvDialect = CsvDialect {
        delimiter: b',',
        quote: Some(b'"'),
        escape: None,
    };

    /// CCEW-style TSV: tab-delimited, backslash-escaped, no quoting.
    pub const TAB_UNQUOTED: CsvDialect = CsvDialect {
        delimiter: b'\t',
        quote: None,
        escape: Some(b'\\'),
    };
}

/// Character encoding of a source file's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEncoding {
    Utf8,
    /// UTF-8 with an optional byte-order mark (NSPL extracts).
    Utf8Bom,
    Latin1,
}

/// Declarative description of one feed.
#[derive(Debug)]
pub struct FeedSpec {
    pub name: &'static str,
    pub dialect: CsvDialect,
    pub encoding: SourceEncoding,
    pub tables: &'static [&'static TableSpec],
    /// Repeated runs within this window reuse previously fetched bytes.
    pub cache_expiry_days: u32,
    /// A row whose width differs from the header is fatal for the file.
    pub strict_column_count: bool,
}

impl FeedSpec {
    pub fn table(&self, name: &str) -> Option<&'static TableSpec> {
        self.tables.iter().copied().find(|t| t.table == name)
    }
}
