//! In-memory staging of normalized rows between parse and flush.
//!
//! One buffer per target table, keyed by natural key. Re-staging a key
//! overwrites (subject to the resolver's latest-wins decision), so feeding
//! the same extract twice stages exactly the same rows. Side tables declare
//! their full column tuple as the key, which makes their buffers sets.

use std::collections::HashMap;

use chrono::NaiveDate;
use register_importer_shared::types::{NaturalKey, NormalizedRecord, TableSpec};

use crate::resolve::{self, Decision};

struct TableBuffer {
    spec: &'static TableSpec,
    rows: HashMap<NaturalKey, NormalizedRecord>,
    // periods already written this run, per key; latest-wins must hold
    // across flushes, not only within one buffer generation
    flushed: HashMap<NaturalKey, Option<NaiveDate>>,
}

/// Staging area for one feed's tables. Single-threaded by design: flushes
/// are synchronous and the import never has concurrent writers.
pub struct Accumulator {
    buffers: Vec<TableBuffer>,
    skipped_stale: u64,
}

impl Accumulator {
    pub fn new(tables: &'static [&'static TableSpec]) -> Self {
        Self {
            buffers: tables
                .iter()
                .map(|spec| TableBuffer {
                    spec,
                    rows: HashMap::new(),
                    flushed: HashMap::new(),
                })
                .collect(),
            skipped_stale: 0,
        }
    }

    fn buffer_mut(&mut self, table: &str) -> Option<&mut TableBuffer> {
        self.buffers.iter_mut().find(|b| b.spec.table == table)
    }

    fn buffer(&self, table: &str) -> Option<&TableBuffer> {
        self.buffers.iter().find(|b| b.spec.table == table)
    }

    /// Stage one row, applying the identity resolver against whatever is
    /// already buffered under the same key. Returns `None` for a table the
    /// accumulator does not know.
    pub fn add(&mut self, table: &str, record: NormalizedRecord) -> Option<Decision> {
        let buffer = self.buffer_mut(table)?;
        let key = record.natural_key(buffer.spec);
        if !buffer.rows.contains_key(&key) {
            if let Some(written) = buffer.flushed.get(&key) {
                if resolve::period_of(buffer.spec, &record) <= *written {
                    self.skipped_stale += 1;
                    return Some(Decision::SkipAsStale);
                }
            }
        }
        let decision = resolve::decide(buffer.spec, buffer.rows.get(&key), &record);
        match decision {
            Decision::InsertNew | Decision::ReplaceExisting => {
                buffer.rows.insert(key, record);
            }
            Decision::SkipAsStale => self.skipped_stale += 1,
        }
        Some(decision)
    }

    pub fn len(&self, table: &str) -> usize {
        self.buffer(table).map_or(0, |b| b.rows.len())
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    /// Tables whose buffer has reached the flush threshold.
    pub fn full_tables(&self) -> Vec<&'static TableSpec> {
        self.buffers
            .iter()
            .filter(|b| b.rows.len() >= b.spec.batch_size)
            .map(|b| b.spec)
            .collect()
    }

    /// Drain one table's staged rows, recording each key's flushed period
    /// so a stale row seen later in the run cannot overwrite it.
    pub fn take(&mut self, table: &str) -> Vec<NormalizedRecord> {
        match self.buffer_mut(table) {
            Some(buffer) => {
                let rows: Vec<(NaturalKey, NormalizedRecord)> = buffer.rows.drain().collect();
                if buffer.spec.period_column.is_some() {
                    for (key, row) in &rows {
                        buffer
                            .flushed
                            .insert(key.clone(), resolve::period_of(buffer.spec, row));
                    }
                }
                rows.into_iter().map(|(_, row)| row).collect()
            }
            None => Vec::new(),
        }
    }

    pub fn skipped_stale(&self) -> u64 {
        self.skipped_stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use register_importer_shared::types::{ColumnSpec, FieldValue, LoadStrategy};

    static CHARITY_SPEC: TableSpec = TableSpec {
        table: "charity",
        columns: &[
            ColumnSpec::text("Charity Number", "charity_number"),
            ColumnSpec::text("Charity Name", "name"),
        ],
        key: &["charity_number"],
        period_column: None,
        strategy: LoadStrategy::Replace {
            ignore_conflicts: false,
        },
        batch_size: 1000,
        reset_sequence: false,
        freshness_column: None,
    };

    static CLASSIFICATION_SPEC: TableSpec = TableSpec {
        table: "charity_classification",
        columns: &[
            ColumnSpec::text("Charity Number", "charity_number"),
            ColumnSpec::text("", "classification_type"),
            ColumnSpec::text("", "classification"),
        ],
        key: &["charity_number", "classification_type", "classification"],
        period_column: None,
        strategy: LoadStrategy::Replace {
            ignore_conflicts: false,
        },
        batch_size: 1000,
        reset_sequence: true,
        freshness_column: None,
    };

    static YEAR_SPEC: TableSpec = TableSpec {
        table: "charity_financial_year",
        columns: &[
            ColumnSpec::text("Charity Number", "charity_number"),
            ColumnSpec::date("Year End", "year_end", &["%Y-%m-%d"]),
            ColumnSpec::integer("Income", "income"),
        ],
        key: &["charity_number"],
        period_column: Some("year_end"),
        strategy: LoadStrategy::Upsert {
            pre_upsert_sql: None,
        },
        batch_size: 3,
        reset_sequence: false,
        freshness_column: None,
    };

    static TABLES: &[&TableSpec] = &[&CHARITY_SPEC, &CLASSIFICATION_SPEC, &YEAR_SPEC];

    fn charity(number: &str, name: &str) -> NormalizedRecord {
        NormalizedRecord::new(vec![
            FieldValue::Text(number.to_string()),
            FieldValue::Text(name.to_string()),
        ])
    }

    fn classification(number: &str, kind: &str, value: &str) -> NormalizedRecord {
        NormalizedRecord::new(vec![
            FieldValue::Text(number.to_string()),
            FieldValue::Text(kind.to_string()),
            FieldValue::Text(value.to_string()),
        ])
    }

    fn year(number: &str, year_end: &str, income: i64) -> NormalizedRecord {
        NormalizedRecord::new(vec![
            FieldValue::Text(number.to_string()),
            FieldValue::Date(NaiveDate::parse_from_str(year_end, "%Y-%m-%d").unwrap()),
            FieldValue::Integer(income),
        ])
    }

    #[test]
    fn same_key_overwrites_in_place() {
        let mut accumulator = Accumulator::new(TABLES);
        assert_eq!(
            accumulator.add("charity", charity("SC000001", "Old Name")),
            Some(Decision::InsertNew)
        );
        assert_eq!(
            accumulator.add("charity", charity("SC000001", "New Name")),
            Some(Decision::ReplaceExisting)
        );
        assert_eq!(accumulator.len("charity"), 1);
        let rows = accumulator.take("charity");
        assert_eq!(
            rows[0].value(&CHARITY_SPEC, "name").unwrap(),
            &FieldValue::Text("New Name".to_string())
        );
    }

    #[test]
    fn tuple_keyed_side_table_deduplicates() {
        let mut accumulator = Accumulator::new(TABLES);
        accumulator.add(
            "charity_classification",
            classification("SC000001", "purposes", "Education"),
        );
        accumulator.add(
            "charity_classification",
            classification("SC000001", "purposes", "Education"),
        );
        accumulator.add(
            "charity_classification",
            classification("SC000001", "purposes", "Health"),
        );
        assert_eq!(accumulator.len("charity_classification"), 2);
    }

    #[test]
    fn latest_period_survives_regardless_of_order() {
        let mut accumulator = Accumulator::new(TABLES);
        accumulator.add("charity_financial_year", year("SC000001", "2022-03-31", 120));
        accumulator.add("charity_financial_year", year("SC000001", "2021-03-31", 100));
        assert_eq!(accumulator.len("charity_financial_year"), 1);
        assert_eq!(accumulator.skipped_stale(), 1);
        let rows = accumulator.take("charity_financial_year");
        assert_eq!(
            rows[0].value(&YEAR_SPEC, "income").unwrap(),
            &FieldValue::Integer(120)
        );
    }

    #[test]
    fn a_stale_row_arriving_after_a_flush_is_skipped() {
        let mut accumulator = Accumulator::new(TABLES);
        accumulator.add("charity_financial_year", year("SC000001", "2022-03-31", 120));
        assert_eq!(accumulator.take("charity_financial_year").len(), 1);

        assert_eq!(
            accumulator.add("charity_financial_year", year("SC000001", "2021-03-31", 100)),
            Some(Decision::SkipAsStale)
        );
        assert!(accumulator.is_empty("charity_financial_year"));
        assert_eq!(accumulator.skipped_stale(), 1);

        // a fresher row still lands
        assert_eq!(
            accumulator.add("charity_financial_year", year("SC000001", "2023-03-31", 150)),
            Some(Decision::InsertNew)
        );
        assert_eq!(accumulator.len("charity_financial_year"), 1);
    }

    #[test]
    fn full_tables_reports_reached_thresholds() {
        let mut accumulator = Accumulator::new(TABLES);
        for n in 0..3 {
            accumulator.add(
                "charity_financial_year",
                year(&format!("SC{n:06}"), "2022-03-31", n),
            );
        }
        let full: Vec<_> = accumulator
            .full_tables()
            .iter()
            .map(|s| s.table)
            .collect();
        assert_eq!(full, vec!["charity_financial_year"]);
        accumulator.take("charity_financial_year");
        assert!(accumulator.full_tables().is_empty());
    }

    #[test]
    fn restaging_a_full_extract_is_idempotent() {
        let mut accumulator = Accumulator::new(TABLES);
        let mut stage_all = |accumulator: &mut Accumulator| {
            for n in 0..200 {
                let number = format!("SC{n:06}");
                accumulator.add("charity", charity(&number, &format!("Charity {n}")));
                accumulator.add(
                    "charity_classification",
                    classification(&number, "purposes", "Education"),
                );
            }
        };
        stage_all(&mut accumulator);
        stage_all(&mut accumulator);
        assert_eq!(accumulator.len("charity"), 200);
        assert_eq!(accumulator.len("charity_classification"), 200);

        // every side-table row has a staged parent
        let parents: std::collections::HashSet<_> = accumulator
            .take("charity")
            .iter()
            .map(|r| r.natural_key(&CHARITY_SPEC).to_string())
            .collect();
        for row in accumulator.take("charity_classification") {
            let parent = match row.value(&CLASSIFICATION_SPEC, "charity_number").unwrap() {
                FieldValue::Text(number) => number.clone(),
                other => panic!("unexpected parent key {other:?}"),
            };
            assert!(parents.iter().any(|p| p.contains(&parent)));
        }
    }

    #[test]
    fn unknown_table_is_rejected() {
        let mut accumulator = Accumulator::new(TABLES);
        assert_eq!(accumulator.add("no_such_table", charity("X", "Y")), None);
    }
}
