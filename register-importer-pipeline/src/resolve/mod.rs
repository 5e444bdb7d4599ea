//! Record identity resolution within a batch.
//!
//! Feeds repeat records: a five-year history file carries one row per year
//! for the same charity, and a rerun of the same extract carries every row
//! again. The resolver decides what an incoming row means relative to the
//! row already staged under the same natural key.

mod refs;

pub use refs::ReferenceResolver;

use chrono::NaiveDate;
use register_importer_shared::types::{FieldValue, NormalizedRecord, TableSpec};

/// What to do with an incoming row given the staged survivor for its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    InsertNew,
    ReplaceExisting,
    SkipAsStale,
}

/// Decide an incoming row's fate.
///
/// With a declared period column, the row carrying the latest period wins
/// and ties keep the staged survivor; a null period sorts before any date.
/// Without a period column the last row seen wins.
pub fn decide(
    spec: &TableSpec,
    staged: Option<&NormalizedRecord>,
    incoming: &NormalizedRecord,
) -> Decision {
    let Some(existing) = staged else {
        return Decision::InsertNew;
    };
    if spec.period_column.is_none() {
        return Decision::ReplaceExisting;
    };
    if period_of(spec, incoming) > period_of(spec, existing) {
        Decision::ReplaceExisting
    } else {
        Decision::SkipAsStale
    }
}

/// The record's value in the table's declared period column, `None` when
/// the table has no period column or the value is not a date.
pub fn period_of(spec: &TableSpec, record: &NormalizedRecord) -> Option<NaiveDate> {
    let period = spec.period_column?;
    match record.value(spec, period) {
        Some(FieldValue::Date(date)) => Some(*date),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use register_importer_shared::types::{ColumnSpec, LoadStrategy};

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
        batch_size: 10_000,
        reset_sequence: false,
        freshness_column: None,
    };

    static PLAIN_SPEC: TableSpec = TableSpec {
        table: "charity",
        columns: &[
            ColumnSpec::text("Charity Number", "charity_number"),
            ColumnSpec::integer("Income", "income"),
        ],
        key: &["charity_number"],
        period_column: None,
        strategy: LoadStrategy::Replace {
            ignore_conflicts: false,
        },
        batch_size: 10_000,
        reset_sequence: false,
        freshness_column: None,
    };

    fn year_row(year_end: Option<&str>, income: i64) -> NormalizedRecord {
        let period = match year_end {
            Some(text) => {
                FieldValue::Date(NaiveDate::parse_from_str(text, "%Y-%m-%d").unwrap())
            }
            None => FieldValue::Null,
        };
        NormalizedRecord::new(vec![
            FieldValue::Text("SC000001".to_string()),
            period,
            FieldValue::Integer(income),
        ])
    }

    #[test]
    fn first_row_for_a_key_is_an_insert() {
        let incoming = year_row(Some("2021-03-31"), 100);
        assert_eq!(decide(&YEAR_SPEC, None, &incoming), Decision::InsertNew);
    }

    #[test]
    fn latest_period_wins_in_either_arrival_order() {
        let older = year_row(Some("2021-03-31"), 100);
        let newer = year_row(Some("2022-03-31"), 120);
        assert_eq!(
            decide(&YEAR_SPEC, Some(&older), &newer),
            Decision::ReplaceExisting
        );
        assert_eq!(
            decide(&YEAR_SPEC, Some(&newer), &older),
            Decision::SkipAsStale
        );
    }

    #[test]
    fn equal_periods_keep_the_staged_survivor() {
        let first = year_row(Some("2022-03-31"), 100);
        let second = year_row(Some("2022-03-31"), 999);
        assert_eq!(
            decide(&YEAR_SPEC, Some(&first), &second),
            Decision::SkipAsStale
        );
    }

    #[test]
    fn null_period_sorts_before_any_date() {
        let dated = year_row(Some("2021-03-31"), 100);
        let undated = year_row(None, 50);
        assert_eq!(
            decide(&YEAR_SPEC, Some(&undated), &dated),
            Decision::ReplaceExisting
        );
        assert_eq!(
            decide(&YEAR_SPEC, Some(&dated), &undated),
            Decision::SkipAsStale
        );
    }

    #[test]
    fn without_a_period_column_last_seen_wins() {
        let first = NormalizedRecord::new(vec![
            FieldValue::Text("SC000001".to_string()),
            FieldValue::Integer(1),
        ]);
        let second = NormalizedRecord::new(vec![
            FieldValue::Text("SC000001".to_string()),
            FieldValue::Integer(2),
        ]);
        assert_eq!(
            decide(&PLAIN_SPEC, Some(&first), &second),
            Decision::ReplaceExisting
        );
    }
}
