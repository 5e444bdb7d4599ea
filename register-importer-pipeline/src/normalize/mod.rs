//! Field-level normalization of raw source rows.
//!
//! A raw row is a map of header name to string; normalization projects it
//! onto a table spec's column list, producing typed values. Per-field parse
//! failures are recoverable: the failure is logged and the field lands as
//! null. A value outside a declared vocabulary is not recoverable, since it
//! means the feed's vocabulary has drifted since the spec was written.

mod tokenize;

pub use tokenize::split_list;

use chrono::NaiveDate;
use register_importer_shared::types::{
    ColumnSpec, FieldKind, FieldValue, NormalizedRecord, SourceRecord, TableSpec,
};
use tracing::warn;

use crate::errors::NormalizeError;


/// Project a raw row onto a table's column list.
pub fn normalize_record(
    spec: &TableSpec,
    source: &SourceRecord,
) -> Result<NormalizedRecord, NormalizeError> {
    let mut values = Vec::with_capacity(spec.columns.len());
    for column in spec.columns {
        values.push(normalize_field(spec.table, column, source)?);
    }
    Ok(NormalizedRecord::new(values))
}

fn normalize_field(
    table: &str,
    column: &ColumnSpec,
    source: &SourceRecord,
) -> Result<FieldValue, NormalizeError> {
    // columns with no source header are filled by the feed handler
    if column.source.is_empty() {
        return Ok(FieldValue::Null);
    }
    let raw = match source.get(column.source) {
        Some(raw) => raw,
        None => return Ok(FieldValue::Null),
    };
    // Postgres TEXT rejects NUL bytes, and some extracts carry them
    let cleaned;
    let raw = if raw.contains('\u{0}') {
        cleaned = raw.replace('\u{0}', "");
        cleaned.trim()
    } else {
        raw.trim()
    };
    if raw.is_empty() || column.null_values.contains(&raw) {
        return Ok(FieldValue::Null);
    }
    if let Some(suffix) = column.null_suffix {
        if raw.ends_with(suffix) {
            return Ok(FieldValue::Null);
        }
    }

    Ok(match column.kind {
        FieldKind::Text => FieldValue::Text(raw.to_string()),
        FieldKind::Integer => match raw.replace(',', "").parse::<i64>() {
            Ok(value) => FieldValue::Integer(value),
            Err(_) => {
                warn!(table, column = column.column, value = raw, "unparseable integer, keeping null");
                FieldValue::Null
            }
        },
        FieldKind::Float => match raw.replace(',', "").parse::<f64>() {
            Ok(value) => FieldValue::Float(value),
            Err(_) => {
                warn!(table, column = column.column, value = raw, "unparseable float, keeping null");
                FieldValue::Null
            }
        },
        FieldKind::Boolean => match raw.to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => FieldValue::Boolean(true),
            "false" | "f" | "no" | "n" | "0" => FieldValue::Boolean(false),
            // tokens outside the recognized set are kept verbatim
            _ => FieldValue::Text(raw.to_string()),
        },
        FieldKind::Date {
            formats,
            epoch_is_null,
        } => {
            let parsed = formats
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(raw, format).ok());
            match parsed {
                Some(date) => {
                    // NaiveDate::default() is the 1970-01-01 placeholder some
                    // registers emit for "no data"
                    if epoch_is_null && date == NaiveDate::default() {
                        FieldValue::Null
                    } else {
                        FieldValue::Date(date)
                    }
                }
                None => {
                    warn!(table, column = column.column, value = raw, "unparseable date, keeping null");
                    FieldValue::Null
                }
            }
        }
        FieldKind::Enum { vocabulary } => {
            if let Some(canonical) = vocabulary.lookup(raw) {
                FieldValue::Text(canonical.to_string())
            } else if vocabulary.entries.iter().any(|(_, to)| *to == raw) {
                // already the canonical form
                FieldValue::Text(raw.to_string())
            } else {
                return Err(NormalizeError::UnknownVocabulary {
                    vocabulary: vocabulary.name,
                    column: column.column,
                    value: raw.to_string(),
                });
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use register_importer_shared::types::{LoadStrategy, Vocabulary};

    static STATUS_VOCABULARY: Vocabulary = Vocabulary {
        name: "charity status",
        entries: &[("Active", "active"), ("Removed", "removed")],
    };

    static TEST_SPEC: TableSpec = TableSpec {
        table: "charity",
        columns: &[
            ColumnSpec::text("Charity Number", "charity_number"),
            ColumnSpec::enumerated("Charity Status", "status", &STATUS_VOCABULARY),
            ColumnSpec::integer("Most recent year income", "income"),
            ColumnSpec::date_epoch_null(
                "Registered Date",
                "registered_date",
                &["%d/%m/%Y", "%Y-%m-%d"],
            ),
            ColumnSpec::boolean("Regular Email", "email_ok"),
            ColumnSpec::new("", "notes", FieldKind::Text),
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

    fn row(pairs: &[(&str, &str)]) -> SourceRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn typed_fields_parse_and_trim() {
        let source = row(&[
            ("Charity Number", "  SC000001 "),
            ("Charity Status", "Active"),
            ("Most recent year income", "12,345"),
            ("Registered Date", "03/05/1999"),
            ("Regular Email", "Y"),
        ]);
        let record = normalize_record(&TEST_SPEC, &source).unwrap();
        assert_eq!(
            record.value(&TEST_SPEC, "charity_number").unwrap(),
            &FieldValue::Text("SC000001".to_string())
        );
        assert_eq!(
            record.value(&TEST_SPEC, "status").unwrap(),
            &FieldValue::Text("active".to_string())
        );
        assert_eq!(
            record.value(&TEST_SPEC, "income").unwrap(),
            &FieldValue::Integer(12345)
        );
        assert_eq!(
            record.value(&TEST_SPEC, "registered_date").unwrap(),
            &FieldValue::Date(NaiveDate::from_ymd_opt(1999, 5, 3).unwrap())
        );
        assert_eq!(
            record.value(&TEST_SPEC, "email_ok").unwrap(),
            &FieldValue::Boolean(true)
        );
        // handler-filled column defaults to null
        assert_eq!(record.value(&TEST_SPEC, "notes").unwrap(), &FieldValue::Null);
    }

    #[test]
    fn unparseable_values_fall_back_to_null() {
        let source = row(&[
            ("Charity Number", "SC000002"),
            ("Most recent year income", "n/a"),
            ("Registered Date", "not a date"),
        ]);
        let record = normalize_record(&TEST_SPEC, &source).unwrap();
        assert_eq!(record.value(&TEST_SPEC, "income").unwrap(), &FieldValue::Null);
        assert_eq!(
            record.value(&TEST_SPEC, "registered_date").unwrap(),
            &FieldValue::Null
        );
    }

    #[test]
    fn unknown_boolean_tokens_pass_through_as_text() {
        let source = row(&[("Charity Number", "SC000002"), ("Regular Email", "maybe")]);
        let record = normalize_record(&TEST_SPEC, &source).unwrap();
        assert_eq!(
            record.value(&TEST_SPEC, "email_ok").unwrap(),
            &FieldValue::Text("maybe".to_string())
        );
    }

    #[test]
    fn nul_bytes_are_stripped_from_text() {
        let source = row(&[("Charity Number", "SC00\u{0}0006 \u{0}")]);
        let record = normalize_record(&TEST_SPEC, &source).unwrap();
        assert_eq!(
            record.value(&TEST_SPEC, "charity_number").unwrap(),
            &FieldValue::Text("SC000006".to_string())
        );
    }

    #[test]
    fn epoch_date_sentinel_is_null() {
        let source = row(&[
            ("Charity Number", "SC000003"),
            ("Registered Date", "01/01/1970"),
        ]);
        let record = normalize_record(&TEST_SPEC, &source).unwrap();
        assert_eq!(
            record.value(&TEST_SPEC, "registered_date").unwrap(),
            &FieldValue::Null
        );
    }

    #[test]
    fn canonical_vocabulary_values_pass_through() {
        let source = row(&[("Charity Number", "SC000004"), ("Charity Status", "removed")]);
        let record = normalize_record(&TEST_SPEC, &source).unwrap();
        assert_eq!(
            record.value(&TEST_SPEC, "status").unwrap(),
            &FieldValue::Text("removed".to_string())
        );
    }

    #[test]
    fn vocabulary_drift_is_fatal() {
        let source = row(&[
            ("Charity Number", "SC000005"),
            ("Charity Status", "Suspended Pending Review"),
        ]);
        let err = normalize_record(&TEST_SPEC, &source).unwrap_err();
        match err {
            NormalizeError::UnknownVocabulary {
                vocabulary, value, ..
            } => {
                assert_eq!(vocabulary, "charity status");
                assert_eq!(value, "Suspended Pending Review");
            }
        }
    }

    #[test]
    fn declared_null_sentinels_become_null() {
        static SENTINEL_SPEC: TableSpec = TableSpec {
            table: "postcode",
            columns: &[
                ColumnSpec::text("pcds", "postcode"),
                ColumnSpec::integer("oseast1m", "easting").with_null_suffix("999999"),
                ColumnSpec::text("oac11", "output_area_class").with_nulls(&["9Z9", "Z9"]),
            ],
            key: &["postcode"],
            period_column: None,
            strategy: LoadStrategy::Replace {
                ignore_conflicts: true,
            },
            batch_size: 50_000,
            reset_sequence: false,
            freshness_column: None,
        };
        let source = row(&[
            ("pcds", "ZZ99 9ZZ"),
            ("oseast1m", "999999"),
            ("oac11", "9Z9"),
        ]);
        let record = normalize_record(&SENTINEL_SPEC, &source).unwrap();
        assert_eq!(
            record.value(&SENTINEL_SPEC, "easting").unwrap(),
            &FieldValue::Null
        );
        assert_eq!(
            record.value(&SENTINEL_SPEC, "output_area_class").unwrap(),
            &FieldValue::Null
        );
    }
}
