//! Scottish charity register (OSCR).
//!
//! Three zipped CSV downloads: the live register, the former register,
//! and a five-year summary carrying one row per charity per financial
//! year. Every row doubles as a charity row and a financial-year row;
//! the newest year end wins where a charity appears more than once.

use async_trait::async_trait;
use feedfetch::Fetcher;
use lazy_static::lazy_static;
use regex::Regex;
use register_importer_pipeline::errors::OrchestratorError;
use register_importer_pipeline::normalize::{normalize_record, split_list};
use register_importer_pipeline::orchestrator::{FeedHandler, FeedSource, RowSink};
use register_importer_shared::types::{
    ColumnSpec, CsvDialect, FeedSpec, FieldValue, LoadStrategy, NormalizedRecord, SourceEncoding,
    SourceRecord, TableSpec,
};

use super::CLASSIFICATION_TABLE;

const DOWNLOAD_URLS: &[&str] = &[
    "https://www.oscr.org.uk/download/charity-register",
    "https://www.oscr.org.uk/download/5-years-charity-register",
    "https://www.oscr.org.uk/download/charity-former-register",
];

const DATE_FORMATS: &[&str] = &["%d/%m/%Y"];

/// OSCR writes "no data" as a dash, and sometimes as a joined pair of them.
const DASH_NULLS: &[&str] = &["-", "-, -"];

const CLASSIFICATION_SOURCES: &[(&str, &str)] = &[
    ("Purposes", "Purposes"),
    ("Beneficiaries", "Beneficiaries"),
    ("Activities", "Activities"),
];

static CHARITY_TABLE: TableSpec = TableSpec {
    table: "charity",
    columns: &[
        ColumnSpec::text("Charity Number", "charity_number"),
        ColumnSpec::text("Charity Name", "name"),
        ColumnSpec::text("Known As", "known_as").with_nulls(DASH_NULLS),
        ColumnSpec::text("", "regulator"),
        ColumnSpec::text("Charity Status", "status"),
        ColumnSpec::date_epoch_null("Registered Date", "registered_date", DATE_FORMATS),
        ColumnSpec::date_epoch_null("Ceased Date", "removed_date", DATE_FORMATS),
        ColumnSpec::date_epoch_null("Year End", "financial_year_end", DATE_FORMATS),
        ColumnSpec::integer("Most recent year income", "income"),
        ColumnSpec::integer("Most recent year expenditure", "spending"),
        ColumnSpec::text("Postcode", "postcode").with_nulls(&["-", "-, -", "XX0 0XX"]),
        ColumnSpec::text("Main Operating Location", "city").with_nulls(DASH_NULLS),
        ColumnSpec::text("Website", "website").with_nulls(DASH_NULLS),
        ColumnSpec::text("Notes", "notes").with_nulls(DASH_NULLS),
    ],
    key: &["charity_number"],
    period_column: Some("financial_year_end"),
    strategy: LoadStrategy::Replace {
        ignore_conflicts: true,
    },
    batch_size: 500_000,
    reset_sequence: false,
    freshness_column: None,
};

static FINANCIAL_YEAR_TABLE: TableSpec = TableSpec {
    table: "charity_financial_year",
    columns: &[
        ColumnSpec::text("Charity Number", "charity_number"),
        ColumnSpec::date_epoch_null("Year End", "year_end", DATE_FORMATS),
        ColumnSpec::integer("Most recent year income", "income"),
        ColumnSpec::integer("Most recent year expenditure", "spending"),
    ],
    key: &["charity_number", "year_end"],
    period_column: Some("year_end"),
    strategy: LoadStrategy::Upsert {
        pre_upsert_sql: None,
    },
    batch_size: 500_000,
    reset_sequence: true,
    freshness_column: None,
};

static OSCR: FeedSpec = FeedSpec {
    name: "oscr",
    dialect: CsvDialect::COMMA,
    encoding: SourceEncoding::Utf8Bom,
    tables: &[&CHARITY_TABLE, &CLASSIFICATION_TABLE, &FINANCIAL_YEAR_TABLE],
    cache_expiry_days: 1,
    strict_column_count: false,
};

lazy_static! {
    static ref INSOLVENCY: Regex =
        Regex::new(r"(?i)\(?subject to insolvency proceedings\)?").unwrap();
    static ref TRAILING_PUNCTUATION: Regex = Regex::new(r"\W+$").unwrap();
}

pub struct OscrFeed;

impl OscrFeed {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OscrFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedHandler for OscrFeed {
    fn spec(&self) -> &'static FeedSpec {
        &OSCR
    }

    async fn sources(&self, _fetcher: &dyn Fetcher) -> Result<Vec<FeedSource>, OrchestratorError> {
        Ok(DOWNLOAD_URLS
            .iter()
            .map(|url| FeedSource::Archive {
                url: url.to_string(),
                scrub_embedded_breaks: false,
            })
            .collect())
    }

    fn replace_scope(&self) -> Option<(&'static str, &'static str)> {
        Some(("regulator", "OSCR"))
    }

    fn sample_key(&self, _source: &str, row: &SourceRecord) -> Option<String> {
        row.get("Charity Number").map(str::to_string)
    }

    fn handle_row(
        &mut self,
        _source: &str,
        row: &SourceRecord,
        sink: &mut RowSink<'_>,
    ) -> Result<(), OrchestratorError> {
        let record = normalize_record(&CHARITY_TABLE, row)?.with_value(
            &CHARITY_TABLE,
            "regulator",
            FieldValue::Text("OSCR".to_string()),
        );
        let record = strip_insolvency_suffix(tidy_contact_fields(record));

        if record
            .value(&CHARITY_TABLE, "financial_year_end")
            .and_then(FieldValue::as_date)
            .is_some()
        {
            sink.stage(
                "charity_financial_year",
                normalize_record(&FINANCIAL_YEAR_TABLE, row)?,
            )?;
        }

        let charity_number = record
            .value(&CHARITY_TABLE, "charity_number")
            .and_then(FieldValue::as_text)
            .map(str::to_string);
        sink.stage("charity", record)?;

        if let Some(number) = charity_number {
            for (header, classification_type) in CLASSIFICATION_SOURCES {
                let Some(raw) = row.get(header) else {
                    continue;
                };
                for token in split_quoted(raw) {
                    sink.stage(
                        "charity_classification",
                        NormalizedRecord::new(vec![
                            FieldValue::Text(number.clone()),
                            FieldValue::Text("OSCR".to_string()),
                            FieldValue::Text(classification_type.to_string()),
                            FieldValue::Text(token),
                        ]),
                    )?;
                }
            }
        }
        Ok(())
    }
}

fn tidy_contact_fields(record: NormalizedRecord) -> NormalizedRecord {
    let website = record
        .value(&CHARITY_TABLE, "website")
        .and_then(FieldValue::as_text)
        .filter(|website| !website.starts_with("http"))
        .map(super::with_scheme);
    let record = match website {
        Some(website) => record.with_value(&CHARITY_TABLE, "website", FieldValue::Text(website)),
        None => record,
    };

    let postcode = record
        .value(&CHARITY_TABLE, "postcode")
        .and_then(FieldValue::as_text)
        .map(str::to_uppercase);
    match postcode {
        Some(postcode) => record.with_value(&CHARITY_TABLE, "postcode", FieldValue::Text(postcode)),
        None => record,
    }
}

/// Move a "(subject to insolvency proceedings)" marker out of the charity
/// name into the notes field.
fn strip_insolvency_suffix(record: NormalizedRecord) -> NormalizedRecord {
    let name = match record
        .value(&CHARITY_TABLE, "name")
        .and_then(FieldValue::as_text)
    {
        Some(name) if INSOLVENCY.is_match(name) => name.to_string(),
        _ => return record,
    };
    let cleaned = TRAILING_PUNCTUATION
        .replace(INSOLVENCY.replace_all(&name, "").trim(), "")
        .trim()
        .to_string();
    let notes = match record
        .value(&CHARITY_TABLE, "notes")
        .and_then(FieldValue::as_text)
    {
        Some(notes) => format!("{notes}. Subject to insolvency proceedings."),
        None => "Subject to insolvency proceedings.".to_string(),
    };
    record
        .with_value(&CHARITY_TABLE, "name", FieldValue::Text(cleaned))
        .with_value(&CHARITY_TABLE, "notes", FieldValue::Text(notes))
}

/// OSCR list fields quote tokens with single quotes, protecting embedded
/// commas; unquoted values fall back to the bracket-aware tokenizer.
fn split_quoted(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.contains('\'') {
        trimmed
            .split("','")
            .map(|token| token.trim().trim_matches('\'').trim().to_string())
            .filter(|token| !token.is_empty())
            .collect()
    } else {
        split_list(trimmed, ',')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_row() -> SourceRecord {
        let mut row = SourceRecord::new();
        row.insert("Charity Number", "SC000001");
        row.insert("Charity Name", "The Alpha Trust (subject to insolvency proceedings)");
        row.insert("Charity Status", "Active");
        row.insert("Registered Date", "01/04/1992");
        row.insert("Year End", "31/03/2024");
        row.insert("Most recent year income", "125000");
        row.insert("Most recent year expenditure", "118000");
        row.insert("Postcode", "eh1 1aa");
        row.insert("Website", "www.alphatrust.scot");
        row.insert("Notes", "");
        row
    }

    #[test]
    fn insolvency_marker_moves_into_notes() {
        let record = normalize_record(&CHARITY_TABLE, &register_row()).unwrap();
        let record = strip_insolvency_suffix(record);
        assert_eq!(
            record
                .value(&CHARITY_TABLE, "name")
                .and_then(FieldValue::as_text),
            Some("The Alpha Trust")
        );
        assert_eq!(
            record
                .value(&CHARITY_TABLE, "notes")
                .and_then(FieldValue::as_text),
            Some("Subject to insolvency proceedings.")
        );
    }

    #[test]
    fn contact_fields_are_tidied() {
        let record = normalize_record(&CHARITY_TABLE, &register_row()).unwrap();
        let record = tidy_contact_fields(record);
        assert_eq!(
            record
                .value(&CHARITY_TABLE, "website")
                .and_then(FieldValue::as_text),
            Some("http://www.alphatrust.scot")
        );
        assert_eq!(
            record
                .value(&CHARITY_TABLE, "postcode")
                .and_then(FieldValue::as_text),
            Some("EH1 1AA")
        );
    }

    #[test]
    fn quoted_purpose_lists_keep_embedded_commas() {
        let tokens = split_quoted(
            "'The advancement of education','No specific group, or for the benefit of the community'",
        );
        assert_eq!(
            tokens,
            vec![
                "The advancement of education".to_string(),
                "No specific group, or for the benefit of the community".to_string(),
            ]
        );
    }

    #[test]
    fn unquoted_lists_split_on_commas() {
        assert_eq!(
            split_quoted("Education, Health"),
            vec!["Education".to_string(), "Health".to_string()]
        );
    }
}
