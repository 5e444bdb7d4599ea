//! Northern Ireland charity register (CCNI).
//!
//! One latin-1 CSV export covering registered and removed charities. The
//! register keys charities by a bare number; the unified table carries
//! them as zero-filled `NI` numbers so the three registers never collide.

use async_trait::async_trait;
use feedfetch::Fetcher;
use register_importer_pipeline::errors::OrchestratorError;
use register_importer_pipeline::normalize::{normalize_record, split_list};
use register_importer_pipeline::orchestrator::{FeedHandler, FeedSource, RowSink};
use register_importer_shared::types::{
    ColumnSpec, CsvDialect, FeedSpec, FieldValue, LoadStrategy, NormalizedRecord, SourceEncoding,
    SourceRecord, TableSpec,
};

use super::CLASSIFICATION_TABLE;

const DOWNLOAD_URL: &str = "https://www.charitycommissionni.org.uk/umbraco/api/charityApi/ExportSearchResultsToCsv/?include=Linked&include=Removed";

/// The export spells dates with the month name, e.g. `31 March 2024`.
const MONTH_NAME_DATE: &[&str] = &["%d %B %Y"];

const CLASSIFICATION_SOURCES: &[&str] = &[
    "What the charity does",
    "Who the charity helps",
    "How the charity works",
];

static CHARITY_TABLE: TableSpec = TableSpec {
    table: "charity",
    columns: &[
        ColumnSpec::text("", "charity_number"),
        ColumnSpec::text("Charity name", "name"),
        ColumnSpec::text("", "known_as"),
        ColumnSpec::text("", "regulator"),
        ColumnSpec::text("Status", "status"),
        ColumnSpec::date("Date registered", "registered_date", &["%d/%m/%Y"]),
        ColumnSpec::date("", "removed_date", MONTH_NAME_DATE),
        ColumnSpec::date(
            "Date for financial year ending",
            "financial_year_end",
            MONTH_NAME_DATE,
        ),
        ColumnSpec::integer("Total income", "income"),
        ColumnSpec::integer("Total spending", "spending"),
        ColumnSpec::text("", "company_number"),
        ColumnSpec::text("", "postcode"),
        ColumnSpec::text("Public address", "city"),
        ColumnSpec::text("Website", "website"),
        ColumnSpec::text("Email", "email"),
        ColumnSpec::text("Telephone", "phone"),
        ColumnSpec::text("", "notes"),
    ],
    key: &["charity_number"],
    period_column: None,
    strategy: LoadStrategy::Replace {
        ignore_conflicts: true,
    },
    batch_size: 100_000,
    reset_sequence: false,
    freshness_column: None,
};

static CCNI: FeedSpec = FeedSpec {
    name: "ccni",
    dialect: CsvDialect::COMMA,
    encoding: SourceEncoding::Latin1,
    tables: &[&CHARITY_TABLE, &CLASSIFICATION_TABLE],
    cache_expiry_days: 1,
    strict_column_count: false,
};

pub struct CcniFeed;

impl CcniFeed {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CcniFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedHandler for CcniFeed {
    fn spec(&self) -> &'static FeedSpec {
        &CCNI
    }

    async fn sources(&self, _fetcher: &dyn Fetcher) -> Result<Vec<FeedSource>, OrchestratorError> {
        Ok(vec![FeedSource::File {
            url: DOWNLOAD_URL.to_string(),
        }])
    }

    fn replace_scope(&self) -> Option<(&'static str, &'static str)> {
        Some(("regulator", "CCNI"))
    }

    fn sample_key(&self, _source: &str, row: &SourceRecord) -> Option<String> {
        row.get("Reg charity number").map(str::to_string)
    }

    fn handle_row(
        &mut self,
        _source: &str,
        row: &SourceRecord,
        sink: &mut RowSink<'_>,
    ) -> Result<(), OrchestratorError> {
        let Some(number) = row.get("Reg charity number").map(ni_charity_number) else {
            return Ok(());
        };

        let mut record = normalize_record(&CHARITY_TABLE, row)?
            .with_value(
                &CHARITY_TABLE,
                "charity_number",
                FieldValue::Text(number.clone()),
            )
            .with_value(
                &CHARITY_TABLE,
                "regulator",
                FieldValue::Text("CCNI".to_string()),
            );
        if let Some(company_number) = row.get("Company number").and_then(ni_company_number) {
            record = record.with_value(
                &CHARITY_TABLE,
                "company_number",
                FieldValue::Text(company_number),
            );
        }
        let website = record
            .value(&CHARITY_TABLE, "website")
            .and_then(FieldValue::as_text)
            .filter(|website| !website.starts_with("http"))
            .map(super::with_scheme);
        if let Some(website) = website {
            record = record.with_value(&CHARITY_TABLE, "website", FieldValue::Text(website));
        }
        sink.stage("charity", record)?;

        for header in CLASSIFICATION_SOURCES {
            let Some(raw) = row.get(header) else {
                continue;
            };
            for token in split_list(raw, ',') {
                sink.stage(
                    "charity_classification",
                    NormalizedRecord::new(vec![
                        FieldValue::Text(number.clone()),
                        FieldValue::Text("CCNI".to_string()),
                        FieldValue::Text(header.to_string()),
                        FieldValue::Text(token),
                    ]),
                )?;
            }
        }
        Ok(())
    }
}

/// `100034` becomes `NI100034`; short historical numbers are zero-filled.
fn ni_charity_number(raw: &str) -> String {
    format!("NI{:0>6}", raw.trim())
}

/// Company numbers are published without their `NI` prefix, and `0` where
/// the charity has none.
fn ni_company_number(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "0" {
        return None;
    }
    Some(format!("NI{:0>6}", trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charity_numbers_are_prefixed_and_zero_filled() {
        assert_eq!(ni_charity_number("100034"), "NI100034");
        assert_eq!(ni_charity_number("1234"), "NI001234");
    }

    #[test]
    fn company_number_zero_means_none() {
        assert_eq!(ni_company_number("0"), None);
        assert_eq!(ni_company_number("41770"), Some("NI041770".to_string()));
    }

    #[test]
    fn month_name_dates_parse() {
        let mut row = SourceRecord::new();
        row.insert("Reg charity number", "100034");
        row.insert("Charity name", "Belfast Aid");
        row.insert("Date for financial year ending", "31 March 2024");
        row.insert("Total income", "52000");
        let record = normalize_record(&CHARITY_TABLE, &row).unwrap();
        assert_eq!(
            record
                .value(&CHARITY_TABLE, "financial_year_end")
                .and_then(FieldValue::as_date)
                .map(|date| date.to_string()),
            Some("2024-03-31".to_string())
        );
    }
}
