//! England and Wales charity register (CCEW).
//!
//! Thirteen zipped tab-delimited extracts, one per table. Long text
//! fields wrap across physical lines, so extraction scrubs the embedded
//! `\r\n\t` sequences back to a single tab. Most files are a straight
//! reload; the annual-return files upsert, nullifying the volatile
//! "latest submission" markers first so a re-published extract cannot
//! leave two rows flagged latest.

use async_trait::async_trait;
use feedfetch::Fetcher;
use register_importer_pipeline::errors::OrchestratorError;
use register_importer_pipeline::normalize::normalize_record;
use register_importer_pipeline::orchestrator::{FeedHandler, FeedSource, RowSink};
use register_importer_shared::types::{
    ColumnSpec, CsvDialect, FeedSpec, LoadStrategy, SourceEncoding, SourceRecord, TableSpec,
};

const BASE_URL: &str =
    "https://ccewuksprdoneregsadata1.blob.core.windows.net/data/txt/publicextract.{}.zip";

const EXTRACT_FILES: &[&str] = &[
    "charity",
    "charity_annual_return_history",
    "charity_annual_return_parta",
    "charity_annual_return_partb",
    "charity_area_of_operation",
    "charity_classification",
    "charity_event_history",
    "charity_governing_document",
    "charity_other_names",
    "charity_other_regulators",
    "charity_policy",
    "charity_published_report",
    "charity_trustee",
];

/// Date columns mix bare dates and midnight timestamps across extracts.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y-%m-%d %H:%M:%S"];

const NULLIFY_LATEST_MARKERS: &str =
    "UPDATE {table} SET latest_fin_period_submitted_ind = NULL, fin_period_order_number = NULL";

static CHARITY_TABLE: TableSpec = TableSpec {
    table: "ccew_charity",
    columns: &[
        ColumnSpec::integer("organisation_number", "organisation_number"),
        ColumnSpec::integer("registered_charity_number", "registered_charity_number"),
        ColumnSpec::integer("linked_charity_number", "linked_charity_number"),
        ColumnSpec::text("charity_name", "charity_name"),
        ColumnSpec::text("charity_type", "charity_type"),
        ColumnSpec::text("charity_registration_status", "charity_registration_status"),
        ColumnSpec::date("date_of_registration", "date_of_registration", DATE_FORMATS),
        ColumnSpec::date("date_of_removal", "date_of_removal", DATE_FORMATS),
        ColumnSpec::text("charity_reporting_status", "charity_reporting_status"),
        ColumnSpec::float("latest_income", "latest_income"),
        ColumnSpec::float("latest_expenditure", "latest_expenditure"),
        ColumnSpec::text("charity_contact_postcode", "charity_contact_postcode"),
        ColumnSpec::text("charity_contact_web", "charity_contact_web"),
        ColumnSpec::text(
            "charity_company_registration_number",
            "charity_company_registration_number",
        ),
    ],
    key: &["organisation_number"],
    period_column: None,
    strategy: LoadStrategy::Replace {
        ignore_conflicts: false,
    },
    batch_size: 100_000,
    reset_sequence: false,
    freshness_column: None,
};

static ANNUAL_RETURN_HISTORY_TABLE: TableSpec = TableSpec {
    table: "ccew_charity_annual_return_history",
    columns: &[
        ColumnSpec::integer("organisation_number", "organisation_number"),
        ColumnSpec::integer("registered_charity_number", "registered_charity_number"),
        ColumnSpec::date("fin_period_start_date", "fin_period_start_date", DATE_FORMATS),
        ColumnSpec::date("fin_period_end_date", "fin_period_end_date", DATE_FORMATS),
        ColumnSpec::text("ar_cycle_reference", "ar_cycle_reference"),
        ColumnSpec::date("reporting_due_date", "reporting_due_date", DATE_FORMATS),
        ColumnSpec::date(
            "date_annual_return_received",
            "date_annual_return_received",
            DATE_FORMATS,
        ),
        ColumnSpec::date("date_accounts_received", "date_accounts_received", DATE_FORMATS),
        ColumnSpec::integer("total_gross_income", "total_gross_income"),
        ColumnSpec::integer("total_gross_expenditure", "total_gross_expenditure"),
        ColumnSpec::boolean("accounts_qualified", "accounts_qualified"),
        ColumnSpec::boolean("suppression_ind", "suppression_ind"),
    ],
    key: &[
        "organisation_number",
        "fin_period_end_date",
        "ar_cycle_reference",
    ],
    period_column: None,
    strategy: LoadStrategy::Upsert {
        pre_upsert_sql: None,
    },
    batch_size: 100_000,
    reset_sequence: false,
    freshness_column: None,
};

static ANNUAL_RETURN_PARTA_TABLE: TableSpec = TableSpec {
    table: "ccew_charity_annual_return_parta",
    columns: &[
        ColumnSpec::integer("organisation_number", "organisation_number"),
        ColumnSpec::integer("registered_charity_number", "registered_charity_number"),
        ColumnSpec::boolean(
            "latest_fin_period_submitted_ind",
            "latest_fin_period_submitted_ind",
        ),
        ColumnSpec::integer("fin_period_order_number", "fin_period_order_number"),
        ColumnSpec::text("ar_cycle_reference", "ar_cycle_reference"),
        ColumnSpec::date("fin_period_start_date", "fin_period_start_date", DATE_FORMATS),
        ColumnSpec::date("fin_period_end_date", "fin_period_end_date", DATE_FORMATS),
        ColumnSpec::date("ar_due_date", "ar_due_date", DATE_FORMATS),
        ColumnSpec::date("ar_received_date", "ar_received_date", DATE_FORMATS),
        ColumnSpec::integer("total_gross_income", "total_gross_income"),
        ColumnSpec::integer("total_gross_expenditure", "total_gross_expenditure"),
        ColumnSpec::boolean(
            "charity_raises_funds_from_public",
            "charity_raises_funds_from_public",
        ),
    ],
    key: &["organisation_number", "fin_period_end_date"],
    period_column: None,
    strategy: LoadStrategy::Upsert {
        pre_upsert_sql: Some(NULLIFY_LATEST_MARKERS),
    },
    batch_size: 100_000,
    reset_sequence: false,
    freshness_column: None,
};

static ANNUAL_RETURN_PARTB_TABLE: TableSpec = TableSpec {
    table: "ccew_charity_annual_return_partb",
    columns: &[
        ColumnSpec::integer("organisation_number", "organisation_number"),
        ColumnSpec::integer("registered_charity_number", "registered_charity_number"),
        ColumnSpec::boolean(
            "latest_fin_period_submitted_ind",
            "latest_fin_period_submitted_ind",
        ),
        ColumnSpec::integer("fin_period_order_number", "fin_period_order_number"),
        ColumnSpec::text("ar_cycle_reference", "ar_cycle_reference"),
        ColumnSpec::date("fin_period_start_date", "fin_period_start_date", DATE_FORMATS),
        ColumnSpec::date("fin_period_end_date", "fin_period_end_date", DATE_FORMATS),
        ColumnSpec::integer(
            "income_donations_and_legacies",
            "income_donations_and_legacies",
        ),
        ColumnSpec::integer(
            "income_charitable_activities",
            "income_charitable_activities",
        ),
        ColumnSpec::integer(
            "expenditure_charitable_expenditure",
            "expenditure_charitable_expenditure",
        ),
        ColumnSpec::integer("total_gross_income", "total_gross_income"),
        ColumnSpec::integer("total_gross_expenditure", "total_gross_expenditure"),
        ColumnSpec::integer("funds_total", "funds_total"),
    ],
    key: &["organisation_number", "fin_period_end_date"],
    period_column: None,
    strategy: LoadStrategy::Upsert {
        pre_upsert_sql: Some(NULLIFY_LATEST_MARKERS),
    },
    batch_size: 100_000,
    reset_sequence: false,
    freshness_column: None,
};

static AREA_OF_OPERATION_TABLE: TableSpec = TableSpec {
    table: "ccew_charity_area_of_operation",
    columns: &[
        ColumnSpec::integer("organisation_number", "organisation_number"),
        ColumnSpec::integer("registered_charity_number", "registered_charity_number"),
        ColumnSpec::integer("linked_charity_number", "linked_charity_number"),
        ColumnSpec::text("geographic_area_type", "geographic_area_type"),
        ColumnSpec::text("geographic_area_description", "geographic_area_description"),
        ColumnSpec::text("parent_geographic_area_type", "parent_geographic_area_type"),
        ColumnSpec::text(
            "parent_geographic_area_description",
            "parent_geographic_area_description",
        ),
        ColumnSpec::boolean("welsh_ind", "welsh_ind"),
    ],
    key: &["organisation_number", "geographic_area_description"],
    period_column: None,
    strategy: LoadStrategy::Replace {
        ignore_conflicts: true,
    },
    batch_size: 100_000,
    reset_sequence: true,
    freshness_column: None,
};

static CLASSIFICATION_TABLE: TableSpec = TableSpec {
    table: "ccew_charity_classification",
    columns: &[
        ColumnSpec::integer("organisation_number", "organisation_number"),
        ColumnSpec::integer("registered_charity_number", "registered_charity_number"),
        ColumnSpec::integer("linked_charity_number", "linked_charity_number"),
        ColumnSpec::integer("classification_code", "classification_code"),
        ColumnSpec::text("classification_type", "classification_type"),
        ColumnSpec::text("classification_description", "classification_description"),
    ],
    key: &["organisation_number", "classification_code"],
    period_column: None,
    strategy: LoadStrategy::Replace {
        ignore_conflicts: true,
    },
    batch_size: 100_000,
    reset_sequence: true,
    freshness_column: None,
};

static EVENT_HISTORY_TABLE: TableSpec = TableSpec {
    table: "ccew_charity_event_history",
    columns: &[
        ColumnSpec::integer("organisation_number", "organisation_number"),
        ColumnSpec::integer("registered_charity_number", "registered_charity_number"),
        ColumnSpec::integer("linked_charity_number", "linked_charity_number"),
        ColumnSpec::text("charity_name", "charity_name"),
        ColumnSpec::text("charity_event_type", "charity_event_type"),
        ColumnSpec::date("date_of_event", "date_of_event", DATE_FORMATS),
        ColumnSpec::text("reason", "reason"),
        ColumnSpec::integer("assoc_organisation_number", "assoc_organisation_number"),
    ],
    key: &["organisation_number", "charity_event_type", "date_of_event"],
    period_column: None,
    strategy: LoadStrategy::Replace {
        ignore_conflicts: true,
    },
    batch_size: 100_000,
    reset_sequence: true,
    freshness_column: None,
};

static GOVERNING_DOCUMENT_TABLE: TableSpec = TableSpec {
    table: "ccew_charity_governing_document",
    columns: &[
        ColumnSpec::integer("organisation_number", "organisation_number"),
        ColumnSpec::integer("registered_charity_number", "registered_charity_number"),
        ColumnSpec::integer("linked_charity_number", "linked_charity_number"),
        ColumnSpec::text(
            "governing_document_description",
            "governing_document_description",
        ),
        ColumnSpec::text("charitable_objects", "charitable_objects"),
        ColumnSpec::text("area_of_benefit", "area_of_benefit"),
    ],
    key: &["organisation_number"],
    period_column: None,
    strategy: LoadStrategy::Replace {
        ignore_conflicts: true,
    },
    batch_size: 100_000,
    reset_sequence: true,
    freshness_column: None,
};

static OTHER_NAMES_TABLE: TableSpec = TableSpec {
    table: "ccew_charity_other_names",
    columns: &[
        ColumnSpec::integer("organisation_number", "organisation_number"),
        ColumnSpec::integer("registered_charity_number", "registered_charity_number"),
        ColumnSpec::integer("linked_charity_number", "linked_charity_number"),
        ColumnSpec::integer("charity_name_id", "charity_name_id"),
        ColumnSpec::text("charity_name_type", "charity_name_type"),
        ColumnSpec::text("charity_name", "charity_name"),
    ],
    key: &["organisation_number", "charity_name"],
    period_column: None,
    strategy: LoadStrategy::Replace {
        ignore_conflicts: true,
    },
    batch_size: 100_000,
    reset_sequence: true,
    freshness_column: None,
};

static OTHER_REGULATORS_TABLE: TableSpec = TableSpec {
    table: "ccew_charity_other_regulators",
    columns: &[
        ColumnSpec::integer("organisation_number", "organisation_number"),
        ColumnSpec::integer("registered_charity_number", "registered_charity_number"),
        ColumnSpec::integer("regulator_order", "regulator_order"),
        ColumnSpec::text("regulator_name", "regulator_name"),
        ColumnSpec::text("regulator_web_url", "regulator_web_url"),
    ],
    key: &["organisation_number", "regulator_name"],
    period_column: None,
    strategy: LoadStrategy::Replace {
        ignore_conflicts: true,
    },
    batch_size: 100_000,
    reset_sequence: true,
    freshness_column: None,
};

static POLICY_TABLE: TableSpec = TableSpec {
    table: "ccew_charity_policy",
    columns: &[
        ColumnSpec::integer("organisation_number", "organisation_number"),
        ColumnSpec::integer("registered_charity_number", "registered_charity_number"),
        ColumnSpec::integer("linked_charity_number", "linked_charity_number"),
        ColumnSpec::text("policy_name", "policy_name"),
    ],
    key: &["organisation_number", "policy_name"],
    period_column: None,
    strategy: LoadStrategy::Replace {
        ignore_conflicts: true,
    },
    batch_size: 100_000,
    reset_sequence: true,
    freshness_column: None,
};

static PUBLISHED_REPORT_TABLE: TableSpec = TableSpec {
    table: "ccew_charity_published_report",
    columns: &[
        ColumnSpec::integer("organisation_number", "organisation_number"),
        ColumnSpec::integer("registered_charity_number", "registered_charity_number"),
        ColumnSpec::integer("linked_charity_number", "linked_charity_number"),
        ColumnSpec::text("report_name", "report_name"),
        ColumnSpec::text("report_location", "report_location"),
        ColumnSpec::date("date_published", "date_published", DATE_FORMATS),
    ],
    key: &["organisation_number", "report_name", "date_published"],
    period_column: None,
    strategy: LoadStrategy::Replace {
        ignore_conflicts: true,
    },
    batch_size: 100_000,
    reset_sequence: true,
    freshness_column: None,
};

static TRUSTEE_TABLE: TableSpec = TableSpec {
    table: "ccew_charity_trustee",
    columns: &[
        ColumnSpec::integer("organisation_number", "organisation_number"),
        ColumnSpec::integer("registered_charity_number", "registered_charity_number"),
        ColumnSpec::integer("linked_charity_number", "linked_charity_number"),
        ColumnSpec::integer("trustee_id", "trustee_id"),
        ColumnSpec::text("trustee_name", "trustee_name"),
        ColumnSpec::boolean("trustee_is_chair", "trustee_is_chair"),
        ColumnSpec::text("individual_or_organisation", "individual_or_organisation"),
        ColumnSpec::date(
            "trustee_date_of_appointment",
            "trustee_date_of_appointment",
            DATE_FORMATS,
        ),
    ],
    key: &["organisation_number", "trustee_id"],
    period_column: None,
    strategy: LoadStrategy::Replace {
        ignore_conflicts: true,
    },
    batch_size: 100_000,
    reset_sequence: true,
    freshness_column: None,
};

static CCEW: FeedSpec = FeedSpec {
    name: "ccew",
    dialect: CsvDialect::TAB_UNQUOTED,
    encoding: SourceEncoding::Utf8Bom,
    tables: &[
        &CHARITY_TABLE,
        &ANNUAL_RETURN_HISTORY_TABLE,
        &ANNUAL_RETURN_PARTA_TABLE,
        &ANNUAL_RETURN_PARTB_TABLE,
        &AREA_OF_OPERATION_TABLE,
        &CLASSIFICATION_TABLE,
        &EVENT_HISTORY_TABLE,
        &GOVERNING_DOCUMENT_TABLE,
        &OTHER_NAMES_TABLE,
        &OTHER_REGULATORS_TABLE,
        &POLICY_TABLE,
        &PUBLISHED_REPORT_TABLE,
        &TRUSTEE_TABLE,
    ],
    cache_expiry_days: 1,
    strict_column_count: true,
};

pub struct CcewFeed;

impl CcewFeed {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CcewFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Map an extract member like `publicextract.charity_policy.txt` onto its
/// target table spec.
fn table_for_member(member: &str) -> Option<&'static TableSpec> {
    let stem = member
        .rsplit('/')
        .next()
        .unwrap_or(member)
        .strip_prefix("publicextract.")?
        .strip_suffix(".txt")?;
    let table = format!("ccew_{stem}");
    CCEW.tables.iter().copied().find(|t| t.table == table)
}

#[async_trait]
impl FeedHandler for CcewFeed {
    fn spec(&self) -> &'static FeedSpec {
        &CCEW
    }

    async fn sources(&self, _fetcher: &dyn Fetcher) -> Result<Vec<FeedSource>, OrchestratorError> {
        Ok(EXTRACT_FILES
            .iter()
            .map(|file| FeedSource::Archive {
                url: BASE_URL.replace("{}", file),
                scrub_embedded_breaks: true,
            })
            .collect())
    }

    fn wants_file(&self, source: &str) -> bool {
        table_for_member(source).is_some()
    }

    fn sample_key(&self, _source: &str, row: &SourceRecord) -> Option<String> {
        row.get("registered_charity_number").map(str::to_string)
    }

    fn handle_row(
        &mut self,
        source: &str,
        row: &SourceRecord,
        sink: &mut RowSink<'_>,
    ) -> Result<(), OrchestratorError> {
        let Some(table) = table_for_member(source) else {
            return Ok(());
        };
        sink.stage(table.table, normalize_record(table, row)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn members_map_onto_their_tables() {
        assert_eq!(
            table_for_member("publicextract.charity.txt").map(|t| t.table),
            Some("ccew_charity")
        );
        assert_eq!(
            table_for_member("publicextract.charity_annual_return_partb.txt").map(|t| t.table),
            Some("ccew_charity_annual_return_partb")
        );
        assert!(table_for_member("README.txt").is_none());
    }

    #[test]
    fn every_extract_file_has_a_table() {
        for file in EXTRACT_FILES {
            let member = format!("publicextract.{file}.txt");
            assert!(table_for_member(&member).is_some(), "{member}");
        }
    }

    #[test]
    fn timestamped_dates_normalize() {
        let mut row = SourceRecord::new();
        row.insert("organisation_number", "200001");
        row.insert("registered_charity_number", "200001");
        row.insert("charity_name", "The Example Foundation");
        row.insert("date_of_registration", "1991-04-01 00:00:00");
        let record = normalize_record(&CHARITY_TABLE, &row).unwrap();
        assert_eq!(
            record
                .value(&CHARITY_TABLE, "date_of_registration")
                .and_then(register_importer_shared::types::FieldValue::as_date)
                .map(|date| date.to_string()),
            Some("1991-04-01".to_string())
        );
    }
}
