//! Companies House basic company data product.
//!
//! A monthly full snapshot split across several zips. Loading goes
//! through the update-generation reconciler: companies absent from the
//! snapshot are kept but flagged stale, and their status demoted to
//! `removed` by the post-load SQL unless they already closed. Category,
//! status and accounts-type values pass through fixed vocabularies; an
//! unknown value aborts the run, since it means Companies House changed
//! the product's terms.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use feedfetch::Fetcher;
use register_importer_pipeline::errors::OrchestratorError;
use register_importer_pipeline::normalize::normalize_record;
use register_importer_pipeline::orchestrator::{FeedHandler, FeedSource, RowSink};
use register_importer_shared::types::{
    ColumnSpec, CsvDialect, FeedSpec, FieldValue, LoadStrategy, NormalizedRecord, SourceEncoding,
    SourceRecord, TableSpec, Vocabulary,
};

const DATE_FORMATS: &[&str] = &["%d/%m/%Y"];

/// The snapshot repeats up to ten previous names per company row.
const PREVIOUS_NAME_SLOTS: usize = 10;

static COMPANY_CATEGORIES: Vocabulary = Vocabulary {
    name: "company category",
    entries: &[
        ("Private Limited Company", "ltd"),
        ("Public Limited Company", "plc"),
        ("Community Interest Company", "community-interest-company"),
        (
            "Charitable Incorporated Organisation",
            "charitable-incorporated-organisation",
        ),
        (
            "Scottish Charitable Incorporated Organisation",
            "scottish-charitable-incorporated-organisation",
        ),
        (
            "PRI/LTD BY GUAR/NSC (Private, limited by guarantee, no share capital)",
            "private-limited-guarant-nsc",
        ),
        (
            "PRI/LBG/NSC (Private, Limited by guarantee, no share capital, use of 'Limited' exemption)",
            "private-limited-guarant-nsc-limited-exemption",
        ),
        (
            "PRIV LTD SECT. 30 (Private limited company, section 30 of the Companies Act)",
            "private-limited-shares-section-30-exemption",
        ),
        ("Private Unlimited", "private-unlimited"),
        ("Private Unlimited Company", "private-unlimited"),
        ("Limited Liability Partnership", "llp"),
        ("Limited Partnership", "limited-partnership"),
        ("Scottish Partnership", "scottish-partnership"),
        ("Old Public Company", "old-public-company"),
        ("Converted/Closed", "converted-or-closed"),
        (
            "European Public Limited-Liability Company (SE)",
            "european-public-limited-liability-company-se",
        ),
        (
            "Investment Company with Variable Capital",
            "investment-company-with-variable-capital",
        ),
        (
            "Investment Company with Variable Capital (Securities)",
            "icvc-securities",
        ),
        (
            "Investment Company with Variable Capital(Umbrella)",
            "icvc-umbrella",
        ),
        (
            "Industrial and Provident Society",
            "industrial-and-provident-society",
        ),
        ("Registered Society", "registered-society-non-jurisdictional"),
        ("Protected Cell Company", "protected-cell-company"),
        ("Royal Charter Company", "royal-charter"),
        ("United Kingdom Economic Interest Grouping", "ukeig"),
        ("United Kingdom Societas", "united-kingdom-societas"),
        ("Overseas Entity", "registered-overseas-entity"),
        (
            "Further Education and Sixth Form College Corps",
            "further-education-or-sixth-form-college-corporation",
        ),
        (
            "Authorised Company Service Provider",
            "authorised-company-service-provider",
        ),
        ("Other company type", "other"),
        ("Other Company Type", "other"),
    ],
};

static COMPANY_STATUSES: Vocabulary = Vocabulary {
    name: "company status",
    entries: &[
        ("Active", "active"),
        ("Active - Proposal to Strike off", "active-proposal-to-strike-off"),
        ("ADMINISTRATION ORDER", "administration"),
        ("ADMINISTRATIVE RECEIVER", "administration"),
        ("In Administration", "administration"),
        ("In Administration/Administrative Receiver", "administration"),
        ("In Administration/Receiver Manager", "administration"),
        ("Liquidation", "liquidation"),
        (
            "Live but Receiver Manager on at least one charge",
            "receivership",
        ),
        ("RECEIVER MANAGER / ADMINISTRATIVE RECEIVER", "receivership"),
        ("RECEIVERSHIP", "receivership"),
        ("Voluntary Arrangement", "voluntary-arrangement"),
        (
            "VOLUNTARY ARRANGEMENT / ADMINISTRATIVE RECEIVER",
            "voluntary-arrangement",
        ),
        (
            "VOLUNTARY ARRANGEMENT / RECEIVER MANAGER",
            "voluntary-arrangement",
        ),
    ],
};

static ACCOUNTS_TYPES: Vocabulary = Vocabulary {
    name: "accounts type",
    entries: &[
        ("ACCOUNTS TYPE NOT AVAILABLE", "no-accounts-type-available"),
        ("AUDIT EXEMPTION SUBSIDIARY", "audit-exemption-subsidiary"),
        ("AUDITED ABRIDGED", "audited-abridged"),
        ("DORMANT", "dormant"),
        ("FILING EXEMPTION SUBSIDIARY", "filing-exemption-subsidiary"),
        ("FULL", "full"),
        ("GROUP", "group"),
        ("INITIAL", "initial"),
        ("MEDIUM", "medium"),
        ("MICRO ENTITY", "micro-entity"),
        ("NO ACCOUNTS FILED", "no-accounts-filed"),
        ("PARTIAL EXEMPTION", "partial-exemption"),
        ("SMALL", "small"),
        ("TOTAL EXEMPTION FULL", "total-exemption-full"),
        ("TOTAL EXEMPTION SMALL", "total-exemption-small"),
        ("UNAUDITED ABRIDGED", "unaudited-abridged"),
    ],
};

static COMPANY_TABLE: TableSpec = TableSpec {
    table: "company",
    columns: &[
        ColumnSpec::text("CompanyNumber", "company_number"),
        ColumnSpec::text("CompanyName", "name"),
        ColumnSpec::enumerated("CompanyCategory", "category", &COMPANY_CATEGORIES),
        ColumnSpec::enumerated("CompanyStatus", "status", &COMPANY_STATUSES),
        ColumnSpec::text("CountryOfOrigin", "country_of_origin"),
        ColumnSpec::date("IncorporationDate", "incorporation_date", DATE_FORMATS),
        ColumnSpec::date("DissolutionDate", "dissolution_date", DATE_FORMATS),
        ColumnSpec::text("RegAddress.AddressLine1", "address1"),
        ColumnSpec::text("RegAddress.AddressLine2", "address2"),
        ColumnSpec::text("RegAddress.PostTown", "post_town"),
        ColumnSpec::text("RegAddress.County", "county"),
        ColumnSpec::text("RegAddress.Country", "country"),
        ColumnSpec::text("RegAddress.PostCode", "postcode"),
        ColumnSpec::date(
            "Accounts.LastMadeUpDate",
            "accounts_last_made_up_date",
            DATE_FORMATS,
        ),
        ColumnSpec::enumerated("Accounts.AccountCategory", "accounts_category", &ACCOUNTS_TYPES),
        ColumnSpec::boolean("", "in_latest_update"),
        ColumnSpec::date("", "last_updated", DATE_FORMATS),
    ],
    key: &["company_number"],
    period_column: None,
    strategy: LoadStrategy::Generations,
    batch_size: 50_000,
    reset_sequence: false,
    freshness_column: Some("in_latest_update"),
};

static PREVIOUS_NAME_TABLE: TableSpec = TableSpec {
    table: "company_previous_name",
    columns: &[
        ColumnSpec::text("", "company_number"),
        ColumnSpec::text("", "name"),
        ColumnSpec::date("", "effective_date", DATE_FORMATS),
        ColumnSpec::boolean("", "in_latest_update"),
    ],
    key: &["company_number", "name"],
    period_column: None,
    strategy: LoadStrategy::Generations,
    batch_size: 50_000,
    reset_sequence: false,
    freshness_column: Some("in_latest_update"),
};

static SIC_CODE_TABLE: TableSpec = TableSpec {
    table: "sic_code",
    columns: &[
        ColumnSpec::text("", "code"),
        ColumnSpec::text("", "title"),
    ],
    key: &["code"],
    period_column: None,
    strategy: LoadStrategy::Upsert {
        pre_upsert_sql: None,
    },
    batch_size: 50_000,
    reset_sequence: false,
    freshness_column: None,
};

static COMPANY_SIC_TABLE: TableSpec = TableSpec {
    table: "company_sic_code",
    columns: &[
        ColumnSpec::text("", "company_number"),
        ColumnSpec::text("", "sic_code"),
        ColumnSpec::boolean("", "in_latest_update"),
    ],
    key: &["company_number", "sic_code"],
    period_column: None,
    strategy: LoadStrategy::Generations,
    batch_size: 50_000,
    reset_sequence: false,
    freshness_column: Some("in_latest_update"),
};

static COMPANIES: FeedSpec = FeedSpec {
    name: "companies",
    dialect: CsvDialect::COMMA,
    encoding: SourceEncoding::Utf8Bom,
    tables: &[
        &COMPANY_TABLE,
        &PREVIOUS_NAME_TABLE,
        &SIC_CODE_TABLE,
        &COMPANY_SIC_TABLE,
    ],
    cache_expiry_days: 10,
    strict_column_count: false,
};

pub struct CompaniesFeed {
    urls: Vec<String>,
    /// SIC codes staged so far this run, the code table is tiny compared
    /// to the five million link rows pointing at it.
    staged_sic_codes: HashSet<String>,
}

impl CompaniesFeed {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            staged_sic_codes: HashSet::new(),
        }
    }
}

#[async_trait]
impl FeedHandler for CompaniesFeed {
    fn spec(&self) -> &'static FeedSpec {
        &COMPANIES
    }

    async fn sources(&self, _fetcher: &dyn Fetcher) -> Result<Vec<FeedSource>, OrchestratorError> {
        if self.urls.is_empty() {
            return Err(OrchestratorError::Discovery {
                feed: COMPANIES.name,
                message: "COMPANIES_DATA_URL lists no downloads".to_string(),
            });
        }
        Ok(self
            .urls
            .iter()
            .map(|url| FeedSource::Archive {
                url: url.clone(),
                scrub_embedded_breaks: false,
            })
            .collect())
    }

    fn sample_key(&self, _source: &str, row: &SourceRecord) -> Option<String> {
        row.get("CompanyNumber").map(str::to_string)
    }

    fn handle_row(
        &mut self,
        _source: &str,
        row: &SourceRecord,
        sink: &mut RowSink<'_>,
    ) -> Result<(), OrchestratorError> {
        let Some(company_number) = row.get("CompanyNumber").map(str::to_string) else {
            return Ok(());
        };

        let today = Utc::now().date_naive();
        let record = normalize_record(&COMPANY_TABLE, row)?
            .with_value(&COMPANY_TABLE, "in_latest_update", FieldValue::Boolean(true))
            .with_value(&COMPANY_TABLE, "last_updated", FieldValue::Date(today));
        sink.stage("company", record)?;

        for (name, effective_date) in previous_names(row) {
            sink.stage(
                "company_previous_name",
                NormalizedRecord::new(vec![
                    FieldValue::Text(company_number.clone()),
                    FieldValue::Text(name),
                    effective_date,
                    FieldValue::Boolean(true),
                ]),
            )?;
        }

        for (code, title) in sic_codes(row) {
            if self.staged_sic_codes.insert(code.clone()) {
                sink.stage(
                    "sic_code",
                    NormalizedRecord::new(vec![
                        FieldValue::Text(code.clone()),
                        title.map(FieldValue::Text).unwrap_or(FieldValue::Null),
                    ]),
                )?;
            }
            sink.stage(
                "company_sic_code",
                NormalizedRecord::new(vec![
                    FieldValue::Text(company_number.clone()),
                    FieldValue::Text(code),
                    FieldValue::Boolean(true),
                ]),
            )?;
        }
        Ok(())
    }

    fn post_load_sql(&self) -> Vec<(String, String)> {
        vec![
            (
                "derive accounts table".to_string(),
                "INSERT INTO company_account (company_number, financial_year_end, category) \
                 SELECT company_number, accounts_last_made_up_date, accounts_category \
                 FROM company WHERE accounts_last_made_up_date IS NOT NULL \
                 ON CONFLICT (company_number, financial_year_end) \
                 DO UPDATE SET category = EXCLUDED.category"
                    .to_string(),
            ),
            (
                "demote companies absent from the snapshot".to_string(),
                "UPDATE company SET status = 'removed' \
                 WHERE in_latest_update = false \
                 AND status NOT IN ('dissolved', 'converted-closed', 'removed', 'closed')"
                    .to_string(),
            ),
        ]
    }
}

/// Collect the populated `PreviousName_N` slots of one snapshot row.
fn previous_names(row: &SourceRecord) -> Vec<(String, FieldValue)> {
    let mut names = Vec::new();
    for slot in 1..=PREVIOUS_NAME_SLOTS {
        let name = row
            .get(&format!("PreviousName_{slot}.CompanyName"))
            .map(str::trim)
            .filter(|name| !name.is_empty());
        let Some(name) = name else {
            continue;
        };
        let effective_date = row
            .get(&format!("PreviousName_{slot}.CONDATE"))
            .and_then(|raw| chrono::NaiveDate::parse_from_str(raw.trim(), "%d/%m/%Y").ok())
            .map(FieldValue::Date)
            .unwrap_or(FieldValue::Null);
        names.push((name.to_string(), effective_date));
    }
    names
}

/// Parse the four `SICCode.SicText_N` slots, `"62012 - Business and
/// domestic software development"` style, skipping the `None Supplied`
/// placeholder.
fn sic_codes(row: &SourceRecord) -> Vec<(String, Option<String>)> {
    let mut codes = Vec::new();
    for slot in 1..=4 {
        let Some(raw) = row.get(&format!("SICCode.SicText_{slot}")) else {
            continue;
        };
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with("None Supplied") {
            continue;
        }
        match raw.split_once(" - ") {
            Some((code, title)) => codes.push((code.trim().to_string(), Some(title.trim().to_string()))),
            None => codes.push((raw.to_string(), None)),
        }
    }
    codes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_row() -> SourceRecord {
        let mut row = SourceRecord::new();
        row.insert("CompanyNumber", "09000001");
        row.insert("CompanyName", "EXAMPLE TRADING LIMITED");
        row.insert("CompanyCategory", "Private Limited Company");
        row.insert("CompanyStatus", "Active");
        row.insert("IncorporationDate", "14/05/2014");
        row.insert("Accounts.AccountCategory", "MICRO ENTITY");
        row.insert("SICCode.SicText_1", "62012 - Business and domestic software development");
        row.insert("SICCode.SicText_2", "None Supplied");
        row.insert("PreviousName_1.CompanyName", "EXAMPLE VENTURES LIMITED");
        row.insert("PreviousName_1.CONDATE", "01/02/2016");
        row
    }

    #[test]
    fn categories_and_statuses_map_to_canonical_values() {
        let record = normalize_record(&COMPANY_TABLE, &snapshot_row()).unwrap();
        assert_eq!(
            record
                .value(&COMPANY_TABLE, "category")
                .and_then(FieldValue::as_text),
            Some("ltd")
        );
        assert_eq!(
            record
                .value(&COMPANY_TABLE, "status")
                .and_then(FieldValue::as_text),
            Some("active")
        );
        assert_eq!(
            record
                .value(&COMPANY_TABLE, "accounts_category")
                .and_then(FieldValue::as_text),
            Some("micro-entity")
        );
    }

    #[test]
    fn unknown_category_is_fatal() {
        let mut row = snapshot_row();
        row.insert("CompanyCategory", "Interplanetary Venture");
        assert!(normalize_record(&COMPANY_TABLE, &row).is_err());
    }

    #[test]
    fn previous_name_slots_fan_out() {
        let names = previous_names(&snapshot_row());
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].0, "EXAMPLE VENTURES LIMITED");
        assert!(matches!(names[0].1, FieldValue::Date(_)));
    }

    #[test]
    fn sic_text_splits_into_code_and_title() {
        let codes = sic_codes(&snapshot_row());
        assert_eq!(
            codes,
            vec![(
                "62012".to_string(),
                Some("Business and domestic software development".to_string())
            )]
        );
    }
}
