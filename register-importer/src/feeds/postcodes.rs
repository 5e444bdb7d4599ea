//! National Statistics Postcode Lookup (NSPL).
//!
//! The download URL changes per release, so it is discovered through the
//! geoportal search API by product code. The zip carries the full file
//! and a `multi_csv` directory of per-area parts; only the parts are
//! read. Geography codes are resolved against the `geo_code` reference
//! table, and codes it does not know resolve to null rather than failing
//! the run.

use async_trait::async_trait;
use feedfetch::Fetcher;
use register_importer_pipeline::errors::{ConsumerError, OrchestratorError};
use register_importer_pipeline::normalize::normalize_record;
use register_importer_pipeline::orchestrator::{FeedHandler, FeedSource, RowSink};
use register_importer_pipeline::resolve::ReferenceResolver;
use register_importer_shared::types::{
    ColumnSpec, CsvDialect, FeedSpec, FieldValue, LoadStrategy, SourceEncoding, SourceRecord,
    TableSpec,
};

const PRODUCT_CODE: &str = "PRD_NSPL";

/// Pseudo geography codes standing in for "not applicable".
const PSEUDO_CODES: &[&str] = &["9Z9", "Z9"];

/// The exact header row of an NSPL part file. Extra or missing fields
/// mean a new edition changed shape and the column mapping needs
/// revisiting, so both are fatal.
const EXPECTED_HEADERS: &[&str] = &[
    "pcd7", "pcd8", "pcds", "dointr", "doterm", "usrtypind", "east1m", "north1m", "gridind",
    "oa21cd", "cty25cd", "ced25cd", "lad25cd", "wd25cd", "nhser24cd", "ctry25cd", "rgn25cd",
    "pcon24cd", "ttwa15cd", "itl25cd", "npark16cd", "lsoa21cd", "msoa21cd", "wz11cd", "sicbl24cd",
    "bua24cd", "ruc21ind", "oac11ind", "lat", "long", "lep21cd1", "lep21cd2", "pfa23cd", "imd20ind",
    "icb23cd",
];

/// Columns holding geography codes, resolved against `geo_code`.
const GEO_COLUMNS: &[&str] = &[
    "output_area",
    "county",
    "local_authority",
    "ward",
    "country",
    "region",
    "parliamentary_constituency",
    "travel_to_work_area",
    "lsoa",
    "msoa",
    "police_force_area",
];

static POSTCODE_TABLE: TableSpec = TableSpec {
    table: "postcode",
    columns: &[
        ColumnSpec::text("pcds", "postcode"),
        ColumnSpec::text("dointr", "date_introduced").with_null_suffix("999999"),
        ColumnSpec::text("doterm", "date_terminated").with_null_suffix("999999"),
        ColumnSpec::integer("usrtypind", "user_type"),
        ColumnSpec::integer("east1m", "easting"),
        ColumnSpec::integer("north1m", "northing"),
        ColumnSpec::integer("gridind", "grid_quality"),
        ColumnSpec::float("lat", "latitude"),
        ColumnSpec::float("long", "longitude"),
        ColumnSpec::text("oa21cd", "output_area")
            .with_nulls(PSEUDO_CODES)
            .with_null_suffix("999999"),
        ColumnSpec::text("cty25cd", "county")
            .with_nulls(PSEUDO_CODES)
            .with_null_suffix("999999"),
        ColumnSpec::text("lad25cd", "local_authority")
            .with_nulls(PSEUDO_CODES)
            .with_null_suffix("999999"),
        ColumnSpec::text("wd25cd", "ward")
            .with_nulls(PSEUDO_CODES)
            .with_null_suffix("999999"),
        ColumnSpec::text("ctry25cd", "country")
            .with_nulls(PSEUDO_CODES)
            .with_null_suffix("999999"),
        ColumnSpec::text("rgn25cd", "region")
            .with_nulls(PSEUDO_CODES)
            .with_null_suffix("999999"),
        ColumnSpec::text("pcon24cd", "parliamentary_constituency")
            .with_nulls(PSEUDO_CODES)
            .with_null_suffix("999999"),
        ColumnSpec::text("ttwa15cd", "travel_to_work_area")
            .with_nulls(PSEUDO_CODES)
            .with_null_suffix("999999"),
        ColumnSpec::text("lsoa21cd", "lsoa")
            .with_nulls(PSEUDO_CODES)
            .with_null_suffix("999999"),
        ColumnSpec::text("msoa21cd", "msoa")
            .with_nulls(PSEUDO_CODES)
            .with_null_suffix("999999"),
        ColumnSpec::text("pfa23cd", "police_force_area")
            .with_nulls(PSEUDO_CODES)
            .with_null_suffix("999999"),
        ColumnSpec::integer("imd20ind", "index_of_multiple_deprivation"),
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

static POSTCODES: FeedSpec = FeedSpec {
    name: "postcodes",
    dialect: CsvDialect::COMMA,
    encoding: SourceEncoding::Utf8Bom,
    tables: &[&POSTCODE_TABLE],
    cache_expiry_days: 10,
    strict_column_count: true,
};

pub struct PostcodesFeed {
    resolver: ReferenceResolver,
}

impl PostcodesFeed {
    pub fn new() -> Self {
        Self {
            resolver: ReferenceResolver::new("geography code", &[]),
        }
    }
}

impl Default for PostcodesFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedHandler for PostcodesFeed {
    fn spec(&self) -> &'static FeedSpec {
        &POSTCODES
    }

    async fn sources(&self, fetcher: &dyn Fetcher) -> Result<Vec<FeedSource>, OrchestratorError> {
        let url = super::latest_geoportal_url(POSTCODES.name, PRODUCT_CODE, fetcher).await?;
        Ok(vec![FeedSource::Archive {
            url,
            scrub_embedded_breaks: false,
        }])
    }

    fn reference_preloads(&self) -> &'static [(&'static str, &'static str)] {
        &[("geo_code", "code")]
    }

    fn wants_file(&self, source: &str) -> bool {
        source.contains("multi_csv/") && source.ends_with(".csv")
    }

    fn check_headers(&self, source: &str, headers: &[String]) -> Result<(), ConsumerError> {
        let missing: Vec<String> = EXPECTED_HEADERS
            .iter()
            .filter(|expected| !headers.iter().any(|h| h == *expected))
            .map(|expected| expected.to_string())
            .collect();
        let unexpected: Vec<String> = headers
            .iter()
            .filter(|header| !EXPECTED_HEADERS.contains(&header.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() && unexpected.is_empty() {
            return Ok(());
        }
        Err(ConsumerError::HeaderMismatch {
            file: source.to_string(),
            missing,
            unexpected,
        })
    }

    fn sample_key(&self, _source: &str, row: &SourceRecord) -> Option<String> {
        row.get("pcds").map(str::to_string)
    }

    fn handle_row(
        &mut self,
        _source: &str,
        row: &SourceRecord,
        sink: &mut RowSink<'_>,
    ) -> Result<(), OrchestratorError> {
        let mut record = normalize_record(&POSTCODE_TABLE, row)?;
        {
            let known = sink.known_keys("geo_code");
            for column in GEO_COLUMNS {
                let code = record
                    .value(&POSTCODE_TABLE, column)
                    .and_then(FieldValue::as_text)
                    .map(str::to_string);
                let Some(code) = code else {
                    continue;
                };
                record = match self.resolver.resolve(known, &code) {
                    Some(resolved) => {
                        record.with_value(&POSTCODE_TABLE, column, FieldValue::Text(resolved))
                    }
                    None => record.with_value(&POSTCODE_TABLE, column, FieldValue::Null),
                };
            }
        }
        sink.stage("postcode", record)?;
        Ok(())
    }
}
