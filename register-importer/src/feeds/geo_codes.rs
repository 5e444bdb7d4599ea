//! ONS Code History Database, the register behind `geo_code`.
//!
//! The change history file carries one row per life event of a
//! geography code, so a code can appear many times; the row with the
//! latest operational date wins. Postcode imports resolve their
//! geography columns against the codes loaded here, so this feed runs
//! before a postcode refresh on a fresh database.

use async_trait::async_trait;
use feedfetch::Fetcher;
use register_importer_pipeline::errors::OrchestratorError;
use register_importer_pipeline::normalize::normalize_record;
use register_importer_pipeline::orchestrator::{FeedHandler, FeedSource, RowSink};
use register_importer_shared::types::{
    ColumnSpec, CsvDialect, FeedSpec, LoadStrategy, SourceEncoding, SourceRecord, TableSpec,
};

const PRODUCT_CODE: &str = "PRD_CHD";
const CHANGE_HISTORY_FILE: &str = "ChangeHistory.csv";

const DATE_FORMATS: &[&str] = &["%d/%m/%Y"];

static GEO_CODE_TABLE: TableSpec = TableSpec {
    table: "geo_code",
    columns: &[
        ColumnSpec::text("GEOGCD", "code"),
        ColumnSpec::text("ENTITYCD", "geo_type"),
        ColumnSpec::text("GEOGNM", "name"),
        ColumnSpec::text("STATUS", "status"),
        ColumnSpec::date("OPER_DATE", "operational_date", DATE_FORMATS),
        ColumnSpec::date("TERM_DATE", "termination_date", DATE_FORMATS),
    ],
    key: &["code"],
    period_column: Some("operational_date"),
    strategy: LoadStrategy::Replace {
        ignore_conflicts: true,
    },
    // the register holds well under a million codes, one flush per run
    batch_size: 1_000_000,
    reset_sequence: false,
    freshness_column: None,
};

static GEO_CODES: FeedSpec = FeedSpec {
    name: "geo-codes",
    dialect: CsvDialect::COMMA,
    encoding: SourceEncoding::Utf8Bom,
    tables: &[&GEO_CODE_TABLE],
    cache_expiry_days: 10,
    strict_column_count: false,
};

pub struct GeoCodesFeed;

impl GeoCodesFeed {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GeoCodesFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedHandler for GeoCodesFeed {
    fn spec(&self) -> &'static FeedSpec {
        &GEO_CODES
    }

    async fn sources(&self, fetcher: &dyn Fetcher) -> Result<Vec<FeedSource>, OrchestratorError> {
        let url = super::latest_geoportal_url(GEO_CODES.name, PRODUCT_CODE, fetcher).await?;
        Ok(vec![FeedSource::Archive {
            url,
            scrub_embedded_breaks: false,
        }])
    }

    fn wants_file(&self, source: &str) -> bool {
        source.ends_with(CHANGE_HISTORY_FILE)
    }

    fn sample_key(&self, _source: &str, row: &SourceRecord) -> Option<String> {
        row.get("GEOGCD").map(str::to_string)
    }

    fn handle_row(
        &mut self,
        _source: &str,
        row: &SourceRecord,
        sink: &mut RowSink<'_>,
    ) -> Result<(), OrchestratorError> {
        let record = normalize_record(&GEO_CODE_TABLE, row)?;
        sink.stage("geo_code", record)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use feedfetch::MockFetcher;
    use register_importer_shared::types::FieldValue;

    #[test]
    fn only_the_change_history_file_is_read() {
        let feed = GeoCodesFeed::new();
        assert!(feed.wants_file("ChangeHistory.csv"));
        assert!(feed.wants_file("Data/ChangeHistory.csv"));
        assert!(!feed.wants_file("Changes.csv"));
        assert!(!feed.wants_file("Equivalents.csv"));
    }

    #[test]
    fn change_history_rows_map_onto_geo_codes() {
        let mut row = SourceRecord::new();
        row.insert("GEOGCD", "E09000001");
        row.insert("GEOGNM", "City of London");
        row.insert("ENTITYCD", "E09");
        row.insert("STATUS", "live");
        row.insert("OPER_DATE", "01/04/2009");
        row.insert("TERM_DATE", "");
        let record = normalize_record(&GEO_CODE_TABLE, &row).unwrap();
        assert_eq!(
            record
                .value(&GEO_CODE_TABLE, "code")
                .and_then(FieldValue::as_text),
            Some("E09000001")
        );
        assert_eq!(
            record
                .value(&GEO_CODE_TABLE, "operational_date")
                .and_then(FieldValue::as_date),
            Some(NaiveDate::from_ymd_opt(2009, 4, 1).unwrap())
        );
        assert!(record
            .value(&GEO_CODE_TABLE, "termination_date")
            .is_some_and(FieldValue::is_null));
    }

    #[tokio::test]
    async fn discovery_follows_the_newest_geoportal_item() {
        let mock = MockFetcher::new().with_response(
            "https://hub.arcgis.com/api/search/v1/collections/all/items?q=PRD_CHD&sortBy=-properties.created",
            br#"{"features": [{"id": "abc123"}, {"id": "older"}]}"#,
        );
        let feed = GeoCodesFeed::new();
        let sources = feed.sources(&mock).await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(
            sources[0].url(),
            "https://www.arcgis.com/sharing/rest/content/items/abc123/data"
        );
    }

    #[tokio::test]
    async fn an_itemless_geoportal_response_fails_discovery() {
        let mock = MockFetcher::new().with_response(
            "https://hub.arcgis.com/api/search/v1/collections/all/items?q=PRD_CHD&sortBy=-properties.created",
            br#"{"features": []}"#,
        );
        let feed = GeoCodesFeed::new();
        let err = feed.sources(&mock).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Discovery { .. }));
    }
}
