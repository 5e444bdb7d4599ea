//! Per-feed definitions: declarative specs plus the row fan-out handlers.
//!
//! Each feed module declares its `FeedSpec` as statics and implements
//! [`FeedHandler`](register_importer_pipeline::orchestrator::FeedHandler)
//! for the projections the engine cannot express declaratively.

pub mod ccew;
pub mod ccni;
pub mod companies;
pub mod geo_codes;
pub mod oscr;
pub mod postcodes;

use clap::ValueEnum;
use feedfetch::Fetcher;
use register_importer_pipeline::errors::OrchestratorError;
use register_importer_pipeline::orchestrator::FeedHandler;
use register_importer_shared::types::{ColumnSpec, LoadStrategy, TableSpec};

use crate::config::Dependencies;

const GEOPORTAL_API_URL: &str = "https://hub.arcgis.com/api/search/v1/collections/all/items";
const GEOPORTAL_DATA_URL: &str = "https://www.arcgis.com/sharing/rest/content/items/{}/data";

/// Look up the newest geoportal item for a product code and return its
/// download URL. The ONS republishes these products under a fresh item
/// id each edition, so the URL cannot be pinned.
pub(crate) async fn latest_geoportal_url(
    feed: &'static str,
    product: &str,
    fetcher: &dyn Fetcher,
) -> Result<String, OrchestratorError> {
    let search = format!("{GEOPORTAL_API_URL}?q={product}&sortBy=-properties.created");
    let payload = fetcher.get(&search).await?;
    let document: serde_json::Value =
        serde_json::from_slice(&payload).map_err(|e| OrchestratorError::Discovery {
            feed,
            message: e.to_string(),
        })?;
    let item = document["features"][0]["id"]
        .as_str()
        .ok_or_else(|| OrchestratorError::Discovery {
            feed,
            message: format!("no {product} item in the geoportal response"),
        })?;
    Ok(GEOPORTAL_DATA_URL.replace("{}", item))
}

/// The feeds the importer knows how to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FeedName {
    /// Scottish charity register (OSCR).
    Oscr,
    /// Northern Ireland charity register (CCNI).
    Ccni,
    /// England and Wales charity register (CCEW).
    Ccew,
    /// Companies House basic company data product.
    Companies,
    /// ONS Code History Database, the geography code register.
    GeoCodes,
    /// National Statistics Postcode Lookup.
    Postcodes,
}

impl FeedName {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedName::Oscr => "oscr",
            FeedName::Ccni => "ccni",
            FeedName::Ccew => "ccew",
            FeedName::Companies => "companies",
            FeedName::GeoCodes => "geo-codes",
            FeedName::Postcodes => "postcodes",
        }
    }

    /// Whether the feed's host needs the certificate-validation fallback.
    pub fn insecure_fallback(&self) -> bool {
        matches!(self, FeedName::Ccni)
    }
}

/// Build the handler for one feed.
pub fn handler(feed: FeedName, dependencies: &Dependencies) -> Box<dyn FeedHandler> {
    match feed {
        FeedName::Oscr => Box::new(oscr::OscrFeed::new()),
        FeedName::Ccni => Box::new(ccni::CcniFeed::new()),
        FeedName::Ccew => Box::new(ccew::CcewFeed::new()),
        FeedName::Companies => Box::new(companies::CompaniesFeed::new(
            dependencies.companies_data_urls.clone(),
        )),
        FeedName::GeoCodes => Box::new(geo_codes::GeoCodesFeed::new()),
        FeedName::Postcodes => Box::new(postcodes::PostcodesFeed::new()),
    }
}

/// Classification side table shared by the charity register feeds. Rows
/// are built by the handlers from tokenized list fields, so every column
/// is handler-filled.
pub(crate) static CLASSIFICATION_TABLE: TableSpec = TableSpec {
    table: "charity_classification",
    columns: &[
        ColumnSpec::text("", "charity_number"),
        ColumnSpec::text("", "regulator"),
        ColumnSpec::text("", "classification_type"),
        ColumnSpec::text("", "classification"),
    ],
    key: &["charity_number", "classification_type", "classification"],
    period_column: None,
    strategy: LoadStrategy::Replace {
        ignore_conflicts: true,
    },
    batch_size: 500_000,
    reset_sequence: true,
    freshness_column: None,
};

/// Prefix bare website values with a scheme, as published registers often
/// carry `www.example.org` style addresses.
pub(crate) fn with_scheme(website: &str) -> String {
    if website.starts_with("http") {
        website.to_string()
    } else {
        format!("http://{website}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_websites_get_a_scheme() {
        assert_eq!(with_scheme("www.example.org"), "http://www.example.org");
        assert_eq!(
            with_scheme("https://example.org/about"),
            "https://example.org/about"
        );
    }
}
