use std::path::PathBuf;
use std::time::Duration;

use feedfetch::{CachedFetcher, Fetcher, HttpFetcher};
use register_importer_repository::{PostgresRegisterRepository, PostgresRunLogRepository};
use register_importer_shared::types::FeedSpec;

use crate::errors::ImportError;

const DEFAULT_CACHE_DIR: &str = ".feed-cache";

/// `Dependencies` struct holds the external services the importer needs.
///
/// It includes the database pool, the register and run-log repositories
/// built on it, and the settings used to construct a fetcher per feed.
pub struct Dependencies {
    pub register: PostgresRegisterRepository,
    pub run_log: PostgresRunLogRepository,
    cache_dir: PathBuf,
    /// Comma-separated download URLs of the company register product,
    /// from `COMPANIES_DATA_URL`; the file names change monthly.
    pub companies_data_urls: Vec<String>,
}

impl Dependencies {
    /// Creates a new `Dependencies` instance.
    ///
    /// Reads `DATABASE_URL` (required), `CACHE_DIR` and
    /// `COMPANIES_DATA_URL`, connects the pool and wires the
    /// repositories.
    pub async fn new() -> Result<Self, ImportError> {
        let database_url = require_env("DATABASE_URL")?;
        let cache_dir = std::env::var("CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CACHE_DIR));
        let companies_data_urls = std::env::var("COMPANIES_DATA_URL")
            .map(|urls| {
                urls.split(',')
                    .map(|url| url.trim().to_string())
                    .filter(|url| !url.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let pool = sqlx::PgPool::connect(&database_url).await?;
        sqlx::migrate!("../register-importer-repository/src/postgres/migrations")
            .run(&pool)
            .await
            .map_err(sqlx::Error::from)?;

        Ok(Dependencies {
            register: PostgresRegisterRepository::new(pool.clone()),
            run_log: PostgresRunLogRepository::new(pool),
            cache_dir,
            companies_data_urls,
        })
    }

    /// Build the fetcher for one feed: plain HTTP, or wrapped in the
    /// file-backed cache honouring the feed's expiry window.
    pub fn fetcher(
        &self,
        spec: &FeedSpec,
        insecure_fallback: bool,
        no_cache: bool,
    ) -> Box<dyn Fetcher> {
        let http = if insecure_fallback {
            HttpFetcher::new().with_insecure_fallback()
        } else {
            HttpFetcher::new()
        };
        if no_cache {
            return Box::new(http);
        }
        let expiry = Duration::from_secs(u64::from(spec.cache_expiry_days) * 24 * 60 * 60);
        Box::new(CachedFetcher::new(
            Box::new(http),
            self.cache_dir.clone(),
            expiry,
        ))
    }
}

fn require_env(name: &'static str) -> Result<String, ImportError> {
    std::env::var(name).map_err(|_| ImportError::MissingEnv { name })
}
