//! Store endpoints
//!
//! [`StoreApi`] implements [`CatalogSource`] against the store's search
//! listing, app-details API and review histogram API.

use async_trait::async_trait;
use chrono::{FixedOffset, Offset, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::fetcher::http::FetchClient;
use crate::fetcher::parser::{self, DEFAULT_TOTAL_PAGES};
use crate::fetcher::{CatalogSource, FetcherError, FetcherResult};
use crate::{CatalogPage, Item, ItemId, TimeSeriesSnapshot};

/// Endpoint URLs and query defaults
#[derive(Debug, Clone)]
pub struct StoreEndpoints {
    /// Catalog search listing
    pub search_url: String,
    /// Item details API
    pub details_url: String,
    /// Review histogram API; the item id is appended as a path segment
    pub histogram_url: String,
    /// Language for details
    pub language: String,
    /// Currency / country code for prices
    pub currency: String,
    /// Catalog category filter
    pub category: String,
    /// Language for review histograms
    pub review_language: String,
}

impl Default for StoreEndpoints {
    fn default() -> Self {
        Self::with_base_url("https://store.steampowered.com")
    }
}

impl StoreEndpoints {
    /// Standard paths under `base_url` (no trailing slash)
    pub fn with_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            search_url: format!("{base}/search/"),
            details_url: format!("{base}/api/appdetails"),
            histogram_url: format!("{base}/appreviewhistogram"),
            language: "english".to_string(),
            currency: "us".to_string(),
            category: "998".to_string(),
            review_language: "schinese".to_string(),
        }
    }
}

/// [`CatalogSource`] backed by the live store
#[derive(Debug, Clone)]
pub struct StoreApi {
    client: FetchClient,
    endpoints: StoreEndpoints,
    offset: FixedOffset,
}

impl StoreApi {
    /// Create the API surface; rollups are dated at `utc_offset_hours`
    ///
    /// Offsets outside ±23 hours fall back to UTC.
    pub fn new(client: FetchClient, endpoints: StoreEndpoints, utc_offset_hours: i32) -> Self {
        let offset = utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| {
                warn!(utc_offset_hours, "Invalid rollup UTC offset, using UTC");
                Utc.fix()
            });
        Self {
            client,
            endpoints,
            offset,
        }
    }

    /// Configured endpoints
    pub fn endpoints(&self) -> &StoreEndpoints {
        &self.endpoints
    }

    fn search_params(&self, page: u32) -> Vec<(&'static str, String)> {
        vec![
            ("category1", self.endpoints.category.clone()),
            ("sort_by", "_ASC".to_string()),
            ("page", page.to_string()),
        ]
    }
}

#[async_trait]
impl CatalogSource for StoreApi {
    async fn total_pages(&self) -> FetcherResult<u32> {
        let html = self
            .client
            .get_text(&self.endpoints.search_url, &self.search_params(1), false)
            .await?;
        let first = parser::parse_catalog_page(&html, 1)?;
        match first.total_results {
            Some(total) => {
                let pages = parser::total_pages(total);
                debug!(total, pages, "Catalog size read from listing");
                Ok(pages)
            }
            None => {
                warn!(
                    fallback = DEFAULT_TOTAL_PAGES,
                    "Could not read catalog size, using fallback page count"
                );
                Ok(DEFAULT_TOTAL_PAGES)
            }
        }
    }

    async fn fetch_page(&self, page: u32) -> FetcherResult<CatalogPage> {
        let html = self
            .client
            .get_text(&self.endpoints.search_url, &self.search_params(page), false)
            .await?;
        parser::parse_catalog_page(&html, page)
    }

    async fn fetch_item(&self, id: ItemId) -> FetcherResult<Item> {
        let params = [
            ("appids", id.to_string()),
            ("l", self.endpoints.language.clone()),
            ("cc", self.endpoints.currency.clone()),
        ];
        let body: Value = self
            .client
            .get_json(&self.endpoints.details_url, &params, true)
            .await?;
        parser::parse_item_detail(id, &body)
    }

    async fn fetch_time_series(&self, id: ItemId) -> FetcherResult<Vec<TimeSeriesSnapshot>> {
        let url = format!("{}/{id}", self.endpoints.histogram_url.trim_end_matches('/'));
        let params = [
            ("l", self.endpoints.review_language.clone()),
            ("review_score_preference", "0".to_string()),
        ];
        let body: Value = self.client.get_json(&url, &params, false).await?;
        if body.get("success").and_then(Value::as_i64) == Some(0) {
            return Err(FetcherError::ItemUnavailable(id));
        }
        parser::parse_rollups(id, &body, self.offset)
    }
}
