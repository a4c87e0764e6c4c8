//! Response parsing
//!
//! Catalog listings are HTML; item details and review rollups are JSON.

use chrono::FixedOffset;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;

use crate::fetcher::{FetcherError, FetcherResult};
use crate::{CatalogPage, Item, ItemId, TimeSeriesSnapshot};

/// Items per catalog page
pub const PAGE_SIZE: u64 = 25;

/// Page count assumed when the listing's result count is unreadable
pub const DEFAULT_TOTAL_PAGES: u32 = 5000;

fn selector(css: &str) -> FetcherResult<Selector> {
    Selector::parse(css).map_err(|e| FetcherError::ParseError(format!("bad selector {css}: {e}")))
}

/// Extract item ids and the total result count from a listing page
///
/// Bundle rows list several comma-separated ids; each numeric one is kept.
pub fn parse_catalog_page(html: &str, page: u32) -> FetcherResult<CatalogPage> {
    let document = Html::parse_document(html);
    let rows = selector("a.search_result_row")?;
    let pagination = selector("div.search_pagination_left")?;

    let ids = document
        .select(&rows)
        .filter_map(|row| row.value().attr("data-ds-appid"))
        .flat_map(|attr| attr.split(','))
        .filter_map(|id| id.trim().parse::<ItemId>().ok())
        .collect();

    let total_results = document
        .select(&pagination)
        .next()
        .and_then(|div| parse_total_results(&div.text().collect::<String>()));

    Ok(CatalogPage {
        index: page,
        ids,
        total_results,
    })
}

/// Read "showing 1 - 25 of 12,345 results" style text; the count is the second-to-last token
fn parse_total_results(text: &str) -> Option<u64> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let token = tokens.len().checked_sub(2).map(|i| tokens[i])?;
    token.replace([',', '.'], "").parse().ok()
}

/// Pages needed for `total_results` items, at least one
pub fn total_pages(total_results: u64) -> u32 {
    let pages = total_results.div_ceil(PAGE_SIZE).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

#[derive(Debug, Deserialize)]
struct DetailEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<DetailData>,
}

#[derive(Debug, Deserialize)]
struct DetailData {
    #[serde(default)]
    name: String,
    #[serde(default)]
    release_date: Option<ReleaseDate>,
    #[serde(default)]
    price_overview: Option<PriceOverview>,
    #[serde(default)]
    developers: Vec<String>,
    #[serde(default)]
    publishers: Vec<String>,
    #[serde(default)]
    genres: Vec<Genre>,
    #[serde(default)]
    short_description: String,
}

#[derive(Debug, Deserialize)]
struct ReleaseDate {
    #[serde(default)]
    date: String,
}

#[derive(Debug, Deserialize)]
struct PriceOverview {
    #[serde(default)]
    final_formatted: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Genre {
    #[serde(default)]
    description: String,
}

/// Decode a detail response keyed by the item id
///
/// A missing key, `success: false` or an absent payload means the store has
/// no such item, reported as [`FetcherError::ItemUnavailable`].
pub fn parse_item_detail(id: ItemId, body: &Value) -> FetcherResult<Item> {
    let Some(entry) = body.get(id.to_string()) else {
        return Err(FetcherError::ItemUnavailable(id));
    };

    let envelope: DetailEnvelope = serde_json::from_value(entry.clone())
        .map_err(|e| FetcherError::ParseError(format!("item {id}: {e}")))?;

    let data = match envelope {
        DetailEnvelope {
            success: true,
            data: Some(data),
        } => data,
        _ => return Err(FetcherError::ItemUnavailable(id)),
    };

    Ok(Item {
        id,
        name: data.name,
        release_date: data.release_date.map(|r| r.date).unwrap_or_default(),
        price: data
            .price_overview
            .and_then(|p| p.final_formatted)
            .unwrap_or_else(|| "Free".to_string()),
        developers: data.developers,
        publishers: data.publishers,
        genres: data
            .genres
            .into_iter()
            .map(|g| g.description)
            .filter(|d| !d.is_empty())
            .collect(),
        description: data.short_description,
    })
}

#[derive(Debug, Deserialize)]
struct HistogramResponse {
    #[serde(default)]
    results: Option<HistogramResults>,
}

#[derive(Debug, Deserialize)]
struct HistogramResults {
    #[serde(default)]
    rollups: Vec<Rollup>,
}

#[derive(Debug, Deserialize)]
struct Rollup {
    date: i64,
    #[serde(default)]
    recommendations_up: u64,
    #[serde(default)]
    recommendations_down: u64,
}

/// Decode a review histogram into daily snapshots dated in `offset`
///
/// A response without results yields no snapshots. Rollups sharing a date keep
/// the last one.
pub fn parse_rollups(
    id: ItemId,
    body: &Value,
    offset: FixedOffset,
) -> FetcherResult<Vec<TimeSeriesSnapshot>> {
    let response: HistogramResponse = serde_json::from_value(body.clone())
        .map_err(|e| FetcherError::ParseError(format!("histogram for {id}: {e}")))?;

    let mut snapshots: Vec<TimeSeriesSnapshot> = Vec::new();
    for rollup in response.results.map(|r| r.rollups).unwrap_or_default() {
        let Some(snapshot) = TimeSeriesSnapshot::from_rollup(
            id,
            rollup.date,
            rollup.recommendations_up,
            rollup.recommendations_down,
            offset,
        ) else {
            return Err(FetcherError::InvalidResponse(format!(
                "histogram for {id}: timestamp {} out of range",
                rollup.date
            )));
        };

        match snapshots.iter_mut().find(|s| s.date == snapshot.date) {
            Some(existing) => *existing = snapshot,
            None => snapshots.push(snapshot),
        }
    }

    Ok(snapshots)
}
