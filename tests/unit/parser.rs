//! Unit tests for listing, detail and histogram parsing

use chrono::{FixedOffset, NaiveDate};
use serde_json::json;

use catalog_harvester::fetcher::parser::{
    parse_catalog_page, parse_item_detail, parse_rollups, total_pages, PAGE_SIZE,
};
use catalog_harvester::fetcher::FetcherError;

const LISTING: &str = r#"
<html><body>
  <div id="search_resultsRows">
    <a class="search_result_row ds_collapse_flag" data-ds-appid="10" data-ds-itemkey="App_10">Counter-Strike</a>
    <a class="search_result_row" data-ds-appid="20,30,40" data-ds-bundleid="232">Valve Complete Pack</a>
    <a class="search_result_row" data-ds-packageid="7">No app id</a>
    <a class="search_result_row" data-ds-appid="50">Team Fortress Classic</a>
  </div>
  <div class="search_pagination">
    <div class="search_pagination_left">
      showing 1 - 25 of 98,765 results
    </div>
  </div>
</body></html>
"#;

#[test]
fn test_listing_ids_and_total() {
    let page = parse_catalog_page(LISTING, 1).unwrap();
    assert_eq!(page.index, 1);
    assert_eq!(page.ids, vec![10, 20, 30, 40, 50]);
    assert_eq!(page.total_results, Some(98_765));
    assert_eq!(total_pages(98_765), 98_765u64.div_ceil(PAGE_SIZE) as u32);
}

#[test]
fn test_listing_past_the_end_is_empty() {
    let page = parse_catalog_page("<html><body><p>No results</p></body></html>", 400).unwrap();
    assert!(page.ids.is_empty());
    assert_eq!(page.total_results, None);
}

#[test]
fn test_detail_fields() {
    let body = json!({
        "730": {
            "success": true,
            "data": {
                "name": "Counter-Strike 2",
                "release_date": {"coming_soon": false, "date": "21 Aug, 2012"},
                "price_overview": {"currency": "USD", "final_formatted": "$14.99"},
                "developers": ["Valve"],
                "publishers": ["Valve", "Hidden Path"],
                "genres": [
                    {"id": "1", "description": "Action"},
                    {"id": "37", "description": "Free to Play"}
                ],
                "short_description": "Tactical shooter."
            }
        }
    });

    let item = parse_item_detail(730, &body).unwrap();
    assert_eq!(item.id, 730);
    assert_eq!(item.name, "Counter-Strike 2");
    assert_eq!(item.release_date, "21 Aug, 2012");
    assert_eq!(item.price, "$14.99");
    assert_eq!(item.publishers, vec!["Valve", "Hidden Path"]);
    assert_eq!(item.genres, vec!["Action", "Free to Play"]);
    assert_eq!(item.description, "Tactical shooter.");
    assert!(item.validate().is_ok());
}

#[test]
fn test_detail_without_price_is_free() {
    let body = json!({"440": {"success": true, "data": {"name": "Team Fortress 2"}}});
    let item = parse_item_detail(440, &body).unwrap();
    assert_eq!(item.price, "Free");
    assert!(item.developers.is_empty());
}

#[test]
fn test_detail_success_false_is_unavailable() {
    let body = json!({"99": {"success": false}});
    let err = parse_item_detail(99, &body).unwrap_err();
    assert!(err.is_permanent());
    assert_eq!(err.reason(), "unavailable");
}

#[test]
fn test_rollups_dated_in_offset_with_last_duplicate_winning() {
    let utc8 = FixedOffset::east_opt(8 * 3600).unwrap();
    let body = json!({
        "success": 1,
        "results": {
            "rollup_type": "week",
            "rollups": [
                // 2024-01-01 00:00 UTC, 08:00 at UTC+8
                {"date": 1704067200, "recommendations_up": 10, "recommendations_down": 1},
                // 2024-01-01 12:00 UTC, 20:00 at UTC+8, same day
                {"date": 1704110400, "recommendations_up": 11, "recommendations_down": 2},
                // 2024-01-01 20:00 UTC, next day at UTC+8
                {"date": 1704139200, "recommendations_up": 12, "recommendations_down": 3}
            ]
        }
    });

    let snaps = parse_rollups(5, &body, utc8).unwrap();
    assert_eq!(snaps.len(), 2);
    assert_eq!(snaps[0].date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    assert_eq!((snaps[0].up, snaps[0].down), (11, 2));
    assert_eq!(snaps[1].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
    assert!(snaps.iter().all(|s| s.item_id == 5));

    let utc = FixedOffset::east_opt(0).unwrap();
    let in_utc = parse_rollups(5, &body, utc).unwrap();
    assert_eq!(in_utc.len(), 1);
    assert_eq!(in_utc[0].up, 12);
}

#[test]
fn test_malformed_rollup_is_parse_error() {
    let offset = FixedOffset::east_opt(0).unwrap();
    let body = json!({"results": {"rollups": [{"recommendations_up": 1}]}});
    assert!(matches!(
        parse_rollups(1, &body, offset),
        Err(FetcherError::ParseError(_))
    ));
}
