use crate::{
    dongchedi_api::{PageQuery, RankingSource},
    error::FetchError,
    models::{CategoryFilter, IdentityKey, RankingRecord},
    month::{MonthRange, MonthToken},
};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;

pub const DEFAULT_PAGE_SIZE: u32 = 150;
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(600);
pub const MAX_PAGES_PER_MONTH: u32 = 100;

/// Settings shared by every month of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    pub page_size: u32,
    pub category: Option<CategoryFilter>,
    /// Pause between two page requests of the same month.
    pub throttle: Duration,
    pub max_pages: u32,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            category: None,
            throttle: DEFAULT_THROTTLE,
            max_pages: MAX_PAGES_PER_MONTH,
        }
    }
}

/// All distinct rows collected for one month.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedMonth {
    pub month: MonthToken,
    pub records: Vec<RankingRecord>,
    pub pages: u32,
    /// The page cap ended the loop before the upstream signalled the end.
    pub truncated: bool,
}

/// Why a month's pagination loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageOutcome {
    ShortPage,
    NoMore,
    TotalReached,
    Continue,
}

fn page_outcome(returned: usize, page_size: u32, has_more: Option<bool>, total: Option<u64>, collected: usize) -> PageOutcome {
    if returned < page_size as usize {
        PageOutcome::ShortPage
    } else if has_more == Some(false) {
        PageOutcome::NoMore
    } else if matches!(total, Some(t) if t > 0 && collected as u64 >= t) {
        PageOutcome::TotalReached
    } else {
        PageOutcome::Continue
    }
}

/// Fetches every page of one month's ranking, keeping the first row seen for
/// each identity key.
pub async fn fetch_month_all<S>(source: &S, month: MonthToken, options: &FetchOptions) -> Result<AggregatedMonth, FetchError>
where
    S: RankingSource + ?Sized,
{
    let mut records = Vec::new();
    let mut seen: HashSet<IdentityKey> = HashSet::new();
    let mut offset: u32 = 0;
    let mut pages = 0;

    while pages < options.max_pages {
        if pages > 0 && !options.throttle.is_zero() {
            sleep(options.throttle).await;
        }

        let query = PageQuery {
            month,
            offset,
            page_size: options.page_size,
            category: options.category,
        };
        let page = source.fetch_page(&query).await?;
        pages += 1;

        let mut added = 0;
        for item in &page.items {
            if !seen.insert(IdentityKey::from_item(item)) {
                continue;
            }
            records.push(RankingRecord::from_item(month, item));
            added += 1;
        }

        tracing::info!(
            %month,
            offset,
            added,
            returned = page.items.len(),
            total = ?page.total,
            has_more = ?page.has_more,
            "Fetched ranking page"
        );

        let outcome = page_outcome(page.items.len(), options.page_size, page.has_more, page.total, records.len());
        if outcome != PageOutcome::Continue {
            tracing::debug!(%month, pages, ?outcome, "Month complete");
            return Ok(AggregatedMonth { month, records, pages, truncated: false });
        }

        offset += page.items.len() as u32;
    }

    tracing::warn!(%month, pages, rows = records.len(), "Page cap reached; keeping rows collected so far");
    Ok(AggregatedMonth { month, records, pages, truncated: true })
}

/// Fetches each month of `range` in order, one request at a time.
/// The first month that fails aborts the whole run.
pub async fn fetch_range<S>(source: &S, range: MonthRange, options: &FetchOptions) -> Result<Vec<RankingRecord>, FetchError>
where
    S: RankingSource + ?Sized,
{
    tracing::info!(start = %range.start(), end = %range.end(), months = range.len(), category = ?options.category, "Starting ranking fetch");

    let mut all_rows = Vec::new();
    for month in range {
        let aggregated = fetch_month_all(source, month, options).await?;
        tracing::info!(
            %month,
            rows = aggregated.records.len(),
            pages = aggregated.pages,
            truncated = aggregated.truncated,
            "Month aggregated"
        );
        all_rows.extend(aggregated.records);
    }

    tracing::info!("Fetch complete. Collected {} rows.", all_rows.len());
    Ok(all_rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RankPage;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use crate::test_support::ScriptedSource;

    /// Serves an endless run of full pages with fresh series ids.
    struct EndlessSource;

    #[async_trait]
    impl RankingSource for EndlessSource {
        async fn fetch_page(&self, query: &PageQuery) -> Result<RankPage, FetchError> {
            let items = (0..query.page_size).map(|i| item(query.offset + i, i + 1)).collect();
            Ok(page(items, None, None))
        }
    }

    fn item(series_id: u32, rank: u32) -> Value {
        json!({
            "series_id": series_id,
            "rank": rank,
            "series_name": format!("S{series_id}"),
            "brand_name": "B",
            "count": 1000 - rank,
        })
    }

    fn page(items: Vec<Value>, total: Option<u64>, has_more: Option<bool>) -> RankPage {
        RankPage { items, total, has_more }
    }

    fn options(page_size: u32) -> FetchOptions {
        FetchOptions {
            page_size,
            category: None,
            throttle: Duration::ZERO,
            max_pages: MAX_PAGES_PER_MONTH,
        }
    }

    fn month(value: u32) -> MonthToken {
        MonthToken::from_yyyymm(value).unwrap()
    }

    fn status_error(month: MonthToken) -> FetchError {
        FetchError::Status {
            month,
            offset: 0,
            status: 503,
            body: "busy".into(),
        }
    }

    #[tokio::test]
    async fn duplicate_across_pages_keeps_first_seen_row() {
        let mut repeated = item(2, 99);
        repeated["series_name"] = json!("renamed");
        let source = ScriptedSource::new(vec![
            Ok(page(vec![item(1, 1), item(2, 2)], None, None)),
            Ok(page(vec![repeated, item(3, 3)], None, None)),
            Ok(page(vec![], None, None)),
        ]);

        let result = fetch_month_all(&source, month(202401), &options(2)).await.unwrap();

        assert_eq!(result.records.len(), 3);
        let second: Vec<_> = result.records.iter().filter(|r| r.series_name == "S2" || r.series_name == "renamed").collect();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].series_name, "S2");
        assert_eq!(second[0].rank, Some(2));
    }

    #[tokio::test]
    async fn short_page_ends_month_without_hints() {
        let source = ScriptedSource::new(vec![
            Ok(page(vec![item(1, 1), item(2, 2), item(3, 3)], None, None)),
            Ok(page(vec![item(4, 4)], None, None)),
            Ok(page(vec![item(5, 5)], None, None)),
        ]);

        let result = fetch_month_all(&source, month(202401), &options(3)).await.unwrap();

        assert_eq!(result.pages, 2);
        assert_eq!(result.records.len(), 4);
        assert!(!result.truncated);
        let offsets: Vec<u32> = source.queries().iter().map(|q| q.offset).collect();
        assert_eq!(offsets, vec![0, 3]);
    }

    #[tokio::test]
    async fn explicit_has_more_false_ends_month() {
        let source = ScriptedSource::new(vec![
            Ok(page(vec![item(1, 1), item(2, 2)], None, Some(true))),
            Ok(page(vec![item(3, 3), item(4, 4)], None, Some(false))),
            Ok(page(vec![item(5, 5), item(6, 6)], None, None)),
        ]);

        let result = fetch_month_all(&source, month(202401), &options(2)).await.unwrap();

        assert_eq!(result.pages, 2);
        assert_eq!(result.records.len(), 4);
    }

    #[tokio::test]
    async fn reaching_total_ends_month_on_full_page() {
        let source = ScriptedSource::new(vec![
            Ok(page(vec![item(1, 1), item(2, 2)], Some(4), Some(true))),
            Ok(page(vec![item(3, 3), item(4, 4)], Some(4), Some(true))),
            Ok(page(vec![item(5, 5), item(6, 6)], Some(4), Some(true))),
        ]);

        let result = fetch_month_all(&source, month(202401), &options(2)).await.unwrap();

        assert_eq!(result.pages, 2);
        assert_eq!(result.records.len(), 4);
    }

    #[tokio::test]
    async fn duplicates_do_not_count_towards_total() {
        let source = ScriptedSource::new(vec![
            Ok(page(vec![item(1, 1), item(2, 2)], Some(3), None)),
            Ok(page(vec![item(2, 2), item(1, 1)], Some(3), None)),
            Ok(page(vec![item(3, 3), item(1, 1)], Some(3), None)),
        ]);

        let result = fetch_month_all(&source, month(202401), &options(2)).await.unwrap();

        assert_eq!(result.pages, 3);
        assert_eq!(result.records.len(), 3);
        let offsets: Vec<u32> = source.queries().iter().map(|q| q.offset).collect();
        assert_eq!(offsets, vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn page_cap_truncates_silently() {
        let opts = FetchOptions { max_pages: 5, ..options(10) };

        let result = fetch_month_all(&EndlessSource, month(202401), &opts).await.unwrap();

        assert!(result.truncated);
        assert_eq!(result.pages, 5);
        assert_eq!(result.records.len(), 50);
    }

    #[tokio::test]
    async fn default_page_cap_is_one_hundred() {
        let result = fetch_month_all(&EndlessSource, month(202401), &options(1)).await.unwrap();

        assert!(result.truncated);
        assert_eq!(result.pages, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_applies_between_pages_only() {
        let source = ScriptedSource::new(vec![
            Ok(page(vec![item(1, 1)], None, None)),
        ]);
        let opts = FetchOptions { throttle: Duration::from_millis(600), ..options(1) };
        let started = tokio::time::Instant::now();

        // second page comes back empty, so two requests and one pause
        let result = fetch_month_all(&source, month(202401), &opts).await.unwrap();

        assert_eq!(result.pages, 2);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(600) && elapsed < Duration::from_millis(1200));
    }

    #[tokio::test]
    async fn category_filter_is_forwarded() {
        let source = ScriptedSource::new(vec![Ok(page(vec![], None, None))]);
        let opts = FetchOptions { category: Some(CategoryFilter::PluginHybrid), ..options(5) };

        fetch_month_all(&source, month(202401), &opts).await.unwrap();

        let queries = source.queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].category, Some(CategoryFilter::PluginHybrid));
        assert_eq!(queries[0].page_size, 5);
    }

    #[tokio::test]
    async fn range_concatenates_months_in_order_with_independent_dedup() {
        let source = ScriptedSource::new(vec![
            Ok(page(vec![item(7, 1), item(8, 2)], None, None)),
            Ok(page(vec![item(7, 2), item(8, 1)], None, None)),
        ]);
        let range = MonthRange::new(month(202312), month(202401)).unwrap();

        let rows = fetch_range(&source, range, &options(10)).await.unwrap();

        assert_eq!(rows.len(), 4);
        let months: Vec<u32> = rows.iter().map(|r| r.month.as_yyyymm()).collect();
        assert_eq!(months, vec![202312, 202312, 202401, 202401]);
        let queried: Vec<u32> = source.queries().iter().map(|q| q.month.as_yyyymm()).collect();
        assert_eq!(queried, vec![202312, 202401]);
    }

    #[tokio::test]
    async fn failed_month_aborts_the_run() {
        let source = ScriptedSource::new(vec![
            Ok(page(vec![item(1, 1)], None, None)),
            Err(status_error(month(202402))),
            Ok(page(vec![item(3, 1)], None, None)),
        ]);
        let range = MonthRange::new(month(202401), month(202403)).unwrap();

        let err = fetch_range(&source, range, &options(10)).await.unwrap_err();

        match err {
            FetchError::Status { month: failed, status, .. } => {
                assert_eq!(failed, month(202402));
                assert_eq!(status, 503);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(source.queries().len(), 2);
    }
}
