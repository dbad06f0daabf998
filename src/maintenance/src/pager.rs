//! Resumable paging over store continuation tokens.
//!
//! A [`Cursor`] is the only state needed to resume a scan: the store-native
//! continuation token plus the number of pages consumed so far. Callers
//! persist the cursor after each processed page (one text line via
//! [`Cursor::encode`]) and hand it back on restart. Paging never skips and
//! never deduplicates, so items near a resume boundary may be seen twice.

use async_trait::async_trait;
use common::config::RetryConfig;
use common::document::{DocumentQuery, DocumentStore, StoredDocument};
use common::table::{RowFilter, RowSummary, TableStore};
use common::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{MaintenanceError, PageFailure, ResumableError};
use crate::metrics::MaintenanceMetrics;
use crate::retry::with_retry;

/// Position after a processed page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Pages consumed before this position.
    pub page: u64,
    /// Opaque store continuation token.
    pub token: String,
}

impl Cursor {
    pub fn new(page: u64, token: impl Into<String>) -> Self {
        Self {
            page,
            token: token.into(),
        }
    }

    /// Single-line checkpoint form, `page:token`.
    pub fn encode(&self) -> String {
        format!("{}:{}", self.page, self.token)
    }

    pub fn decode(line: &str) -> Result<Self, MaintenanceError> {
        let line = line.trim();
        let (page, token) = line.split_once(':').ok_or_else(|| {
            MaintenanceError::InvalidArgument(format!("cursor '{line}' is not 'page:token'"))
        })?;
        let page = page.parse::<u64>().map_err(|e| {
            MaintenanceError::InvalidArgument(format!("cursor page '{page}' is invalid: {e}"))
        })?;
        if token.is_empty() {
            return Err(MaintenanceError::InvalidArgument(
                "cursor token is empty".to_string(),
            ));
        }
        Ok(Self::new(page, token))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Cursor {
    type Err = MaintenanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

/// One page of items plus the cursor to fetch the next; `next = None` once
/// the scan is exhausted.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<Cursor>,
}

/// Source of pages keyed by a resumable cursor.
#[async_trait]
pub trait ResumablePager: Send + Sync {
    type Item: Send;

    async fn next_page(
        &self,
        cursor: Option<&Cursor>,
        page_size: usize,
    ) -> StoreResult<Page<Self::Item>>;
}

fn advance(cursor: Option<&Cursor>, continuation: Option<String>) -> Option<Cursor> {
    let page = cursor.map_or(0, |c| c.page) + 1;
    continuation.map(|token| Cursor::new(page, token))
}

/// Rows of one table matching a filter.
#[derive(Debug, Clone)]
pub struct TableRowPager {
    store: Arc<dyn TableStore>,
    table: String,
    filter: RowFilter,
}

impl TableRowPager {
    pub fn new(store: Arc<dyn TableStore>, table: impl Into<String>, filter: RowFilter) -> Self {
        Self {
            store,
            table: table.into(),
            filter,
        }
    }
}

#[async_trait]
impl ResumablePager for TableRowPager {
    type Item = RowSummary;

    async fn next_page(
        &self,
        cursor: Option<&Cursor>,
        page_size: usize,
    ) -> StoreResult<Page<RowSummary>> {
        let page = self
            .store
            .query(
                &self.table,
                &self.filter,
                cursor.map(|c| c.token.as_str()),
                page_size,
            )
            .await?;

        Ok(Page {
            items: page.rows,
            next: advance(cursor, page.continuation),
        })
    }
}

/// Documents matching a query.
#[derive(Debug, Clone)]
pub struct DocumentPager {
    store: Arc<dyn DocumentStore>,
    query: DocumentQuery,
}

impl DocumentPager {
    pub fn new(store: Arc<dyn DocumentStore>, query: DocumentQuery) -> Self {
        Self { store, query }
    }
}

#[async_trait]
impl ResumablePager for DocumentPager {
    type Item = StoredDocument;

    async fn next_page(
        &self,
        cursor: Option<&Cursor>,
        page_size: usize,
    ) -> StoreResult<Page<StoredDocument>> {
        let page = self
            .store
            .query(&self.query, cursor.map(|c| c.token.as_str()), page_size)
            .await?;

        Ok(Page {
            items: page.documents,
            next: advance(cursor, page.continuation),
        })
    }
}

/// Limits and collaborators for [`drive_pages`].
#[derive(Debug, Clone)]
pub struct PageRun<'a> {
    pub operation: &'static str,
    pub page_size: usize,
    /// Stop after this many pages; `None` runs to exhaustion.
    pub max_pages: Option<usize>,
    pub retry: &'a RetryConfig,
    pub metrics: &'a MaintenanceMetrics,
    pub cancel: &'a CancellationToken,
}

/// Where a paged run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOutcome {
    /// Items reported as processed by the page handler.
    pub processed: usize,
    pub pages: usize,
    /// Cursor to resume from; `None` once the scan is exhausted.
    pub cursor: Option<Cursor>,
    pub cancelled: bool,
}

impl PageOutcome {
    pub fn is_exhausted(&self) -> bool {
        self.cursor.is_none() && !self.cancelled
    }
}

/// Fetch pages from `pager` starting at `start` and hand each to `handle`.
///
/// The cursor only advances once `handle` returned successfully for a page.
/// Fetches are retried per [`RetryConfig`]; the handler does its own
/// retrying. Cancellation is checked between pages. On failure the error
/// carries the cursor of the last completed page, and its `processed` count
/// includes the items the failing page finished before it stopped.
pub async fn drive_pages<P, F, Fut>(
    pager: &P,
    start: Option<Cursor>,
    run: PageRun<'_>,
    mut handle: F,
) -> Result<PageOutcome, ResumableError>
where
    P: ResumablePager + ?Sized,
    F: FnMut(Vec<P::Item>) -> Fut,
    Fut: Future<Output = Result<usize, PageFailure>>,
{
    let fail = |cursor: &Option<Cursor>, processed: usize, source: StoreError| ResumableError {
        operation: run.operation,
        resume_from: cursor.clone(),
        processed,
        source,
    };

    if run.page_size == 0 {
        return Err(fail(
            &start,
            0,
            StoreError::InvalidRequest("page size must be positive".to_string()),
        ));
    }

    let mut outcome = PageOutcome {
        processed: 0,
        pages: 0,
        cursor: start,
        cancelled: false,
    };

    loop {
        if run.max_pages.is_some_and(|max| outcome.pages >= max) {
            break;
        }
        if run.cancel.is_cancelled() {
            tracing::info!(
                operation = run.operation,
                pages = outcome.pages,
                cursor = ?outcome.cursor.as_ref().map(Cursor::encode),
                "Paged run cancelled"
            );
            outcome.cancelled = true;
            break;
        }

        let cursor = outcome.cursor.clone();
        let page = with_retry(run.retry, run.metrics, run.operation, || {
            pager.next_page(cursor.as_ref(), run.page_size)
        })
        .await
        .map_err(|e| fail(&outcome.cursor, outcome.processed, e))?;

        let fetched = page.items.len();
        let processed = handle(page.items).await.map_err(|failure| {
            fail(&outcome.cursor, outcome.processed + failure.processed, failure.source)
        })?;

        outcome.processed += processed;
        outcome.pages += 1;
        outcome.cursor = page.next;
        run.metrics.record_page();

        tracing::debug!(
            operation = run.operation,
            page = outcome.pages,
            fetched,
            processed,
            "Processed page"
        );

        if outcome.cursor.is_none() {
            break;
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::TableOperation;
    use common::TableRow;
    use common::testing::{FaultKind, FlakyTableStore, memory_table_store};
    use std::sync::Mutex;
    use std::time::Duration;

    const TABLE: &str = "Readings";

    async fn seeded_store(rows: usize) -> Arc<dyn TableStore> {
        let store = memory_table_store();
        store.create_table(TABLE).await.unwrap();
        let ops: Vec<_> = (0..rows)
            .map(|i| TableOperation::Upsert(TableRow::new("p1", format!("r{i:03}"))))
            .collect();
        store.execute_batch(TABLE, "p1", &ops).await.unwrap();
        store
    }

    fn retry() -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(1),
            ..RetryConfig::default()
        }
    }

    #[test]
    fn test_cursor_line_format() {
        let cursor = Cursor::new(3, "rowkeeper/tables/Readings/7031/72303130");
        let line = cursor.encode();
        assert_eq!(line, "3:rowkeeper/tables/Readings/7031/72303130");
        assert_eq!(line.parse::<Cursor>().unwrap(), cursor);
        assert_eq!(Cursor::decode(" 1:a:b\n").unwrap().token, "a:b");

        assert!(Cursor::decode("no-separator").is_err());
        assert!(Cursor::decode("x:token").is_err());
        assert!(Cursor::decode("1:").is_err());
    }

    #[tokio::test]
    async fn test_row_pager_walks_every_page() {
        let store = seeded_store(25).await;
        let pager = TableRowPager::new(store, TABLE, RowFilter::all());

        let mut cursor = None;
        let mut seen = Vec::new();
        let mut pages = 0;
        loop {
            let page = pager.next_page(cursor.as_ref(), 10).await.unwrap();
            pages += 1;
            seen.extend(page.items.into_iter().map(|r| r.row_key));
            match page.next {
                Some(next) => {
                    assert_eq!(next.page, pages);
                    cursor = Some(next);
                }
                None => break,
            }
        }

        assert_eq!(pages, 3);
        assert_eq!(seen.len(), 25);
        assert_eq!(seen.first().map(String::as_str), Some("r000"));
    }

    #[tokio::test]
    async fn test_drive_pages_respects_page_budget_and_resumes() {
        let store = seeded_store(25).await;
        let pager = TableRowPager::new(store, TABLE, RowFilter::all());
        let metrics = MaintenanceMetrics::new();
        let cancel = CancellationToken::new();
        let retry = retry();
        let seen = Mutex::new(Vec::new());

        let run = PageRun {
            operation: "test_scan",
            page_size: 10,
            max_pages: Some(2),
            retry: &retry,
            metrics: &metrics,
            cancel: &cancel,
        };

        let first = drive_pages(&pager, None, run.clone(), |rows| {
            let count = rows.len();
            seen.lock().unwrap().extend(rows.into_iter().map(|r| r.row_key));
            async move { Ok(count) }
        })
        .await
        .unwrap();

        assert_eq!(first.pages, 2);
        assert_eq!(first.processed, 20);
        assert!(!first.is_exhausted());

        let second = drive_pages(&pager, first.cursor.clone(), run, |rows| {
            let count = rows.len();
            seen.lock().unwrap().extend(rows.into_iter().map(|r| r.row_key));
            async move { Ok(count) }
        })
        .await
        .unwrap();

        assert_eq!(second.pages, 1);
        assert_eq!(second.processed, 5);
        assert!(second.is_exhausted());

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 25);
        assert_eq!(metrics.pages_processed(), 3);
    }

    #[tokio::test]
    async fn test_drive_pages_failure_reports_last_completed_cursor() {
        let store: Arc<dyn TableStore> = Arc::new(
            FlakyTableStore::new(seeded_store(25).await).fail_query(2, FaultKind::Backend),
        );
        let pager = TableRowPager::new(store, TABLE, RowFilter::all());
        let metrics = MaintenanceMetrics::new();
        let cancel = CancellationToken::new();
        let retry = retry();

        let run = PageRun {
            operation: "test_scan",
            page_size: 10,
            max_pages: None,
            retry: &retry,
            metrics: &metrics,
            cancel: &cancel,
        };

        let err = drive_pages(&pager, None, run.clone(), |rows| async move { Ok(rows.len()) })
            .await
            .unwrap_err();
        assert_eq!(err.processed, 10);
        let resume = err.resume_from.clone().unwrap();
        assert_eq!(resume.page, 1);

        let outcome = drive_pages(&pager, Some(resume), run, |rows| async move { Ok(rows.len()) })
            .await
            .unwrap();
        assert_eq!(outcome.processed, 15);
        assert!(outcome.is_exhausted());
    }

    #[tokio::test]
    async fn test_drive_pages_counts_partial_page_on_handler_failure() {
        let store = seeded_store(25).await;
        let pager = TableRowPager::new(store, TABLE, RowFilter::all());
        let metrics = MaintenanceMetrics::new();
        let cancel = CancellationToken::new();
        let retry = retry();
        let mut calls = 0;

        let run = PageRun {
            operation: "test_scan",
            page_size: 10,
            max_pages: None,
            retry: &retry,
            metrics: &metrics,
            cancel: &cancel,
        };

        let err = drive_pages(&pager, None, run, |rows| {
            calls += 1;
            let second = calls == 2;
            async move {
                if second {
                    return Err(PageFailure::new(3, StoreError::Backend("boom".to_string())));
                }
                Ok(rows.len())
            }
        })
        .await
        .unwrap_err();

        assert_eq!(err.processed, 13);
        assert_eq!(err.resume_from.map(|c| c.page), Some(1));
    }

    #[tokio::test]
    async fn test_drive_pages_retries_transient_fetch() {
        let flaky = Arc::new(
            FlakyTableStore::new(seeded_store(5).await).fail_query(1, FaultKind::Transient),
        );
        let store: Arc<dyn TableStore> = flaky.clone();
        let pager = TableRowPager::new(store, TABLE, RowFilter::all());
        let metrics = MaintenanceMetrics::new();
        let cancel = CancellationToken::new();
        let retry = retry();

        let run = PageRun {
            operation: "test_scan",
            page_size: 10,
            max_pages: None,
            retry: &retry,
            metrics: &metrics,
            cancel: &cancel,
        };

        let outcome = drive_pages(&pager, None, run, |rows| async move { Ok(rows.len()) })
            .await
            .unwrap();
        assert_eq!(outcome.processed, 5);
        assert_eq!(flaky.query_calls(), 2);
        assert_eq!(metrics.retries_attempted(), 1);
    }

    #[tokio::test]
    async fn test_drive_pages_stops_between_pages_on_cancel() {
        let cancel = CancellationToken::new();
        let store: Arc<dyn TableStore> = Arc::new(
            FlakyTableStore::new(seeded_store(25).await).cancel_after_queries(1, cancel.clone()),
        );
        let pager = TableRowPager::new(store, TABLE, RowFilter::all());
        let metrics = MaintenanceMetrics::new();
        let retry = retry();

        let run = PageRun {
            operation: "test_scan",
            page_size: 10,
            max_pages: None,
            retry: &retry,
            metrics: &metrics,
            cancel: &cancel,
        };

        let outcome = drive_pages(&pager, None, run, |rows| async move { Ok(rows.len()) })
            .await
            .unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.pages, 1);
        assert_eq!(outcome.processed, 10);
        assert_eq!(outcome.cursor.map(|c| c.page), Some(1));
    }
}
