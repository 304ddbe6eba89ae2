//! Multi-page scraping by repeatedly clicking a "next" control

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::document::SharedDocument;
use crate::error::HostBridgeError;
use crate::extractors::{count, extract, ColumnSpec, Dataset, SelectorKind};

/// Host-side page control
#[async_trait(?Send)]
pub trait PageDriver {
    /// The document currently displayed
    async fn current_document(&mut self) -> Result<SharedDocument, HostBridgeError>;

    /// Click the first element matching `selector`. `Ok(false)` when nothing
    /// matched and no navigation happened.
    async fn click(&mut self, selector: &str, kind: SelectorKind) -> Result<bool, HostBridgeError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaginationOptions {
    pub next_selector: String,
    pub kind: SelectorKind,
    /// Upper bound on pages visited, including the first
    pub max_pages: usize,
    /// Wait after each click for the next page to render
    pub settle_delay: Duration,
}

impl PaginationOptions {
    pub fn new(next_selector: &str) -> Self {
        Self {
            next_selector: next_selector.to_string(),
            ..Default::default()
        }
    }
}

impl Default for PaginationOptions {
    fn default() -> Self {
        Self {
            next_selector: String::new(),
            kind: SelectorKind::Css,
            max_pages: 10,
            settle_delay: Duration::from_millis(1500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    MaxPages,
    NoNextControl,
    EmptyPage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageReport {
    /// 1-based
    pub page: usize,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationReport {
    pub rows: Dataset,
    pub pages: Vec<PageReport>,
    pub stop: StopReason,
}

fn has_next(document: &SharedDocument, options: &PaginationOptions) -> bool {
    match count(&document.borrow(), &options.next_selector, options.kind) {
        Ok(n) => n > 0,
        Err(e) => {
            warn!("Next-page selector is invalid, stopping: {}", e);
            false
        }
    }
}

/// Extract `specs` from the current page and every following page, up to
/// `options.max_pages`. Rows are concatenated in page order.
pub async fn scrape_pages<D: PageDriver>(
    driver: &mut D,
    specs: &[ColumnSpec],
    options: &PaginationOptions,
) -> Result<PaginationReport, HostBridgeError> {
    let mut rows = Dataset::new();
    let mut pages = Vec::new();
    let mut stop = StopReason::MaxPages;

    for page in 1..=options.max_pages {
        let document = driver.current_document().await?;
        let page_rows = extract(&document.borrow(), specs);
        info!("Page {}: {} rows", page, page_rows.len());
        pages.push(PageReport {
            page,
            rows: page_rows.len(),
        });

        if page_rows.is_empty() {
            stop = StopReason::EmptyPage;
            break;
        }
        rows.extend(page_rows);

        if page == options.max_pages {
            break;
        }
        if !has_next(&document, options)
            || !driver.click(&options.next_selector, options.kind).await?
        {
            stop = StopReason::NoNextControl;
            break;
        }
        tokio::time::sleep(options.settle_delay).await;
    }

    Ok(PaginationReport { rows, pages, stop })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    /// Serves a fixed list of pages; clicking "next" moves to the following one
    struct FakeDriver {
        pages: Vec<&'static str>,
        current: usize,
        clicks: usize,
    }

    impl FakeDriver {
        fn new(pages: Vec<&'static str>) -> Self {
            Self {
                pages,
                current: 0,
                clicks: 0,
            }
        }
    }

    #[async_trait(?Send)]
    impl PageDriver for FakeDriver {
        async fn current_document(&mut self) -> Result<SharedDocument, HostBridgeError> {
            Ok(Document::parse(self.pages[self.current]).into_shared())
        }

        async fn click(&mut self, selector: &str, kind: SelectorKind) -> Result<bool, HostBridgeError> {
            let doc = Document::parse(self.pages[self.current]);
            if count(&doc, selector, kind).unwrap_or(0) == 0 || self.current + 1 >= self.pages.len() {
                return Ok(false);
            }
            self.clicks += 1;
            self.current += 1;
            Ok(true)
        }
    }

    const PAGE_1: &str = r#"<li>a</li><li>b</li><a class="next" href="?p=2">next</a>"#;
    const PAGE_2: &str = r#"<li>c</li><a class="next" href="?p=3">next</a>"#;
    const PAGE_3: &str = r#"<li>d</li>"#;
    const EMPTY: &str = r#"<p>nothing here</p><a class="next">next</a>"#;

    fn specs() -> Vec<ColumnSpec> {
        vec![ColumnSpec::css("li", "item")]
    }

    #[tokio::test(start_paused = true)]
    async fn test_follows_next_until_absent() {
        let mut driver = FakeDriver::new(vec![PAGE_1, PAGE_2, PAGE_3]);
        let report = scrape_pages(&mut driver, &specs(), &PaginationOptions::new("a.next"))
            .await
            .unwrap();

        assert_eq!(report.rows.len(), 4);
        assert_eq!(
            report.pages.iter().map(|p| p.rows).collect::<Vec<_>>(),
            vec![2, 1, 1]
        );
        assert_eq!(report.stop, StopReason::NoNextControl);
        assert_eq!(driver.clicks, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_max_pages() {
        let mut driver = FakeDriver::new(vec![PAGE_1, PAGE_2, PAGE_3]);
        let options = PaginationOptions {
            max_pages: 2,
            ..PaginationOptions::new("a.next")
        };
        let report = scrape_pages(&mut driver, &specs(), &options).await.unwrap();
        assert_eq!(report.pages.len(), 2);
        assert_eq!(report.rows.len(), 3);
        assert_eq!(report.stop, StopReason::MaxPages);
        assert_eq!(driver.clicks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_empty_page() {
        let mut driver = FakeDriver::new(vec![PAGE_1, EMPTY, PAGE_3]);
        let report = scrape_pages(&mut driver, &specs(), &PaginationOptions::new("a.next"))
            .await
            .unwrap();
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.stop, StopReason::EmptyPage);
        assert_eq!(report.pages.last().unwrap().rows, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_page_to_settle() {
        let mut driver = FakeDriver::new(vec![PAGE_1, PAGE_2, PAGE_3]);
        let options = PaginationOptions {
            settle_delay: Duration::from_secs(2),
            ..PaginationOptions::new("a.next")
        };
        let start = tokio::time::Instant::now();
        scrape_pages(&mut driver, &specs(), &options).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(4));
    }
}
