//! Per-store import pass: site map → scrape → create-or-update.

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::catalog::CatalogService;
use crate::domain::{StoreRecipe, IMPORT_FIELDS};
use crate::infrastructure::http_client::PageFetcher;
use crate::infrastructure::notifier::{NotificationSink, Severity};
use crate::infrastructure::repository::CatalogRepository;
use crate::infrastructure::scraper::ProductScraper;
use crate::infrastructure::sitemap::SitemapReader;

/// Running counters accumulated across one store pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounters {
    pub links_processed: u64,
    pub products_created_or_updated: u64,
}

pub struct StoreImporter<'a> {
    fetcher: &'a PageFetcher,
    catalog: &'a CatalogService<'a>,
    repo: &'a CatalogRepository,
    notifier: &'a dyn NotificationSink,
    cancel: &'a CancellationToken,
}

impl<'a> StoreImporter<'a> {
    pub fn new(
        fetcher: &'a PageFetcher,
        catalog: &'a CatalogService<'a>,
        repo: &'a CatalogRepository,
        notifier: &'a dyn NotificationSink,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            catalog,
            repo,
            notifier,
            cancel,
        }
    }

    /// Import up to `limit` candidate URLs for one store.
    ///
    /// Per-item failures never abort the pass: pages that vanished or no
    /// longer parse deactivate their catalog row, anything unexpected is
    /// reported to the sink, and the loop moves on.
    pub async fn import_store(
        &self,
        store: &StoreRecipe,
        limit: Option<usize>,
    ) -> Result<StoreCounters> {
        let mut counters = StoreCounters::default();

        if store.sitemaps.is_empty() {
            let msg = format!(
                "Store {} has no site maps configured and cannot be imported",
                store.name
            );
            warn!("{msg}");
            self.notifier.notify(&msg, Severity::Warning).await;
            return Ok(counters);
        }

        let urls = SitemapReader::new(self.fetcher)
            .enumerate(&store.sitemaps, limit)
            .await;
        info!(store = %store.name, candidates = urls.len(), "starting import pass");

        let scraper = ProductScraper::new(self.fetcher, store);
        for url in urls {
            if self.cancel.is_cancelled() {
                info!(store = %store.name, "import pass cancelled");
                break;
            }
            counters.links_processed += 1;

            let scraped = match scraper.scrape(&url, IMPORT_FIELDS).await {
                Ok(scraped) => scraped,
                Err(e) if e.deactivates() => {
                    warn!(store = %store.name, url = %url, "deactivating product: {e}");
                    if let Err(e) = self.repo.deactivate_by_link(&store.affiliate_link(&url)).await
                    {
                        self.report_unexpected(store, &url, &e).await;
                    }
                    continue;
                }
                Err(e) => {
                    self.report_unexpected(store, &url, &e).await;
                    continue;
                }
            };

            match self.catalog.create_or_update(store, &scraped).await {
                Ok(_) => counters.products_created_or_updated += 1,
                Err(e) => self.report_unexpected(store, &url, &e).await,
            }
        }

        info!(
            store = %store.name,
            links = counters.links_processed,
            products = counters.products_created_or_updated,
            "import pass finished"
        );
        Ok(counters)
    }

    async fn report_unexpected(
        &self,
        store: &StoreRecipe,
        url: &str,
        error: &(dyn std::fmt::Display + Sync),
    ) {
        let msg = format!(
            "Unexpected error when creating or updating product {url} for {}: {error}",
            store.name
        );
        warn!("{msg}");
        self.notifier.notify(&msg, Severity::Error).await;
    }
}
