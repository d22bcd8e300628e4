//! Per-store refresh pass over stale catalog rows.

use anyhow::Result;
use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::catalog::CatalogService;
use crate::application::importer::StoreCounters;
use crate::domain::{StoreRecipe, UPDATE_FIELDS};
use crate::infrastructure::http_client::PageFetcher;
use crate::infrastructure::notifier::{NotificationSink, Severity};
use crate::infrastructure::repository::CatalogRepository;
use crate::infrastructure::scraper::ProductScraper;

pub struct StoreUpdater<'a> {
    fetcher: &'a PageFetcher,
    catalog: &'a CatalogService<'a>,
    repo: &'a CatalogRepository,
    notifier: &'a dyn NotificationSink,
    cancel: &'a CancellationToken,
    staleness: Duration,
}

impl<'a> StoreUpdater<'a> {
    pub fn new(
        fetcher: &'a PageFetcher,
        catalog: &'a CatalogService<'a>,
        repo: &'a CatalogRepository,
        notifier: &'a dyn NotificationSink,
        cancel: &'a CancellationToken,
        staleness: Duration,
    ) -> Self {
        Self {
            fetcher,
            catalog,
            repo,
            notifier,
            cancel,
            staleness,
        }
    }

    /// Re-scrape every product of `store` whose last import is older than
    /// the staleness window, most-clicked first. Vanished or unparseable
    /// products are deactivated, never deleted. The store's last-check
    /// stamp advances after each successful item so partial progress is
    /// visible if the batch is interrupted.
    pub async fn update_store(&self, store: &StoreRecipe) -> Result<StoreCounters> {
        let cutoff = Utc::now() - self.staleness;
        let due = self.repo.products_due_for_refresh(store.id, cutoff).await?;
        let mut counters = StoreCounters {
            links_processed: due.len() as u64,
            products_created_or_updated: 0,
        };

        if due.is_empty() {
            debug!(store = %store.name, "no products due for refresh");
            return Ok(counters);
        }
        info!(store = %store.name, due = due.len(), "starting update pass");

        let scraper = ProductScraper::new(self.fetcher, store);
        for product in due {
            if self.cancel.is_cancelled() {
                info!(store = %store.name, "update pass cancelled");
                break;
            }
            debug!(product = %product.id, "refreshing product");

            let scraped = match scraper.scrape(&product.link, UPDATE_FIELDS).await {
                Ok(scraped) => scraped,
                Err(e) if e.deactivates() => {
                    warn!(product = %product.id, "deactivating product: {e}");
                    if let Err(e) = self.repo.deactivate_by_link(&product.link).await {
                        self.report_unexpected(store, &product.link, &e).await;
                    }
                    continue;
                }
                Err(e) => {
                    self.report_unexpected(store, &product.link, &e).await;
                    continue;
                }
            };

            match self
                .catalog
                .apply_update(store, product, &scraped, UPDATE_FIELDS)
                .await
            {
                Ok(updated) => {
                    counters.products_created_or_updated += 1;
                    debug!(product = %updated.id, "updated product");
                    self.repo.touch_last_check(store.id).await?;
                }
                Err(e) => self.report_unexpected(store, &scraped.link, &e).await,
            }
        }

        info!(
            store = %store.name,
            refreshed = counters.products_created_or_updated,
            "update pass finished"
        );
        Ok(counters)
    }

    async fn report_unexpected(
        &self,
        store: &StoreRecipe,
        link: &str,
        error: &(dyn std::fmt::Display + Sync),
    ) {
        let msg = format!(
            "Unexpected error when creating or updating product {link} for {}: {error}",
            store.name
        );
        warn!("{msg}");
        self.notifier.notify(&msg, Severity::Error).await;
    }
}
