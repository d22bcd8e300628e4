//! Region batch entry points, invoked by the external scheduler.
//!
//! One batch loads the active, parsable stores of a region and runs one
//! pass per store through a bounded worker pool. A store is claimed by
//! exactly one task, so no two workers ever touch the same store's rows;
//! each store's pass is internally sequential across its own URLs.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::application::catalog::CatalogService;
use crate::application::importer::{StoreCounters, StoreImporter};
use crate::application::updater::StoreUpdater;
use crate::infrastructure::classifier::ProductClassifier;
use crate::infrastructure::config::BatchConfig;
use crate::infrastructure::http_client::PageFetcher;
use crate::infrastructure::notifier::{NotificationSink, Severity};
use crate::infrastructure::repository::CatalogRepository;
use crate::infrastructure::scraper::ProductScraper;

/// What one region batch accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub region: String,
    pub stores_processed: usize,
    pub items_processed: u64,
    pub items_created_or_updated: u64,
}

/// Per-store outcome of a compatibility check.
#[derive(Debug, Clone)]
pub struct CompatibilityReport {
    pub store_id: i64,
    pub store_name: String,
    pub passed: bool,
    pub reason: Option<String>,
}

/// Dependencies for one batch invocation; created per invocation and torn
/// down with it.
pub struct BatchContext {
    pub repo: Arc<CatalogRepository>,
    pub fetcher: Arc<PageFetcher>,
    pub classifier: Arc<dyn ProductClassifier>,
    pub notifier: Arc<dyn NotificationSink>,
    pub config: BatchConfig,
    pub cancel: CancellationToken,
}

enum PassKind {
    Import(Option<usize>),
    Update,
}

impl BatchContext {
    /// Enumerate site maps and import candidate products for every active
    /// store of `region`.
    pub async fn import_region(
        &self,
        region: &str,
        limit: Option<usize>,
    ) -> Result<BatchSummary> {
        let limit = limit.or(self.config.default_import_limit);
        let summary = self.run_region(region, PassKind::Import(limit)).await?;

        let msg = format!(
            "Import finished for {}: {} stores, {} links processed, {} products created or updated",
            summary.region,
            summary.stores_processed,
            summary.items_processed,
            summary.items_created_or_updated,
        );
        info!("{msg}");
        self.notifier.notify(&msg, Severity::Info).await;
        Ok(summary)
    }

    /// Refresh stale catalog rows for every active store of `region`.
    /// Stays silent when nothing was due.
    pub async fn update_region(&self, region: &str) -> Result<BatchSummary> {
        let summary = self.run_region(region, PassKind::Update).await?;

        if summary.items_processed == 0 {
            info!(region, "no products to update");
            return Ok(summary);
        }
        let msg = format!(
            "Update finished for {}: {} stores, {} products refreshed of {} due",
            summary.region,
            summary.stores_processed,
            summary.items_created_or_updated,
            summary.items_processed,
        );
        info!("{msg}");
        self.notifier.notify(&msg, Severity::Info).await;
        Ok(summary)
    }

    async fn run_region(&self, region: &str, kind: PassKind) -> Result<BatchSummary> {
        let stores = self.repo.active_stores_by_region(region).await?;
        info!(region, stores = stores.len(), "starting region batch");

        let staleness = Duration::hours(self.config.staleness_hours);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_stores.max(1)));
        let kind = Arc::new(kind);

        let mut tasks = Vec::with_capacity(stores.len());
        for store in stores {
            let semaphore = Arc::clone(&semaphore);
            let repo = Arc::clone(&self.repo);
            let fetcher = Arc::clone(&self.fetcher);
            let classifier = Arc::clone(&self.classifier);
            let notifier = Arc::clone(&self.notifier);
            let cancel = self.cancel.clone();
            let kind = Arc::clone(&kind);

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .context("store worker pool closed")?;

                let catalog = CatalogService::new(repo.as_ref(), classifier.as_ref());
                let counters = match kind.as_ref() {
                    PassKind::Import(limit) => {
                        StoreImporter::new(
                            fetcher.as_ref(),
                            &catalog,
                            repo.as_ref(),
                            notifier.as_ref(),
                            &cancel,
                        )
                        .import_store(&store, *limit)
                        .await
                    }
                    PassKind::Update => {
                        StoreUpdater::new(
                            fetcher.as_ref(),
                            &catalog,
                            repo.as_ref(),
                            notifier.as_ref(),
                            &cancel,
                            staleness,
                        )
                        .update_store(&store)
                        .await
                    }
                }
                .with_context(|| format!("store pass failed for {}", store.name))?;
                Ok::<StoreCounters, anyhow::Error>(counters)
            }));
        }

        let mut summary = BatchSummary {
            region: region.to_string(),
            ..BatchSummary::default()
        };
        for task in tasks {
            match task.await {
                Ok(Ok(counters)) => {
                    summary.stores_processed += 1;
                    summary.items_processed += counters.links_processed;
                    summary.items_created_or_updated += counters.products_created_or_updated;
                }
                Ok(Err(e)) => {
                    let msg = format!("Store pass error in {region}: {e:#}");
                    error!("{msg}");
                    self.notifier.notify(&msg, Severity::Error).await;
                }
                Err(e) => {
                    let msg = format!("Store worker panicked in {region}: {e}");
                    error!("{msg}");
                    self.notifier.notify(&msg, Severity::Error).await;
                }
            }
        }
        Ok(summary)
    }

    /// Probe each store's website and persist the parsability verdict.
    pub async fn check_compatibility(&self, store_ids: &[i64]) -> Result<Vec<CompatibilityReport>> {
        let mut stores = self.repo.stores_by_ids(store_ids).await?;
        let mut reports = Vec::with_capacity(stores.len());

        for store in &mut stores {
            info!(store = %store.name, "checking compatibility");
            let (reachable, reason) = ProductScraper::new(self.fetcher.as_ref(), store)
                .ping()
                .await;

            store.last_check = Some(Utc::now());
            if reachable {
                store.mark_parsable();
            } else {
                store.mark_unparsable(reason.clone().unwrap_or_default());
            }
            self.repo.record_parsability(store).await?;

            info!(
                store = %store.name,
                parsable = store.is_parsable,
                reason = store.parse_failure_reason.as_deref().unwrap_or("OK"),
                "compatibility check finished"
            );
            reports.push(CompatibilityReport {
                store_id: store.id,
                store_name: store.name.clone(),
                passed: store.is_parsable,
                reason: store.parse_failure_reason.clone(),
            });
        }
        Ok(reports)
    }

    /// Report active stores whose catalog shrank below the configured
    /// floor; an early signal that a recipe silently stopped matching.
    pub async fn audit_low_catalog(&self) -> Result<Vec<(String, i64)>> {
        let threshold = self.config.low_catalog_threshold;
        let low = self.repo.stores_below_product_count(threshold).await?;
        if low.is_empty() {
            info!(threshold, "no stores below the product-count floor");
            return Ok(low);
        }

        let mut msg = format!("{} stores below {threshold} active products:\n", low.len());
        for (name, count) in &low {
            msg.push_str(&format!("{name}: {count}\n"));
        }
        self.notifier.notify(msg.trim_end(), Severity::Warning).await;
        Ok(low)
    }
}
