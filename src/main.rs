//! Worker binary: runs one batch per invocation.
//!
//! An external cron scheduler calls this once per region and mode, e.g.
//! `shopscout-worker import Europe 500` or `shopscout-worker update Asia`.
//! Ctrl-C cancels cleanly at item boundaries.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use shopscout::application::BatchContext;
use shopscout::infrastructure::logging::init_logging;
use shopscout::infrastructure::{
    AppConfig, CatalogRepository, HttpClassifier, LogNotifier, NoopClassifier, NotificationSink,
    PageFetcher, ProductClassifier, TelegramNotifier,
};

const USAGE: &str =
    "usage: shopscout-worker <import <region> [limit] | update <region> | check <store-id>... | audit>";

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config_path = std::env::var("SHOPSCOUT_CONFIG")
        .unwrap_or_else(|_| "config/shopscout.json".to_string());
    let config = AppConfig::load(&config_path).await?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        bail!("{USAGE}");
    };

    let repo = Arc::new(CatalogRepository::connect(&config.database.url).await?);
    repo.init_schema().await?;
    let fetcher = Arc::new(PageFetcher::new(config.fetcher_config())?);

    let classifier: Arc<dyn ProductClassifier> = match &config.classifier.endpoint {
        Some(endpoint) => Arc::new(HttpClassifier::new(endpoint.as_str())),
        None => Arc::new(NoopClassifier),
    };
    let notifier: Arc<dyn NotificationSink> =
        match (&config.telegram.bot_api_key, &config.telegram.chat_id) {
            (Some(key), Some(chat_id)) => {
                Arc::new(TelegramNotifier::new(key.as_str(), chat_id.as_str()))
            }
            _ => Arc::new(LogNotifier),
        };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested, finishing in-flight items");
                cancel.cancel();
            }
        });
    }

    let batch = BatchContext {
        repo,
        fetcher,
        classifier,
        notifier,
        config: config.batch.clone(),
        cancel,
    };

    match command.as_str() {
        "import" => {
            let Some(region) = rest.first() else {
                bail!("{USAGE}");
            };
            let limit = rest
                .get(1)
                .map(|raw| raw.parse::<usize>())
                .transpose()
                .context("limit must be a number")?;
            let summary = batch.import_region(region, limit).await?;
            info!(?summary, "import batch complete");
        }
        "update" => {
            let Some(region) = rest.first() else {
                bail!("{USAGE}");
            };
            let summary = batch.update_region(region).await?;
            info!(?summary, "update batch complete");
        }
        "check" => {
            if rest.is_empty() {
                bail!("{USAGE}");
            }
            let ids = rest
                .iter()
                .map(|raw| raw.parse::<i64>())
                .collect::<Result<Vec<_>, _>>()
                .context("store ids must be numbers")?;
            for report in batch.check_compatibility(&ids).await? {
                info!(
                    store = %report.store_name,
                    passed = report.passed,
                    reason = report.reason.as_deref().unwrap_or("OK"),
                    "compatibility checked"
                );
            }
        }
        "audit" => {
            batch.audit_low_catalog().await?;
        }
        _ => bail!("{USAGE}"),
    }

    Ok(())
}
