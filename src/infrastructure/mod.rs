//! Infrastructure: fetching, parsing, persistence and external services.

pub mod classifier;
pub mod config;
pub mod extractor;
pub mod http_client;
pub mod logging;
pub mod notifier;
pub mod repository;
pub mod scraper;
pub mod sitemap;

pub use classifier::{HttpClassifier, NoopClassifier, ProductClassifier};
pub use config::AppConfig;
pub use extractor::{parse_price, ExtractedFields, FieldExtractor};
pub use http_client::{FetchError, FetcherConfig, PageFetcher};
pub use notifier::{LogNotifier, NotificationSink, Severity, TelegramNotifier};
pub use repository::CatalogRepository;
pub use scraper::{ProductScraper, ScrapeError};
pub use sitemap::{parse_sitemap, rank_and_cap, CandidateUrl, SitemapReader};
