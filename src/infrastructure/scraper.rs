//! Product scraping: one URL in, a validated product bag out.

use scraper::Html;
use thiserror::Error;
use tracing::debug;

use crate::domain::{derive_product_id, ProductField, ScrapedProduct, StoreRecipe};
use crate::infrastructure::extractor::{ExtractedFields, FieldExtractor};
use crate::infrastructure::http_client::{FetchError, PageFetcher};

/// Why a scrape failed. Importer and updater match on the kind instead of
/// exception types; [`ScrapeError::deactivates`] marks the kinds meaning
/// "this page no longer yields a product".
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("cannot build product without a name: {url}")]
    NameNotFound { url: String },
    #[error("cannot build product without a price: {url}")]
    PriceNotFound { url: String },
    /// Anything unexpected; reported to the notification sink, never
    /// deactivates a row.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ScrapeError {
    /// True for failures that retire the catalog row at this link:
    /// unreachable pages, exhausted renders, and recipe drift on the
    /// mandatory fields.
    pub fn deactivates(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

/// Orchestrates fetch + extraction for one store.
pub struct ProductScraper<'a> {
    fetcher: &'a PageFetcher,
    store: &'a StoreRecipe,
}

impl<'a> ProductScraper<'a> {
    pub fn new(fetcher: &'a PageFetcher, store: &'a StoreRecipe) -> Self {
        Self { fetcher, store }
    }

    /// Scrape `url` for `fields`. Name and price are mandatory; everything
    /// else degrades silently per the recipe.
    pub async fn scrape(
        &self,
        url: &str,
        fields: &[ProductField],
    ) -> Result<ScrapedProduct, ScrapeError> {
        debug!(store = %self.store.name, url, ?fields, "scraping product page");
        let html = self
            .fetcher
            .fetch(url, self.store.render_with_browser)
            .await?;

        let extracted = {
            let document = Html::parse_document(&html);
            FieldExtractor::new(self.store).extract(&document, fields)
        };

        self.assemble(url, extracted)
    }

    /// Enforce the mandatory-field invariant and normalize the bag.
    pub fn assemble(
        &self,
        url: &str,
        extracted: ExtractedFields,
    ) -> Result<ScrapedProduct, ScrapeError> {
        let Some(name) = extracted.name.clone() else {
            return Err(ScrapeError::NameNotFound {
                url: url.to_string(),
            });
        };
        let Some(price) = extracted.price else {
            return Err(ScrapeError::PriceNotFound {
                url: url.to_string(),
            });
        };

        let is_available = extracted.resolved_availability();
        Ok(ScrapedProduct {
            id: derive_product_id(&self.store.name, &name),
            name,
            price,
            currency: self.store.currency,
            link: self.store.affiliate_link(url),
            image: extracted.image,
            is_available,
            description: extracted.description,
        })
    }

    /// Probe the store's landing page, collapsing any failure into an
    /// operator-readable reason instead of propagating it.
    pub async fn ping(&self) -> (bool, Option<String>) {
        match self
            .fetcher
            .fetch(&self.store.website, self.store.render_with_browser)
            .await
        {
            Ok(_) => (true, None),
            Err(e) => (
                false,
                Some(format!("cannot reach {}: {e}", self.store.website)),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Currency, ExtractionRule, ExtractionRules, Locale};
    use crate::infrastructure::http_client::FetcherConfig;

    fn store() -> StoreRecipe {
        StoreRecipe {
            id: 7,
            name: "StoreX".into(),
            website: "https://storex.example".into(),
            region: "Europe".into(),
            locale: Locale::EnUs,
            currency: Currency::Usd,
            render_with_browser: false,
            affiliate_query_param: Some("ref".into()),
            affiliate_id: Some("scout".into()),
            is_active: true,
            is_parsable: true,
            parse_failure_reason: None,
            last_check: None,
            rules: ExtractionRules {
                name: ExtractionRule::new("h1", "title", true),
                price: ExtractionRule::new("span", "price", true),
                image: None,
                thumbnail: None,
                availability: None,
                variations: None,
                description: None,
            },
            sitemaps: Vec::new(),
        }
    }

    fn scraper_parts() -> (PageFetcher, StoreRecipe) {
        (
            PageFetcher::new(FetcherConfig::default()).unwrap(),
            store(),
        )
    }

    #[test]
    fn assembles_fixture_into_product() {
        let (fetcher, store) = scraper_parts();
        let scraper = ProductScraper::new(&fetcher, &store);
        let document = Html::parse_document(
            r#"<h1 class="title">Widget</h1><span class="price">$9.99</span>"#,
        );
        let extracted = FieldExtractor::new(&store)
            .extract(&document, &[ProductField::Name, ProductField::Price]);

        let product = scraper
            .assemble("https://storex.example/p/widget", extracted)
            .unwrap();
        assert_eq!(product.id, "StoreX_Widget");
        assert_eq!(product.name, "Widget");
        assert_eq!(product.price, "9.99".parse().unwrap());
        assert_eq!(product.currency, Currency::Usd);
        assert_eq!(product.is_available, Some(true));
        assert_eq!(product.link, "https://storex.example/p/widget?ref=scout");
    }

    #[test]
    fn missing_name_and_price_raise_their_own_kinds() {
        let (fetcher, store) = scraper_parts();
        let scraper = ProductScraper::new(&fetcher, &store);

        let document = Html::parse_document(r#"<span class="price">$9.99</span>"#);
        let extracted = FieldExtractor::new(&store)
            .extract(&document, &[ProductField::Name, ProductField::Price]);
        let err = scraper.assemble("https://x/p", extracted).unwrap_err();
        assert!(matches!(err, ScrapeError::NameNotFound { .. }));
        assert!(err.deactivates());

        let document = Html::parse_document(r#"<h1 class="title">Widget</h1>"#);
        let extracted = FieldExtractor::new(&store)
            .extract(&document, &[ProductField::Name, ProductField::Price]);
        let err = scraper.assemble("https://x/p", extracted).unwrap_err();
        assert!(matches!(err, ScrapeError::PriceNotFound { .. }));
        assert!(err.deactivates());
    }

    #[test]
    fn unexpected_errors_do_not_deactivate() {
        let err = ScrapeError::Other(anyhow::anyhow!("database exploded"));
        assert!(!err.deactivates());
        let err = ScrapeError::Fetch(FetchError::UrlNotFound {
            url: "https://x".into(),
            reason: "410".into(),
        });
        assert!(err.deactivates());
    }
}
