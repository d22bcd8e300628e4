//! The create-or-update convergence point.
//!
//! Both the import and the update flows funnel every scraped product
//! through [`CatalogService::apply_update`]: one code path stamps the row
//! active, copies the allowed field set, recomputes the best shipping
//! method, assigns categories exactly once and appends the price-history
//! observation inside the same per-item transaction.

use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::domain::{
    best_shipping_method, CatalogProduct, ProductField, ScrapedProduct, StoreRecipe,
    IMPORT_FIELDS, UPDATE_FIELDS,
};
use crate::infrastructure::classifier::ProductClassifier;
use crate::infrastructure::repository::CatalogRepository;

pub struct CatalogService<'a> {
    repo: &'a CatalogRepository,
    classifier: &'a dyn ProductClassifier,
}

impl<'a> CatalogService<'a> {
    pub fn new(repo: &'a CatalogRepository, classifier: &'a dyn ProductClassifier) -> Self {
        Self { repo, classifier }
    }

    /// Look up the catalog row for the scraped bag's derived id; update it
    /// with the refresh field set when found, otherwise build a fresh row
    /// and apply the wider import set.
    pub async fn create_or_update(
        &self,
        store: &StoreRecipe,
        scraped: &ScrapedProduct,
    ) -> Result<CatalogProduct> {
        match self.repo.product_by_id(&scraped.id).await? {
            Some(existing) => {
                self.apply_update(store, existing, scraped, UPDATE_FIELDS)
                    .await
            }
            None => {
                let fresh = CatalogProduct {
                    id: scraped.id.clone(),
                    store_id: store.id,
                    name: String::new(),
                    price: Decimal::ZERO,
                    currency: scraped.currency,
                    link: scraped.link.clone(),
                    image: None,
                    is_available: None,
                    description: None,
                    is_active: true,
                    import_date: Utc::now(),
                    category_id: None,
                    sub_category_id: None,
                    categorized_at: None,
                    best_shipping_method_id: None,
                };
                self.apply_update(store, fresh, scraped, IMPORT_FIELDS).await
            }
        }
    }

    /// Apply `scraped` onto `product`, restricted to `fields`, and persist.
    ///
    /// The target row's identity and store linkage are never overwritten; a
    /// mismatched incoming id is logged and leaves the row untouched.
    pub async fn apply_update(
        &self,
        store: &StoreRecipe,
        mut product: CatalogProduct,
        scraped: &ScrapedProduct,
        fields: &[ProductField],
    ) -> Result<CatalogProduct> {
        if product.id != scraped.id {
            warn!(
                existing = %product.id,
                incoming = %scraped.id,
                "refusing to update product with a different id"
            );
            return Ok(product);
        }

        product.is_active = true;
        product.import_date = Utc::now();

        for &field in fields {
            match field {
                ProductField::Name => product.name = scraped.name.clone(),
                ProductField::Price => product.price = scraped.price,
                ProductField::Image => product.image = scraped.image.clone(),
                ProductField::Availability => product.is_available = scraped.is_available,
                ProductField::Description => product.description = scraped.description.clone(),
                // variations only ever influenced availability; thumbnails
                // are not persisted on the catalog row
                ProductField::Variations | ProductField::Thumbnail => {}
            }
        }

        let methods = self.repo.shipping_methods(store.id).await?;
        product.best_shipping_method_id =
            best_shipping_method(&methods, product.price).map(|m| m.id);

        if product.category_id.is_none() && product.categorized_at.is_none() {
            self.assign_categories(&mut product).await?;
        }

        self.repo.upsert_with_history(&product).await?;
        Ok(product)
    }

    /// Consult the classifier exactly once per product. The attempt is
    /// stamped even when classification fails, so the product is never
    /// re-sent.
    async fn assign_categories(&self, product: &mut CatalogProduct) -> Result<()> {
        product.categorized_at = Some(Utc::now());

        let Some(labels) = self.classifier.classify(&product.name).await else {
            info!(product = %product.id, "could not categorize product");
            return Ok(());
        };

        let primary = self
            .repo
            .get_or_create_category(&labels.primary, &humanize_slug(&labels.primary), None)
            .await?;
        product.category_id = Some(primary.id);

        if let Some(secondary) = labels.secondary.as_deref().filter(|s| !s.is_empty()) {
            let sub = self
                .repo
                .get_or_create_category(secondary, &humanize_slug(secondary), Some(primary.id))
                .await?;
            product.sub_category_id = Some(sub.id);
        }
        Ok(())
    }
}

/// `"tea-pots"` -> `"Tea Pots"`.
fn humanize_slug(slug: &str) -> String {
    slug.split('-')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
