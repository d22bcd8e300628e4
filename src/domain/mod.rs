//! Domain model: store recipes and catalog products.

pub mod product;
pub mod store;

pub use product::{
    best_shipping_method, derive_product_id, CatalogProduct, Category, CategoryLabels,
    PriceHistoryEntry, ProductField, ScrapedProduct, ShippingMethod, IMPORT_FIELDS, UPDATE_FIELDS,
};
pub use store::{
    AvailabilityRule, Currency, ExtractionRule, ExtractionRules, Locale, SitemapSource, StoreRecipe,
};
