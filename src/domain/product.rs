//! Catalog products, price history and shipping metadata.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::store::Currency;

/// Product fields a recipe can be asked to extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductField {
    Name,
    Price,
    Image,
    Thumbnail,
    Availability,
    Variations,
    Description,
}

impl ProductField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Price => "price",
            Self::Image => "image",
            Self::Thumbnail => "thumbnail",
            Self::Availability => "availability",
            Self::Variations => "variations",
            Self::Description => "description",
        }
    }
}

/// Field set applied when refreshing an already-catalogued product.
pub const UPDATE_FIELDS: &[ProductField] = &[
    ProductField::Name,
    ProductField::Price,
    ProductField::Availability,
    ProductField::Variations,
];

/// Field set applied on first import; adds the write-once presentation
/// fields on top of [`UPDATE_FIELDS`].
pub const IMPORT_FIELDS: &[ProductField] = &[
    ProductField::Name,
    ProductField::Price,
    ProductField::Image,
    ProductField::Availability,
    ProductField::Variations,
    ProductField::Description,
];

/// Deterministic catalog primary key: store name and product name joined
/// with `_`, spaces collapsed to `_`, NUL bytes stripped. Stable across
/// repeated scrapes of the same page.
pub fn derive_product_id(store_name: &str, product_name: &str) -> String {
    format!("{store_name}_{product_name}")
        .replace(' ', "_")
        .replace('\0', "")
}

/// Normalized field bag produced by one successful scrape. Ephemeral;
/// persisted only through the create-or-update path.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedProduct {
    pub id: String,
    pub name: String,
    pub price: Decimal,
    pub currency: Currency,
    /// Affiliate-rewritten when the store carries an affiliate pair.
    pub link: String,
    pub image: Option<String>,
    /// `None` means availability is unknown (e.g. the page offers
    /// variations that must be picked before stock is shown).
    pub is_available: Option<bool>,
    pub description: Option<String>,
}

/// A persisted catalog row. Soft-deleted via `is_active`, never removed,
/// so price history and click relations survive product disappearance.
#[derive(Debug, Clone)]
pub struct CatalogProduct {
    pub id: String,
    pub store_id: i64,
    pub name: String,
    pub price: Decimal,
    pub currency: Currency,
    pub link: String,
    pub image: Option<String>,
    pub is_available: Option<bool>,
    pub description: Option<String>,
    pub is_active: bool,
    pub import_date: DateTime<Utc>,
    pub category_id: Option<i64>,
    pub sub_category_id: Option<i64>,
    pub categorized_at: Option<DateTime<Utc>>,
    pub best_shipping_method_id: Option<i64>,
}

/// One appended price observation.
#[derive(Debug, Clone)]
pub struct PriceHistoryEntry {
    pub id: i64,
    pub product_id: String,
    pub price: Decimal,
    pub created_at: DateTime<Utc>,
}

/// A store's shipping option. `price == None` marks a free method, gated
/// by `min_price_shipping_condition` on the order total.
#[derive(Debug, Clone)]
pub struct ShippingMethod {
    pub id: i64,
    pub store_id: i64,
    pub name: String,
    pub price: Option<Decimal>,
    pub min_price_shipping_condition: Option<Decimal>,
}

/// Category row; sub-categories reference their parent.
#[derive(Debug, Clone)]
pub struct Category {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub parent_id: Option<i64>,
}

/// Classifier output: primary and optional secondary category slugs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CategoryLabels {
    pub primary: String,
    #[serde(default)]
    pub secondary: Option<String>,
}

/// Pick the shipping method to advertise for a product at `price`: the
/// free method when its minimum-order condition is met (or absent),
/// otherwise the cheapest priced one, falling back to the free method
/// when nothing is priced.
pub fn best_shipping_method(
    methods: &[ShippingMethod],
    price: Decimal,
) -> Option<&ShippingMethod> {
    let free = methods.iter().find(|m| m.price.is_none());
    let cheapest_paid = methods
        .iter()
        .filter(|m| m.price.is_some())
        .min_by_key(|m| m.price);

    match free {
        Some(free)
            if free
                .min_price_shipping_condition
                .map_or(true, |min| price >= min) =>
        {
            Some(free)
        }
        Some(free) => cheapest_paid.or(Some(free)),
        None => cheapest_paid,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use rust_decimal::Decimal;

    use super::*;

    #[test]
    fn derived_id_is_deterministic() {
        assert_eq!(derive_product_id("Acme", "Widget Pro"), "Acme_Widget_Pro");
        assert_eq!(derive_product_id("Acme", "Widget Pro"), "Acme_Widget_Pro");
        assert_eq!(derive_product_id("Tea Shop", "Gyokuro\0"), "Tea_Shop_Gyokuro");
    }

    fn method(id: i64, price: Option<&str>, min: Option<&str>) -> ShippingMethod {
        ShippingMethod {
            id,
            store_id: 1,
            name: format!("method-{id}"),
            price: price.map(|p| p.parse().unwrap()),
            min_price_shipping_condition: min.map(|m| m.parse().unwrap()),
        }
    }

    #[rstest]
    #[case("49.99", 2)] // below the free-shipping floor: cheapest paid
    #[case("50.00", 1)] // at the floor: free wins
    #[case("125.00", 1)]
    fn free_shipping_gated_on_order_total(#[case] total: &str, #[case] expected: i64) {
        let methods = vec![
            method(1, None, Some("50")),
            method(2, Some("4.99"), None),
            method(3, Some("9.99"), None),
        ];
        let best = best_shipping_method(&methods, total.parse().unwrap()).unwrap();
        assert_eq!(best.id, expected);
    }

    #[test]
    fn no_free_method_selects_cheapest_paid() {
        let methods = vec![method(1, Some("7.50"), None), method(2, Some("4.99"), None)];
        let best = best_shipping_method(&methods, Decimal::new(999, 2)).unwrap();
        assert_eq!(best.id, 2);
    }

    #[test]
    fn unconditional_free_method_always_wins() {
        let methods = vec![method(1, Some("4.99"), None), method(2, None, None)];
        let best = best_shipping_method(&methods, Decimal::ONE).unwrap();
        assert_eq!(best.id, 2);
    }

    #[test]
    fn no_methods_yields_none() {
        assert!(best_shipping_method(&[], Decimal::TEN).is_none());
    }
}
