//! Store recipes: the per-store configuration that drives generic scraping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::product::ProductField;

/// Decimal-separator convention used when parsing scraped prices.
///
/// Stores using `,` as the decimal separator are configured as `it_IT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Locale {
    #[serde(rename = "en_US")]
    EnUs,
    #[serde(rename = "it_IT")]
    ItIt,
}

impl Locale {
    /// True when `,` separates decimals and `.` groups thousands.
    pub fn comma_is_decimal(self) -> bool {
        matches!(self, Self::ItIt)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::EnUs => "en_US",
            Self::ItIt => "it_IT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "en_US" => Some(Self::EnUs),
            "it_IT" => Some(Self::ItIt),
            _ => None,
        }
    }
}

/// Currency a store lists its prices in. Never detected from scraped text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Currency {
    Eur,
    Usd,
    Aud,
    Cad,
    Gbp,
}

impl Currency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eur => "EUR",
            Self::Usd => "USD",
            Self::Aud => "AUD",
            Self::Cad => "CAD",
            Self::Gbp => "GBP",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "EUR" => Some(Self::Eur),
            "USD" => Some(Self::Usd),
            "AUD" => Some(Self::Aud),
            "CAD" => Some(Self::Cad),
            "GBP" => Some(Self::Gbp),
            _ => None,
        }
    }
}

/// Rule for locating one product field in a page: an HTML tag plus a CSS
/// class or id value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionRule {
    pub tag: String,
    pub selector: String,
    /// True when `selector` names a CSS class, false when it names an id.
    pub selector_is_class: bool,
}

impl ExtractionRule {
    pub fn new(tag: impl Into<String>, selector: impl Into<String>, is_class: bool) -> Self {
        Self {
            tag: tag.into(),
            selector: selector.into(),
            selector_is_class: is_class,
        }
    }

    /// A rule with an empty tag or selector means the store opted out of
    /// scraping that field.
    pub fn is_usable(&self) -> bool {
        !self.tag.trim().is_empty() && !self.selector.trim().is_empty()
    }
}

/// Availability is a regular rule plus the regex that decides "in stock".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub rule: ExtractionRule,
    /// Matched (lower-cased, substring) against the node text.
    pub in_stock_pattern: String,
}

/// Typed per-field rule table interpreted by one generic extraction pass.
///
/// `name` and `price` are mandatory for a working recipe; everything else
/// is optional and silently skipped when unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRules {
    pub name: ExtractionRule,
    pub price: ExtractionRule,
    pub image: Option<ExtractionRule>,
    pub thumbnail: Option<ExtractionRule>,
    pub availability: Option<AvailabilityRule>,
    pub variations: Option<ExtractionRule>,
    pub description: Option<ExtractionRule>,
}

impl ExtractionRules {
    /// Resolve the rule configured for `field`, if any.
    pub fn rule_for(&self, field: ProductField) -> Option<&ExtractionRule> {
        let rule = match field {
            ProductField::Name => Some(&self.name),
            ProductField::Price => Some(&self.price),
            ProductField::Image => self.image.as_ref(),
            ProductField::Thumbnail => self.thumbnail.as_ref(),
            ProductField::Availability => self.availability.as_ref().map(|a| &a.rule),
            ProductField::Variations => self.variations.as_ref(),
            ProductField::Description => self.description.as_ref(),
        };
        rule.filter(|r| r.is_usable())
    }
}

/// One XML site map advertised by a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitemapSource {
    pub url: String,
    pub label: Option<String>,
    /// chrono format string for `<lastmod>` values, e.g. `%Y-%m-%d`.
    pub lastmod_format: Option<String>,
}

/// Everything needed to scrape one store: identity, fetch mode, affiliate
/// rewrite, extraction rules and site-map sources.
#[derive(Debug, Clone)]
pub struct StoreRecipe {
    pub id: i64,
    pub name: String,
    pub website: String,
    pub region: String,
    pub locale: Locale,
    pub currency: Currency,
    /// Fall back to a headless-browser render instead of a plain GET.
    pub render_with_browser: bool,
    pub affiliate_query_param: Option<String>,
    pub affiliate_id: Option<String>,
    pub is_active: bool,
    pub is_parsable: bool,
    pub parse_failure_reason: Option<String>,
    pub last_check: Option<DateTime<Utc>>,
    pub rules: ExtractionRules,
    pub sitemaps: Vec<SitemapSource>,
}

impl StoreRecipe {
    pub fn is_affiliated(&self) -> bool {
        self.affiliate_query_param
            .as_deref()
            .is_some_and(|p| !p.is_empty())
            && self.affiliate_id.as_deref().is_some_and(|i| !i.is_empty())
    }

    /// Rewrite a product link to carry the store's affiliate query pair.
    ///
    /// Idempotent: an existing value for the parameter is replaced, so
    /// links that were stored already rewritten stay stable.
    pub fn affiliate_link(&self, product_link: &str) -> String {
        if !self.is_affiliated() {
            return product_link.to_string();
        }
        let (param, id) = (
            self.affiliate_query_param.as_deref().unwrap_or_default(),
            self.affiliate_id.as_deref().unwrap_or_default(),
        );

        let mut url = match Url::parse(product_link) {
            Ok(url) => url,
            Err(_) => return product_link.to_string(),
        };
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != param)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (key, value) in &kept {
                pairs.append_pair(key, value);
            }
            pairs.append_pair(param, id);
        }
        url.to_string()
    }

    /// Flag the recipe as broken. A reason is always recorded; an empty
    /// one would leave operators with nothing to act on.
    pub fn mark_unparsable(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.is_parsable = false;
        self.parse_failure_reason = Some(if reason.trim().is_empty() {
            "unspecified parse failure".to_string()
        } else {
            reason
        });
    }

    pub fn mark_parsable(&mut self) {
        self.is_parsable = true;
        self.parse_failure_reason = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> ExtractionRules {
        ExtractionRules {
            name: ExtractionRule::new("h1", "title", true),
            price: ExtractionRule::new("span", "price", true),
            image: Some(ExtractionRule::new("", "", true)),
            thumbnail: None,
            availability: None,
            variations: None,
            description: None,
        }
    }

    fn store() -> StoreRecipe {
        StoreRecipe {
            id: 1,
            name: "Acme".into(),
            website: "https://acme.example".into(),
            region: "Europe".into(),
            locale: Locale::EnUs,
            currency: Currency::Eur,
            render_with_browser: false,
            affiliate_query_param: None,
            affiliate_id: None,
            is_active: true,
            is_parsable: true,
            parse_failure_reason: None,
            last_check: None,
            rules: rules(),
            sitemaps: Vec::new(),
        }
    }

    #[test]
    fn empty_rule_is_not_usable() {
        let rules = rules();
        assert!(rules.rule_for(ProductField::Name).is_some());
        // image is configured but blank, so the store opted out
        assert!(rules.rule_for(ProductField::Image).is_none());
        assert!(rules.rule_for(ProductField::Description).is_none());
    }

    #[test]
    fn affiliate_link_appends_and_replaces() {
        let mut store = store();
        assert_eq!(
            store.affiliate_link("https://acme.example/p/1?x=2"),
            "https://acme.example/p/1?x=2"
        );

        store.affiliate_query_param = Some("ref".into());
        store.affiliate_id = Some("shopscout".into());
        let link = store.affiliate_link("https://acme.example/p/1?x=2");
        assert_eq!(link, "https://acme.example/p/1?x=2&ref=shopscout");
        // re-applying replaces the old value rather than duplicating it
        assert_eq!(store.affiliate_link(&link), link);
    }

    #[test]
    fn unparsable_always_carries_a_reason() {
        let mut store = store();
        store.mark_unparsable("   ");
        assert!(!store.is_parsable);
        assert!(store
            .parse_failure_reason
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty()));

        store.mark_parsable();
        assert!(store.is_parsable);
        assert!(store.parse_failure_reason.is_none());
    }
}
