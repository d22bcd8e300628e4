//! Recipe-driven field extraction from product pages.
//!
//! One generic dispatch serves arbitrarily different store markup: each
//! requested field resolves to the store's configured {tag, class-or-id}
//! rule, the first matching node is decoded according to the field's kind,
//! and anything optional that is unconfigured or unmatched simply stays
//! out of the result.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};
use std::str::FromStr;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;
use url::Url;

use crate::domain::{ExtractionRule, Locale, ProductField, StoreRecipe};

/// Price shapes like `EUR 1.234,56`, `$19.99`, `1,299.00`. Anchored: the
/// cleaned candidate must start with the price, mirroring the allow-list
/// fallback below.
static PRICE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Z]{3} )?(?:\$|€|£)?(\d{1,3}(?:[.,]\d{3})*(?:[.,]\d{2}))")
        .expect("price pattern is valid")
});

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r" +").expect("valid regex"));
static MULTI_NEWLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{2,}").expect("valid regex"));
static IMG_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("img").expect("img selector is valid"));

/// Width injected into lazy image URL templates.
const IMAGE_WIDTH: &str = "300";

/// Raw values pulled from one document, before mandatory-field checks.
#[derive(Debug, Clone, Default)]
pub struct ExtractedFields {
    pub name: Option<String>,
    pub price: Option<Decimal>,
    pub image: Option<String>,
    pub thumbnail: Option<String>,
    pub availability: Option<bool>,
    pub variations_present: bool,
    pub description: Option<String>,
}

impl ExtractedFields {
    /// Collapse the availability tri-state: a variations node forces
    /// "unknown" unless the page said in-stock outright; with nothing
    /// scraped the catalog default is available.
    pub fn resolved_availability(&self) -> Option<bool> {
        if self.variations_present && self.availability != Some(true) {
            None
        } else {
            self.availability.or(Some(true))
        }
    }
}

/// Generic extractor over one store's recipe.
pub struct FieldExtractor<'a> {
    store: &'a StoreRecipe,
}

impl<'a> FieldExtractor<'a> {
    pub fn new(store: &'a StoreRecipe) -> Self {
        Self { store }
    }

    /// Run the recipe over `document` for the requested fields.
    pub fn extract(&self, document: &Html, fields: &[ProductField]) -> ExtractedFields {
        let mut out = ExtractedFields::default();

        for &field in fields {
            let Some(rule) = self.store.rules.rule_for(field) else {
                debug!(field = field.as_str(), "field not configured, skipping");
                continue;
            };
            let Some(node) = find_node(document, rule) else {
                warn!(
                    store = %self.store.name,
                    field = field.as_str(),
                    tag = %rule.tag,
                    selector = %rule.selector,
                    "nothing found when searching for field"
                );
                continue;
            };

            match field {
                ProductField::Name => out.name = non_empty(self.clean_text(&node_text(node))),
                ProductField::Price => {
                    out.price = parse_price(&clean_whitespace(&node_text(node)), self.store.locale);
                }
                ProductField::Image => out.image = self.extract_image(node),
                ProductField::Thumbnail => out.thumbnail = self.extract_image(node),
                ProductField::Availability => {
                    out.availability = Some(self.extract_availability(node));
                }
                // The node's presence is the signal; its content never is.
                ProductField::Variations => out.variations_present = true,
                ProductField::Description => {
                    out.description = non_empty(self.clean_text(&node_text(node)));
                }
            }
        }

        out
    }

    /// In stock iff the node text matches the store's availability pattern
    /// (case-insensitive, anywhere in the text).
    fn extract_availability(&self, node: ElementRef<'_>) -> bool {
        let text = node_text(node).trim().to_lowercase();
        debug!(found = %text, "availability tag text");
        let Some(availability) = &self.store.rules.availability else {
            return false;
        };
        let pattern = availability.in_stock_pattern.to_lowercase();
        match Regex::new(&pattern) {
            Ok(re) => re.is_match(&text),
            // A recipe pattern that is not a valid regex still works as a
            // plain substring probe.
            Err(_) => text.contains(&pattern),
        }
    }

    /// The matched node may wrap the actual `<img>`; lazy-load sources are
    /// preferred over the plain `src`.
    fn extract_image(&self, node: ElementRef<'_>) -> Option<String> {
        let img = if node.value().name() == "img" {
            Some(node)
        } else {
            node.select(&IMG_SELECTOR).next()
        }?;
        let link = img
            .value()
            .attr("data-src")
            .or_else(|| img.value().attr("src"))?;
        Some(self.format_image_link(link))
    }

    /// Normalize an image link: inject the width parameter, upgrade
    /// protocol-relative links, resolve store-relative paths.
    fn format_image_link(&self, link: &str) -> String {
        let link = link.replace("{width}", IMAGE_WIDTH);
        if let Some(rest) = link.strip_prefix("//") {
            return format!("https://{rest}");
        }
        if link.starts_with("http") {
            return link;
        }
        match Url::parse(&self.store.website).and_then(|base| base.join(&link)) {
            Ok(resolved) => resolved.to_string(),
            Err(_) => format!("{}{link}", self.store.website),
        }
    }

    /// Whitespace cleanup plus compatibility decomposition, applied to the
    /// free-text fields.
    fn clean_text(&self, value: &str) -> String {
        clean_whitespace(value).nfkd().collect()
    }
}

/// First DOM node matching the rule's {tag, class-or-id} pair.
fn find_node<'doc>(document: &'doc Html, rule: &ExtractionRule) -> Option<ElementRef<'doc>> {
    let selector = build_selector(rule)?;
    document.select(&selector).next()
}

fn build_selector(rule: &ExtractionRule) -> Option<Selector> {
    let tag = rule.tag.trim();
    let css = if rule.selector_is_class {
        // A selector value holding several classes must match them all.
        let classes: String = rule
            .selector
            .split_whitespace()
            .map(|class| format!(".{class}"))
            .collect();
        format!("{tag}{classes}")
    } else {
        format!("{tag}#{}", rule.selector.trim())
    };

    let parsed = Selector::parse(&css);
    match parsed {
        Ok(selector) => Some(selector),
        Err(e) => {
            warn!(selector = %css, "recipe produced an invalid selector: {e:?}");
            None
        }
    }
}

fn node_text(node: ElementRef<'_>) -> String {
    node.text().collect()
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

/// Collapse space runs and newline runs, strip NUL bytes, trim.
pub fn clean_whitespace(value: &str) -> String {
    let value = MULTI_SPACE.replace_all(value, " ");
    let value = MULTI_NEWLINE.replace_all(&value, " ");
    value.replace('\0', "").trim().to_string()
}

/// Locale-aware price parsing.
///
/// The raw text is matched against the anchored price pattern; on a miss
/// the string is filtered down to digits, separators and currency symbols
/// and matched exactly once more. A second miss yields `None` — the field
/// is omitted, never an error.
pub fn parse_price(value: &str, locale: Locale) -> Option<Decimal> {
    if let Some(price) = match_price(value, locale) {
        return Some(price);
    }
    let filtered: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '$' | '€' | '£'))
        .collect();
    match_price(&filtered, locale)
}

fn match_price(value: &str, locale: Locale) -> Option<Decimal> {
    let captures = PRICE_PATTERN.captures(value)?;
    let raw = captures.get(1)?.as_str();
    let normalized = if locale.comma_is_decimal() {
        raw.replace('.', "").replace(',', ".")
    } else {
        raw.replace(',', "")
    };
    Decimal::from_str(&normalized).ok().map(|d| d.round_dp(2))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::domain::{AvailabilityRule, Currency, ExtractionRules};

    fn store(rules: ExtractionRules) -> StoreRecipe {
        StoreRecipe {
            id: 1,
            name: "StoreX".into(),
            website: "https://storex.example".into(),
            region: "Europe".into(),
            locale: Locale::EnUs,
            currency: Currency::Usd,
            render_with_browser: false,
            affiliate_query_param: None,
            affiliate_id: None,
            is_active: true,
            is_parsable: true,
            parse_failure_reason: None,
            last_check: None,
            rules,
            sitemaps: Vec::new(),
        }
    }

    fn base_rules() -> ExtractionRules {
        ExtractionRules {
            name: ExtractionRule::new("h1", "title", true),
            price: ExtractionRule::new("span", "price", true),
            image: None,
            thumbnail: None,
            availability: None,
            variations: None,
            description: None,
        }
    }

    #[rstest]
    #[case(Locale::ItIt, "€1.234,56", "1234.56")]
    #[case(Locale::EnUs, "$19.99", "19.99")]
    #[case(Locale::EnUs, "USD $1,299.00", "1299.00")]
    #[case(Locale::EnUs, "Price:\n$ 19.99", "19.99")]
    #[case(Locale::ItIt, "23,90", "23.90")]
    fn price_parsing_is_locale_aware(
        #[case] locale: Locale,
        #[case] raw: &str,
        #[case] expected: &str,
    ) {
        let cleaned = clean_whitespace(raw);
        assert_eq!(
            parse_price(&cleaned, locale),
            Some(expected.parse().unwrap())
        );
    }

    #[rstest]
    #[case("call for pricing")]
    #[case("")]
    #[case("1234.56")] // ungrouped thousands never match the pattern
    fn unparseable_price_yields_none(#[case] raw: &str) {
        assert_eq!(parse_price(raw, Locale::EnUs), None);
    }

    #[test]
    fn extracts_name_and_price_from_fixture() {
        let store = store(base_rules());
        let document = Html::parse_document(
            r#"<h1 class="title">Widget</h1><span class="price">$9.99</span>"#,
        );
        let out = FieldExtractor::new(&store).extract(&document, &[
            ProductField::Name,
            ProductField::Price,
        ]);
        assert_eq!(out.name.as_deref(), Some("Widget"));
        assert_eq!(out.price, Some("9.99".parse().unwrap()));
    }

    #[test]
    fn missing_optional_field_is_omitted_not_an_error() {
        let mut rules = base_rules();
        rules.description = Some(ExtractionRule::new("div", "desc", true));
        let store = store(rules);
        let document = Html::parse_document(r#"<h1 class="title">Widget</h1>"#);
        let out = FieldExtractor::new(&store).extract(&document, &[
            ProductField::Name,
            ProductField::Description,
            ProductField::Image,
        ]);
        assert_eq!(out.name.as_deref(), Some("Widget"));
        assert!(out.description.is_none());
        assert!(out.image.is_none());
    }

    #[test]
    fn id_selector_rules_match_by_id() {
        let mut rules = base_rules();
        rules.name = ExtractionRule::new("h1", "product-name", false);
        let store = store(rules);
        let document = Html::parse_document(r#"<h1 id="product-name">Kettle</h1>"#);
        let out = FieldExtractor::new(&store).extract(&document, &[ProductField::Name]);
        assert_eq!(out.name.as_deref(), Some("Kettle"));
    }

    #[test]
    fn availability_matches_recipe_pattern_case_insensitively() {
        let mut rules = base_rules();
        rules.availability = Some(AvailabilityRule {
            rule: ExtractionRule::new("span", "stock", true),
            in_stock_pattern: "in stock|available".into(),
        });
        let store = store(rules);

        let document =
            Html::parse_document(r#"<span class="stock">Currently IN STOCK, ships today</span>"#);
        let out = FieldExtractor::new(&store).extract(&document, &[ProductField::Availability]);
        assert_eq!(out.availability, Some(true));
        assert_eq!(out.resolved_availability(), Some(true));

        let document = Html::parse_document(r#"<span class="stock">Sold out</span>"#);
        let out = FieldExtractor::new(&store).extract(&document, &[ProductField::Availability]);
        assert_eq!(out.availability, Some(false));
        assert_eq!(out.resolved_availability(), Some(false));
    }

    #[test]
    fn variations_node_forces_unknown_availability() {
        let mut rules = base_rules();
        rules.availability = Some(AvailabilityRule {
            rule: ExtractionRule::new("span", "stock", true),
            in_stock_pattern: "in stock".into(),
        });
        rules.variations = Some(ExtractionRule::new("select", "variants", true));
        let store = store(rules);

        // out of stock + variations: stock state depends on the variant
        let document = Html::parse_document(
            r#"<span class="stock">unavailable</span><select class="variants"></select>"#,
        );
        let out = FieldExtractor::new(&store)
            .extract(&document, &[ProductField::Availability, ProductField::Variations]);
        assert_eq!(out.resolved_availability(), None);

        // explicit in-stock survives the variations marker
        let document = Html::parse_document(
            r#"<span class="stock">in stock</span><select class="variants"></select>"#,
        );
        let out = FieldExtractor::new(&store)
            .extract(&document, &[ProductField::Availability, ProductField::Variations]);
        assert_eq!(out.resolved_availability(), Some(true));
    }

    #[test]
    fn nothing_scraped_defaults_to_available() {
        let store = store(base_rules());
        let document = Html::parse_document("<p>hi</p>");
        let out = FieldExtractor::new(&store).extract(&document, &[ProductField::Availability]);
        assert_eq!(out.resolved_availability(), Some(true));
    }

    #[test]
    fn image_prefers_lazy_source_and_normalizes_links() {
        let mut rules = base_rules();
        rules.image = Some(ExtractionRule::new("div", "gallery", true));
        let store = store(rules);

        let document = Html::parse_document(
            r#"<div class="gallery"><img data-src="//cdn.example/i.jpg?w={width}" src="/fallback.jpg"></div>"#,
        );
        let out = FieldExtractor::new(&store).extract(&document, &[ProductField::Image]);
        assert_eq!(
            out.image.as_deref(),
            Some("https://cdn.example/i.jpg?w=300")
        );

        let document =
            Html::parse_document(r#"<div class="gallery"><img src="/images/i.jpg"></div>"#);
        let out = FieldExtractor::new(&store).extract(&document, &[ProductField::Image]);
        assert_eq!(
            out.image.as_deref(),
            Some("https://storex.example/images/i.jpg")
        );
    }

    #[test]
    fn text_fields_are_cleaned_and_nfkd_normalized() {
        let mut rules = base_rules();
        rules.description = Some(ExtractionRule::new("div", "desc", true));
        let store = store(rules);
        let document =
            Html::parse_document("<div class=\"desc\">ﬁne   tea\n\n\nfrom Uji</div>");
        let out = FieldExtractor::new(&store).extract(&document, &[ProductField::Description]);
        // the "ﬁ" ligature decomposes, runs of spaces/newlines collapse
        assert_eq!(out.description.as_deref(), Some("fine tea from Uji"));
    }

    #[test]
    fn whitespace_cleanup_strips_nul_bytes() {
        assert_eq!(clean_whitespace(" a\u{0000}b  c "), "ab c");
    }
}
