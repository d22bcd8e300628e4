//! SQLite-backed catalog repository.
//!
//! All catalog writes funnel through here. Upsert plus history append run
//! in one transaction per item, so a mid-batch crash leaves at most one
//! partially applied product.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::domain::{
    AvailabilityRule, CatalogProduct, Category, Currency, ExtractionRule, ExtractionRules, Locale,
    PriceHistoryEntry, ShippingMethod, SitemapSource, StoreRecipe,
};

#[derive(Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    /// Open (creating if needed) the catalog database at `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let db_path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");

        if !db_path.is_empty() && db_path != ":memory:" {
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if !Path::new(db_path).exists() {
                std::fs::File::create(db_path)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .with_context(|| format!("failed to open catalog database {database_url}"))?;

        Ok(Self { pool })
    }

    /// In-memory catalog on a single connection; used by tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS stores (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                website TEXT NOT NULL,
                region TEXT NOT NULL,
                locale TEXT NOT NULL,
                currency TEXT NOT NULL,
                render_with_browser INTEGER NOT NULL DEFAULT 0,
                affiliate_query_param TEXT,
                affiliate_id TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                is_parsable INTEGER NOT NULL DEFAULT 0,
                parse_failure_reason TEXT,
                last_check DATETIME,
                name_tag TEXT NOT NULL,
                name_selector TEXT NOT NULL,
                name_is_class INTEGER NOT NULL DEFAULT 1,
                price_tag TEXT NOT NULL,
                price_selector TEXT NOT NULL,
                price_is_class INTEGER NOT NULL DEFAULT 1,
                image_tag TEXT,
                image_selector TEXT,
                image_is_class INTEGER NOT NULL DEFAULT 1,
                thumbnail_tag TEXT,
                thumbnail_selector TEXT,
                thumbnail_is_class INTEGER NOT NULL DEFAULT 1,
                availability_tag TEXT,
                availability_selector TEXT,
                availability_is_class INTEGER NOT NULL DEFAULT 1,
                availability_pattern TEXT,
                variations_tag TEXT,
                variations_selector TEXT,
                variations_is_class INTEGER NOT NULL DEFAULT 1,
                description_tag TEXT,
                description_selector TEXT,
                description_is_class INTEGER NOT NULL DEFAULT 1
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS store_sitemaps (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                store_id INTEGER NOT NULL,
                url TEXT NOT NULL,
                label TEXT,
                lastmod_format TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS products (
                id TEXT PRIMARY KEY,
                store_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                price TEXT NOT NULL,
                currency TEXT NOT NULL,
                link TEXT NOT NULL,
                image TEXT,
                is_available INTEGER,
                description TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                import_date DATETIME NOT NULL,
                category_id INTEGER,
                sub_category_id INTEGER,
                categorized_at DATETIME,
                best_shipping_method_id INTEGER
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS price_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id TEXT NOT NULL,
                price TEXT NOT NULL,
                created_at DATETIME NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS shipping_methods (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                store_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                price TEXT,
                min_price_shipping_condition TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                slug TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                parent_id INTEGER
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS clicked_products (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id TEXT NOT NULL,
                created_at DATETIME NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS ix_products_store ON products (store_id)",
            "CREATE INDEX IF NOT EXISTS ix_products_link ON products (link)",
            "CREATE INDEX IF NOT EXISTS ix_price_history_product ON price_history (product_id)",
            "CREATE INDEX IF NOT EXISTS ix_clicked_products_product ON clicked_products (product_id)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    // ===============================
    // STORE OPERATIONS
    // ===============================

    pub async fn insert_store(&self, store: &StoreRecipe) -> Result<i64> {
        let (image_tag, image_selector, image_is_class) = rule_columns(store.rules.image.as_ref());
        let (thumb_tag, thumb_selector, thumb_is_class) =
            rule_columns(store.rules.thumbnail.as_ref());
        let (avail_tag, avail_selector, avail_is_class) =
            rule_columns(store.rules.availability.as_ref().map(|a| &a.rule));
        let (var_tag, var_selector, var_is_class) = rule_columns(store.rules.variations.as_ref());
        let (desc_tag, desc_selector, desc_is_class) =
            rule_columns(store.rules.description.as_ref());

        let result = sqlx::query(
            r#"
            INSERT INTO stores
            (name, website, region, locale, currency, render_with_browser,
             affiliate_query_param, affiliate_id, is_active, is_parsable,
             parse_failure_reason, last_check,
             name_tag, name_selector, name_is_class,
             price_tag, price_selector, price_is_class,
             image_tag, image_selector, image_is_class,
             thumbnail_tag, thumbnail_selector, thumbnail_is_class,
             availability_tag, availability_selector, availability_is_class,
             availability_pattern,
             variations_tag, variations_selector, variations_is_class,
             description_tag, description_selector, description_is_class)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                    ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&store.name)
        .bind(&store.website)
        .bind(&store.region)
        .bind(store.locale.as_str())
        .bind(store.currency.as_str())
        .bind(store.render_with_browser)
        .bind(&store.affiliate_query_param)
        .bind(&store.affiliate_id)
        .bind(store.is_active)
        .bind(store.is_parsable)
        .bind(&store.parse_failure_reason)
        .bind(store.last_check)
        .bind(&store.rules.name.tag)
        .bind(&store.rules.name.selector)
        .bind(store.rules.name.selector_is_class)
        .bind(&store.rules.price.tag)
        .bind(&store.rules.price.selector)
        .bind(store.rules.price.selector_is_class)
        .bind(image_tag)
        .bind(image_selector)
        .bind(image_is_class)
        .bind(thumb_tag)
        .bind(thumb_selector)
        .bind(thumb_is_class)
        .bind(avail_tag)
        .bind(avail_selector)
        .bind(avail_is_class)
        .bind(
            store
                .rules
                .availability
                .as_ref()
                .map(|a| a.in_stock_pattern.clone()),
        )
        .bind(var_tag)
        .bind(var_selector)
        .bind(var_is_class)
        .bind(desc_tag)
        .bind(desc_selector)
        .bind(desc_is_class)
        .execute(&self.pool)
        .await?;

        let store_id = result.last_insert_rowid();
        for sitemap in &store.sitemaps {
            self.add_sitemap(store_id, sitemap).await?;
        }
        Ok(store_id)
    }

    pub async fn add_sitemap(&self, store_id: i64, sitemap: &SitemapSource) -> Result<()> {
        sqlx::query(
            "INSERT INTO store_sitemaps (store_id, url, label, lastmod_format) VALUES (?, ?, ?, ?)",
        )
        .bind(store_id)
        .bind(&sitemap.url)
        .bind(&sitemap.label)
        .bind(&sitemap.lastmod_format)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Active, parsable stores in a region, site maps eagerly loaded.
    pub async fn active_stores_by_region(&self, region: &str) -> Result<Vec<StoreRecipe>> {
        let rows = sqlx::query(
            "SELECT * FROM stores WHERE region = ? AND is_active = 1 AND is_parsable = 1 ORDER BY id",
        )
        .bind(region)
        .fetch_all(&self.pool)
        .await?;

        let mut stores = Vec::with_capacity(rows.len());
        for row in rows {
            let mut store = store_from_row(&row)?;
            store.sitemaps = self.sitemaps_for(store.id).await?;
            stores.push(store);
        }
        Ok(stores)
    }

    pub async fn stores_by_ids(&self, ids: &[i64]) -> Result<Vec<StoreRecipe>> {
        let mut stores = Vec::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query("SELECT * FROM stores WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = row {
                let mut store = store_from_row(&row)?;
                store.sitemaps = self.sitemaps_for(store.id).await?;
                stores.push(store);
            }
        }
        Ok(stores)
    }

    async fn sitemaps_for(&self, store_id: i64) -> Result<Vec<SitemapSource>> {
        let rows = sqlx::query(
            "SELECT url, label, lastmod_format FROM store_sitemaps WHERE store_id = ? ORDER BY id",
        )
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| SitemapSource {
                url: row.get("url"),
                label: row.get("label"),
                lastmod_format: row.get("lastmod_format"),
            })
            .collect())
    }

    /// Persist the outcome of a compatibility check.
    pub async fn record_parsability(&self, store: &StoreRecipe) -> Result<()> {
        sqlx::query(
            "UPDATE stores SET is_parsable = ?, parse_failure_reason = ?, last_check = ? WHERE id = ?",
        )
        .bind(store.is_parsable)
        .bind(&store.parse_failure_reason)
        .bind(store.last_check)
        .bind(store.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Advance a store's last-check stamp; called after every successful
    /// item so partial progress survives an interrupted batch.
    pub async fn touch_last_check(&self, store_id: i64) -> Result<()> {
        sqlx::query("UPDATE stores SET last_check = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(store_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ===============================
    // PRODUCT OPERATIONS
    // ===============================

    pub async fn product_by_id(&self, id: &str) -> Result<Option<CatalogProduct>> {
        let row = sqlx::query("SELECT * FROM products WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| product_from_row(&row)).transpose()
    }

    /// Active products whose last import is older than `cutoff`, most
    /// clicked first, then stalest first.
    pub async fn products_due_for_refresh(
        &self,
        store_id: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<CatalogProduct>> {
        let rows = sqlx::query(
            r#"
            SELECT p.*, COUNT(c.id) AS click_count
            FROM products p
            LEFT JOIN clicked_products c ON c.product_id = p.id
            WHERE p.store_id = ? AND p.is_active = 1 AND p.import_date <= ?
            GROUP BY p.id
            ORDER BY click_count DESC, p.import_date ASC
            "#,
        )
        .bind(store_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(product_from_row).collect()
    }

    /// Upsert the product row and append one price-history observation,
    /// atomically.
    pub async fn upsert_with_history(&self, product: &CatalogProduct) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO products
            (id, store_id, name, price, currency, link, image, is_available,
             description, is_active, import_date, category_id, sub_category_id,
             categorized_at, best_shipping_method_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&product.id)
        .bind(product.store_id)
        .bind(&product.name)
        .bind(product.price.to_string())
        .bind(product.currency.as_str())
        .bind(&product.link)
        .bind(&product.image)
        .bind(product.is_available)
        .bind(&product.description)
        .bind(product.is_active)
        .bind(product.import_date)
        .bind(product.category_id)
        .bind(product.sub_category_id)
        .bind(product.categorized_at)
        .bind(product.best_shipping_method_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO price_history (product_id, price, created_at) VALUES (?, ?, ?)")
            .bind(&product.id)
            .bind(product.price.to_string())
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Soft-delete whatever row sits at `link`. History rows stay.
    pub async fn deactivate_by_link(&self, link: &str) -> Result<u64> {
        let result = sqlx::query("UPDATE products SET is_active = 0 WHERE link = ?")
            .bind(link)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn price_history(&self, product_id: &str) -> Result<Vec<PriceHistoryEntry>> {
        let rows = sqlx::query(
            "SELECT id, product_id, price, created_at FROM price_history WHERE product_id = ? ORDER BY id",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(PriceHistoryEntry {
                    id: row.get("id"),
                    product_id: row.get("product_id"),
                    price: parse_decimal(&row.get::<String, _>("price"))?,
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    pub async fn record_click(&self, product_id: &str) -> Result<()> {
        sqlx::query("INSERT INTO clicked_products (product_id, created_at) VALUES (?, ?)")
            .bind(product_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ===============================
    // SHIPPING & CATEGORIES
    // ===============================

    pub async fn shipping_methods(&self, store_id: i64) -> Result<Vec<ShippingMethod>> {
        let rows = sqlx::query("SELECT * FROM shipping_methods WHERE store_id = ? ORDER BY id")
            .bind(store_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(ShippingMethod {
                    id: row.get("id"),
                    store_id: row.get("store_id"),
                    name: row.get("name"),
                    price: parse_optional_decimal(row.get::<Option<String>, _>("price"))?,
                    min_price_shipping_condition: parse_optional_decimal(
                        row.get::<Option<String>, _>("min_price_shipping_condition"),
                    )?,
                })
            })
            .collect()
    }

    pub async fn insert_shipping_method(&self, method: &ShippingMethod) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO shipping_methods (store_id, name, price, min_price_shipping_condition) VALUES (?, ?, ?, ?)",
        )
        .bind(method.store_id)
        .bind(&method.name)
        .bind(method.price.map(|p| p.to_string()))
        .bind(method.min_price_shipping_condition.map(|m| m.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_or_create_category(
        &self,
        slug: &str,
        name: &str,
        parent_id: Option<i64>,
    ) -> Result<Category> {
        if let Some(row) = sqlx::query("SELECT * FROM categories WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(category_from_row(&row));
        }

        sqlx::query("INSERT INTO categories (slug, name, parent_id) VALUES (?, ?, ?)")
            .bind(slug)
            .bind(name)
            .bind(parent_id)
            .execute(&self.pool)
            .await?;

        let row = sqlx::query("SELECT * FROM categories WHERE slug = ?")
            .bind(slug)
            .fetch_one(&self.pool)
            .await?;
        Ok(category_from_row(&row))
    }

    // ===============================
    // AUDIT
    // ===============================

    /// Active stores whose active-product count fell below `threshold`.
    pub async fn stores_below_product_count(&self, threshold: i64) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT s.name AS name, COALESCE(counts.n, 0) AS n
            FROM stores s
            LEFT JOIN (
                SELECT store_id, COUNT(id) AS n FROM products
                WHERE is_active = 1 GROUP BY store_id
            ) counts ON counts.store_id = s.id
            WHERE s.is_active = 1 AND COALESCE(counts.n, 0) < ?
            ORDER BY n ASC, s.name
            "#,
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("name"), row.get("n")))
            .collect())
    }
}

fn rule_columns(
    rule: Option<&ExtractionRule>,
) -> (Option<String>, Option<String>, bool) {
    match rule {
        Some(rule) => (
            Some(rule.tag.clone()),
            Some(rule.selector.clone()),
            rule.selector_is_class,
        ),
        None => (None, None, true),
    }
}

fn optional_rule(row: &SqliteRow, prefix: &str) -> Option<ExtractionRule> {
    let tag: Option<String> = row.get(format!("{prefix}_tag").as_str());
    let selector: Option<String> = row.get(format!("{prefix}_selector").as_str());
    match (tag, selector) {
        (Some(tag), Some(selector)) => {
            let rule = ExtractionRule::new(
                tag,
                selector,
                row.get::<bool, _>(format!("{prefix}_is_class").as_str()),
            );
            rule.is_usable().then_some(rule)
        }
        _ => None,
    }
}

fn store_from_row(row: &SqliteRow) -> Result<StoreRecipe> {
    let locale_raw: String = row.get("locale");
    let currency_raw: String = row.get("currency");

    let availability = optional_rule(row, "availability").map(|rule| AvailabilityRule {
        rule,
        in_stock_pattern: row
            .get::<Option<String>, _>("availability_pattern")
            .unwrap_or_default(),
    });

    Ok(StoreRecipe {
        id: row.get("id"),
        name: row.get("name"),
        website: row.get("website"),
        region: row.get("region"),
        locale: Locale::parse(&locale_raw)
            .with_context(|| format!("unknown locale {locale_raw}"))?,
        currency: Currency::parse(&currency_raw)
            .with_context(|| format!("unknown currency {currency_raw}"))?,
        render_with_browser: row.get("render_with_browser"),
        affiliate_query_param: row.get("affiliate_query_param"),
        affiliate_id: row.get("affiliate_id"),
        is_active: row.get("is_active"),
        is_parsable: row.get("is_parsable"),
        parse_failure_reason: row.get("parse_failure_reason"),
        last_check: row.get("last_check"),
        rules: ExtractionRules {
            name: ExtractionRule::new(
                row.get::<String, _>("name_tag"),
                row.get::<String, _>("name_selector"),
                row.get("name_is_class"),
            ),
            price: ExtractionRule::new(
                row.get::<String, _>("price_tag"),
                row.get::<String, _>("price_selector"),
                row.get("price_is_class"),
            ),
            image: optional_rule(row, "image"),
            thumbnail: optional_rule(row, "thumbnail"),
            availability,
            variations: optional_rule(row, "variations"),
            description: optional_rule(row, "description"),
        },
        sitemaps: Vec::new(),
    })
}

fn product_from_row(row: &SqliteRow) -> Result<CatalogProduct> {
    let currency_raw: String = row.get("currency");
    Ok(CatalogProduct {
        id: row.get("id"),
        store_id: row.get("store_id"),
        name: row.get("name"),
        price: parse_decimal(&row.get::<String, _>("price"))?,
        currency: Currency::parse(&currency_raw)
            .with_context(|| format!("unknown currency {currency_raw}"))?,
        link: row.get("link"),
        image: row.get("image"),
        is_available: row.get("is_available"),
        description: row.get("description"),
        is_active: row.get("is_active"),
        import_date: row.get("import_date"),
        category_id: row.get("category_id"),
        sub_category_id: row.get("sub_category_id"),
        categorized_at: row.get("categorized_at"),
        best_shipping_method_id: row.get("best_shipping_method_id"),
    })
}

fn category_from_row(row: &SqliteRow) -> Category {
    Category {
        id: row.get("id"),
        slug: row.get("slug"),
        name: row.get("name"),
        parent_id: row.get("parent_id"),
    }
}

fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).with_context(|| format!("invalid stored price {raw}"))
}

fn parse_optional_decimal(raw: Option<String>) -> Result<Option<Decimal>> {
    raw.map(|raw| parse_decimal(&raw)).transpose()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::domain::derive_product_id;

    fn sample_store() -> StoreRecipe {
        StoreRecipe {
            id: 0,
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
            rules: ExtractionRules {
                name: ExtractionRule::new("h1", "title", true),
                price: ExtractionRule::new("span", "price", true),
                image: None,
                thumbnail: None,
                availability: Some(AvailabilityRule {
                    rule: ExtractionRule::new("span", "stock", true),
                    in_stock_pattern: "in stock".into(),
                }),
                variations: None,
                description: None,
            },
            sitemaps: vec![SitemapSource {
                url: "https://acme.example/sitemap.xml".into(),
                label: Some("products".into()),
                lastmod_format: Some("%Y-%m-%d".into()),
            }],
        }
    }

    fn sample_product(store_id: i64, name: &str, price: &str) -> CatalogProduct {
        CatalogProduct {
            id: derive_product_id("Acme", name),
            store_id,
            name: name.into(),
            price: price.parse().unwrap(),
            currency: Currency::Eur,
            link: format!("https://acme.example/p/{name}"),
            image: None,
            is_available: Some(true),
            description: None,
            is_active: true,
            import_date: Utc::now(),
            category_id: None,
            sub_category_id: None,
            categorized_at: None,
            best_shipping_method_id: None,
        }
    }

    async fn repo() -> CatalogRepository {
        let repo = CatalogRepository::in_memory().await.unwrap();
        repo.init_schema().await.unwrap();
        repo
    }

    #[tokio::test]
    async fn store_round_trips_with_rules_and_sitemaps() {
        let repo = repo().await;
        let id = repo.insert_store(&sample_store()).await.unwrap();

        let stores = repo.active_stores_by_region("Europe").await.unwrap();
        assert_eq!(stores.len(), 1);
        let store = &stores[0];
        assert_eq!(store.id, id);
        assert_eq!(store.rules.name.tag, "h1");
        assert!(store.rules.image.is_none());
        assert_eq!(
            store.rules.availability.as_ref().unwrap().in_stock_pattern,
            "in stock"
        );
        assert_eq!(store.sitemaps.len(), 1);
        assert_eq!(
            store.sitemaps[0].lastmod_format.as_deref(),
            Some("%Y-%m-%d")
        );

        assert!(repo
            .active_stores_by_region("America")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn upsert_twice_keeps_one_row_and_two_history_entries() {
        let repo = repo().await;
        let store_id = repo.insert_store(&sample_store()).await.unwrap();

        let product = sample_product(store_id, "Widget", "9.99");
        repo.upsert_with_history(&product).await.unwrap();
        repo.upsert_with_history(&product).await.unwrap();

        let stored = repo.product_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Widget");
        assert_eq!(stored.price, product.price);

        let history = repo.price_history(&product.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|h| h.price == product.price));
    }

    #[tokio::test]
    async fn deactivation_preserves_history_and_identity() {
        let repo = repo().await;
        let store_id = repo.insert_store(&sample_store()).await.unwrap();
        let product = sample_product(store_id, "Widget", "9.99");
        repo.upsert_with_history(&product).await.unwrap();

        let affected = repo.deactivate_by_link(&product.link).await.unwrap();
        assert_eq!(affected, 1);

        let stored = repo.product_by_id(&product.id).await.unwrap().unwrap();
        assert!(!stored.is_active);
        assert_eq!(stored.id, product.id);
        assert_eq!(repo.price_history(&product.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn due_for_refresh_orders_by_clicks_then_staleness() {
        let repo = repo().await;
        let store_id = repo.insert_store(&sample_store()).await.unwrap();

        let mut stale_popular = sample_product(store_id, "Popular", "5.00");
        stale_popular.import_date = Utc::now() - Duration::hours(10);
        let mut stale_old = sample_product(store_id, "Oldest", "5.00");
        stale_old.import_date = Utc::now() - Duration::hours(48);
        let mut stale_new = sample_product(store_id, "Newer", "5.00");
        stale_new.import_date = Utc::now() - Duration::hours(9);
        let fresh = sample_product(store_id, "Fresh", "5.00");

        for product in [&stale_popular, &stale_old, &stale_new, &fresh] {
            repo.upsert_with_history(product).await.unwrap();
        }
        repo.record_click(&stale_popular.id).await.unwrap();
        repo.record_click(&stale_popular.id).await.unwrap();

        let cutoff = Utc::now() - Duration::hours(8);
        let due = repo.products_due_for_refresh(store_id, cutoff).await.unwrap();
        let ids: Vec<&str> = due.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["Acme_Popular", "Acme_Oldest", "Acme_Newer"]);
    }

    #[tokio::test]
    async fn categories_are_created_once_per_slug() {
        let repo = repo().await;
        let first = repo
            .get_or_create_category("tea-pots", "Tea Pots", None)
            .await
            .unwrap();
        let second = repo
            .get_or_create_category("tea-pots", "Tea Pots", None)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);

        let child = repo
            .get_or_create_category("kyusu", "Kyusu", Some(first.id))
            .await
            .unwrap();
        assert_eq!(child.parent_id, Some(first.id));
    }

    #[tokio::test]
    async fn low_catalog_audit_flags_thin_stores() {
        let repo = repo().await;
        let store_id = repo.insert_store(&sample_store()).await.unwrap();
        repo.upsert_with_history(&sample_product(store_id, "Widget", "9.99"))
            .await
            .unwrap();

        let low = repo.stores_below_product_count(5).await.unwrap();
        assert_eq!(low, vec![("Acme".to_string(), 1)]);

        let low = repo.stores_below_product_count(1).await.unwrap();
        assert!(low.is_empty());
    }
}
