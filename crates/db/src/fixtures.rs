use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

pub const DEMO_BUSINESS_ID: &str = "demo-corner-store";

/// Products the demo dataset guarantees, with their decimal-text prices.
const DEMO_PRODUCTS: &[(&str, &str, &str)] = &[
    ("demo-sugar-1kg", "Sugar 1kg", "350"),
    ("demo-rice-5kg", "Rice 5kg", "4200"),
    ("demo-palm-oil-1l", "Palm Oil 1L", "1800"),
    ("demo-bread", "Bread Loaf", "900"),
    ("demo-eggs-crate", "Eggs Crate", "3500"),
    ("demo-milk-powder", "Milk Powder 400g", "2600"),
];

/// A single demo tenant with a small grocery catalog.
pub struct DemoDataset;

impl DemoDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed.sql");

    /// Loads the dataset. Existing rows are left untouched.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            business_id: DEMO_BUSINESS_ID,
            products_seeded: DEMO_PRODUCTS.iter().map(|(id, _, _)| *id).collect(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let business: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM business WHERE id = ?1)")
            .bind(DEMO_BUSINESS_ID)
            .fetch_one(pool)
            .await?;
        checks.push(("demo-business", business == 1));

        for (id, name, price) in DEMO_PRODUCTS {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(
                    SELECT 1 FROM product
                    WHERE id = ?1 AND business_id = ?2 AND name = ?3 AND price = ?4 AND is_active = 1
                 )",
            )
            .bind(id)
            .bind(DEMO_BUSINESS_ID)
            .bind(name)
            .bind(price)
            .fetch_one(pool)
            .await?;
            checks.push((*id, present == 1));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes the demo tenant; products and any conversation data cascade.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM business WHERE id = ?").bind(DEMO_BUSINESS_ID).execute(pool).await?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub business_id: &'static str,
    pub products_seeded: Vec<&'static str>,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use kiosk_core::domain::business::BusinessId;
    use kiosk_core::domain::product::Catalog;

    use super::{DemoDataset, DEMO_BUSINESS_ID};
    use crate::repositories::Repositories;
    use crate::{connect_with_settings, migrations};

    #[test]
    fn sql_fixture_is_valid() {
        assert!(DemoDataset::SQL.contains("Sugar 1kg"));
    }

    #[tokio::test]
    async fn load_is_idempotent_and_verifiable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");

        let first = DemoDataset::load(&pool).await.expect("load");
        let second = DemoDataset::load(&pool).await.expect("reload");
        assert_eq!(first.products_seeded, second.products_seeded);

        let verification = DemoDataset::verify(&pool).await.expect("verify");
        assert!(verification.all_present, "{:?}", verification.checks);

        let products: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM product")
            .fetch_one(&pool)
            .await
            .expect("count");
        assert_eq!(products, 6);

        pool.close().await;
    }

    #[tokio::test]
    async fn seeded_catalog_reads_back_through_repositories() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        DemoDataset::load(&pool).await.expect("load");

        let repos = Repositories::sql(pool.clone());
        let business_id = BusinessId(DEMO_BUSINESS_ID.to_owned());
        let business =
            repos.businesses.find_by_id(&business_id).await.expect("find").expect("business");
        assert!(business.payment.bank_details_text().is_some());

        let catalog = Catalog::new(repos.products.list_active(&business_id).await.expect("list"));
        let sugar = catalog.find_by_name("sugar 1kg").expect("sugar");
        assert_eq!(sugar.price, Decimal::new(350, 0));
        assert_eq!(catalog.products()[0].name, "Sugar 1kg");

        DemoDataset::clean(&pool).await.expect("clean");
        let verification = DemoDataset::verify(&pool).await.expect("verify");
        assert!(!verification.all_present);

        pool.close().await;
    }
}
