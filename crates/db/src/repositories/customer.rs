use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use kiosk_core::domain::business::BusinessId;
use kiosk_core::domain::customer::{Customer, CustomerId};

use super::{
    decode_decimal, decode_timestamp, encode_timestamp, CustomerRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlCustomerRepository {
    pool: DbPool,
}

impl SqlCustomerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const CUSTOMER_COLUMNS: &str =
    "id, business_id, channel_user_id, display_name, order_count, total_spent, created_at";

#[async_trait::async_trait]
impl CustomerRepository for SqlCustomerRepository {
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {CUSTOMER_COLUMNS} FROM customer WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(customer_from_row).transpose()
    }

    async fn list_by_channel_user(
        &self,
        channel_user_id: &str,
    ) -> Result<Vec<Customer>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customer
             WHERE channel_user_id = ?
             ORDER BY created_at DESC, id ASC"
        ))
        .bind(channel_user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(customer_from_row).collect()
    }

    async fn find_or_create(&self, candidate: Customer) -> Result<Customer, RepositoryError> {
        sqlx::query(
            "INSERT INTO customer (
                id,
                business_id,
                channel_user_id,
                display_name,
                order_count,
                total_spent,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(business_id, channel_user_id) DO UPDATE SET
                display_name = COALESCE(customer.display_name, excluded.display_name)",
        )
        .bind(&candidate.id.0)
        .bind(&candidate.business_id.0)
        .bind(&candidate.channel_user_id)
        .bind(candidate.display_name.as_deref())
        .bind(i64::from(candidate.order_count))
        .bind(candidate.total_spent.to_string())
        .bind(encode_timestamp(&candidate.created_at))
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customer WHERE business_id = ? AND channel_user_id = ?"
        ))
        .bind(&candidate.business_id.0)
        .bind(&candidate.channel_user_id)
        .fetch_one(&self.pool)
        .await?;

        customer_from_row(row)
    }
}

/// Adds one paid order to the customer's aggregates inside the caller's transaction.
pub(crate) async fn credit_paid_order(
    conn: &mut SqliteConnection,
    customer_id: &CustomerId,
    amount: Decimal,
) -> Result<(), RepositoryError> {
    let spent: Option<String> = sqlx::query_scalar("SELECT total_spent FROM customer WHERE id = ?")
        .bind(&customer_id.0)
        .fetch_optional(&mut *conn)
        .await?;
    let Some(spent) = spent else {
        return Err(RepositoryError::Conflict(format!("customer {} does not exist", customer_id.0)));
    };
    let total = decode_decimal("total_spent", &spent)? + amount;

    sqlx::query("UPDATE customer SET order_count = order_count + 1, total_spent = ? WHERE id = ?")
        .bind(total.to_string())
        .bind(&customer_id.0)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

fn customer_from_row(row: SqliteRow) -> Result<Customer, RepositoryError> {
    let order_count: i64 = row.try_get("order_count")?;
    let total_spent: String = row.try_get("total_spent")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Customer {
        id: CustomerId(row.try_get("id")?),
        business_id: BusinessId(row.try_get("business_id")?),
        channel_user_id: row.try_get("channel_user_id")?,
        display_name: row.try_get("display_name")?,
        order_count: u32::try_from(order_count).map_err(|_| {
            RepositoryError::Decode(format!("invalid order_count `{order_count}`"))
        })?,
        total_spent: decode_decimal("total_spent", &total_spent)?,
        created_at: decode_timestamp("created_at", &created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use kiosk_core::domain::business::BusinessId;
    use kiosk_core::domain::customer::Customer;

    use super::{credit_paid_order, SqlCustomerRepository};
    use crate::migrations;
    use crate::repositories::CustomerRepository;
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn find_or_create_returns_the_existing_profile() {
        let pool = setup_pool().await;
        insert_business(&pool, "biz-a").await;
        let repo = SqlCustomerRepository::new(pool.clone());
        let business = BusinessId("biz-a".to_owned());

        let first = repo
            .find_or_create(Customer::new(business.clone(), "2348000000001", None))
            .await
            .expect("create");
        let second = repo
            .find_or_create(Customer::new(business, "2348000000001", Some("Ada".to_owned())))
            .await
            .expect("find");

        assert_eq!(first.id, second.id);
        assert_eq!(second.display_name.as_deref(), Some("Ada"));
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM customer")
            .fetch_one(&pool)
            .await
            .expect("count");
        assert_eq!(count, 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn same_sender_gets_one_profile_per_business() {
        let pool = setup_pool().await;
        insert_business(&pool, "biz-a").await;
        insert_business(&pool, "biz-b").await;
        let repo = SqlCustomerRepository::new(pool.clone());

        for business in ["biz-a", "biz-b"] {
            repo.find_or_create(Customer::new(BusinessId(business.to_owned()), "telegram:77", None))
                .await
                .expect("create");
        }
        repo.find_or_create(Customer::new(BusinessId("biz-a".to_owned()), "telegram:78", None))
            .await
            .expect("create other");

        let profiles = repo.list_by_channel_user("telegram:77").await.expect("list");
        assert_eq!(profiles.len(), 2);
        assert!(profiles.iter().all(|profile| profile.channel_user_id == "telegram:77"));

        pool.close().await;
    }

    #[tokio::test]
    async fn credit_paid_order_updates_aggregates() {
        let pool = setup_pool().await;
        insert_business(&pool, "biz-a").await;
        let repo = SqlCustomerRepository::new(pool.clone());
        let customer = repo
            .find_or_create(Customer::new(BusinessId("biz-a".to_owned()), "2348000000001", None))
            .await
            .expect("create");

        let mut tx = pool.begin().await.expect("begin");
        credit_paid_order(&mut tx, &customer.id, Decimal::new(700, 0)).await.expect("credit");
        credit_paid_order(&mut tx, &customer.id, Decimal::new(1050, 1)).await.expect("credit");
        tx.commit().await.expect("commit");

        let stored = repo.find_by_id(&customer.id).await.expect("find").expect("customer");
        assert_eq!(stored.order_count, 2);
        assert_eq!(stored.total_spent, Decimal::new(8050, 1));

        pool.close().await;
    }

    async fn insert_business(pool: &DbPool, id: &str) {
        sqlx::query("INSERT INTO business (id, name, created_at) VALUES (?, ?, '2026-03-01T09:00:00Z')")
            .bind(id)
            .bind(id)
            .execute(pool)
            .await
            .expect("insert business");
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }
}
