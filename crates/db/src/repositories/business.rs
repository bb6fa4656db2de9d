use sqlx::{sqlite::SqliteRow, Row};

use kiosk_core::domain::business::{BankAccount, Business, BusinessId, PaymentSettings};

use super::{decode_timestamp, encode_timestamp, BusinessRepository, RepositoryError};
use crate::DbPool;

pub struct SqlBusinessRepository {
    pool: DbPool,
}

impl SqlBusinessRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl BusinessRepository for SqlBusinessRepository {
    async fn find_by_id(&self, id: &BusinessId) -> Result<Option<Business>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                name,
                bank_name,
                bank_account_number,
                bank_account_holder,
                bank_instructions,
                payment_link,
                created_at
             FROM business
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(business_from_row).transpose()
    }

    async fn list(&self, limit: u32) -> Result<Vec<Business>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                name,
                bank_name,
                bank_account_number,
                bank_account_holder,
                bank_instructions,
                payment_link,
                created_at
             FROM business
             ORDER BY created_at ASC, id ASC
             LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(business_from_row).collect()
    }

    async fn save(&self, business: Business) -> Result<(), RepositoryError> {
        let account = business.payment.bank_account.as_ref();
        sqlx::query(
            "INSERT INTO business (
                id,
                name,
                bank_name,
                bank_account_number,
                bank_account_holder,
                bank_instructions,
                payment_link,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                bank_name = excluded.bank_name,
                bank_account_number = excluded.bank_account_number,
                bank_account_holder = excluded.bank_account_holder,
                bank_instructions = excluded.bank_instructions,
                payment_link = excluded.payment_link",
        )
        .bind(&business.id.0)
        .bind(&business.name)
        .bind(account.map(|a| a.bank_name.as_str()))
        .bind(account.map(|a| a.account_number.as_str()))
        .bind(account.map(|a| a.account_holder.as_str()))
        .bind(business.payment.bank_instructions.as_deref())
        .bind(business.payment.payment_link.as_deref())
        .bind(encode_timestamp(&business.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn business_from_row(row: SqliteRow) -> Result<Business, RepositoryError> {
    let bank_name: Option<String> = row.try_get("bank_name")?;
    let account_number: Option<String> = row.try_get("bank_account_number")?;
    let account_holder: Option<String> = row.try_get("bank_account_holder")?;

    // All three account fields are required for structured bank details.
    let bank_account = match (bank_name, account_number, account_holder) {
        (Some(bank_name), Some(account_number), Some(account_holder)) => {
            Some(BankAccount { bank_name, account_number, account_holder })
        }
        _ => None,
    };

    let created_at: String = row.try_get("created_at")?;
    Ok(Business {
        id: BusinessId(row.try_get("id")?),
        name: row.try_get("name")?,
        payment: PaymentSettings {
            bank_account,
            bank_instructions: row.try_get("bank_instructions")?,
            payment_link: row.try_get("payment_link")?,
        },
        created_at: decode_timestamp("created_at", &created_at)?,
    })
}
