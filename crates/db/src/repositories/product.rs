use sqlx::{sqlite::SqliteRow, Row};

use kiosk_core::domain::business::BusinessId;
use kiosk_core::domain::product::{Product, ProductId};

use super::{decode_decimal, ProductRepository, RepositoryError};
use crate::DbPool;

pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProductRepository for SqlProductRepository {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, business_id, name, description, price, unit, stock_quantity, image_url, is_active
             FROM product
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(product_from_row).transpose()
    }

    async fn list_active(&self, business_id: &BusinessId) -> Result<Vec<Product>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, business_id, name, description, price, unit, stock_quantity, image_url, is_active
             FROM product
             WHERE business_id = ? AND is_active = 1
             ORDER BY sort_order ASC, name ASC",
        )
        .bind(&business_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(product_from_row).collect()
    }

    async fn save(&self, product: Product) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO product (
                id,
                business_id,
                name,
                description,
                price,
                unit,
                stock_quantity,
                image_url,
                is_active
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                price = excluded.price,
                unit = excluded.unit,
                stock_quantity = excluded.stock_quantity,
                image_url = excluded.image_url,
                is_active = excluded.is_active",
        )
        .bind(&product.id.0)
        .bind(&product.business_id.0)
        .bind(&product.name)
        .bind(product.description.as_deref())
        .bind(product.price.to_string())
        .bind(product.unit.as_deref())
        .bind(product.stock_quantity)
        .bind(product.image_url.as_deref())
        .bind(product.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn product_from_row(row: SqliteRow) -> Result<Product, RepositoryError> {
    let price: String = row.try_get("price")?;
    Ok(Product {
        id: ProductId(row.try_get("id")?),
        business_id: BusinessId(row.try_get("business_id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        price: decode_decimal("price", &price)?,
        unit: row.try_get("unit")?,
        stock_quantity: row.try_get("stock_quantity")?,
        image_url: row.try_get("image_url")?,
        active: row.try_get("is_active")?,
    })
}
