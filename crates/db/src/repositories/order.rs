use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use kiosk_core::domain::business::BusinessId;
use kiosk_core::domain::conversation::{Conversation, ConversationId};
use kiosk_core::domain::customer::CustomerId;
use kiosk_core::domain::order::{
    DeliveryMethod, Order, OrderId, OrderItem, OrderStatus, PaymentMethod, PaymentStatus,
};
use kiosk_core::domain::product::ProductId;

use super::conversation::write_conversation;
use super::customer::credit_paid_order;
use super::{
    decode_decimal, decode_timestamp, encode_timestamp, normalize_reference, OrderRepository,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn hydrate(&self, rows: Vec<SqliteRow>) -> Result<Vec<Order>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let mut order = order_from_row(row)?;
            order.items = load_items(&mut conn, &order.id).await?;
            orders.push(order);
        }
        Ok(orders)
    }
}

const ORDER_COLUMNS: &str = "id, business_id, customer_id, conversation_id, status, payment_status,
    payment_method, delivery_method, contact_details, notes, total_amount, created_at, updated_at";

#[async_trait::async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM customer_order WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn find_by_reference(
        &self,
        business_id: &BusinessId,
        customer_id: &CustomerId,
        reference: &str,
    ) -> Result<Vec<Order>, RepositoryError> {
        let prefix = normalize_reference(reference);
        if prefix.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM customer_order
             WHERE business_id = ? AND customer_id = ? AND lower(replace(id, '-', '')) LIKE ?
             ORDER BY created_at DESC
             LIMIT 5"
        ))
        .bind(&business_id.0)
        .bind(&customer_id.0)
        .bind(format!("{prefix}%"))
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn list_recent_for_customer(
        &self,
        customer_id: &CustomerId,
        limit: u32,
    ) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM customer_order
             WHERE customer_id = ?
             ORDER BY created_at DESC, id ASC
             LIMIT ?"
        ))
        .bind(&customer_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn finalize(
        &self,
        order: &Order,
        conversation: &Conversation,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO customer_order (
                id,
                business_id,
                customer_id,
                conversation_id,
                status,
                payment_status,
                payment_method,
                delivery_method,
                contact_details,
                notes,
                total_amount,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&order.id.0)
        .bind(&order.business_id.0)
        .bind(&order.customer_id.0)
        .bind(order.conversation_id.as_ref().map(|id| id.0.as_str()))
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.payment_method.as_str())
        .bind(order.delivery_method.as_str())
        .bind(&order.contact_details)
        .bind(&order.notes)
        .bind(order.total_amount.to_string())
        .bind(encode_timestamp(&order.created_at))
        .bind(encode_timestamp(&order.updated_at))
        .execute(&mut *tx)
        .await?;

        for (line_no, item) in order.items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_item (
                    order_id,
                    line_no,
                    product_id,
                    product_name,
                    quantity,
                    unit_price,
                    total_price
                 ) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&order.id.0)
            .bind(line_no as i64)
            .bind(&item.product_id.0)
            .bind(&item.product_name)
            .bind(i64::from(item.quantity))
            .bind(item.unit_price.to_string())
            .bind(item.total_price.to_string())
            .execute(&mut *tx)
            .await?;
        }

        write_conversation(&mut tx, conversation).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn settle_payment(
        &self,
        order: &Order,
        conversation: &Conversation,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE customer_order
             SET status = ?, payment_status = ?, updated_at = ?
             WHERE id = ? AND status = 'pending' AND payment_status = 'unpaid'",
        )
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(encode_timestamp(&order.updated_at))
        .bind(&order.id.0)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "order {} is no longer awaiting payment",
                order.id.0
            )));
        }

        credit_paid_order(&mut tx, &order.customer_id, order.total_amount).await?;
        write_conversation(&mut tx, conversation).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn cancel(
        &self,
        order: &Order,
        conversation: &Conversation,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE customer_order
             SET status = 'cancelled', updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(encode_timestamp(&order.updated_at))
        .bind(&order.id.0)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "order {} is no longer pending",
                order.id.0
            )));
        }

        write_conversation(&mut tx, conversation).await?;
        tx.commit().await?;
        Ok(())
    }
}

async fn load_items(
    conn: &mut SqliteConnection,
    order_id: &OrderId,
) -> Result<Vec<OrderItem>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT product_id, product_name, quantity, unit_price, total_price
         FROM order_item
         WHERE order_id = ?
         ORDER BY line_no ASC",
    )
    .bind(&order_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(item_from_row).collect()
}

fn item_from_row(row: SqliteRow) -> Result<OrderItem, RepositoryError> {
    let quantity: i64 = row.try_get("quantity")?;
    let unit_price: String = row.try_get("unit_price")?;
    let total_price: String = row.try_get("total_price")?;

    Ok(OrderItem {
        product_id: ProductId(row.try_get("product_id")?),
        product_name: row.try_get("product_name")?,
        quantity: u32::try_from(quantity)
            .map_err(|_| RepositoryError::Decode(format!("invalid quantity `{quantity}`")))?,
        unit_price: decode_decimal("unit_price", &unit_price)?,
        total_price: decode_decimal("total_price", &total_price)?,
    })
}

fn order_from_row(row: SqliteRow) -> Result<Order, RepositoryError> {
    let status: String = row.try_get("status")?;
    let payment_status: String = row.try_get("payment_status")?;
    let payment_method: String = row.try_get("payment_method")?;
    let delivery_method: String = row.try_get("delivery_method")?;
    let conversation_id: Option<String> = row.try_get("conversation_id")?;
    let total_amount: String = row.try_get("total_amount")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Order {
        id: OrderId(row.try_get("id")?),
        business_id: BusinessId(row.try_get("business_id")?),
        customer_id: CustomerId(row.try_get("customer_id")?),
        conversation_id: conversation_id.map(ConversationId),
        status: OrderStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown order status `{status}`")))?,
        payment_status: PaymentStatus::parse(&payment_status).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown payment status `{payment_status}`"))
        })?,
        payment_method: PaymentMethod::parse(&payment_method).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown payment method `{payment_method}`"))
        })?,
        delivery_method: DeliveryMethod::parse(&delivery_method).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown delivery method `{delivery_method}`"))
        })?,
        contact_details: row.try_get("contact_details")?,
        notes: row.try_get("notes")?,
        total_amount: decode_decimal("total_amount", &total_amount)?,
        items: Vec::new(),
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
    })
}
