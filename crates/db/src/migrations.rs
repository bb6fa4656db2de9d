use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_TABLES: &[&str] = &[
        "business",
        "product",
        "customer",
        "conversation",
        "message",
        "customer_order",
        "order_item",
    ];

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "business",
        "product",
        "customer",
        "conversation",
        "message",
        "customer_order",
        "order_item",
        "idx_product_business_active",
        "idx_customer_channel_user_id",
        "idx_conversation_active_triple",
        "idx_conversation_customer_channel",
        "idx_message_conversation_created",
        "idx_customer_order_customer_created",
    ];

    #[tokio::test]
    async fn migrations_create_baseline_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for table in MANAGED_TABLES {
            let count = sqlx::query(
                "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .expect("check table")
            .get::<i64, _>("count");

            assert_eq!(count, 1, "table `{table}` should exist");
        }
    }

    #[tokio::test]
    async fn at_most_one_active_conversation_per_triple() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for statement in [
            "INSERT INTO business (id, name, created_at) VALUES ('b', 'B', '2026-03-01T09:00:00Z')",
            "INSERT INTO customer (id, business_id, channel_user_id, created_at)
             VALUES ('c', 'b', '2348000000001', '2026-03-01T09:00:00Z')",
            "INSERT INTO conversation (id, business_id, customer_id, channel, status, last_message_at, created_at)
             VALUES ('closed-1', 'b', 'c', 'whatsapp', 'closed', '2026-03-01T09:00:00Z', '2026-03-01T09:00:00Z')",
            "INSERT INTO conversation (id, business_id, customer_id, channel, status, last_message_at, created_at)
             VALUES ('closed-2', 'b', 'c', 'whatsapp', 'closed', '2026-03-01T09:00:00Z', '2026-03-01T09:00:00Z')",
            "INSERT INTO conversation (id, business_id, customer_id, channel, status, last_message_at, created_at)
             VALUES ('active-1', 'b', 'c', 'whatsapp', 'active', '2026-03-01T09:00:00Z', '2026-03-01T09:00:00Z')",
        ] {
            sqlx::query(statement).execute(&pool).await.expect("seed");
        }

        let duplicate = sqlx::query(
            "INSERT INTO conversation (id, business_id, customer_id, channel, status, last_message_at, created_at)
             VALUES ('active-2', 'b', 'c', 'whatsapp', 'active', '2026-03-01T09:00:00Z', '2026-03-01T09:00:00Z')",
        )
        .execute(&pool)
        .await;

        assert!(duplicate.is_err(), "second active conversation must be rejected");
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let table_count = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = 'customer_order'",
        )
        .fetch_one(&pool)
        .await
        .expect("check customer_order table removed")
        .get::<i64, _>("count");

        assert_eq!(table_count, 0);
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_SCHEMA_OBJECTS.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let after_down_signature = managed_schema_signature(&pool).await;
        assert!(
            after_down_signature.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");

        let after_second_up_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            after_second_up_signature, initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}
