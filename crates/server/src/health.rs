use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use kiosk_core::config::{AppConfig, OracleProvider};
use kiosk_db::DbPool;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    channels: BTreeMap<&'static str, bool>,
    oracle: OracleProvider,
}

impl HealthState {
    pub fn new(db_pool: DbPool, config: &AppConfig) -> Self {
        let channels = BTreeMap::from([
            ("telegram", config.channels.telegram.is_enabled()),
            ("whatsapp", config.channels.whatsapp.is_enabled()),
        ]);
        Self { db_pool, channels, oracle: config.oracle.provider }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub channels: BTreeMap<&'static str, HealthCheck>,
    pub oracle: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

/// Readiness follows the database only; missing channels or oracle are
/// reported as `disabled`.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let channels = state
        .channels
        .iter()
        .map(|(name, enabled)| {
            let check = if *enabled {
                HealthCheck { status: "ready", detail: "credentials configured".to_string() }
            } else {
                HealthCheck { status: "disabled", detail: "no credentials configured".to_string() }
            };
            (*name, check)
        })
        .collect();
    let oracle = match state.oracle {
        OracleProvider::None => HealthCheck {
            status: "disabled",
            detail: "keyword matching only".to_string(),
        },
        provider => HealthCheck { status: "ready", detail: format!("provider {provider:?}") },
    };

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        channels,
        oracle,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{extract::State, http::StatusCode, Json};
    use kiosk_core::config::AppConfig;
    use kiosk_db::connect_with_settings;

    use crate::health::{health, HealthState};

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 5)
            .await
            .expect("pool should connect");

        let (status, Json(payload)) =
            health(State(HealthState::new(pool.clone(), &AppConfig::default()))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.channels["whatsapp"].status, "disabled");
        assert_eq!(payload.oracle.status, "disabled");

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 5)
            .await
            .expect("pool should connect");
        pool.close().await;

        let (status, Json(payload)) =
            health(State(HealthState::new(pool, &AppConfig::default()))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
    }
}
