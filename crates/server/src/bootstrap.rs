use std::sync::Arc;

use kiosk_agent::{oracle_from_config, ConversationEngine, OracleError, VoiceDesk};
use kiosk_channels::registry_from_config;
use kiosk_core::channel::ChannelError;
use kiosk_core::config::{AppConfig, ConfigError, LoadOptions};
use kiosk_db::{connect_with_settings, migrations, DbPool, Repositories};
use thiserror::Error;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Arc<ConversationEngine>,
    pub voice: Arc<VoiceDesk>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("channel setup failed: {0}")]
    Channels(#[source] ChannelError),
    #[error("oracle setup failed: {0}")]
    Oracle(#[source] OracleError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let channels = registry_from_config(&config.channels).map_err(BootstrapError::Channels)?;
    if !config.channels.whatsapp.is_enabled() && !config.channels.telegram.is_enabled() {
        warn!(
            event_name = "system.bootstrap.no_channels",
            correlation_id = "bootstrap",
            "no channel credentials configured; replies cannot be delivered"
        );
    }
    let oracle = oracle_from_config(&config.oracle).map_err(BootstrapError::Oracle)?;
    info!(
        event_name = "system.bootstrap.oracle_ready",
        correlation_id = "bootstrap",
        provider = ?config.oracle.provider,
        "oracle configured"
    );

    let repos = Repositories::sql(db_pool.clone());
    let engine = Arc::new(ConversationEngine::new(
        repos.clone(),
        channels,
        oracle,
        config.tenancy.single_tenant_fallback,
    ));
    let voice = Arc::new(VoiceDesk::new(
        repos,
        engine.clone(),
        config.tenancy.single_tenant_fallback,
        config.channels.voice.default_country_code.clone(),
    ));

    Ok(Application { config, db_pool, engine, voice })
}
