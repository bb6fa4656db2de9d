use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use kiosk_core::config::AppConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::json;
use toml::Value;

use crate::commands::{load_config, CommandResult};

#[derive(Debug, Serialize)]
struct ConfigEntry {
    key: &'static str,
    value: String,
    source: String,
}

pub fn run() -> CommandResult {
    let config = match load_config() {
        Ok(config) => config,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("config", error_class, message, exit_code)
        }
    };

    let file_path = detect_config_path();
    let file_doc = load_config_file_doc(file_path.as_deref());
    let entries = entries(&config)
        .into_iter()
        .map(|(key, value, env_key)| ConfigEntry {
            key,
            value,
            source: field_source(key, env_key, file_doc.as_ref(), file_path.as_deref()),
        })
        .collect::<Vec<_>>();

    CommandResult::success_with(
        "config",
        "effective config (source precedence: env > file > default)",
        json!({ "entries": entries }),
    )
}

fn entries(config: &AppConfig) -> Vec<(&'static str, String, &'static str)> {
    let whatsapp = &config.channels.whatsapp;
    let telegram = &config.channels.telegram;
    let voice = &config.channels.voice;
    let oracle = &config.oracle;

    vec![
        ("database.url", config.database.url.clone(), "KIOSK_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "KIOSK_DATABASE_MAX_CONNECTIONS",
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            "KIOSK_DATABASE_TIMEOUT_SECS",
        ),
        (
            "channels.whatsapp.access_token",
            redact_secret(whatsapp.access_token.as_ref()),
            "KIOSK_WHATSAPP_ACCESS_TOKEN",
        ),
        (
            "channels.whatsapp.phone_number_id",
            whatsapp.phone_number_id.clone().unwrap_or_else(unset),
            "KIOSK_WHATSAPP_PHONE_NUMBER_ID",
        ),
        (
            "channels.whatsapp.verify_token",
            redact_secret(whatsapp.verify_token.as_ref()),
            "KIOSK_WHATSAPP_VERIFY_TOKEN",
        ),
        (
            "channels.whatsapp.app_secret",
            redact_secret(whatsapp.app_secret.as_ref()),
            "KIOSK_WHATSAPP_APP_SECRET",
        ),
        ("channels.whatsapp.api_base_url", whatsapp.api_base_url.clone(), "KIOSK_WHATSAPP_API_BASE_URL"),
        (
            "channels.telegram.bot_token",
            redact_bot_token(telegram.bot_token.as_ref()),
            "KIOSK_TELEGRAM_BOT_TOKEN",
        ),
        (
            "channels.telegram.verify_token",
            redact_secret(telegram.verify_token.as_ref()),
            "KIOSK_TELEGRAM_VERIFY_TOKEN",
        ),
        (
            "channels.telegram.webhook_secret",
            redact_secret(telegram.webhook_secret.as_ref()),
            "KIOSK_TELEGRAM_WEBHOOK_SECRET",
        ),
        ("channels.telegram.api_base_url", telegram.api_base_url.clone(), "KIOSK_TELEGRAM_API_BASE_URL"),
        ("channels.voice.secret", redact_secret(voice.secret.as_ref()), "KIOSK_VOICE_SECRET"),
        (
            "channels.voice.default_country_code",
            voice.default_country_code.clone().unwrap_or_else(unset),
            "KIOSK_VOICE_DEFAULT_COUNTRY_CODE",
        ),
        ("oracle.provider", format!("{:?}", oracle.provider), "KIOSK_ORACLE_PROVIDER"),
        ("oracle.api_key", redact_secret(oracle.api_key.as_ref()), "KIOSK_ORACLE_API_KEY"),
        ("oracle.base_url", oracle.base_url.clone().unwrap_or_else(unset), "KIOSK_ORACLE_BASE_URL"),
        ("oracle.model", oracle.model.clone(), "KIOSK_ORACLE_MODEL"),
        (
            "oracle.vision_model",
            oracle.vision_model.clone().unwrap_or_else(unset),
            "KIOSK_ORACLE_VISION_MODEL",
        ),
        ("oracle.timeout_secs", oracle.timeout_secs.to_string(), "KIOSK_ORACLE_TIMEOUT_SECS"),
        (
            "oracle.vision_timeout_secs",
            oracle.vision_timeout_secs.to_string(),
            "KIOSK_ORACLE_VISION_TIMEOUT_SECS",
        ),
        (
            "tenancy.single_tenant_fallback",
            config.tenancy.single_tenant_fallback.to_string(),
            "KIOSK_TENANCY_SINGLE_TENANT_FALLBACK",
        ),
        ("server.bind_address", config.server.bind_address.clone(), "KIOSK_SERVER_BIND_ADDRESS"),
        ("server.port", config.server.port.to_string(), "KIOSK_SERVER_PORT"),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            "KIOSK_SERVER_GRACEFUL_SHUTDOWN_SECS",
        ),
        ("logging.level", config.logging.level.clone(), "KIOSK_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "KIOSK_LOGGING_FORMAT"),
    ]
}

fn unset() -> String {
    "<unset>".to_string()
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    match secret.map(|secret| secret.expose_secret().trim()) {
        Some("") => "<empty>".to_string(),
        Some(_) => "<redacted>".to_string(),
        None => unset(),
    }
}

/// Bot tokens are `<bot id>:<secret>`; the bot id is public.
fn redact_bot_token(token: Option<&SecretString>) -> String {
    let Some(token) = token.map(|token| token.expose_secret().trim()) else {
        return unset();
    };
    match token.split_once(':') {
        Some((bot_id, _)) if !bot_id.is_empty() => format!("{bot_id}:***"),
        _ if token.is_empty() => "<empty>".to_string(),
        _ => "<redacted>".to_string(),
    }
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("kiosk.toml"), PathBuf::from("config/kiosk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}
