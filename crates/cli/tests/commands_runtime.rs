use std::env;
use std::sync::{Mutex, OnceLock};

use kiosk_cli::commands::{config, doctor, migrate, seed};
use serde_json::Value;

const MEMORY_DB: (&str, &str) = ("KIOSK_DATABASE_URL", "sqlite::memory:");
const TELEGRAM_TOKEN: (&str, &str) = ("KIOSK_TELEGRAM_BOT_TOKEN", "123456:AAH-very-secret");

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[MEMORY_DB], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("KIOSK_DATABASE_URL", "postgres://localhost/kiosk")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_loads_demo_catalog() {
    with_env(&[MEMORY_DB], || {
        let result = seed::run();
        assert_eq!(result.exit_code, 0, "expected seed success");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["details"]["business_id"], "demo-corner-store");
        let products = payload["details"]["products"].as_array().cloned().unwrap_or_default();
        assert!(products.iter().any(|product| product == "demo-sugar-1kg"));
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("kiosk.db").display());

    with_env(&[("KIOSK_DATABASE_URL", url.as_str())], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");
        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");

        let first_payload = parse_payload(&first.output);
        let second_payload = parse_payload(&second.output);
        assert_eq!(first_payload["message"], second_payload["message"]);
        assert_eq!(first_payload["details"], second_payload["details"]);
    });
}

#[test]
fn config_reports_sources_and_redacts_secrets() {
    with_env(&[MEMORY_DB, TELEGRAM_TOKEN, ("KIOSK_WHATSAPP_APP_SECRET", "wa-app-secret")], || {
        let result = config::run();
        assert_eq!(result.exit_code, 0);
        assert!(!result.output.contains("very-secret"));
        assert!(!result.output.contains("wa-app-secret"));

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "config");
        let entry = |key: &str| {
            payload["details"]["entries"]
                .as_array()
                .and_then(|entries| entries.iter().find(|entry| entry["key"] == key).cloned())
                .unwrap_or(Value::Null)
        };

        assert_eq!(entry("channels.telegram.bot_token")["value"], "123456:***");
        assert_eq!(
            entry("channels.telegram.bot_token")["source"],
            "env (KIOSK_TELEGRAM_BOT_TOKEN)"
        );
        assert_eq!(entry("channels.whatsapp.app_secret")["value"], "<redacted>");
        assert_eq!(entry("oracle.api_key")["value"], "<unset>");
        assert_eq!(entry("server.port")["source"], "default");
    });
}

#[test]
fn doctor_passes_with_channel_and_database() {
    with_env(&[MEMORY_DB, TELEGRAM_TOKEN, ("KIOSK_TELEGRAM_WEBHOOK_SECRET", "tg-secret")], || {
        let result = doctor::run();
        assert_eq!(result.exit_code, 0, "unexpected doctor output: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "doctor");
        assert_eq!(payload["status"], "ok");
        let checks = payload["details"]["checks"].as_array().cloned().unwrap_or_default();
        let status_of = |name: &str| {
            checks
                .iter()
                .find(|check| check["name"] == name)
                .map(|check| check["status"].clone())
                .unwrap_or(Value::Null)
        };
        assert_eq!(status_of("channel_credentials"), "pass");
        assert_eq!(status_of("oracle_readiness"), "skipped");
        assert_eq!(status_of("database_connectivity"), "pass");
    });
}

#[test]
fn doctor_fails_when_no_channel_can_deliver_replies() {
    with_env(&[MEMORY_DB], || {
        let result = doctor::run();
        assert_eq!(result.exit_code, 8);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "not_ready");
    });
}

#[test]
fn doctor_reports_config_failure_with_skipped_checks() {
    with_env(&[("KIOSK_ORACLE_PROVIDER", "openai")], || {
        let result = doctor::run();
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "config_validation");
        assert_eq!(payload["details"]["checks"][3]["status"], "skipped");
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "KIOSK_DATABASE_URL",
        "KIOSK_DATABASE_MAX_CONNECTIONS",
        "KIOSK_DATABASE_TIMEOUT_SECS",
        "KIOSK_WHATSAPP_ACCESS_TOKEN",
        "KIOSK_WHATSAPP_PHONE_NUMBER_ID",
        "KIOSK_WHATSAPP_VERIFY_TOKEN",
        "KIOSK_WHATSAPP_APP_SECRET",
        "KIOSK_WHATSAPP_API_BASE_URL",
        "KIOSK_TELEGRAM_BOT_TOKEN",
        "KIOSK_TELEGRAM_VERIFY_TOKEN",
        "KIOSK_TELEGRAM_WEBHOOK_SECRET",
        "KIOSK_TELEGRAM_API_BASE_URL",
        "KIOSK_VOICE_SECRET",
        "KIOSK_VOICE_DEFAULT_COUNTRY_CODE",
        "KIOSK_ORACLE_PROVIDER",
        "KIOSK_ORACLE_API_KEY",
        "KIOSK_ORACLE_BASE_URL",
        "KIOSK_ORACLE_MODEL",
        "KIOSK_ORACLE_VISION_MODEL",
        "KIOSK_ORACLE_TIMEOUT_SECS",
        "KIOSK_ORACLE_VISION_TIMEOUT_SECS",
        "KIOSK_TENANCY_SINGLE_TENANT_FALLBACK",
        "KIOSK_SERVER_BIND_ADDRESS",
        "KIOSK_SERVER_PORT",
        "KIOSK_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "KIOSK_LOGGING_LEVEL",
        "KIOSK_LOGGING_FORMAT",
        "KIOSK_LOG_LEVEL",
        "KIOSK_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
