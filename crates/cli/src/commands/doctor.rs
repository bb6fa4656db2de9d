use kiosk_core::config::{AppConfig, OracleProvider};
use serde::Serialize;
use serde_json::json;

use crate::commands::{connect, load_config, runtime, CommandResult, EXIT_CONFIG, EXIT_NOT_READY};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }
}

pub fn run() -> CommandResult {
    let (checks, config_failed) = build_checks();
    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let details = json!({ "checks": checks });

    if config_failed {
        return CommandResult::failure_with(
            "doctor",
            "config_validation",
            "configuration did not load",
            details,
            EXIT_CONFIG,
        );
    }
    if failed {
        return CommandResult::failure_with(
            "doctor",
            "not_ready",
            "one or more readiness checks failed",
            details,
            EXIT_NOT_READY,
        );
    }
    CommandResult::success_with("doctor", "all readiness checks passed", details)
}

fn build_checks() -> (Vec<DoctorCheck>, bool) {
    let config = match load_config() {
        Ok(config) => config,
        Err((_, message, _)) => {
            let skipped = "skipped because configuration did not load";
            return (
                vec![
                    DoctorCheck::new("config_validation", CheckStatus::Fail, message),
                    DoctorCheck::new("channel_credentials", CheckStatus::Skipped, skipped),
                    DoctorCheck::new("oracle_readiness", CheckStatus::Skipped, skipped),
                    DoctorCheck::new("database_connectivity", CheckStatus::Skipped, skipped),
                ],
                true,
            );
        }
    };

    let checks = vec![
        DoctorCheck::new(
            "config_validation",
            CheckStatus::Pass,
            "configuration loaded and validated",
        ),
        check_channels(&config),
        check_oracle(&config),
        check_database_connectivity(&config),
    ];
    (checks, false)
}

fn check_channels(config: &AppConfig) -> DoctorCheck {
    let whatsapp = &config.channels.whatsapp;
    let telegram = &config.channels.telegram;
    let mut enabled = Vec::new();
    let mut notes = Vec::new();

    if whatsapp.is_enabled() {
        enabled.push("whatsapp");
        if whatsapp.app_secret.is_none() {
            notes.push("whatsapp webhook signatures are not verified (no app_secret)");
        }
        if whatsapp.verify_token.is_none() {
            notes.push("whatsapp subscription handshake is disabled (no verify_token)");
        }
    }
    if telegram.is_enabled() {
        enabled.push("telegram");
        if telegram.webhook_secret.is_none() {
            notes.push("telegram secret-token header is not checked (no webhook_secret)");
        }
    }
    if config.channels.voice.is_enabled() && !whatsapp.is_enabled() {
        notes.push("voice orders are staged for whatsapp confirmation but whatsapp is not configured");
    }

    if enabled.is_empty() {
        return DoctorCheck::new(
            "channel_credentials",
            CheckStatus::Fail,
            "no channel credentials configured; replies cannot be delivered",
        );
    }

    let summary = format!("enabled: {}", enabled.join(", "));
    if notes.is_empty() {
        DoctorCheck::new("channel_credentials", CheckStatus::Pass, summary)
    } else {
        DoctorCheck::new("channel_credentials", CheckStatus::Warn, format!("{summary}; {}", notes.join("; ")))
    }
}

fn check_oracle(config: &AppConfig) -> DoctorCheck {
    match config.oracle.provider {
        OracleProvider::None => DoctorCheck::new(
            "oracle_readiness",
            CheckStatus::Skipped,
            "no oracle provider; keyword matching only",
        ),
        provider => DoctorCheck::new(
            "oracle_readiness",
            CheckStatus::Pass,
            format!(
                "provider {provider:?} with model `{}` (timeouts {}s text, {}s vision)",
                config.oracle.model, config.oracle.timeout_secs, config.oracle.vision_timeout_secs
            ),
        ),
    }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let result = runtime().and_then(|runtime| {
        runtime.block_on(async {
            let pool = connect(config).await?;
            pool.close().await;
            Ok(())
        })
    });

    match result {
        Ok(()) => DoctorCheck::new(
            "database_connectivity",
            CheckStatus::Pass,
            format!("connected using `{}`", config.database.url),
        ),
        Err((_, message, _)) => DoctorCheck::new(
            "database_connectivity",
            CheckStatus::Fail,
            format!("failed to connect to database: {message}"),
        ),
    }
}
