use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub channels: ChannelsConfig,
    pub oracle: OracleConfig,
    pub tenancy: TenancyConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ChannelsConfig {
    pub whatsapp: WhatsAppConfig,
    pub telegram: TelegramConfig,
    pub voice: VoiceConfig,
}

#[derive(Clone, Debug)]
pub struct WhatsAppConfig {
    pub access_token: Option<SecretString>,
    /// Sender used when an inbound envelope did not name the receiving number.
    pub phone_number_id: Option<String>,
    pub verify_token: Option<SecretString>,
    pub app_secret: Option<SecretString>,
    pub api_base_url: String,
}

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub bot_token: Option<SecretString>,
    pub verify_token: Option<SecretString>,
    pub webhook_secret: Option<SecretString>,
    pub api_base_url: String,
}

/// Voice-assistant tool-call webhook. Disabled until a secret is set.
#[derive(Clone, Debug, Default)]
pub struct VoiceConfig {
    /// Expected `X-Vapi-Secret` header value.
    pub secret: Option<SecretString>,
    /// Replaces a leading `0` in caller numbers, e.g. `94`.
    pub default_country_code: Option<String>,
}

#[derive(Clone, Debug)]
pub struct OracleConfig {
    pub provider: OracleProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub vision_model: Option<String>,
    pub timeout_secs: u64,
    pub vision_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TenancyConfig {
    /// Route unidentified senders to the only business when exactly one exists.
    pub single_tenant_fallback: bool,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleProvider {
    None,
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "openrouter")]
    OpenRouter,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub oracle_provider: Option<OracleProvider>,
    pub oracle_model: Option<String>,
    pub whatsapp_access_token: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://kiosk.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            channels: ChannelsConfig {
                whatsapp: WhatsAppConfig {
                    access_token: None,
                    phone_number_id: None,
                    verify_token: None,
                    app_secret: None,
                    api_base_url: "https://graph.facebook.com/v17.0".to_string(),
                },
                telegram: TelegramConfig {
                    bot_token: None,
                    verify_token: None,
                    webhook_secret: None,
                    api_base_url: "https://api.telegram.org".to_string(),
                },
                voice: VoiceConfig::default(),
            },
            oracle: OracleConfig {
                provider: OracleProvider::None,
                api_key: None,
                base_url: None,
                model: "openai/gpt-4o-mini".to_string(),
                vision_model: None,
                timeout_secs: 30,
                vision_timeout_secs: 45,
            },
            tenancy: TenancyConfig { single_tenant_fallback: true },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl WhatsAppConfig {
    pub fn is_enabled(&self) -> bool {
        self.access_token.is_some()
    }
}

impl TelegramConfig {
    pub fn is_enabled(&self) -> bool {
        self.bot_token.is_some()
    }
}

impl VoiceConfig {
    pub fn is_enabled(&self) -> bool {
        self.secret.as_ref().is_some_and(|secret| !secret.expose_secret().trim().is_empty())
    }
}

impl OracleConfig {
    /// Chat-completions base URL, falling back to the provider's public endpoint.
    pub fn endpoint(&self) -> Option<String> {
        if let Some(base_url) = self.base_url.as_deref().filter(|url| !url.trim().is_empty()) {
            return Some(base_url.trim_end_matches('/').to_string());
        }

        match self.provider {
            OracleProvider::None => None,
            OracleProvider::OpenAi => Some("https://api.openai.com/v1".to_string()),
            OracleProvider::OpenRouter => Some("https://openrouter.ai/api/v1".to_string()),
            OracleProvider::Ollama => Some("http://localhost:11434/v1".to_string()),
        }
    }

    pub fn vision_model(&self) -> &str {
        self.vision_model.as_deref().unwrap_or(&self.model)
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for OracleProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "disabled" => Ok(Self::None),
            "openai" => Ok(Self::OpenAi),
            "openrouter" => Ok(Self::OpenRouter),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported oracle provider `{other}` (expected none|openai|openrouter|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("kiosk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(channels) = patch.channels {
            if let Some(whatsapp) = channels.whatsapp {
                let target = &mut self.channels.whatsapp;
                if let Some(value) = whatsapp.access_token {
                    target.access_token = Some(secret_value(value));
                }
                if let Some(value) = whatsapp.phone_number_id {
                    target.phone_number_id = Some(value);
                }
                if let Some(value) = whatsapp.verify_token {
                    target.verify_token = Some(secret_value(value));
                }
                if let Some(value) = whatsapp.app_secret {
                    target.app_secret = Some(secret_value(value));
                }
                if let Some(value) = whatsapp.api_base_url {
                    target.api_base_url = value;
                }
            }
            if let Some(telegram) = channels.telegram {
                let target = &mut self.channels.telegram;
                if let Some(value) = telegram.bot_token {
                    target.bot_token = Some(secret_value(value));
                }
                if let Some(value) = telegram.verify_token {
                    target.verify_token = Some(secret_value(value));
                }
                if let Some(value) = telegram.webhook_secret {
                    target.webhook_secret = Some(secret_value(value));
                }
                if let Some(value) = telegram.api_base_url {
                    target.api_base_url = value;
                }
            }
            if let Some(voice) = channels.voice {
                let target = &mut self.channels.voice;
                if let Some(value) = voice.secret {
                    target.secret = Some(secret_value(value));
                }
                if let Some(value) = voice.default_country_code {
                    target.default_country_code = Some(value);
                }
            }
        }

        if let Some(oracle) = patch.oracle {
            if let Some(provider) = oracle.provider {
                self.oracle.provider = provider;
            }
            if let Some(api_key) = oracle.api_key {
                self.oracle.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = oracle.base_url {
                self.oracle.base_url = Some(base_url);
            }
            if let Some(model) = oracle.model {
                self.oracle.model = model;
            }
            if let Some(vision_model) = oracle.vision_model {
                self.oracle.vision_model = Some(vision_model);
            }
            if let Some(timeout_secs) = oracle.timeout_secs {
                self.oracle.timeout_secs = timeout_secs;
            }
            if let Some(vision_timeout_secs) = oracle.vision_timeout_secs {
                self.oracle.vision_timeout_secs = vision_timeout_secs;
            }
        }

        if let Some(tenancy) = patch.tenancy {
            if let Some(single_tenant_fallback) = tenancy.single_tenant_fallback {
                self.tenancy.single_tenant_fallback = single_tenant_fallback;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("KIOSK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("KIOSK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("KIOSK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("KIOSK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("KIOSK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        let whatsapp = &mut self.channels.whatsapp;
        if let Some(value) = read_env("KIOSK_WHATSAPP_ACCESS_TOKEN") {
            whatsapp.access_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("KIOSK_WHATSAPP_PHONE_NUMBER_ID") {
            whatsapp.phone_number_id = Some(value);
        }
        if let Some(value) = read_env("KIOSK_WHATSAPP_VERIFY_TOKEN") {
            whatsapp.verify_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("KIOSK_WHATSAPP_APP_SECRET") {
            whatsapp.app_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("KIOSK_WHATSAPP_API_BASE_URL") {
            whatsapp.api_base_url = value;
        }

        let telegram = &mut self.channels.telegram;
        if let Some(value) = read_env("KIOSK_TELEGRAM_BOT_TOKEN") {
            telegram.bot_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("KIOSK_TELEGRAM_VERIFY_TOKEN") {
            telegram.verify_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("KIOSK_TELEGRAM_WEBHOOK_SECRET") {
            telegram.webhook_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("KIOSK_TELEGRAM_API_BASE_URL") {
            telegram.api_base_url = value;
        }

        let voice = &mut self.channels.voice;
        if let Some(value) = read_env("KIOSK_VOICE_SECRET") {
            voice.secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("KIOSK_VOICE_DEFAULT_COUNTRY_CODE") {
            voice.default_country_code = Some(value);
        }

        if let Some(value) = read_env("KIOSK_ORACLE_PROVIDER") {
            self.oracle.provider = value.parse()?;
        }
        if let Some(value) = read_env("KIOSK_ORACLE_API_KEY") {
            self.oracle.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("KIOSK_ORACLE_BASE_URL") {
            self.oracle.base_url = Some(value);
        }
        if let Some(value) = read_env("KIOSK_ORACLE_MODEL") {
            self.oracle.model = value;
        }
        if let Some(value) = read_env("KIOSK_ORACLE_VISION_MODEL") {
            self.oracle.vision_model = Some(value);
        }
        if let Some(value) = read_env("KIOSK_ORACLE_TIMEOUT_SECS") {
            self.oracle.timeout_secs = parse_u64("KIOSK_ORACLE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("KIOSK_ORACLE_VISION_TIMEOUT_SECS") {
            self.oracle.vision_timeout_secs =
                parse_u64("KIOSK_ORACLE_VISION_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("KIOSK_TENANCY_SINGLE_TENANT_FALLBACK") {
            self.tenancy.single_tenant_fallback =
                parse_bool("KIOSK_TENANCY_SINGLE_TENANT_FALLBACK", &value)?;
        }

        if let Some(value) = read_env("KIOSK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("KIOSK_SERVER_PORT") {
            self.server.port = parse_u16("KIOSK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("KIOSK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("KIOSK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("KIOSK_LOGGING_LEVEL").or_else(|| read_env("KIOSK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("KIOSK_LOGGING_FORMAT").or_else(|| read_env("KIOSK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(oracle_provider) = overrides.oracle_provider {
            self.oracle.provider = oracle_provider;
        }
        if let Some(oracle_model) = overrides.oracle_model {
            self.oracle.model = oracle_model;
        }
        if let Some(token) = overrides.whatsapp_access_token {
            self.channels.whatsapp.access_token = Some(secret_value(token));
        }
        if let Some(token) = overrides.telegram_bot_token {
            self.channels.telegram.bot_token = Some(secret_value(token));
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_channels(&self.channels)?;
        validate_oracle(&self.oracle)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("kiosk.toml"), PathBuf::from("config/kiosk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_channels(channels: &ChannelsConfig) -> Result<(), ConfigError> {
    validate_http_url("channels.whatsapp.api_base_url", &channels.whatsapp.api_base_url)?;
    validate_http_url("channels.telegram.api_base_url", &channels.telegram.api_base_url)?;

    if let Some(token) = &channels.telegram.bot_token {
        let token = token.expose_secret();
        if !token.contains(':') {
            return Err(ConfigError::Validation(
                "channels.telegram.bot_token must look like `<bot id>:<secret>` as issued by @BotFather"
                    .to_string(),
            ));
        }
    }

    if let Some(secret) = &channels.telegram.webhook_secret {
        let valid = secret
            .expose_secret()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(ConfigError::Validation(
                "channels.telegram.webhook_secret may only contain A-Z, a-z, 0-9, `_` and `-`"
                    .to_string(),
            ));
        }
    }

    if let Some(code) = &channels.voice.default_country_code {
        if code.is_empty() || code.len() > 3 || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::Validation(
                "channels.voice.default_country_code must be 1-3 digits without `+`".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_oracle(oracle: &OracleConfig) -> Result<(), ConfigError> {
    if oracle.timeout_secs == 0 || oracle.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "oracle.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if oracle.vision_timeout_secs == 0 || oracle.vision_timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "oracle.vision_timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    if let Some(base_url) = &oracle.base_url {
        validate_http_url("oracle.base_url", base_url)?;
    }

    match oracle.provider {
        OracleProvider::OpenAi | OracleProvider::OpenRouter => {
            let missing = oracle
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "oracle.api_key is required for openai/openrouter providers".to_string(),
                ));
            }
        }
        OracleProvider::Ollama | OracleProvider::None => {}
    }

    if oracle.provider != OracleProvider::None && oracle.model.trim().is_empty() {
        return Err(ConfigError::Validation("oracle.model must not be empty".to_string()));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        return Ok(());
    }
    Err(ConfigError::Validation(format!("{key} must start with http:// or https://")))
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().to_ascii_lowercase().parse::<bool>().map_err(|_| {
        ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    channels: Option<ChannelsPatch>,
    oracle: Option<OraclePatch>,
    tenancy: Option<TenancyPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelsPatch {
    whatsapp: Option<WhatsAppPatch>,
    telegram: Option<TelegramPatch>,
    voice: Option<VoicePatch>,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsAppPatch {
    access_token: Option<String>,
    phone_number_id: Option<String>,
    verify_token: Option<String>,
    app_secret: Option<String>,
    api_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TelegramPatch {
    bot_token: Option<String>,
    verify_token: Option<String>,
    webhook_secret: Option<String>,
    api_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VoicePatch {
    secret: Option<String>,
    default_country_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OraclePatch {
    provider: Option<OracleProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    vision_model: Option<String>,
    timeout_secs: Option<u64>,
    vision_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TenancyPatch {
    single_tenant_fallback: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, OracleProvider};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid_without_any_channel_configured() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(!config.channels.whatsapp.is_enabled(), "whatsapp should be disabled by default")?;
        ensure(!config.channels.telegram.is_enabled(), "telegram should be disabled by default")?;
        ensure(config.oracle.provider == OracleProvider::None, "oracle should default to none")?;
        ensure(config.oracle.endpoint().is_none(), "disabled oracle has no endpoint")?;
        ensure(config.tenancy.single_tenant_fallback, "single tenant fallback defaults on")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_WHATSAPP_TOKEN", "EAAG-from-env");
        env::set_var("TEST_TELEGRAM_TOKEN", "123456:from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("kiosk.toml");
            fs::write(
                &path,
                r#"
[channels.whatsapp]
access_token = "${TEST_WHATSAPP_TOKEN}"
phone_number_id = "1098765"

[channels.telegram]
bot_token = "${TEST_TELEGRAM_TOKEN}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let whatsapp = config.channels.whatsapp.access_token.as_ref().map(|token| token.expose_secret().to_string());
            ensure(
                whatsapp.as_deref() == Some("EAAG-from-env"),
                "whatsapp token should be loaded from environment",
            )?;
            let telegram = config.channels.telegram.bot_token.as_ref().map(|token| token.expose_secret().to_string());
            ensure(
                telegram.as_deref() == Some("123456:from-env"),
                "telegram token should be loaded from environment",
            )?;
            ensure(
                config.channels.whatsapp.phone_number_id.as_deref() == Some("1098765"),
                "phone number id should come from the file",
            )
        })();

        clear_vars(&["TEST_WHATSAPP_TOKEN", "TEST_TELEGRAM_TOKEN"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("kiosk.toml");
        fs::write(&path, "[oracle]\napi_key = \"${KIOSK_TEST_UNSET_KEY}\"\n")
            .map_err(|err| err.to_string())?;

        match AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() }) {
            Err(ConfigError::MissingEnvInterpolation { var }) => {
                ensure(var == "KIOSK_TEST_UNSET_KEY", "error should name the variable")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected interpolation failure".to_string()),
        }
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("KIOSK_LOG_LEVEL", "warn");
        env::set_var("KIOSK_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )
        })();

        clear_vars(&["KIOSK_LOG_LEVEL", "KIOSK_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("KIOSK_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("KIOSK_ORACLE_MODEL", "model-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("kiosk.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[oracle]
provider = "ollama"
model = "model-from-file"
vision_timeout_secs = 60

[server]
port = 9090

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.oracle.model == "model-from-env", "env model should win over file")?;
            ensure(config.oracle.provider == OracleProvider::Ollama, "provider comes from file")?;
            ensure(config.oracle.vision_timeout_secs == 60, "vision timeout comes from file")?;
            ensure(
                config.oracle.endpoint().as_deref() == Some("http://localhost:11434/v1"),
                "ollama endpoint defaults to localhost",
            )?;
            ensure(config.server.port == 9090, "port comes from file")
        })();

        clear_vars(&["KIOSK_DATABASE_URL", "KIOSK_ORACLE_MODEL"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("KIOSK_ORACLE_PROVIDER", "openrouter");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("oracle.api_key")
            );
            ensure(has_message, "validation failure should mention oracle.api_key")
        })();

        clear_vars(&["KIOSK_ORACLE_PROVIDER"]);
        result
    }

    #[test]
    fn malformed_numeric_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("KIOSK_SERVER_PORT", "eighty");
        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                ensure(key == "KIOSK_SERVER_PORT", "error should name the override key")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected override failure".to_string()),
        };

        clear_vars(&["KIOSK_SERVER_PORT"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("KIOSK_WHATSAPP_APP_SECRET", "wa-secret-value");
        env::set_var("KIOSK_TELEGRAM_BOT_TOKEN", "42:tg-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("wa-secret-value"), "debug output should not contain app secret")?;
            ensure(!debug.contains("tg-secret-value"), "debug output should not contain bot token")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )
        })();

        clear_vars(&["KIOSK_WHATSAPP_APP_SECRET", "KIOSK_TELEGRAM_BOT_TOKEN"]);
        result
    }

    #[test]
    fn voice_section_loads_from_env_and_rejects_bad_country_code() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("KIOSK_VOICE_SECRET", "vapi-secret");
        env::set_var("KIOSK_VOICE_DEFAULT_COUNTRY_CODE", "94");
        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(config.channels.voice.is_enabled(), "voice should be enabled by its secret")?;
            ensure(
                config.channels.voice.default_country_code.as_deref() == Some("94"),
                "country code should come from env",
            )?;

            env::set_var("KIOSK_VOICE_DEFAULT_COUNTRY_CODE", "+94");
            match AppConfig::load(LoadOptions::default()) {
                Err(ConfigError::Validation(message)) => ensure(
                    message.contains("channels.voice.default_country_code"),
                    "validation should name the country code key",
                ),
                Err(other) => Err(format!("unexpected error: {other}")),
                Ok(_) => Err("expected country code validation failure".to_string()),
            }
        })();

        clear_vars(&["KIOSK_VOICE_SECRET", "KIOSK_VOICE_DEFAULT_COUNTRY_CODE"]);
        result
    }
}
