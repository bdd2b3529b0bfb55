//! Configuration loading for the pipes sync service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `PIPES_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application configuration derived from `PIPES_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
    /// Public host used to build `sync_log` URLs in pipe statuses.
    #[serde(default = "default_pipes_api_host")]
    pub pipes_api_host: String,
    /// Path to the integration catalog JSON file.
    #[serde(default = "default_integrations_path")]
    pub integrations_path: PathBuf,
    /// Number of workspace-token lookups kept in the auth cache.
    #[serde(default = "default_workspace_cache_size")]
    pub workspace_cache_size: usize,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub autosync: AutosyncConfig,
    /// OAuth2 client settings keyed by vendor id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub oauth2: BTreeMap<String, OAuth2ClientConfig>,
    /// OAuth1 consumer settings keyed by vendor id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub oauth1: BTreeMap<String, OAuth1ClientConfig>,
}

/// Central platform API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PlatformConfig {
    /// Base URL, e.g. `https://platform.example.com`
    ///
    /// Environment variable: `PIPES_PLATFORM_API_URL`
    #[serde(default = "default_platform_api_url")]
    pub api_url: String,
    /// Per-request timeout for platform calls
    ///
    /// Environment variable: `PIPES_PLATFORM_TIMEOUT_SECONDS`
    #[serde(default = "default_platform_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Run worker and queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct WorkerConfig {
    /// Maximum number of runs executing at once across all workspaces
    #[serde(default = "default_worker_concurrency")]
    pub concurrency: usize,
    /// Capacity of the immediate-run channel
    #[serde(default = "default_worker_channel_capacity")]
    pub channel_capacity: usize,
    /// Queue poll interval in milliseconds
    #[serde(default = "default_queue_tick_ms")]
    pub queue_tick_ms: u64,
    /// Maximum queue rows claimed per tick
    #[serde(default = "default_queue_claim_batch")]
    pub queue_claim_batch: u64,
}

/// Periodic enqueueing of automatic pipes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AutosyncConfig {
    #[serde(default = "default_autosync_enabled")]
    pub enabled: bool,
    #[serde(default = "default_autosync_interval_seconds")]
    pub interval_seconds: u64,
}

/// OAuth2 client registration for one vendor.
///
/// Environment variables: `PIPES_OAUTH2_<VENDOR>_{CLIENT_ID,CLIENT_SECRET,AUTH_URL,TOKEN_URL,REDIRECT_URL}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct OAuth2ClientConfig {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub auth_url: String,
    pub token_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

/// OAuth1 consumer registration for one vendor.
///
/// URLs may contain an `{account}` placeholder which is replaced with the
/// account name supplied by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct OAuth1ClientConfig {
    pub consumer_key: String,
    #[serde(default)]
    pub consumer_secret: String,
    pub request_token_url: String,
    pub authorize_url: String,
    pub access_token_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            crypto_key: None,
            pipes_api_host: default_pipes_api_host(),
            integrations_path: default_integrations_path(),
            workspace_cache_size: default_workspace_cache_size(),
            platform: PlatformConfig::default(),
            worker: WorkerConfig::default(),
            autosync: AutosyncConfig::default(),
            oauth2: BTreeMap::new(),
            oauth1: BTreeMap::new(),
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_url: default_platform_api_url(),
            timeout_seconds: default_platform_timeout_seconds(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_worker_concurrency(),
            channel_capacity: default_worker_channel_capacity(),
            queue_tick_ms: default_queue_tick_ms(),
            queue_claim_batch: default_queue_claim_batch(),
        }
    }
}

impl Default for AutosyncConfig {
    fn default() -> Self {
        Self {
            enabled: default_autosync_enabled(),
            interval_seconds: default_autosync_interval_seconds(),
        }
    }
}

impl WorkerConfig {
    /// Validate worker bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 || self.concurrency > 64 {
            return Err(ConfigError::InvalidWorkerConcurrency {
                value: self.concurrency,
            });
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidWorkerChannelCapacity);
        }
        if self.queue_tick_ms < 50 {
            return Err(ConfigError::InvalidQueueTick {
                value: self.queue_tick_ms,
            });
        }
        Ok(())
    }
}

impl AutosyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.interval_seconds < 60 {
            return Err(ConfigError::InvalidAutosyncInterval {
                value: self.interval_seconds,
            });
        }
        Ok(())
    }
}

impl OAuth2ClientConfig {
    fn validate(&self, vendor: &str) -> Result<(), ConfigError> {
        if self.client_id.is_empty() {
            return Err(ConfigError::IncompleteOAuthClient {
                vendor: vendor.to_string(),
                field: "CLIENT_ID",
            });
        }
        for (field, value) in [("AUTH_URL", &self.auth_url), ("TOKEN_URL", &self.token_url)] {
            url::Url::parse(value).map_err(|_| ConfigError::IncompleteOAuthClient {
                vendor: vendor.to_string(),
                field,
            })?;
        }
        Ok(())
    }
}

impl OAuth1ClientConfig {
    fn validate(&self, vendor: &str) -> Result<(), ConfigError> {
        if self.consumer_key.is_empty() {
            return Err(ConfigError::IncompleteOAuthClient {
                vendor: vendor.to_string(),
                field: "CONSUMER_KEY",
            });
        }
        for (field, value) in [
            ("REQUEST_TOKEN_URL", &self.request_token_url),
            ("AUTHORIZE_URL", &self.authorize_url),
            ("ACCESS_TOKEN_URL", &self.access_token_url),
        ] {
            if value.is_empty() {
                return Err(ConfigError::IncompleteOAuthClient {
                    vendor: vendor.to_string(),
                    field,
                });
            }
        }
        Ok(())
    }
}

impl AppConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Pretty JSON for the startup log, with key material and client secrets masked.
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.crypto_key.is_some() {
            config.crypto_key = Some(b"[REDACTED]".to_vec());
        }
        for client in config.oauth2.values_mut() {
            if client.client_secret.is_some() {
                client.client_secret = Some("[REDACTED]".to_string());
            }
        }
        for consumer in config.oauth1.values_mut() {
            if !consumer.consumer_secret.is_empty() {
                consumer.consumer_secret = "[REDACTED]".to_string();
            }
        }
        serde_json::to_string_pretty(&config)
    }

    /// Checks required settings and the bounds of each section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.crypto_key {
            Some(ref key) if key.len() != 32 => {
                return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
            }
            Some(_) => {}
            None => return Err(ConfigError::MissingCryptoKey),
        }

        url::Url::parse(&self.platform.api_url).map_err(|_| ConfigError::InvalidPlatformUrl {
            value: self.platform.api_url.clone(),
        })?;

        if self.workspace_cache_size == 0 {
            return Err(ConfigError::InvalidWorkspaceCacheSize);
        }

        self.worker.validate()?;
        self.autosync.validate()?;

        for (vendor, client) in &self.oauth2 {
            client.validate(vendor)?;
        }
        for (vendor, consumer) in &self.oauth1 {
            consumer.validate(vendor)?;
        }

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8100".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/pipes".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_pipes_api_host() -> String {
    "http://localhost:8100".to_string()
}

fn default_integrations_path() -> PathBuf {
    PathBuf::from("config/integrations.json")
}

fn default_workspace_cache_size() -> usize {
    1024
}

fn default_platform_api_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_platform_timeout_seconds() -> u64 {
    30
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_worker_channel_capacity() -> usize {
    64
}

fn default_queue_tick_ms() -> u64 {
    1000
}

fn default_queue_claim_batch() -> u64 {
    8
}

fn default_autosync_enabled() -> bool {
    true
}

fn default_autosync_interval_seconds() -> u64 {
    3600
}

/// Loads configuration using layered `.env` files and `PIPES_*` env vars.
///
/// Later layers win: `.env`, `.env.local`, `.env.<profile>`,
/// `.env.<profile>.local`, then the process environment.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

/// Layered `PIPES_*` values with the prefix stripped.
#[derive(Debug, Default)]
struct Settings(BTreeMap<String, String>);

impl Settings {
    fn take(&mut self, key: &str) -> Option<String> {
        self.0.remove(key).filter(|value| !value.is_empty())
    }

    fn text(&mut self, key: &str, default: fn() -> String) -> String {
        self.take(key).unwrap_or_else(default)
    }

    /// Unparseable values fall back to the default.
    fn parsed<T: FromStr>(&mut self, key: &str, default: fn() -> T) -> T {
        match self.take(key).map(|raw| raw.trim().parse::<T>()) {
            Some(Ok(value)) => value,
            Some(Err(_)) => {
                log::warn!("ignoring unparseable PIPES_{key}");
                default()
            }
            None => default(),
        }
    }

    fn absorb(&mut self, key: &str, value: String) {
        if let Some(name) = key.strip_prefix(ENV_PREFIX) {
            self.0.insert(name.to_string(), value);
        }
    }
}

const ENV_PREFIX: &str = "PIPES_";

impl ConfigLoader {
    pub fn new() -> Self {
        let base_dir = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self { base_dir }
    }

    /// Loader that reads its `.env` files from `base_dir`.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut settings, profile_hint) = self.read_env_files()?;
        for (key, value) in env::vars() {
            settings.absorb(&key, value);
        }

        let crypto_key = settings
            .take("CRYPTO_KEY")
            .map(|encoded| decode_crypto_key(&encoded))
            .transpose()?;
        let pipes_api_host = match settings.take("PIPES_API_HOST") {
            Some(host) => host,
            None => settings.text("API_HOST", default_pipes_api_host),
        };

        let platform = PlatformConfig {
            api_url: settings.text("PLATFORM_API_URL", default_platform_api_url),
            timeout_seconds: settings
                .parsed("PLATFORM_TIMEOUT_SECONDS", default_platform_timeout_seconds),
        };
        let worker = WorkerConfig {
            concurrency: settings.parsed("WORKER_CONCURRENCY", default_worker_concurrency),
            channel_capacity: settings
                .parsed("WORKER_CHANNEL_CAPACITY", default_worker_channel_capacity),
            queue_tick_ms: settings.parsed("QUEUE_TICK_MS", default_queue_tick_ms),
            queue_claim_batch: settings.parsed("QUEUE_CLAIM_BATCH", default_queue_claim_batch),
        };
        let autosync = AutosyncConfig {
            enabled: settings.parsed("AUTOSYNC_ENABLED", default_autosync_enabled),
            interval_seconds: settings
                .parsed("AUTOSYNC_INTERVAL_SECONDS", default_autosync_interval_seconds),
        };

        let config = AppConfig {
            profile: settings.take("PROFILE").unwrap_or(profile_hint),
            api_bind_addr: settings.text("API_BIND_ADDR", default_api_bind_addr),
            log_level: settings.text("LOG_LEVEL", default_log_level),
            log_format: settings.text("LOG_FORMAT", default_log_format),
            database_url: settings.text("DATABASE_URL", default_database_url),
            db_max_connections: settings.parsed("DB_MAX_CONNECTIONS", default_db_max_connections),
            db_acquire_timeout_ms: settings
                .parsed("DB_ACQUIRE_TIMEOUT_MS", default_db_acquire_timeout_ms),
            crypto_key,
            pipes_api_host,
            integrations_path: settings
                .take("INTEGRATIONS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(default_integrations_path),
            workspace_cache_size: settings
                .parsed("WORKSPACE_CACHE_SIZE", default_workspace_cache_size),
            platform,
            worker,
            autosync,
            oauth2: oauth2_clients(&settings),
            oauth1: oauth1_clients(&settings),
        };

        config.validate()?;
        config
            .bind_addr()
            .map_err(|source| ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            })?;
        Ok(config)
    }

    fn read_env_files(&self) -> Result<(Settings, String), ConfigError> {
        let mut settings = Settings::default();
        self.merge_env_file(".env", &mut settings)?;
        self.merge_env_file(".env.local", &mut settings)?;

        let profile = env::var("PIPES_PROFILE")
            .ok()
            .filter(|p| !p.is_empty())
            .or_else(|| settings.0.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_env_file(&format!(".env.{profile}"), &mut settings)?;
        self.merge_env_file(&format!(".env.{profile}.local"), &mut settings)?;
        Ok((settings, profile))
    }

    /// Missing files are skipped; malformed ones are an error.
    fn merge_env_file(&self, name: &str, settings: &mut Settings) -> Result<(), ConfigError> {
        let path = self.base_dir.join(name);
        let entries = match dotenvy::from_path_iter(&path) {
            Ok(entries) => entries,
            Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(());
            }
            Err(source) => return Err(ConfigError::EnvFile { path, source }),
        };
        for entry in entries {
            let (key, value) = entry.map_err(|source| ConfigError::EnvFile {
                path: path.clone(),
                source,
            })?;
            settings.absorb(&key, value);
        }
        Ok(())
    }
}

fn decode_crypto_key(encoded: &str) -> Result<Vec<u8>, ConfigError> {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    STANDARD
        .decode(encoded.trim())
        .map_err(|e| ConfigError::InvalidCryptoKeyBase64 {
            error: e.to_string(),
        })
}

/// `(vendor, field, value)` for every `<scheme>_<VENDOR>_<FIELD>` entry.
fn client_entries<'a>(
    settings: &'a Settings,
    scheme: &'a str,
) -> impl Iterator<Item = (String, &'a str, &'a String)> + 'a {
    settings.0.iter().filter_map(move |(key, value)| {
        let (vendor, field) = key.strip_prefix(scheme)?.split_once('_')?;
        Some((vendor.to_lowercase(), field, value))
    })
}

fn oauth2_clients(settings: &Settings) -> BTreeMap<String, OAuth2ClientConfig> {
    let mut clients: BTreeMap<String, OAuth2ClientConfig> = BTreeMap::new();
    for (vendor, field, value) in client_entries(settings, "OAUTH2_") {
        let client = clients.entry(vendor).or_default();
        match field {
            "CLIENT_ID" => client.client_id = value.clone(),
            "CLIENT_SECRET" => client.client_secret = Some(value.clone()),
            "AUTH_URL" => client.auth_url = value.clone(),
            "TOKEN_URL" => client.token_url = value.clone(),
            "REDIRECT_URL" => client.redirect_url = Some(value.clone()),
            other => log::warn!("ignoring unknown OAuth2 setting {other}"),
        }
    }
    clients
}

fn oauth1_clients(settings: &Settings) -> BTreeMap<String, OAuth1ClientConfig> {
    let mut clients: BTreeMap<String, OAuth1ClientConfig> = BTreeMap::new();
    for (vendor, field, value) in client_entries(settings, "OAUTH1_") {
        let client = clients.entry(vendor).or_default();
        match field {
            "CONSUMER_KEY" => client.consumer_key = value.clone(),
            "CONSUMER_SECRET" => client.consumer_secret = value.clone(),
            "REQUEST_TOKEN_URL" => client.request_token_url = value.clone(),
            "AUTHORIZE_URL" => client.authorize_url = value.clone(),
            "ACCESS_TOKEN_URL" => client.access_token_url = value.clone(),
            other => log::warn!("ignoring unknown OAuth1 setting {other}"),
        }
    }
    clients
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("crypto key is missing; set PIPES_CRYPTO_KEY environment variable")]
    MissingCryptoKey,
    #[error("crypto key is invalid base64: {error}")]
    InvalidCryptoKeyBase64 { error: String },
    #[error("crypto key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidCryptoKeyLength { length: usize },
    #[error("platform api url '{value}' is not a valid URL")]
    InvalidPlatformUrl { value: String },
    #[error("workspace cache size must be greater than zero")]
    InvalidWorkspaceCacheSize,
    #[error("worker concurrency must be between 1 and 64, got {value}")]
    InvalidWorkerConcurrency { value: usize },
    #[error("worker channel capacity must be greater than zero")]
    InvalidWorkerChannelCapacity,
    #[error("queue tick must be at least 50 ms, got {value}")]
    InvalidQueueTick { value: u64 },
    #[error("autosync interval must be at least 60 seconds, got {value}")]
    InvalidAutosyncInterval { value: u64 },
    #[error("OAuth client for '{vendor}' is missing or has an invalid {field}")]
    IncompleteOAuthClient { vendor: String, field: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            crypto_key: Some(vec![7u8; 32]),
            ..AppConfig::default()
        }
    }

    #[test]
    fn default_config_requires_crypto_key() {
        assert!(matches!(
            AppConfig::default().validate(),
            Err(ConfigError::MissingCryptoKey)
        ));
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn worker_bounds_are_enforced() {
        let mut config = valid_config();
        config.worker.concurrency = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWorkerConcurrency { value: 0 })
        ));
    }

    #[test]
    fn autosync_interval_only_checked_when_enabled() {
        let mut config = valid_config();
        config.autosync.interval_seconds = 5;
        assert!(config.validate().is_err());
        config.autosync.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn oauth_prefix_entries_are_grouped_by_vendor() {
        let mut settings = Settings::default();
        for (key, value) in [
            ("PIPES_OAUTH2_ASANA_CLIENT_ID", "abc"),
            ("PIPES_OAUTH2_ASANA_CLIENT_SECRET", "s3cr3t"),
            ("PIPES_OAUTH2_ASANA_TOKEN_URL", "https://app.asana.com/-/oauth_token"),
            ("PIPES_OAUTH1_FRESHBOOKS_CONSUMER_KEY", "fb"),
            ("OAUTH2_GITHUB_CLIENT_ID", "unprefixed"),
        ] {
            settings.absorb(key, value.to_string());
        }

        let oauth2 = oauth2_clients(&settings);
        let asana = &oauth2["asana"];
        assert_eq!(asana.client_id, "abc");
        assert_eq!(asana.client_secret.as_deref(), Some("s3cr3t"));
        assert_eq!(asana.token_url, "https://app.asana.com/-/oauth_token");
        assert!(!oauth2.contains_key("github"));
        assert_eq!(oauth1_clients(&settings)["freshbooks"].consumer_key, "fb");
    }

    #[test]
    fn unparseable_numbers_fall_back_to_defaults() {
        let mut settings = Settings::default();
        settings.absorb("PIPES_WORKER_CONCURRENCY", "lots".to_string());
        settings.absorb("PIPES_QUEUE_TICK_MS", " 250 ".to_string());

        assert_eq!(
            settings.parsed("WORKER_CONCURRENCY", default_worker_concurrency),
            default_worker_concurrency()
        );
        assert_eq!(settings.parsed("QUEUE_TICK_MS", default_queue_tick_ms), 250);
    }

    #[test]
    fn redacted_json_hides_secrets() {
        let mut config = valid_config();
        config.oauth2.insert(
            "asana".to_string(),
            OAuth2ClientConfig {
                client_id: "id".to_string(),
                client_secret: Some("very-secret".to_string()),
                auth_url: "https://example.com/auth".to_string(),
                token_url: "https://example.com/token".to_string(),
                redirect_url: None,
            },
        );
        let json = config.redacted_json().expect("json");
        assert!(!json.contains("very-secret"));
        assert!(json.contains("[REDACTED]"));
    }
}
