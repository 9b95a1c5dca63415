use axum::http::{HeaderName, Method};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

use crate::idempotency::{
    DEFAULT_HASH_BUDGET_BYTES, DEFAULT_HEADER_NAME, DEFAULT_MAX_CACHEABLE_BYTES,
    DEFAULT_MAX_KEY_LENGTH, IdempotencyOptions,
};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Duplicate-request suppression
    #[serde(default)]
    pub idempotency: IdempotencySettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.request_timeout_ms == 0 {
            return Err("server.request_timeout_ms must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        self.idempotency
            .validate()
            .map_err(|e| format!("idempotency config error: {e}"))?;
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
    /// Deadline after which a request's cancellation token fires.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    10 * 1024 * 1024
}
fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencySettings {
    #[serde(default = "default_idempotency_enabled")]
    pub enabled: bool,
    #[serde(default = "default_header_name")]
    pub header_name: String,
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    #[serde(default = "default_max_key_length")]
    pub max_key_length: usize,
    /// Only this many leading body bytes feed the request digest.
    #[serde(default = "default_hash_budget_bytes")]
    pub hash_budget_bytes: usize,
    #[serde(default = "default_max_cacheable_bytes")]
    pub max_cacheable_bytes: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_lock_idle_ttl_secs")]
    pub lock_idle_ttl_secs: u64,
    /// 0 disables the background sweeper; eviction stays lazy.
    #[serde(default)]
    pub sweep_interval_secs: u64,
}

/// Upper bound for idempotency TTLs (one year).
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

fn default_idempotency_enabled() -> bool {
    true
}
fn default_header_name() -> String {
    DEFAULT_HEADER_NAME.into()
}
fn default_methods() -> Vec<String> {
    vec!["POST".into()]
}
fn default_max_key_length() -> usize {
    DEFAULT_MAX_KEY_LENGTH
}
fn default_hash_budget_bytes() -> usize {
    DEFAULT_HASH_BUDGET_BYTES
}
fn default_max_cacheable_bytes() -> usize {
    DEFAULT_MAX_CACHEABLE_BYTES
}
fn default_cache_ttl_secs() -> u64 {
    12 * 60 * 60
}
fn default_lock_idle_ttl_secs() -> u64 {
    120
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            enabled: default_idempotency_enabled(),
            header_name: default_header_name(),
            methods: default_methods(),
            max_key_length: default_max_key_length(),
            hash_budget_bytes: default_hash_budget_bytes(),
            max_cacheable_bytes: default_max_cacheable_bytes(),
            cache_ttl_secs: default_cache_ttl_secs(),
            lock_idle_ttl_secs: default_lock_idle_ttl_secs(),
            sweep_interval_secs: 0,
        }
    }
}

impl IdempotencySettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.header_name.trim().is_empty() {
            return Err("header_name must not be empty".into());
        }
        HeaderName::from_bytes(self.header_name.as_bytes())
            .map_err(|_| format!("header_name {:?} is not a valid header name", self.header_name))?;
        if self.methods.is_empty() {
            return Err("methods must list at least one HTTP method".into());
        }
        for m in &self.methods {
            parse_method(m)?;
        }
        if self.max_key_length == 0 {
            return Err("max_key_length must be > 0".into());
        }
        if self.hash_budget_bytes == 0 {
            return Err("hash_budget_bytes must be > 0".into());
        }
        if self.max_cacheable_bytes == 0 {
            return Err("max_cacheable_bytes must be > 0".into());
        }
        if self.cache_ttl_secs == 0 || self.lock_idle_ttl_secs == 0 {
            return Err("cache_ttl_secs and lock_idle_ttl_secs must be > 0".into());
        }
        if self.cache_ttl_secs > MAX_TTL_SECS || self.lock_idle_ttl_secs > MAX_TTL_SECS {
            return Err(format!(
                "cache_ttl_secs and lock_idle_ttl_secs must be <= {MAX_TTL_SECS}"
            ));
        }
        Ok(())
    }

    /// Converts to the engine's runtime options.
    pub fn to_options(&self) -> Result<IdempotencyOptions, String> {
        let header_name = HeaderName::from_bytes(self.header_name.as_bytes())
            .map_err(|e| format!("invalid header_name: {e}"))?;
        let methods = self
            .methods
            .iter()
            .map(|m| parse_method(m))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(IdempotencyOptions {
            header_name,
            methods,
            max_key_length: self.max_key_length,
            hash_budget_bytes: self.hash_budget_bytes,
            max_cacheable_bytes: self.max_cacheable_bytes,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            lock_idle_ttl: Duration::from_secs(self.lock_idle_ttl_secs),
        })
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

fn parse_method(raw: &str) -> Result<Method, String> {
    let upper = raw.trim().to_ascii_uppercase();
    Method::from_bytes(upper.as_bytes()).map_err(|_| format!("invalid HTTP method {raw:?}"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_FILE: &str = "replaygate.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., REPLAYGATE__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("REPLAYGATE")
                .prefix_separator("__")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
