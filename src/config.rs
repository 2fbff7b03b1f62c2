use crate::proxy::types::{
    ProxyConfig, RequestSizeLimit, RouteRule, TargetUrl, DEFAULT_MAX_REQUEST_SIZE,
    DEFAULT_REQUEST_TIMEOUT,
};
use crate::{Error, Result};
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

/// Names an extra configuration file layered above the defaults
pub const CONFIG_PATH_VAR: &str = "REPLAY_CACHE_CONFIG";

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    /// Shorthand for `application.port`; wins when both are set
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub routes: Vec<RouteRule>,
    pub proxy: ProxySettings,
    pub upstream: UpstreamSettings,
    pub store: StoreSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxySettings {
    #[serde(default)]
    pub default_target: Option<TargetUrl>,
    pub capture_requests: bool,
    pub cache_status_header: bool,
    pub max_request_size: usize,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamSettings {
    pub verify_tls: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    #[serde(default)]
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Settings {
    /// Loads defaults, then config files, then `REPLAY_CACHE__*` environment variables
    pub fn new() -> Result<Self> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            .add_source(File::with_name("config").required(false));

        if let Ok(path) = env::var(CONFIG_PATH_VAR) {
            builder = builder.add_source(File::with_name(&path).required(true));
        }

        let config = builder
            .add_source(Environment::with_prefix("REPLAY_CACHE").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Defaults plus a single file; the format is taken from the extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = defaults()?
            .add_source(File::from(path.as_ref()).required(true))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn listen_port(&self) -> u16 {
        self.port.unwrap_or(self.application.port)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.application.host, self.listen_port())
    }

    pub fn proxy_config(&self) -> Result<ProxyConfig> {
        if self.routes.is_empty() && self.proxy.default_target.is_none() {
            return Err(Error::invalid_config(
                "no routes configured and no proxy.default_target",
            ));
        }

        let max_request_size = RequestSizeLimit::try_new(self.proxy.max_request_size)
            .map_err(|e| Error::invalid_config(format!("proxy.max_request_size: {e}")))?;

        Ok(ProxyConfig {
            routes: self.routes.clone(),
            default_target: self.proxy.default_target.clone(),
            verify_tls: self.upstream.verify_tls,
            request_timeout: Duration::from_secs(self.proxy.request_timeout_secs),
            max_request_size,
            capture_requests: self.proxy.capture_requests,
            cache_status_header: self.proxy.cache_status_header,
        })
    }

    /// Connection URL for the postgres backend
    pub fn store_url(&self) -> Result<&str> {
        self.store
            .url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| Error::invalid_config("store.url is required for the postgres backend"))
    }
}

fn defaults() -> Result<ConfigBuilder<config::builder::DefaultState>> {
    Ok(Config::builder()
        .set_default("application.host", "0.0.0.0")?
        .set_default("application.port", 8083)?
        .set_default("proxy.capture_requests", true)?
        .set_default("proxy.cache_status_header", true)?
        .set_default("proxy.max_request_size", DEFAULT_MAX_REQUEST_SIZE as u64)?
        .set_default(
            "proxy.request_timeout_secs",
            DEFAULT_REQUEST_TIMEOUT.as_secs(),
        )?
        .set_default("upstream.verify_tls", false)?
        .set_default("store.backend", "memory")?
        .set_default("store.max_connections", 10)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "json")?)
}
