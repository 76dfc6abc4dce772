use std::env;
use std::time::Duration;

use modellink_tools::DEFAULT_BASE_URL;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub upstream_base_url: String,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid ML_PORT value: {0}")]
    InvalidPort(String),
    #[error("invalid ML_CONNECT_TIMEOUT value: {0}")]
    InvalidConnectTimeout(String),
    #[error("invalid ML_UPSTREAM_BASE_URL value: {0}")]
    InvalidUpstreamBaseUrl(String),
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("ML_HOST").unwrap_or_else(|| "127.0.0.1".to_string());

        let port_raw = lookup("ML_PORT").unwrap_or_else(|| "3000".to_string());
        let port =
            port_raw.trim().parse::<u16>().map_err(|_| ConfigError::InvalidPort(port_raw.clone()))?;

        let upstream_base_url = match lookup("ML_UPSTREAM_BASE_URL") {
            Some(raw) if raw.trim().is_empty() => DEFAULT_BASE_URL.to_string(),
            Some(raw) => parse_base_url(&raw).ok_or(ConfigError::InvalidUpstreamBaseUrl(raw))?,
            None => DEFAULT_BASE_URL.to_string(),
        };

        let timeout_raw = lookup("ML_CONNECT_TIMEOUT").unwrap_or_else(|| "15".to_string());
        let connect_timeout_seconds = parse_positive_u64(&timeout_raw)
            .ok_or(ConfigError::InvalidConnectTimeout(timeout_raw))?;

        Ok(Self { host, port, upstream_base_url, connect_timeout_seconds })
    }

    pub fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            upstream_base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout_seconds: 15,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

fn parse_base_url(value: &str) -> Option<String> {
    let trimmed = value.trim().trim_end_matches('/');
    let parsed = Url::parse(trimmed).ok()?;
    let web_scheme = matches!(parsed.scheme(), "http" | "https");
    let has_host = parsed.host_str().is_some_and(|host| !host.is_empty());
    (web_scheme && has_host).then(|| trimmed.to_string())
}

fn parse_positive_u64(value: &str) -> Option<u64> {
    let parsed = value.trim().parse::<u64>().ok()?;
    if parsed == 0 { None } else { Some(parsed) }
}
