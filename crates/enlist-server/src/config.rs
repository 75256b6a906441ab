use std::time::Duration;

use enlist_client::{GatewayOptions, parse_proxy_url};
use enlist_core::config::EngineConfig;
use enlist_core::error::AppError;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 30;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub api_key: String,
    pub port: u16,
    pub default_gateway: Option<String>,
    pub gateway: GatewayOptions,
    pub engine: EngineConfig,
}

impl ServerConfig {
    /// Read configuration from environment variables.
    ///
    /// - `ENLIST_SERVER_API_KEY` (required)
    /// - `ENLIST_SERVER_PORT` (optional, defaults to 8000)
    /// - `ENLIST_GATEWAY_URL` (optional)
    /// - `ENLIST_GATEWAY_TIMEOUT_SECS` (optional, defaults to 30)
    /// - `ENLIST_PROXY_URL` (optional, `socks5://`, `socks5h://`, `http://` or `https://`)
    /// - engine variables, see [`EngineConfig::from_env`]
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let api_key = lookup("ENLIST_SERVER_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AppError::ConfigError("ENLIST_SERVER_API_KEY must be set".into()))?;

        let port = match lookup("ENLIST_SERVER_PORT") {
            None => DEFAULT_PORT,
            Some(raw) => raw.trim().parse().map_err(|_| {
                AppError::ConfigError(format!("Invalid ENLIST_SERVER_PORT '{raw}'"))
            })?,
        };

        let gateway_timeout = match lookup("ENLIST_GATEWAY_TIMEOUT_SECS") {
            None => Duration::from_secs(DEFAULT_GATEWAY_TIMEOUT_SECS),
            Some(raw) => Duration::from_secs(raw.trim().parse().map_err(|_| {
                AppError::ConfigError(format!("Invalid ENLIST_GATEWAY_TIMEOUT_SECS '{raw}'"))
            })?),
        };

        let mut gateway = GatewayOptions::new(gateway_timeout);
        if let Some(raw) = lookup("ENLIST_PROXY_URL").filter(|p| !p.trim().is_empty()) {
            gateway = gateway.with_proxy(parse_proxy_url(&raw)?);
        }

        Ok(Self {
            api_key,
            port,
            default_gateway: lookup("ENLIST_GATEWAY_URL").filter(|u| !u.trim().is_empty()),
            gateway,
            engine: EngineConfig::from_lookup(&lookup)?,
        })
    }
}
