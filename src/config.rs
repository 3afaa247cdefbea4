use std::env;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

pub const DEFAULT_RPC_URL: &str = "https://testnet-rpc.monad.xyz";
pub const DEFAULT_WS_URL: &str = "wss://testnet-rpc.monad.xyz";
pub const DEFAULT_EXPLORER_URL: &str = "https://explorer-testnet.monadinfra.com";

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub ws_url: String,
    pub chain_id: u64,
    /// Nominal block time.
    pub block_time_ms: u64,
    pub max_tps: u64,
    pub native_token: String,
    pub explorer_url: String,
    pub http_bind_addr: String,
    pub reconnect_base_ms: u64,
    pub max_reconnect_attempts: u32,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{var} is not a valid URL: {source}")]
    InvalidUrl {
        var: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("{var} must use one of {expected:?}, got {scheme}")]
    WrongScheme {
        var: &'static str,
        expected: &'static [&'static str],
        scheme: String,
    },
    #[error("{var} is not a valid number: {value}")]
    InvalidNumber { var: &'static str, value: String },
}

impl Config {
    /// Monad testnet preset.
    pub fn monad_testnet() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            chain_id: 41454,
            block_time_ms: 500,
            max_tps: 10_000,
            native_token: "MON".to_string(),
            explorer_url: DEFAULT_EXPLORER_URL.to_string(),
            http_bind_addr: "127.0.0.1:8080".to_string(),
            reconnect_base_ms: 1000,
            max_reconnect_attempts: 5,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::monad_testnet();

        let rpc_url = env::var("MONAD_RPC_URL").unwrap_or(defaults.rpc_url);
        let ws_url = env::var("MONAD_WS_URL").unwrap_or(defaults.ws_url);
        let explorer_url = env::var("MONAD_EXPLORER_URL").unwrap_or(defaults.explorer_url);
        let native_token = env::var("MONAD_NATIVE_TOKEN").unwrap_or(defaults.native_token);
        let http_bind_addr = env::var("HTTP_BIND").unwrap_or(defaults.http_bind_addr);

        let config = Self {
            rpc_url,
            ws_url,
            chain_id: parse_var("MONAD_CHAIN_ID", defaults.chain_id)?,
            block_time_ms: parse_var("MONAD_BLOCK_TIME_MS", defaults.block_time_ms)?,
            max_tps: parse_var("MONAD_MAX_TPS", defaults.max_tps)?,
            native_token,
            explorer_url,
            http_bind_addr,
            reconnect_base_ms: parse_var("MONAD_RECONNECT_BASE_MS", defaults.reconnect_base_ms)?,
            max_reconnect_attempts: parse_var(
                "MONAD_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("MONAD_RPC_URL", &self.rpc_url, &["http", "https"])?;
        check_url("MONAD_WS_URL", &self.ws_url, &["ws", "wss"])?;
        check_url("MONAD_EXPLORER_URL", &self.explorer_url, &["http", "https"])?;
        Ok(())
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn explorer_tx_url(&self, hash: &str) -> String {
        format!("{}/tx/{}", self.explorer_url.trim_end_matches('/'), hash)
    }

    pub fn explorer_block_url(&self, hash: &str) -> String {
        format!("{}/block/{}", self.explorer_url.trim_end_matches('/'), hash)
    }

    pub fn explorer_address_url(&self, address: &str) -> String {
        format!("{}/address/{}", self.explorer_url.trim_end_matches('/'), address)
    }
}

fn parse_var<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { var, value: raw }),
        Err(_) => Ok(default),
    }
}

fn check_url(
    var: &'static str,
    raw: &str,
    expected: &'static [&'static str],
) -> Result<(), ConfigError> {
    let url = Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { var, source })?;
    if !expected.contains(&url.scheme()) {
        return Err(ConfigError::WrongScheme {
            var,
            expected,
            scheme: url.scheme().to_string(),
        });
    }
    Ok(())
}
