use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use ethers_core::types::U64;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use crate::eth::{RpcBlock, RpcTransaction};

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const BLOCK_TIMEOUT: Duration = Duration::from_secs(3);
pub const TRANSACTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Calls are throttled per class so a burst of transaction lookups does not
/// slow down block resolution and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallClass {
    Probe,
    Block,
    Transaction,
}

#[derive(Debug, Clone, Copy)]
pub struct DelayPolicy {
    /// Starting point for the first adjustment.
    pub seed_ms: f64,
    pub ceiling_ms: f64,
    pub floor_ms: f64,
}

pub const BLOCK_DELAY: DelayPolicy = DelayPolicy {
    seed_ms: 200.0,
    ceiling_ms: 3000.0,
    floor_ms: 100.0,
};

pub const TRANSACTION_DELAY: DelayPolicy = DelayPolicy {
    seed_ms: 100.0,
    ceiling_ms: 2000.0,
    floor_ms: 50.0,
};

/// Pre-call delay that doubles on HTTP 429 and relaxes by 10% per success.
/// No delay applies until the first adjustment.
#[derive(Debug)]
pub struct AdaptiveDelay {
    policy: DelayPolicy,
    current_ms: Option<f64>,
}

impl AdaptiveDelay {
    pub fn new(policy: DelayPolicy) -> Self {
        Self {
            policy,
            current_ms: None,
        }
    }

    pub fn current(&self) -> Option<Duration> {
        self.current_ms.map(|ms| Duration::from_secs_f64(ms / 1000.0))
    }

    #[cfg(test)]
    fn current_ms(&self) -> Option<f64> {
        self.current_ms
    }

    pub fn on_rate_limited(&mut self) {
        let base = self.current_ms.unwrap_or(self.policy.seed_ms);
        self.current_ms = Some((base * 2.0).min(self.policy.ceiling_ms));
    }

    pub fn on_success(&mut self) {
        let base = self.current_ms.unwrap_or(self.policy.seed_ms);
        self.current_ms = Some((base * 0.9).max(self.policy.floor_ms));
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RpcError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("rate limited by endpoint")]
    RateLimited,
    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("null result")]
    EmptyResult,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub probe: Duration,
    pub block: Duration,
    pub transaction: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe: PROBE_TIMEOUT,
            block: BLOCK_TIMEOUT,
            transaction: TRANSACTION_TIMEOUT,
        }
    }
}

/// HTTP JSON-RPC client. Failed calls come back as `None` after logging so
/// callers only ever decide between "resolved" and "skip".
#[derive(Debug)]
pub struct RpcGateway {
    client: reqwest::Client,
    url: Url,
    timeouts: Timeouts,
    block_delay: Mutex<AdaptiveDelay>,
    transaction_delay: Mutex<AdaptiveDelay>,
    next_id: AtomicU64,
}

impl RpcGateway {
    pub fn new(rpc_url: &str) -> Result<Self> {
        Self::with_timeouts(rpc_url, Timeouts::default())
    }

    pub fn with_timeouts(rpc_url: &str, timeouts: Timeouts) -> Result<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .context("failed to build reqwest client")?;
        let url = Url::parse(rpc_url).context("invalid RPC url")?;
        Ok(Self {
            client,
            url,
            timeouts,
            block_delay: Mutex::new(AdaptiveDelay::new(BLOCK_DELAY)),
            transaction_delay: Mutex::new(AdaptiveDelay::new(TRANSACTION_DELAY)),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn current_delay(&self, class: CallClass) -> Option<Duration> {
        self.with_delay(class, |delay| delay.current()).flatten()
    }

    fn with_delay<T>(&self, class: CallClass, f: impl FnOnce(&mut AdaptiveDelay) -> T) -> Option<T> {
        let slot = match class {
            CallClass::Probe => return None,
            CallClass::Block => &self.block_delay,
            CallClass::Transaction => &self.transaction_delay,
        };
        let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());
        Some(f(&mut guard))
    }

    fn timeout_for(&self, class: CallClass) -> Duration {
        match class {
            CallClass::Probe => self.timeouts.probe,
            CallClass::Block => self.timeouts.block,
            CallClass::Transaction => self.timeouts.transaction,
        }
    }

    pub async fn try_call(
        &self,
        method: &str,
        params: Value,
        class: CallClass,
    ) -> Result<Value, RpcError> {
        if let Some(wait) = self.current_delay(class) {
            tokio::time::sleep(wait).await;
        }

        let timeout = self.timeout_for(class);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                RpcError::Timeout(timeout)
            } else {
                RpcError::Transport(e)
            }
        };

        let response = self
            .client
            .post(self.url.clone())
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_err)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.with_delay(class, AdaptiveDelay::on_rate_limited);
            return Err(RpcError::RateLimited);
        }
        if !status.is_success() {
            return Err(RpcError::Status(status));
        }
        self.with_delay(class, AdaptiveDelay::on_success);

        let bytes = response.bytes().await.map_err(map_err)?;
        let parsed: RpcResponse = serde_json::from_slice(&bytes)?;
        if let Some(err) = parsed.error {
            return Err(RpcError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        match parsed.result {
            Some(Value::Null) | None => Err(RpcError::EmptyResult),
            Some(result) => Ok(result),
        }
    }

    pub async fn call(&self, method: &str, params: Value, class: CallClass) -> Option<Value> {
        match self.try_call(method, params, class).await {
            Ok(result) => Some(result),
            Err(RpcError::EmptyResult) => {
                debug!(method, "rpc returned null result");
                None
            }
            Err(err) => {
                warn!(method, error = %err, "rpc call failed");
                None
            }
        }
    }

    /// Reachability probe.
    pub async fn block_number(&self) -> Option<u64> {
        let result = self
            .call("eth_blockNumber", json!([]), CallClass::Probe)
            .await?;
        match serde_json::from_value::<U64>(result) {
            Ok(number) => Some(number.as_u64()),
            Err(err) => {
                warn!(error = %err, "malformed block number");
                None
            }
        }
    }

    pub async fn get_block_by_hash(&self, identifier: &str) -> Option<RpcBlock> {
        let result = self
            .call(
                "eth_getBlockByHash",
                json!([identifier, true]),
                CallClass::Block,
            )
            .await?;
        match serde_json::from_value(result) {
            Ok(block) => Some(block),
            Err(err) => {
                warn!(block = identifier, error = %err, "malformed block payload");
                None
            }
        }
    }

    pub async fn get_transaction_by_hash(&self, hash: &str) -> Option<RpcTransaction> {
        let result = self
            .call(
                "eth_getTransactionByHash",
                json!([hash]),
                CallClass::Transaction,
            )
            .await?;
        match serde_json::from_value(result) {
            Ok(tx) => Some(tx),
            Err(err) => {
                warn!(tx = hash, error = %err, "malformed transaction payload");
                None
            }
        }
    }
}
