//! Node RPC client
//!
//! The wallet derives all of its state from raw blocks. The node is only
//! asked for the chain height, raw blocks, its mempool, a fee estimate and
//! the auction view of a name.
//!
//! Features:
//! - `NodeClient` trait so the monitor and accounts can run against a mock
//! - hsd-style JSON-RPC over HTTP with optional basic auth
//! - Retry with exponential backoff and jitter for idempotent reads

use crate::{Error, Result};
use async_trait::async_trait;
use hsw_core::{Hash, NameState, Outpoint};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum retry attempts
    pub max_attempts: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn next_backoff(&self, backoff: Duration) -> Duration {
        std::cmp::min(
            Duration::from_millis((backoff.as_millis() as f64 * self.backoff_multiplier) as u64),
            self.max_backoff,
        )
    }
}

/// Summary returned by `getinfo`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Chain height
    #[serde(rename = "blocks")]
    pub height: u32,
    /// Node version string
    #[serde(default)]
    pub version: String,
}

/// Auction view of a name, from `getnameinfo`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameInfo {
    /// Name
    pub name: String,
    /// Name hash
    pub name_hash: Hash,
    /// Auction state at the next block
    pub state: NameState,
    /// Height of the OPEN (or CLAIM)
    pub height: u32,
    /// Height of the last renewal
    #[serde(default)]
    pub renewal: u32,
    /// Current owner output
    pub owner: Outpoint,
    /// Price paid (second-highest reveal)
    #[serde(default)]
    pub value: u64,
    /// Highest reveal
    #[serde(default)]
    pub highest: u64,
    /// Resource data, hex
    #[serde(default)]
    pub data: String,
    /// Height of a pending TRANSFER, 0 when none
    #[serde(default)]
    pub transfer: u32,
    /// Height of REVOKE, 0 when none
    #[serde(default)]
    pub revoked: u32,
    /// Claim height, 0 when not claimed
    #[serde(default)]
    pub claimed: u32,
    /// Renewal count
    #[serde(default)]
    pub renewals: u32,
    /// Registered in the tree
    #[serde(default)]
    pub registered: bool,
    /// Expired
    #[serde(default)]
    pub expired: bool,
}

impl NameInfo {
    /// True while a TRANSFER awaits FINALIZE
    pub fn is_transferring(&self) -> bool {
        self.transfer != 0
    }
}

/// Everything the wallet asks of a full node
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Chain summary
    async fn get_info(&self) -> Result<NodeInfo>;

    /// Raw serialized block at `height`
    async fn get_raw_block(&self, height: u32) -> Result<Vec<u8>>;

    /// Raw blocks `start..start + count`, in height order
    async fn get_raw_blocks_batch(&self, start: u32, count: u32) -> Result<Vec<Vec<u8>>>;

    /// Submit a transaction, returning its hash
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<Hash>;

    /// Hashes of transactions in the mempool
    async fn get_raw_mempool(&self) -> Result<Vec<Hash>>;

    /// Fee estimate in coins per kB; non-positive when the node has none
    async fn estimate_smart_fee(&self, blocks: u32) -> Result<f64>;

    /// Auction view of `name`; `None` when the name was never opened
    async fn get_name_info(&self, name: &str) -> Result<Option<NameInfo>>;
}

/// RPC client configuration
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    /// Node RPC URL
    pub url: String,
    /// API key, sent as the basic-auth password for user `x`
    pub api_key: Option<String>,
    /// Retry configuration
    pub retry: RetryConfig,
    /// Request timeout
    pub request_timeout: Duration,
}

impl RpcClientConfig {
    /// Config for `url` with default retry and timeout
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorBody>,
    #[serde(default)]
    id: Option<u64>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

impl RpcResponse {
    fn into_result<R: DeserializeOwned>(self, method: &str) -> Result<R> {
        if let Some(err) = self.error {
            return Err(Error::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        serde_json::from_value(self.result)
            .map_err(|e| Error::InvalidResponse(format!("{}: {}", method, e)))
    }
}

/// JSON-RPC client for an hsd-compatible node
pub struct RpcNodeClient {
    config: RpcClientConfig,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcNodeClient {
    /// Create a client
    pub fn new(config: RpcClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Network(format!("HTTP client: {}", e)))?;
        Ok(Self {
            config,
            http,
            next_id: AtomicU64::new(1),
        })
    }

    fn request(&self) -> reqwest::RequestBuilder {
        let builder = self.http.post(&self.config.url);
        match &self.config.api_key {
            Some(key) => builder.basic_auth("x", Some(key)),
            None => builder,
        }
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest { method, params, id };

        let response = self.request().json(&request).send().await?;
        let status = response.status();
        // hsd returns RPC errors with a 500 status and a JSON body
        let body: RpcResponse = response.json().await.map_err(|e| {
            if status.is_success() {
                Error::InvalidResponse(format!("{}: {}", method, e))
            } else {
                Error::Network(format!("HTTP {} for {}", status, method))
            }
        })?;
        body.into_result(method)
    }

    async fn call_batch<R: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<Vec<R>> {
        if params.is_empty() {
            return Ok(Vec::new());
        }
        let first_id = self.next_id.fetch_add(params.len() as u64, Ordering::Relaxed);
        let requests: Vec<RpcRequest<'_>> = params
            .into_iter()
            .enumerate()
            .map(|(i, params)| RpcRequest {
                method,
                params,
                id: first_id + i as u64,
            })
            .collect();
        let count = requests.len();

        let response = self.request().json(&requests).send().await?;
        if !response.status().is_success() {
            return Err(Error::Network(format!("HTTP {} for batch {}", response.status(), method)));
        }
        let mut bodies: Vec<RpcResponse> = response.json().await?;
        if bodies.len() != count {
            return Err(Error::InvalidResponse(format!(
                "batch {}: expected {} responses, got {}",
                method,
                count,
                bodies.len()
            )));
        }
        // Responses may arrive in any order
        bodies.sort_by_key(|b| b.id.unwrap_or(u64::MAX));
        bodies.into_iter().map(|b| b.into_result(method)).collect()
    }

    /// Execute operation with retry logic
    async fn with_retry<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T>> + Send,
    {
        let retry = &self.config.retry;
        let mut attempt = 0;
        let mut backoff = retry.initial_backoff;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    if attempt >= retry.max_attempts {
                        return Err(e);
                    }

                    warn!(
                        "RPC failed (attempt {}), retrying in {:?}: {}",
                        attempt, backoff, e
                    );

                    tokio::time::sleep(jitter_duration(backoff)).await;
                    backoff = retry.next_backoff(backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn decode_hex(method: &str, s: &str) -> Result<Vec<u8>> {
    hex::decode(s).map_err(|e| Error::InvalidResponse(format!("{}: bad hex: {}", method, e)))
}

fn jitter_duration(duration: Duration) -> Duration {
    let millis = duration.as_millis() as u64;
    if millis == 0 {
        return duration;
    }
    let jitter = rand::thread_rng().gen_range(0.8..1.2);
    let jittered = (millis as f64 * jitter) as u64;
    Duration::from_millis(jittered.max(1))
}

#[derive(Deserialize)]
struct FeeEstimate {
    fee: f64,
}

#[derive(Deserialize)]
struct NameInfoEnvelope {
    #[serde(default)]
    info: Option<NameInfo>,
}

#[async_trait]
impl NodeClient for RpcNodeClient {
    async fn get_info(&self) -> Result<NodeInfo> {
        self.with_retry(|| self.call("getinfo", json!([]))).await
    }

    async fn get_raw_block(&self, height: u32) -> Result<Vec<u8>> {
        let hex: String = self
            .with_retry(|| self.call("getblockbyheight", json!([height, false, false])))
            .await?;
        decode_hex("getblockbyheight", &hex)
    }

    async fn get_raw_blocks_batch(&self, start: u32, count: u32) -> Result<Vec<Vec<u8>>> {
        let end = start
            .checked_add(count)
            .ok_or_else(|| Error::InvalidResponse(format!("block range {}+{} overflows", start, count)))?;
        let hexes: Vec<String> = self
            .with_retry(|| {
                let params = (start..end).map(|h| json!([h, false, false])).collect();
                self.call_batch("getblockbyheight", params)
            })
            .await?;
        debug!("Fetched {} raw blocks from {}", hexes.len(), start);
        hexes
            .iter()
            .map(|h| decode_hex("getblockbyheight", h))
            .collect()
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<Hash> {
        // Not retried: a resend after an ambiguous failure is the caller's call
        let txid: String = self
            .call("sendrawtransaction", json!([hex::encode(raw)]))
            .await?;
        txid.parse()
            .map_err(|e| Error::InvalidResponse(format!("sendrawtransaction: {}", e)))
    }

    async fn get_raw_mempool(&self) -> Result<Vec<Hash>> {
        let hashes: Vec<Hash> = self
            .with_retry(|| self.call("getrawmempool", json!([false])))
            .await?;
        Ok(hashes)
    }

    async fn estimate_smart_fee(&self, blocks: u32) -> Result<f64> {
        let estimate: FeeEstimate = self
            .with_retry(|| self.call("estimatesmartfee", json!([blocks])))
            .await?;
        Ok(estimate.fee)
    }

    async fn get_name_info(&self, name: &str) -> Result<Option<NameInfo>> {
        let envelope: NameInfoEnvelope = self
            .with_retry(|| self.call("getnameinfo", json!([name])))
            .await?;
        Ok(envelope.info)
    }
}
