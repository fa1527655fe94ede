//! Wallet node configuration
//!
//! `WalletConfig` is a plain serde struct. Every field has a default, so a
//! config file only needs the values it changes. The binary layers clap
//! flags on top of what is loaded here.

use crate::{Error, Result};
use directories::ProjectDirs;
use hsw_core::FeePolicy;
use hsw_params::{Network, NetworkType};
use hsw_sync::{MonitorConfig, RetryConfig, RpcClientConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Addresses derived past the deepest used index
pub const DEFAULT_LOOKAHEAD: u32 = 1000;

/// Blocks fetched concurrently per rescan batch
pub const DEFAULT_FETCH_BATCH_SIZE: u32 = 5;

/// Empty blocks scanned between cursor writes
pub const DEFAULT_EMPTY_FLUSH_INTERVAL: u32 = 50;

/// Mempool polls after a broadcast
pub const DEFAULT_BROADCAST_POLLS: u32 = 30;

/// Delay between mempool polls
pub const DEFAULT_BROADCAST_POLL_INTERVAL_MS: u64 = 100;

const DATABASE_FILE: &str = "wallet.sqlite";

/// Wallet node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Network name (main, testnet, regtest, simnet)
    pub network: String,
    /// Node RPC URL; the network's local default when unset
    pub node_url: Option<String>,
    /// Node API key
    pub api_key: Option<String>,
    /// Directory holding the wallet database
    pub data_dir: Option<PathBuf>,
    /// Seconds between monitor polls
    pub poll_interval_secs: u64,
    /// Blocks after which a checkpoint is considered final
    pub finality_depth: u32,
    /// Checkpoints kept for reorg detection
    pub checkpoint_window: u32,
    /// Lookahead window for new accounts
    pub lookahead: u32,
    /// Concurrent block fetches per rescan batch
    pub fetch_batch_size: u32,
    /// Empty blocks between cursor writes
    pub empty_flush_interval: u32,
    /// Mempool polls after broadcasting
    pub broadcast_polls: u32,
    /// Milliseconds between mempool polls
    pub broadcast_poll_interval_ms: u64,
    /// Fee rate bounds
    pub fee: FeePolicy,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network: NetworkType::Mainnet.as_str().to_string(),
            node_url: None,
            api_key: None,
            data_dir: None,
            poll_interval_secs: hsw_sync::DEFAULT_POLL_INTERVAL.as_secs(),
            finality_depth: hsw_sync::DEFAULT_FINALITY_DEPTH,
            checkpoint_window: hsw_sync::DEFAULT_CHECKPOINT_WINDOW,
            lookahead: DEFAULT_LOOKAHEAD,
            fetch_batch_size: DEFAULT_FETCH_BATCH_SIZE,
            empty_flush_interval: DEFAULT_EMPTY_FLUSH_INTERVAL,
            broadcast_polls: DEFAULT_BROADCAST_POLLS,
            broadcast_poll_interval_ms: DEFAULT_BROADCAST_POLL_INTERVAL_MS,
            fee: FeePolicy::default(),
        }
    }
}

/// Per-account knobs derived from [`WalletConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountConfig {
    /// Lookahead window for new accounts
    pub lookahead: u32,
    /// Concurrent block fetches per rescan batch
    pub fetch_batch_size: u32,
    /// Empty blocks between cursor writes
    pub empty_flush_interval: u32,
    /// Mempool polls after broadcasting
    pub broadcast_polls: u32,
    /// Delay between mempool polls
    pub broadcast_poll_interval: Duration,
    /// Fee rate bounds
    pub fee: FeePolicy,
}

impl Default for AccountConfig {
    fn default() -> Self {
        WalletConfig::default().account_config()
    }
}

impl WalletConfig {
    /// Defaults for `network`
    pub fn for_network(network: NetworkType) -> Self {
        Self {
            network: network.as_str().to_string(),
            ..Self::default()
        }
    }

    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Write as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        self.network()?;
        if self.lookahead == 0 {
            return Err(Error::Config("lookahead must be at least 1".to_string()));
        }
        if self.fetch_batch_size == 0 {
            return Err(Error::Config("fetch_batch_size must be at least 1".to_string()));
        }
        if self.checkpoint_window == 0 {
            return Err(Error::Config("checkpoint_window must be at least 1".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::Config("poll_interval_secs must be at least 1".to_string()));
        }
        self.fee.validate()?;
        Ok(())
    }

    /// Resolved network parameters
    pub fn network(&self) -> Result<Network> {
        Ok(Network::from_type(NetworkType::from_str(&self.network)?))
    }

    /// Node RPC URL
    pub fn node_url(&self) -> Result<String> {
        match &self.node_url {
            Some(url) => Ok(url.clone()),
            None => Ok(self.network()?.default_rpc_url()),
        }
    }

    /// Data directory, per network under the platform data dir by default
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let network = self.network()?;
        ProjectDirs::from("org", "Handshake", "hsw-node")
            .map(|dirs| dirs.data_local_dir().join(network.name))
            .ok_or_else(|| Error::Config("no home directory; set data_dir".to_string()))
    }

    /// Wallet database path
    pub fn database_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(DATABASE_FILE))
    }

    /// Node client settings
    pub fn rpc_config(&self) -> Result<RpcClientConfig> {
        let mut config = RpcClientConfig::new(self.node_url()?);
        config.api_key = self.api_key.clone();
        config.retry = RetryConfig::default();
        Ok(config)
    }

    /// Block monitor settings
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            finality_depth: self.finality_depth,
            checkpoint_window: self.checkpoint_window,
        }
    }

    /// Account settings
    pub fn account_config(&self) -> AccountConfig {
        AccountConfig {
            lookahead: self.lookahead,
            fetch_batch_size: self.fetch_batch_size.max(1),
            empty_flush_interval: self.empty_flush_interval.max(1),
            broadcast_polls: self.broadcast_polls,
            broadcast_poll_interval: Duration::from_millis(self.broadcast_poll_interval_ms),
            fee: self.fee,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = WalletConfig::default();
        assert_eq!(config.lookahead, 1000);
        assert_eq!(config.fetch_batch_size, 5);
        assert_eq!(config.empty_flush_interval, 50);
        assert_eq!(config.broadcast_polls, 30);
        assert_eq!(config.monitor_config().poll_interval, Duration::from_secs(10));
        assert_eq!(config.network().unwrap(), Network::mainnet());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: WalletConfig =
            serde_json::from_str(r#"{"network": "regtest", "lookahead": 20}"#).unwrap();
        assert_eq!(config.lookahead, 20);
        assert_eq!(config.finality_depth, 10);
        assert_eq!(config.node_url().unwrap(), "http://127.0.0.1:14037");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = WalletConfig::for_network(NetworkType::Regtest);
        config.data_dir = Some(dir.path().to_path_buf());
        config.api_key = Some("secret".to_string());
        config.save(&path).unwrap();

        let loaded = WalletConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.database_path().unwrap(), dir.path().join("wallet.sqlite"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = WalletConfig::default();
        config.network = "bogus".to_string();
        assert!(config.validate().is_err());

        let mut config = WalletConfig::default();
        config.lookahead = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
