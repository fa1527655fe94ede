//! Handshake network definitions

use crate::consensus::ConsensusParams;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Network type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Mainnet
    Mainnet,
    /// Testnet
    Testnet,
    /// Regtest (local development)
    Regtest,
    /// Simnet (simulation)
    Simnet,
}

impl NetworkType {
    /// Lowercase network name
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "main",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
            Self::Simnet => "simnet",
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "main" | "mainnet" => Ok(Self::Mainnet),
            "test" | "testnet" => Ok(Self::Testnet),
            "regtest" => Ok(Self::Regtest),
            "simnet" => Ok(Self::Simnet),
            other => Err(Error::InvalidNetwork(other.to_string())),
        }
    }
}

/// Network configuration
///
/// Passed by value into every component; there is no process-wide
/// "current network".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Network {
    /// Network type
    pub network_type: NetworkType,
    /// Human-readable name
    pub name: &'static str,
    /// Bech32 human-readable part for addresses
    pub address_hrp: &'static str,
    /// Coin type (BIP-44)
    pub coin_type: u32,
    /// Node RPC port
    pub rpc_port: u16,
    /// Wallet RPC port
    pub wallet_port: u16,
    /// Consensus and auction parameters
    pub consensus: ConsensusParams,
}

impl Network {
    /// Get mainnet parameters
    pub const fn mainnet() -> Self {
        Self {
            network_type: NetworkType::Mainnet,
            name: "main",
            address_hrp: "hs",
            coin_type: 5353,
            rpc_port: 12037,
            wallet_port: 12039,
            consensus: ConsensusParams::mainnet(),
        }
    }

    /// Get testnet parameters
    pub const fn testnet() -> Self {
        Self {
            network_type: NetworkType::Testnet,
            name: "testnet",
            address_hrp: "ts",
            coin_type: 5354,
            rpc_port: 13037,
            wallet_port: 13039,
            consensus: ConsensusParams::testnet(),
        }
    }

    /// Get regtest parameters
    pub const fn regtest() -> Self {
        Self {
            network_type: NetworkType::Regtest,
            name: "regtest",
            address_hrp: "rs",
            coin_type: 5355,
            rpc_port: 14037,
            wallet_port: 14039,
            consensus: ConsensusParams::regtest(),
        }
    }

    /// Get simnet parameters
    pub const fn simnet() -> Self {
        Self {
            network_type: NetworkType::Simnet,
            name: "simnet",
            address_hrp: "ss",
            coin_type: 5356,
            rpc_port: 15037,
            wallet_port: 15039,
            consensus: ConsensusParams::simnet(),
        }
    }

    /// Get network by type
    pub const fn from_type(network_type: NetworkType) -> Self {
        match network_type {
            NetworkType::Mainnet => Self::mainnet(),
            NetworkType::Testnet => Self::testnet(),
            NetworkType::Regtest => Self::regtest(),
            NetworkType::Simnet => Self::simnet(),
        }
    }

    /// Resolve a network from an address HRP
    pub fn from_hrp(hrp: &str) -> Result<Self> {
        [
            Self::mainnet(),
            Self::testnet(),
            Self::regtest(),
            Self::simnet(),
        ]
        .into_iter()
        .find(|n| n.address_hrp == hrp)
        .ok_or_else(|| Error::UnknownPrefix(hrp.to_string()))
    }

    /// Default node RPC URL on localhost
    pub fn default_rpc_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.rpc_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mainnet_params() {
        let net = Network::mainnet();
        assert_eq!(net.network_type, NetworkType::Mainnet);
        assert_eq!(net.coin_type, 5353);
        assert_eq!(net.address_hrp, "hs");
        assert_eq!(net.consensus.coinbase_maturity, 100);
    }

    #[test]
    fn test_network_from_type() {
        let net = Network::from_type(NetworkType::Regtest);
        assert_eq!(net.network_type, NetworkType::Regtest);
        assert_eq!(net.default_rpc_url(), "http://127.0.0.1:14037");
    }

    #[test]
    fn test_from_hrp() {
        assert_eq!(Network::from_hrp("ts").unwrap().network_type, NetworkType::Testnet);
        assert!(Network::from_hrp("bc").is_err());
    }

    #[test]
    fn test_network_type_parse_and_serde() {
        assert_eq!("main".parse::<NetworkType>().unwrap(), NetworkType::Mainnet);
        assert_eq!("REGTEST".parse::<NetworkType>().unwrap(), NetworkType::Regtest);
        assert!("bogus".parse::<NetworkType>().is_err());

        let json = serde_json::to_string(&NetworkType::Simnet).unwrap();
        assert_eq!(json, "\"simnet\"");
    }
}
