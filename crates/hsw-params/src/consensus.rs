//! Consensus and name-auction parameters for Handshake

/// Subunits per coin (1 HNS = 1,000,000 dollarydoos)
pub const COIN: u64 = 1_000_000;

/// Maximum supply in subunits
pub const MAX_MONEY: u64 = 2_040_000_000 * COIN;

/// Name-auction schedule, expressed in blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameParams {
    /// Height at which the first rollout week opens
    pub auction_start: u32,
    /// Blocks between rollout weeks
    pub rollout_interval: u32,
    /// Disable the rollout schedule entirely
    pub no_rollout: bool,
    /// Name tree commitment interval (also the OPENING phase length)
    pub tree_interval: u32,
    /// Length of the BIDDING phase
    pub bidding_period: u32,
    /// Length of the REVEAL phase
    pub reveal_period: u32,
    /// Blocks after registration before a name expires
    pub renewal_window: u32,
    /// Blocks during which renewal is allowed before expiry
    pub renewal_period: u32,
    /// Age a renewal block hash must reach
    pub renewal_maturity: u32,
    /// Blocks a TRANSFER must wait before FINALIZE
    pub transfer_lockup: u32,
    /// Blocks after REVOKE before the name may be re-opened
    pub revocation_delay: u32,
}

impl NameParams {
    /// Mainnet auction schedule
    pub const fn mainnet() -> Self {
        let day = ConsensusParams::BLOCKS_PER_DAY;
        Self {
            auction_start: 14 * day,
            rollout_interval: 7 * day,
            no_rollout: false,
            tree_interval: day >> 2,
            bidding_period: 5 * day,
            reveal_period: 10 * day,
            renewal_window: 2 * 365 * day,
            renewal_period: 182 * day,
            renewal_maturity: 30 * day,
            transfer_lockup: 2 * day,
            revocation_delay: 14 * day,
        }
    }

    /// Testnet auction schedule
    pub const fn testnet() -> Self {
        let day = ConsensusParams::BLOCKS_PER_DAY;
        Self {
            auction_start: day >> 2,
            rollout_interval: day >> 2,
            no_rollout: false,
            tree_interval: day >> 2,
            bidding_period: day,
            reveal_period: 2 * day,
            renewal_window: 30 * day,
            renewal_period: 7 * day,
            renewal_maturity: day,
            transfer_lockup: day,
            revocation_delay: day,
        }
    }

    /// Regtest auction schedule (short phases, no rollout)
    pub const fn regtest() -> Self {
        Self {
            auction_start: 0,
            rollout_interval: 2,
            no_rollout: true,
            tree_interval: 5,
            bidding_period: 5,
            reveal_period: 10,
            renewal_window: 5_000,
            renewal_period: 2_500,
            renewal_maturity: 50,
            transfer_lockup: 10,
            revocation_delay: 50,
        }
    }

    /// Simnet auction schedule
    pub const fn simnet() -> Self {
        Self {
            no_rollout: false,
            ..Self::regtest()
        }
    }

    /// First height at which a name in `week` may be opened
    pub const fn rollout_height(&self, week: u32) -> u32 {
        self.auction_start + week * self.rollout_interval
    }

    /// Total auction length from OPEN to CLOSED
    pub const fn auction_length(&self) -> u32 {
        self.tree_interval + 1 + self.bidding_period + self.reveal_period
    }
}

/// Consensus parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusParams {
    /// Target block time in seconds
    pub block_time_target: u32,
    /// Coinbase maturity (blocks)
    pub coinbase_maturity: u32,
    /// Maximum supply (subunits)
    pub max_money: u64,
    /// Name-auction schedule
    pub names: NameParams,
}

impl ConsensusParams {
    /// Blocks per day at the ten-minute target
    pub const BLOCKS_PER_DAY: u32 = 144;

    /// Create consensus params for mainnet
    pub const fn mainnet() -> Self {
        Self {
            block_time_target: 600,
            coinbase_maturity: 100,
            max_money: MAX_MONEY,
            names: NameParams::mainnet(),
        }
    }

    /// Create consensus params for testnet
    pub const fn testnet() -> Self {
        Self {
            block_time_target: 600,
            coinbase_maturity: 100,
            max_money: MAX_MONEY,
            names: NameParams::testnet(),
        }
    }

    /// Create consensus params for regtest
    pub const fn regtest() -> Self {
        Self {
            block_time_target: 600,
            coinbase_maturity: 2,
            max_money: MAX_MONEY,
            names: NameParams::regtest(),
        }
    }

    /// Create consensus params for simnet
    pub const fn simnet() -> Self {
        Self {
            block_time_target: 600,
            coinbase_maturity: 6,
            max_money: MAX_MONEY,
            names: NameParams::simnet(),
        }
    }

    /// Check if amount is valid (within max supply)
    pub const fn is_valid_amount(&self, amount: u64) -> bool {
        amount <= self.max_money
    }

    /// Whether a coinbase output created at `coin_height` is spendable at `tip`
    pub const fn is_mature(&self, coin_height: u32, tip: u32) -> bool {
        tip >= coin_height + self.coinbase_maturity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mainnet_names() {
        let names = NameParams::mainnet();
        assert_eq!(names.tree_interval, 36);
        assert_eq!(names.bidding_period, 720);
        assert_eq!(names.reveal_period, 1440);
        assert_eq!(names.rollout_height(0), 2016);
        assert_eq!(names.rollout_height(51), 2016 + 51 * 1008);
    }

    #[test]
    fn test_coinbase_maturity() {
        let params = ConsensusParams::regtest();
        assert!(!params.is_mature(10, 11));
        assert!(params.is_mature(10, 12));
    }

    #[test]
    fn test_valid_amount() {
        let params = ConsensusParams::mainnet();
        assert!(params.is_valid_amount(COIN));
        assert!(params.is_valid_amount(params.max_money));
        assert!(!params.is_valid_amount(params.max_money + 1));
    }
}
