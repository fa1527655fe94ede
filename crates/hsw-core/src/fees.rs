//! Transaction fee calculation
//!
//! Fees are a rate in subunits per estimated byte. The node reports its
//! estimate in whole coins per kilobyte; [`fee_rate_from_estimate`] converts
//! and clamps it to the active [`FeePolicy`].

use crate::{Error, Result};
use hsw_params::COIN;
use serde::{Deserialize, Serialize};

/// Default fee rate (subunits per byte)
pub const DEFAULT_FEE_RATE: u64 = 100;

/// Minimum fee rate (subunits per byte)
pub const MIN_FEE_RATE: u64 = 1;

/// Maximum fee rate (safety limit, subunits per byte)
pub const MAX_FEE_RATE: u64 = 10_000;

/// Absolute fee ceiling for a single transaction: 1 coin
pub const MAX_FEE: u64 = COIN;

/// Fee rate bounds used by the wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeePolicy {
    /// Rate used when the node has no estimate
    pub default_rate: u64,
    /// Floor
    pub min_rate: u64,
    /// Ceiling
    pub max_rate: u64,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            default_rate: DEFAULT_FEE_RATE,
            min_rate: MIN_FEE_RATE,
            max_rate: MAX_FEE_RATE,
        }
    }
}

impl FeePolicy {
    /// Clamp a rate into `[min_rate, max_rate]`
    pub fn clamp(&self, rate: u64) -> u64 {
        rate.clamp(self.min_rate, self.max_rate.max(self.min_rate))
    }

    /// Reject inverted bounds
    pub fn validate(&self) -> Result<()> {
        if self.min_rate == 0 || self.min_rate > self.max_rate {
            return Err(Error::FeeCalculation(format!(
                "invalid fee policy: min {} max {}",
                self.min_rate, self.max_rate
            )));
        }
        if !(self.min_rate..=self.max_rate).contains(&self.default_rate) {
            return Err(Error::FeeCalculation(format!(
                "default rate {} outside [{}, {}]",
                self.default_rate, self.min_rate, self.max_rate
            )));
        }
        Ok(())
    }
}

/// Convert a node estimate (coins per kB) to subunits per byte
///
/// Non-positive or non-finite estimates mean "no data" and fall back to the
/// policy default.
pub fn fee_rate_from_estimate(coins_per_kb: f64, policy: &FeePolicy) -> u64 {
    if !coins_per_kb.is_finite() || coins_per_kb <= 0.0 {
        return policy.default_rate;
    }
    let per_kb = (coins_per_kb * COIN as f64).round();
    let per_byte = (per_kb / 1000.0).ceil() as u64;
    policy.clamp(per_byte)
}

/// Fee calculator for a fixed rate
#[derive(Debug, Clone, Copy)]
pub struct FeeCalculator {
    rate: u64,
}

impl FeeCalculator {
    /// Calculator at `rate` subunits per byte
    pub fn new(rate: u64) -> Self {
        Self { rate }
    }

    /// Rate in use
    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Fee for an estimated size
    pub fn fee_for_size(&self, size: usize) -> Result<u64> {
        let fee = (size as u64).checked_mul(self.rate).ok_or_else(|| {
            Error::FeeCalculation(format!("fee overflow: {} bytes at {}", size, self.rate))
        })?;

        if fee > MAX_FEE {
            return Err(Error::FeeCalculation(format!(
                "Calculated fee {} exceeds maximum {}",
                fee, MAX_FEE
            )));
        }

        tracing::trace!("fee {} for {} bytes at {}/byte", fee, size, self.rate);
        Ok(fee)
    }
}

impl Default for FeeCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_FEE_RATE)
    }
}
