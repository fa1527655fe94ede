//! Transaction builder: coin selection, fee computation and signing
//!
//! Size is estimated as 8 bytes of version/locktime, the input and output
//! count varints, a flat 150 bytes per input and the exact size of every
//! output. Funding works on copies of the builder's inputs and outputs and
//! commits only on success, so a failed [`TxBuilder::fund`] leaves the builder
//! exactly as it was.

use crate::address::{Address, AddressPath};
use crate::covenant::CovenantType;
use crate::encoding::varint_size;
use crate::fees::FeeCalculator;
use crate::keys::Keyring;
use crate::transaction::{Input, Outpoint, Output, Transaction, SIGHASH_ALL};
use crate::{Error, Result};
use secp256k1::{Message, Secp256k1};

/// Estimated size of one signed p2pkh input
pub const INPUT_SIZE_ESTIMATE: usize = 150;

/// A coin the builder may spend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingCoin {
    /// Outpoint being spent
    pub outpoint: Outpoint,
    /// Value in subunits
    pub value: u64,
    /// Owning address
    pub address: Address,
    /// Derivation path of the owning address
    pub path: AddressPath,
    /// Covenant type of the coin
    pub covenant_type: CovenantType,
}

/// Outcome of a successful [`TxBuilder::fund`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundResult {
    /// Fee paid
    pub fee: u64,
    /// Change value, if a change output was added
    pub change: Option<u64>,
    /// Coins added from the pool
    pub added: usize,
    /// Final size estimate
    pub size: usize,
}

/// Incremental transaction builder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxBuilder {
    coins: Vec<FundingCoin>,
    outputs: Vec<Output>,
    locktime: u32,
    fee: u64,
}

fn sum_values<I: IntoIterator<Item = u64>>(values: I, what: &str) -> Result<u64> {
    values.into_iter().try_fold(0u64, |acc, v| {
        acc.checked_add(v)
            .ok_or_else(|| Error::AmountOverflow(what.to_string()))
    })
}

/// Size estimate for `inputs` inputs and the given outputs
pub fn estimate_size(inputs: usize, outputs: &[Output]) -> usize {
    8 + varint_size(inputs as u64)
        + varint_size(outputs.len() as u64)
        + INPUT_SIZE_ESTIMATE * inputs
        + outputs.iter().map(Output::size).sum::<usize>()
}

impl TxBuilder {
    /// Empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an output and return its index
    pub fn add_output(&mut self, output: Output) -> usize {
        self.outputs.push(output);
        self.outputs.len() - 1
    }

    /// Attach a specific coin as the next input and return its index.
    ///
    /// Used when an input must line up with the covenant output at the same
    /// index, e.g. a BID coin feeding its REVEAL.
    pub fn add_coin(&mut self, coin: FundingCoin) -> usize {
        self.coins.push(coin);
        self.coins.len() - 1
    }

    /// Set the lock time
    pub fn set_locktime(&mut self, locktime: u32) {
        self.locktime = locktime;
    }

    /// Attached coins
    pub fn coins(&self) -> &[FundingCoin] {
        &self.coins
    }

    /// Outputs so far
    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// Fee set by the last successful `fund`
    pub fn fee(&self) -> u64 {
        self.fee
    }

    /// Size estimate for the current inputs and outputs
    pub fn estimate_size(&self) -> usize {
        estimate_size(self.coins.len(), &self.outputs)
    }

    /// Sum of attached coin values
    pub fn input_value(&self) -> Result<u64> {
        sum_values(self.coins.iter().map(|c| c.value), "input sum")
    }

    /// Sum of output values
    pub fn output_value(&self) -> Result<u64> {
        sum_values(self.outputs.iter().map(|o| o.value), "output sum")
    }

    /// Add coins from `pool` (smallest first) until outputs plus fee are covered,
    /// then add change to `change_address` unless the change would not pay for
    /// its own output.
    pub fn fund(
        &mut self,
        pool: &[FundingCoin],
        change_address: &Address,
        fee_rate: u64,
    ) -> Result<FundResult> {
        let calc = FeeCalculator::new(fee_rate);
        let mut coins = self.coins.clone();
        let mut outputs = self.outputs.clone();
        let out_total = self.output_value()?;
        let mut in_total = self.input_value()?;

        let mut candidates: Vec<&FundingCoin> = pool
            .iter()
            .filter(|c| !coins.iter().any(|a| a.outpoint == c.outpoint))
            .collect();
        candidates.sort_by_key(|c| c.value);
        let mut candidates = candidates.into_iter();
        let mut added = 0usize;

        loop {
            let size = estimate_size(coins.len(), &outputs);
            let fee = calc.fee_for_size(size)?;
            let need = out_total
                .checked_add(fee)
                .ok_or_else(|| Error::AmountOverflow("outputs plus fee".to_string()))?;

            if in_total >= need {
                let mut result = FundResult {
                    fee,
                    change: None,
                    added,
                    size,
                };
                if in_total > need {
                    let change = Output::payment(change_address.clone(), 0);
                    let size_with_change = size + change.size()
                        + varint_size(outputs.len() as u64 + 1)
                        - varint_size(outputs.len() as u64);
                    let fee_with_change = calc.fee_for_size(size_with_change)?;
                    let remainder = in_total - out_total;
                    if remainder > fee_with_change {
                        let value = remainder - fee_with_change;
                        outputs.push(Output::payment(change_address.clone(), value));
                        result.fee = fee_with_change;
                        result.change = Some(value);
                        result.size = size_with_change;
                    } else {
                        result.fee = remainder;
                    }
                }

                tracing::debug!(
                    "Funded: {} inputs (+{}), fee={}, change={:?}",
                    coins.len(),
                    added,
                    result.fee,
                    result.change
                );
                self.coins = coins;
                self.outputs = outputs;
                self.fee = result.fee;
                return Ok(result);
            }

            match candidates.next() {
                Some(coin) => {
                    in_total = in_total
                        .checked_add(coin.value)
                        .ok_or_else(|| Error::AmountOverflow("input sum".to_string()))?;
                    coins.push(coin.clone());
                    added += 1;
                }
                None => {
                    return Err(Error::InsufficientFunds(format!(
                        "Required {} subunits plus fee {}, have {}",
                        out_total, fee, in_total
                    )));
                }
            }
        }
    }

    /// Unsigned transaction for the current state
    pub fn build_unsigned(&self) -> Transaction {
        Transaction {
            version: 0,
            inputs: self
                .coins
                .iter()
                .map(|c| Input::new(c.outpoint))
                .collect(),
            outputs: self.outputs.clone(),
            locktime: self.locktime,
        }
    }

    /// Sign every input with p2pkh witnesses
    pub fn sign(&self, keyring: &Keyring) -> Result<Transaction> {
        if self.coins.is_empty() {
            return Err(Error::TransactionBuild("transaction has no inputs".to_string()));
        }
        let mut tx = self.build_unsigned();
        let secp = Secp256k1::signing_only();

        for (index, coin) in self.coins.iter().enumerate() {
            let secret = keyring.secret_key(coin.path)?;
            let public = keyring.public_key(coin.path)?;
            if Address::from_pubkey(&public) != coin.address {
                return Err(Error::TransactionSigning(format!(
                    "coin {} does not belong to path {:?}",
                    coin.outpoint, coin.path
                )));
            }
            let script = coin.address.p2pkh_script()?;
            let sighash = tx.signature_hash(index, &script, coin.value, SIGHASH_ALL)?;
            let message = Message::from_slice(&sighash.0)
                .map_err(|e| Error::TransactionSigning(e.to_string()))?;
            let signature = secp.sign_ecdsa(&message, &secret);

            let mut sig = signature.serialize_compact().to_vec();
            sig.push(SIGHASH_ALL as u8);
            tx.inputs[index].witness = vec![sig, public.to_vec()];
        }

        tracing::debug!("Signed transaction {}", tx.txid());
        Ok(tx)
    }
}
