//! Transactions, outpoints and signature hashing

use crate::address::Address;
use crate::covenant::Covenant;
use crate::encoding::{varint_size, Decodable, Decoder, Encodable, Encoder};
use crate::hash::{blake2b256, Hash};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SIGHASH_ALL
pub const SIGHASH_ALL: u32 = 1;

/// Sequence for final inputs
pub const DEFAULT_SEQUENCE: u32 = u32::MAX;

/// Reference to a transaction output
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Outpoint {
    /// Transaction id
    pub hash: Hash,
    /// Output index
    pub index: u32,
}

impl Outpoint {
    /// Create an outpoint
    pub const fn new(hash: Hash, index: u32) -> Self {
        Self { hash, index }
    }

    /// The null outpoint spent by coinbase inputs
    pub const fn null() -> Self {
        Self {
            hash: Hash::ZERO,
            index: u32::MAX,
        }
    }

    /// True for the coinbase prevout
    pub fn is_null(&self) -> bool {
        self.index == u32::MAX && self.hash.is_zero()
    }

    /// 36-byte key used for bloom filters
    pub fn to_key(&self) -> [u8; 36] {
        let mut key = [0u8; 36];
        key[..32].copy_from_slice(&self.hash.0);
        key[32..].copy_from_slice(&self.index.to_le_bytes());
        key
    }
}

impl fmt::Debug for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.hash, self.index)
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.hash, self.index)
    }
}

impl Encodable for Outpoint {
    fn encode_to(&self, encoder: &mut Encoder) {
        self.hash.encode_to(encoder);
        encoder.write_u32_le(self.index);
    }
}

impl Decodable for Outpoint {
    fn decode_from(decoder: &mut Decoder<'_>) -> Result<Self> {
        let hash = Hash::decode_from(decoder)?;
        let index = decoder.read_u32_le()?;
        Ok(Self { hash, index })
    }
}

/// Transaction input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    /// Output being spent
    pub prevout: Outpoint,
    /// Sequence number
    pub sequence: u32,
    /// Witness stack
    pub witness: Vec<Vec<u8>>,
}

impl Input {
    /// Unsigned input spending `prevout`
    pub fn new(prevout: Outpoint) -> Self {
        Self {
            prevout,
            sequence: DEFAULT_SEQUENCE,
            witness: Vec::new(),
        }
    }
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    /// Value in subunits
    pub value: u64,
    /// Recipient
    pub address: Address,
    /// Attached covenant
    pub covenant: Covenant,
}

impl Output {
    /// Plain payment output
    pub fn payment(address: Address, value: u64) -> Self {
        Self {
            value,
            address,
            covenant: Covenant::None,
        }
    }

    /// Exact serialized size
    pub fn size(&self) -> usize {
        8 + self.address.size() + self.covenant.size()
    }
}

impl Encodable for Output {
    fn encode_to(&self, encoder: &mut Encoder) {
        encoder.write_u64_le(self.value);
        self.address.encode_to(encoder);
        self.covenant.encode_to(encoder);
    }
}

impl Decodable for Output {
    fn decode_from(decoder: &mut Decoder<'_>) -> Result<Self> {
        let value = decoder.read_u64_le()?;
        let address = Address::decode_from(decoder)?;
        let covenant = Covenant::decode_from(decoder)?;
        Ok(Self {
            value,
            address,
            covenant,
        })
    }
}

/// A transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Version
    pub version: u32,
    /// Inputs
    pub inputs: Vec<Input>,
    /// Outputs
    pub outputs: Vec<Output>,
    /// Lock time
    pub locktime: u32,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            version: 0,
            inputs: Vec::new(),
            outputs: Vec::new(),
            locktime: 0,
        }
    }
}

impl Transaction {
    fn encode_base(&self, encoder: &mut Encoder) {
        encoder.write_u32_le(self.version);
        encoder.write_varint(self.inputs.len() as u64);
        for input in &self.inputs {
            input.prevout.encode_to(encoder);
            encoder.write_u32_le(input.sequence);
        }
        encoder.write_varint(self.outputs.len() as u64);
        for output in &self.outputs {
            output.encode_to(encoder);
        }
        encoder.write_u32_le(self.locktime);
    }

    /// Non-witness serialization
    pub fn base_bytes(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.encode_base(&mut encoder);
        encoder.into_inner()
    }

    /// Transaction id: blake2b-256 of the non-witness serialization
    pub fn txid(&self) -> Hash {
        blake2b256(&[&self.base_bytes()])
    }

    /// True when the single input spends the null outpoint
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// Sum of output values
    pub fn output_value(&self) -> Result<u64> {
        self.outputs.iter().try_fold(0u64, |acc, o| {
            acc.checked_add(o.value)
                .ok_or_else(|| Error::AmountOverflow("output sum".to_string()))
        })
    }

    /// Base size plus outputs, without inputs
    pub fn outputs_size(&self) -> usize {
        varint_size(self.outputs.len() as u64) + self.outputs.iter().map(Output::size).sum::<usize>()
    }

    /// Signature hash for input `index` spending `value` locked to `script`
    pub fn signature_hash(&self, index: usize, script: &[u8], value: u64, sighash_type: u32) -> Result<Hash> {
        let input = self.inputs.get(index).ok_or_else(|| {
            Error::TransactionSigning(format!("input {} out of range", index))
        })?;

        let mut prevouts = Encoder::with_capacity(self.inputs.len() * 36);
        let mut sequences = Encoder::with_capacity(self.inputs.len() * 4);
        for i in &self.inputs {
            i.prevout.encode_to(&mut prevouts);
            sequences.write_u32_le(i.sequence);
        }
        let mut outputs = Encoder::new();
        for o in &self.outputs {
            o.encode_to(&mut outputs);
        }

        let prevouts_hash = blake2b256(&[&prevouts.into_inner()]);
        let sequences_hash = blake2b256(&[&sequences.into_inner()]);
        let outputs_hash = blake2b256(&[&outputs.into_inner()]);

        let mut preimage = Encoder::with_capacity(256);
        preimage.write_u32_le(self.version);
        prevouts_hash.encode_to(&mut preimage);
        sequences_hash.encode_to(&mut preimage);
        input.prevout.encode_to(&mut preimage);
        preimage.write_var_bytes(script);
        preimage.write_u64_le(value);
        preimage.write_u32_le(input.sequence);
        outputs_hash.encode_to(&mut preimage);
        preimage.write_u32_le(self.locktime);
        preimage.write_u32_le(sighash_type);

        Ok(blake2b256(&[&preimage.into_inner()]))
    }
}

impl Encodable for Transaction {
    fn encode_to(&self, encoder: &mut Encoder) {
        self.encode_base(encoder);
        for input in &self.inputs {
            encoder.write_varint(input.witness.len() as u64);
            for item in &input.witness {
                encoder.write_var_bytes(item);
            }
        }
    }
}

impl Decodable for Transaction {
    fn decode_from(decoder: &mut Decoder<'_>) -> Result<Self> {
        let version = decoder.read_u32_le()?;

        let input_count = decoder.read_len()?;
        let mut inputs = Vec::with_capacity(input_count.min(1024));
        for _ in 0..input_count {
            let prevout = Outpoint::decode_from(decoder)?;
            let sequence = decoder.read_u32_le()?;
            inputs.push(Input {
                prevout,
                sequence,
                witness: Vec::new(),
            });
        }

        let output_count = decoder.read_len()?;
        let mut outputs = Vec::with_capacity(output_count.min(1024));
        for _ in 0..output_count {
            outputs.push(Output::decode_from(decoder)?);
        }

        let locktime = decoder.read_u32_le()?;

        for input in &mut inputs {
            let items = decoder.read_len()?;
            let mut witness = Vec::with_capacity(items.min(16));
            for _ in 0..items {
                witness.push(decoder.read_var_bytes()?);
            }
            input.witness = witness;
        }

        Ok(Self {
            version,
            inputs,
            outputs,
            locktime,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        let mut input = Input::new(Outpoint::new(Hash([8u8; 32]), 3));
        input.witness = vec![vec![1u8; 65], vec![2u8; 33]];
        Transaction {
            version: 0,
            inputs: vec![input],
            outputs: vec![Output::payment(Address::new(0, vec![5u8; 20]).unwrap(), 42)],
            locktime: 0,
        }
    }

    #[test]
    fn test_txid_ignores_witness() {
        let tx = sample_tx();
        let mut stripped = tx.clone();
        stripped.inputs[0].witness.clear();
        assert_eq!(tx.txid(), stripped.txid());
    }

    #[test]
    fn test_decode_matches_encode() {
        let tx = sample_tx();
        let decoded = Transaction::from_bytes(&tx.to_bytes()).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn test_truncated_transaction_rejected() {
        let bytes = sample_tx().to_bytes();
        assert!(Transaction::from_bytes(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn test_signature_hash_commits_to_value() {
        let tx = sample_tx();
        let script = tx.outputs[0].address.p2pkh_script().unwrap();
        let a = tx.signature_hash(0, &script, 100, SIGHASH_ALL).unwrap();
        let b = tx.signature_hash(0, &script, 101, SIGHASH_ALL).unwrap();
        assert_ne!(a, b);
        assert!(tx.signature_hash(1, &script, 100, SIGHASH_ALL).is_err());
    }

    #[test]
    fn test_coinbase_detection() {
        let mut tx = sample_tx();
        assert!(!tx.is_coinbase());
        tx.inputs[0].prevout = Outpoint::null();
        assert!(tx.is_coinbase());
    }
}
