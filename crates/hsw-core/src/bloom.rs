//! Append-only bloom filters for address and outpoint pre-filtering
//!
//! A filter never reports a false negative. Writers never mutate a filter
//! that readers can see: [`SharedBloom::update`] clones the current filter,
//! applies the insertions, lets the caller persist the result, and only then
//! swaps the new `Arc` in.

use crate::address::Address;
use crate::hash::blake2b256;
use crate::transaction::Outpoint;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::sync::Arc;

/// Expected element count for account filters
pub const DEFAULT_BLOOM_ITEMS: u64 = 1_000_000;

/// Target false-positive rate for account filters
pub const DEFAULT_BLOOM_FP_RATE: f64 = 1e-7;

const MAX_HASH_FUNCS: u32 = 50;
const SERIAL_HEADER: usize = 12;

/// Fixed-size bloom filter using double hashing over blake2b
#[derive(Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: u64,
    num_hashes: u32,
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .finish()
    }
}

impl BloomFilter {
    /// Size a filter for `items` elements at false-positive rate `fp_rate`
    pub fn new(items: u64, fp_rate: f64) -> Self {
        let items = items.max(1) as f64;
        let fp_rate = fp_rate.clamp(1e-12, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let num_bits = ((-items * fp_rate.ln()) / (ln2 * ln2)).ceil().max(8.0) as u64;
        let num_hashes = ((num_bits as f64 / items) * ln2).round() as u32;
        let num_bits = num_bits.div_ceil(8) * 8;
        Self {
            bits: vec![0u8; (num_bits / 8) as usize],
            num_bits,
            num_hashes: num_hashes.clamp(1, MAX_HASH_FUNCS),
        }
    }

    /// Filter sized for account use
    pub fn for_account() -> Self {
        Self::new(DEFAULT_BLOOM_ITEMS, DEFAULT_BLOOM_FP_RATE)
    }

    /// Number of bits
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Number of hash functions
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    fn positions(&self, data: &[u8]) -> impl Iterator<Item = u64> + '_ {
        let digest = blake2b256(&[data]);
        let mut lo = [0u8; 8];
        let mut hi = [0u8; 8];
        lo.copy_from_slice(&digest.0[..8]);
        hi.copy_from_slice(&digest.0[8..16]);
        let h1 = u64::from_le_bytes(lo);
        let h2 = u64::from_le_bytes(hi) | 1;
        let m = self.num_bits;
        (0..self.num_hashes as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % m)
    }

    /// Insert raw bytes
    pub fn insert(&mut self, data: &[u8]) {
        let positions: Vec<u64> = self.positions(data).collect();
        for pos in positions {
            self.bits[(pos / 8) as usize] |= 1 << (pos % 8);
        }
    }

    /// Test raw bytes
    pub fn contains(&self, data: &[u8]) -> bool {
        self.positions(data)
            .all(|pos| self.bits[(pos / 8) as usize] & (1 << (pos % 8)) != 0)
    }

    /// Insert an address (version ‖ program)
    pub fn insert_address(&mut self, address: &Address) {
        self.insert(&address_key(address));
    }

    /// Test an address
    pub fn contains_address(&self, address: &Address) -> bool {
        self.contains(&address_key(address))
    }

    /// Insert an outpoint
    pub fn insert_outpoint(&mut self, outpoint: &Outpoint) {
        self.insert(&outpoint.to_key());
    }

    /// Test an outpoint
    pub fn contains_outpoint(&self, outpoint: &Outpoint) -> bool {
        self.contains(&outpoint.to_key())
    }

    /// Serialize for storage
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SERIAL_HEADER + self.bits.len());
        out.extend_from_slice(&self.num_hashes.to_le_bytes());
        out.extend_from_slice(&self.num_bits.to_le_bytes());
        out.extend_from_slice(&self.bits);
        out
    }

    /// Restore a serialized filter
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SERIAL_HEADER {
            return Err(Error::Decode("bloom filter header truncated".to_string()));
        }
        let mut k = [0u8; 4];
        k.copy_from_slice(&bytes[..4]);
        let mut m = [0u8; 8];
        m.copy_from_slice(&bytes[4..12]);
        let num_hashes = u32::from_le_bytes(k);
        let num_bits = u64::from_le_bytes(m);
        let bits = bytes[SERIAL_HEADER..].to_vec();
        if num_hashes == 0 || num_hashes > MAX_HASH_FUNCS || num_bits == 0 || bits.len() as u64 * 8 != num_bits {
            return Err(Error::Decode(format!(
                "bloom filter shape mismatch: k={} m={} bytes={}",
                num_hashes,
                num_bits,
                bits.len()
            )));
        }
        Ok(Self {
            bits,
            num_bits,
            num_hashes,
        })
    }
}

fn address_key(address: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + address.hash.len());
    key.push(address.version);
    key.extend_from_slice(&address.hash);
    key
}

/// Shared filter handle with copy-then-swap updates
#[derive(Debug)]
pub struct SharedBloom {
    current: RwLock<Arc<BloomFilter>>,
}

impl SharedBloom {
    /// Wrap an initial filter
    pub fn new(filter: BloomFilter) -> Self {
        Self {
            current: RwLock::new(Arc::new(filter)),
        }
    }

    /// Consistent snapshot for readers
    pub fn snapshot(&self) -> Arc<BloomFilter> {
        self.current.read().clone()
    }

    /// Clone the current filter, apply `mutate`, hand the result to `persist`,
    /// and swap it in only if persisting succeeds.
    pub fn update<E, M, P>(&self, mutate: M, persist: P) -> std::result::Result<(), E>
    where
        M: FnOnce(&mut BloomFilter),
        P: FnOnce(&BloomFilter) -> std::result::Result<(), E>,
    {
        let mut next = (*self.snapshot()).clone();
        mutate(&mut next);
        persist(&next)?;
        *self.current.write() = Arc::new(next);
        Ok(())
    }

    /// Replace the filter outright (used when reloading from storage)
    pub fn replace(&self, filter: BloomFilter) {
        *self.current.write() = Arc::new(filter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Hash;

    #[test]
    fn test_sizing_for_account_defaults() {
        let filter = BloomFilter::for_account();
        // ~33.5M bits, ~23 hash functions for 1M items at 1e-7
        assert!(filter.num_bits() > 33_000_000 && filter.num_bits() < 34_000_000);
        assert_eq!(filter.num_hashes(), 23);
    }

    #[test]
    fn test_inserted_items_are_found() {
        let mut filter = BloomFilter::new(1_000, 1e-6);
        for i in 0u32..1_000 {
            filter.insert_outpoint(&Outpoint::new(Hash([7u8; 32]), i));
        }
        for i in 0u32..1_000 {
            assert!(filter.contains_outpoint(&Outpoint::new(Hash([7u8; 32]), i)));
        }
        assert!(!filter.contains_outpoint(&Outpoint::new(Hash([9u8; 32]), 0)));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut filter = BloomFilter::new(100, 0.01);
        filter.insert(b"abc");
        let restored = BloomFilter::from_bytes(&filter.to_bytes()).unwrap();
        assert_eq!(restored, filter);
        assert!(BloomFilter::from_bytes(&[0u8; 5]).is_err());
    }

    #[test]
    fn test_failed_persist_keeps_old_filter() {
        let shared = SharedBloom::new(BloomFilter::new(100, 0.01));
        let before = shared.snapshot();
        let res: std::result::Result<(), &str> =
            shared.update(|f| f.insert(b"new"), |_| Err("disk full"));
        assert!(res.is_err());
        assert!(!shared.snapshot().contains(b"new"));

        shared
            .update(|f| f.insert(b"new"), |_| Ok::<(), &str>(()))
            .unwrap();
        assert!(shared.snapshot().contains(b"new"));
        // Earlier snapshots are immutable
        assert!(!before.contains(b"new"));
    }
}
