//! Block headers and blocks

use crate::encoding::{Decodable, Decoder, Encodable, Encoder};
use crate::hash::{blake2b256, blake2b512, sha3_256, Hash};
use crate::transaction::Transaction;
use crate::Result;

/// Serialized header size
pub const HEADER_SIZE: usize = 236;

/// Block header
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockHeader {
    /// Nonce
    pub nonce: u32,
    /// Timestamp
    pub time: u64,
    /// Previous block hash
    pub prev_block: Hash,
    /// Name tree root
    pub tree_root: Hash,
    /// Extra nonce
    pub extra_nonce: [u8; 24],
    /// Reserved root
    pub reserved_root: Hash,
    /// Witness merkle root
    pub witness_root: Hash,
    /// Transaction merkle root
    pub merkle_root: Hash,
    /// Version
    pub version: u32,
    /// Compact target
    pub bits: u32,
    /// Share mask
    pub mask: Hash,
}

impl BlockHeader {
    fn padding(&self, size: usize) -> Vec<u8> {
        (0..size)
            .map(|i| self.prev_block.0[i % 32] ^ self.tree_root.0[i % 32])
            .collect()
    }

    fn sub_head(&self) -> Vec<u8> {
        let mut enc = Encoder::with_capacity(128);
        enc.write_bytes(&self.extra_nonce);
        self.reserved_root.encode_to(&mut enc);
        self.witness_root.encode_to(&mut enc);
        self.merkle_root.encode_to(&mut enc);
        enc.write_u32_le(self.version);
        enc.write_u32_le(self.bits);
        enc.into_inner()
    }

    fn commit_hash(&self) -> Hash {
        let mask_hash = blake2b256(&[&self.prev_block.0, &self.mask.0]);
        blake2b256(&[&self.sub_head(), &mask_hash.0])
    }

    fn pre_head(&self) -> Vec<u8> {
        let mut enc = Encoder::with_capacity(128);
        enc.write_u32_le(self.nonce);
        enc.write_u64_le(self.time);
        enc.write_bytes(&self.padding(20));
        self.prev_block.encode_to(&mut enc);
        self.tree_root.encode_to(&mut enc);
        self.commit_hash().encode_to(&mut enc);
        enc.into_inner()
    }

    /// Block hash (proof-of-work hash XOR mask)
    pub fn hash(&self) -> Hash {
        let data = self.pre_head();
        let left = blake2b512(&[&data]);
        let right = sha3_256(&[&data, &self.padding(8)]);
        let mut hash = blake2b256(&[&left, &self.padding(32), &right.0]);
        for (byte, m) in hash.0.iter_mut().zip(self.mask.0.iter()) {
            *byte ^= m;
        }
        hash
    }
}

impl Encodable for BlockHeader {
    fn encode_to(&self, encoder: &mut Encoder) {
        encoder.write_u32_le(self.nonce);
        encoder.write_u64_le(self.time);
        self.prev_block.encode_to(encoder);
        self.tree_root.encode_to(encoder);
        encoder.write_bytes(&self.extra_nonce);
        self.reserved_root.encode_to(encoder);
        self.witness_root.encode_to(encoder);
        self.merkle_root.encode_to(encoder);
        encoder.write_u32_le(self.version);
        encoder.write_u32_le(self.bits);
        self.mask.encode_to(encoder);
    }
}

impl Decodable for BlockHeader {
    fn decode_from(decoder: &mut Decoder<'_>) -> Result<Self> {
        Ok(Self {
            nonce: decoder.read_u32_le()?,
            time: decoder.read_u64_le()?,
            prev_block: Hash::decode_from(decoder)?,
            tree_root: Hash::decode_from(decoder)?,
            extra_nonce: decoder.read_fixed()?,
            reserved_root: Hash::decode_from(decoder)?,
            witness_root: Hash::decode_from(decoder)?,
            merkle_root: Hash::decode_from(decoder)?,
            version: decoder.read_u32_le()?,
            bits: decoder.read_u32_le()?,
            mask: Hash::decode_from(decoder)?,
        })
    }
}

/// A full block
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    /// Header
    pub header: BlockHeader,
    /// Transactions, coinbase first
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Block hash
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Hash computed from the header prefix of a raw block, without decoding transactions
    pub fn hash_from_raw(raw: &[u8]) -> Result<Hash> {
        let mut decoder = Decoder::new(raw);
        Ok(BlockHeader::decode_from(&mut decoder)?.hash())
    }
}

impl Encodable for Block {
    fn encode_to(&self, encoder: &mut Encoder) {
        self.header.encode_to(encoder);
        encoder.write_varint(self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.encode_to(encoder);
        }
    }
}

impl Decodable for Block {
    fn decode_from(decoder: &mut Decoder<'_>) -> Result<Self> {
        let header = BlockHeader::decode_from(decoder)?;
        let count = decoder.read_len()?;
        let mut transactions = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            transactions.push(Transaction::decode_from(decoder)?);
        }
        Ok(Self {
            header,
            transactions,
        })
    }
}
