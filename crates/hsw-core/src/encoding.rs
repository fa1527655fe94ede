//! Little-endian wire encoding with CompactSize varints

use crate::{Error, Result};

/// Upper bound for any length prefix read from the wire
const MAX_COMPACT_SIZE: u64 = 0x0200_0000;

/// Append-only byte encoder
#[derive(Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    /// Create an empty encoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an encoder with preallocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Take the encoded bytes
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// Write a single byte
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Write a u16 (LE)
    pub fn write_u16_le(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a u32 (LE)
    pub fn write_u32_le(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a u64 (LE)
    pub fn write_u64_le(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a CompactSize integer
    pub fn write_varint(&mut self, value: u64) {
        if value < 0xfd {
            self.write_u8(value as u8);
        } else if value <= 0xffff {
            self.write_u8(0xfd);
            self.write_u16_le(value as u16);
        } else if value <= 0xffff_ffff {
            self.write_u8(0xfe);
            self.write_u32_le(value as u32);
        } else {
            self.write_u8(0xff);
            self.write_u64_le(value);
        }
    }

    /// Write length-prefixed bytes
    pub fn write_var_bytes(&mut self, bytes: &[u8]) {
        self.write_varint(bytes.len() as u64);
        self.write_bytes(bytes);
    }
}

/// Serialized size of a CompactSize integer
pub const fn varint_size(value: u64) -> usize {
    if value < 0xfd {
        1
    } else if value <= 0xffff {
        3
    } else if value <= 0xffff_ffff {
        5
    } else {
        9
    }
}

/// Serialized size of length-prefixed bytes
pub const fn var_bytes_size(len: usize) -> usize {
    varint_size(len as u64) + len
}

/// Cursor over a borrowed byte slice
pub struct Decoder<'a> {
    input: &'a [u8],
    cursor: usize,
}

impl<'a> Decoder<'a> {
    /// Start decoding at the beginning of `input`
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, cursor: 0 }
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.input.len().saturating_sub(self.cursor)
    }

    /// Current read position
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// True once every byte has been consumed
    pub fn is_empty(&self) -> bool {
        self.cursor >= self.input.len()
    }

    /// Borrow the bytes between two positions already read
    pub fn span(&self, start: usize, end: usize) -> &'a [u8] {
        &self.input[start.min(end)..end.min(self.input.len())]
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(Error::Decode(format!(
                "unexpected end of input at offset {} (wanted {} bytes)",
                self.cursor, len
            )));
        }
        let start = self.cursor;
        self.cursor += len;
        Ok(&self.input[start..start + len])
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_slice(1)?[0])
    }

    /// Read a u16 (LE)
    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_fixed()?))
    }

    /// Read a u32 (LE)
    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_fixed()?))
    }

    /// Read a u64 (LE)
    pub fn read_u64_le(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_fixed()?))
    }

    /// Read a fixed-size array
    pub fn read_fixed<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.read_slice(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Read `len` bytes into a vector
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        Ok(self.read_slice(len)?.to_vec())
    }

    /// Read a canonical CompactSize integer
    pub fn read_varint(&mut self) -> Result<u64> {
        let prefix = self.read_u8()?;
        let value = match prefix {
            0xfd => {
                let value = self.read_u16_le()? as u64;
                if value < 0xfd {
                    return Err(Error::Decode("non-canonical varint".to_string()));
                }
                value
            }
            0xfe => {
                let value = self.read_u32_le()? as u64;
                if value < 0x1_0000 {
                    return Err(Error::Decode("non-canonical varint".to_string()));
                }
                value
            }
            0xff => {
                let value = self.read_u64_le()?;
                if value < 0x1_0000_0000 {
                    return Err(Error::Decode("non-canonical varint".to_string()));
                }
                value
            }
            small => small as u64,
        };

        if value > MAX_COMPACT_SIZE {
            return Err(Error::Decode(format!("compact size {} exceeds maximum", value)));
        }
        Ok(value)
    }

    /// Read a varint used as an element count or length
    pub fn read_len(&mut self) -> Result<usize> {
        let len = self.read_varint()?;
        usize::try_from(len).map_err(|_| Error::Decode("length overflows usize".to_string()))
    }

    /// Read length-prefixed bytes
    pub fn read_var_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_len()?;
        self.read_bytes(len)
    }
}

/// Types with a canonical wire encoding
pub trait Encodable {
    /// Append the encoding to `encoder`
    fn encode_to(&self, encoder: &mut Encoder);

    /// Encode into a fresh buffer
    fn to_bytes(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.encode_to(&mut encoder);
        encoder.into_inner()
    }
}

/// Types decodable from their wire encoding
pub trait Decodable: Sized {
    /// Read one value from `decoder`
    fn decode_from(decoder: &mut Decoder<'_>) -> Result<Self>;

    /// Decode a complete buffer, rejecting trailing bytes
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut decoder = Decoder::new(bytes);
        let value = Self::decode_from(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(Error::Decode(format!(
                "{} trailing bytes after decode",
                decoder.remaining()
            )));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_boundaries() {
        for value in [0u64, 0xfc, 0xfd, 0xffff, 0x1_0000, 0x01ff_ffff] {
            let mut enc = Encoder::new();
            enc.write_varint(value);
            let bytes = enc.into_inner();
            assert_eq!(bytes.len(), varint_size(value));
            let mut dec = Decoder::new(&bytes);
            assert_eq!(dec.read_varint().unwrap(), value);
            assert!(dec.is_empty());
        }
    }

    #[test]
    fn test_non_canonical_varint_rejected() {
        let mut dec = Decoder::new(&[0xfd, 0x10, 0x00]);
        assert!(dec.read_varint().is_err());
    }

    #[test]
    fn test_short_input_is_error() {
        let mut dec = Decoder::new(&[1, 2, 3]);
        assert!(dec.read_u32_le().is_err());
    }
}
