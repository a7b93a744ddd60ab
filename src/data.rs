//! Byte buffers used by the wire encoding
//!
//! `DataMut` appends little-endian integers, varints and length-prefixed slices.
//! `DataReader` reads them back. Every read is bounds checked because the bytes come off
//! the network.

use integer_encoding::*;

use crate::encoding::DecodeError;

/// A varint never needs more than 10 bytes to encode 64 bits
const MAX_VARINT_SIZE: usize = 10;

#[derive(Debug, Default)]
pub struct DataMut {
    v: Vec<u8>
}

#[derive(Debug)]
pub struct DataReader<'a> {
    buffer: &'a [u8],
    offset: usize
}

impl DataMut {
    pub fn with_capacity(capacity: usize) -> DataMut {
        DataMut {
            v : Vec::with_capacity(capacity)
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        self.v
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.v[..]
    }

    pub fn len(&self) -> usize {
        self.v.len()
    }

    pub fn put_slice(&mut self, s: &[u8]) {
        self.v.extend_from_slice(s);
    }

    pub fn put_u8(&mut self, x: u8) {
        self.v.push(x);
    }

    pub fn put_u32_le(&mut self, x: u32) {
        self.put_slice(&x.to_le_bytes());
    }

    pub fn put_varint(&mut self, x: u64) {
        let mut buf = [0u8; MAX_VARINT_SIZE];
        let n = x.encode_var(&mut buf);
        self.put_slice(&buf[..n]);
    }

    /// Zig-zag encoded so that small negative numbers stay small
    pub fn put_signed_varint(&mut self, x: i64) {
        let mut buf = [0u8; MAX_VARINT_SIZE];
        let n = x.encode_var(&mut buf);
        self.put_slice(&buf[..n]);
    }

    pub fn put_varint_prefixed_slice(&mut self, s: &[u8]) {
        self.put_varint(s.len() as u64);
        self.put_slice(s);
    }
}

impl<'a> DataReader<'a> {
    pub fn new(buffer: &'a [u8]) -> DataReader<'a> {
        DataReader {
            buffer,
            offset: 0
        }
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.offset
    }

    fn remaining_bytes(&self) -> &'a [u8] {
        &self.buffer[self.offset ..]
    }

    pub fn get_slice(&mut self, nbytes: usize) -> Result<&'a [u8], DecodeError> {
        if nbytes > self.remaining() {
            return Err(DecodeError::Truncated);
        }
        let o = self.offset;
        self.offset += nbytes;
        Ok(&self.buffer[o .. o + nbytes])
    }

    pub fn get_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.get_slice(1)?[0])
    }

    pub fn get_u32_le(&mut self) -> Result<u32, DecodeError> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.get_slice(4)?);
        Ok(u32::from_le_bytes(b))
    }

    /// Returns the bytes of the next varint, including its terminating byte
    fn varint_bytes(&self) -> Result<&'a [u8], DecodeError> {
        let bytes = self.remaining_bytes();
        match bytes.iter().take(MAX_VARINT_SIZE).position(|b| b & 0x80 == 0) {
            Some(last) => Ok(&bytes[.. last + 1]),
            None => {
                if bytes.len() < MAX_VARINT_SIZE {
                    Err(DecodeError::Truncated)
                } else {
                    Err(DecodeError::Invalid("overlong varint"))
                }
            }
        }
    }

    pub fn get_varint(&mut self) -> Result<u64, DecodeError> {
        let bytes = self.varint_bytes()?;
        let (value, nbytes) = u64::decode_var(bytes);
        self.offset += nbytes;
        Ok(value)
    }

    pub fn get_signed_varint(&mut self) -> Result<i64, DecodeError> {
        let bytes = self.varint_bytes()?;
        let (value, nbytes) = i64::decode_var(bytes);
        self.offset += nbytes;
        Ok(value)
    }

    pub fn get_varint_prefixed_slice(&mut self) -> Result<&'a [u8], DecodeError> {
        let nbytes = self.get_varint()?;
        if nbytes > self.remaining() as u64 {
            return Err(DecodeError::Truncated);
        }
        self.get_slice(nbytes as usize)
    }
}
