// Bounded byte cursor over one field's window of a message
// Fixed-width values are big-endian, varints are 7 bits per byte, low group first

use crate::error::{DecodeError, DecodeResult};

/// Maximum encoded length of a 32-bit varint.
pub const VARINT_MAX_BYTES: usize = 5;
/// Maximum encoded length of a 64-bit varint.
pub const VARLONG_MAX_BYTES: usize = 10;

#[derive(Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes consumed so far.
    pub const fn position(&self) -> usize {
        self.pos
    }

    pub const fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn ensure(&self, needed: usize) -> DecodeResult<()> {
        let available = self.remaining();
        if needed > available {
            return Err(DecodeError::Underrun { needed, available });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> DecodeResult<u8> {
        self.ensure(1)?;
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    pub fn read_bytes(&mut self, len: usize) -> DecodeResult<&'a [u8]> {
        self.ensure(len)?;
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Consumes everything left in the window.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let bytes = &self.data[self.pos.min(self.data.len())..];
        self.pos = self.data.len();
        bytes
    }

    fn read_array<const N: usize>(&mut self) -> DecodeResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u16(&mut self) -> DecodeResult<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> DecodeResult<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> DecodeResult<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    pub fn read_i8(&mut self) -> DecodeResult<i8> {
        Ok(i8::from_be_bytes(self.read_array()?))
    }

    pub fn read_i16(&mut self) -> DecodeResult<i16> {
        Ok(i16::from_be_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> DecodeResult<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> DecodeResult<i64> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    pub fn read_f32(&mut self) -> DecodeResult<f32> {
        Ok(f32::from_be_bytes(self.read_array()?))
    }

    pub fn read_f64(&mut self) -> DecodeResult<f64> {
        Ok(f64::from_be_bytes(self.read_array()?))
    }

    pub fn read_var_u32(&mut self) -> DecodeResult<u32> {
        let mut result: u32 = 0;
        for i in 0..VARINT_MAX_BYTES {
            let byte = self.read_u8()?;
            result |= u32::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(DecodeError::VarIntTooLong {
            max_bytes: VARINT_MAX_BYTES,
        })
    }

    pub fn read_var_u64(&mut self) -> DecodeResult<u64> {
        let mut result: u64 = 0;
        for i in 0..VARLONG_MAX_BYTES {
            let byte = self.read_u8()?;
            result |= u64::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(DecodeError::VarIntTooLong {
            max_bytes: VARLONG_MAX_BYTES,
        })
    }

    /// Reads a varint length prefix followed by that many bytes.
    pub fn read_prefixed(&mut self) -> DecodeResult<&'a [u8]> {
        let len = self.read_var_u32()? as usize;
        self.read_bytes(len)
    }
}

/// Encodes `value` as a 32-bit varint. Used to build test buffers and
/// packet-ID prefixes.
pub fn encode_var_u32(mut value: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(VARINT_MAX_BYTES);
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}
