// Big-endian bit reader for packed bitfields

use crate::error::{DecodeError, DecodeResult};

/// Reads bit groups most-significant bit first. Reads are bounds-checked.
#[derive(Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    pub const fn bits_remaining(&self) -> usize {
        self.data
            .len()
            .saturating_mul(8)
            .saturating_sub(self.bit_pos)
    }

    pub const fn bit_position(&self) -> usize {
        self.bit_pos
    }

    /// Reads up to 64 bits as an unsigned integer.
    pub fn read_bits(&mut self, bits: u32) -> DecodeResult<u64> {
        let bits = bits.min(64) as usize;
        if bits > self.bits_remaining() {
            return Err(DecodeError::Underrun {
                needed: (self.bit_pos + bits).div_ceil(8),
                available: self.data.len(),
            });
        }
        let mut value = 0u64;
        for _ in 0..bits {
            let byte = self.data[self.bit_pos / 8];
            let bit = (byte >> (7 - self.bit_pos % 8)) & 1;
            value = (value << 1) | u64::from(bit);
            self.bit_pos += 1;
        }
        Ok(value)
    }
}

/// Sign-extends the low `bits` bits of `raw`.
pub fn sign_extend(raw: u64, bits: u32) -> i64 {
    if bits == 0 || bits >= 64 {
        return raw as i64;
    }
    let shift = 64 - bits;
    ((raw << shift) as i64) >> shift
}
