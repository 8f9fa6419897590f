//! MSB-first bit reader with the Exp-Golomb reads used by SPS/slice parsing.

use shared::error::{Error, Result};

pub struct BitReader<'a> {
    data: &'a [u8],
    /// Absolute bit position from the start of `data`.
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitReader { data, pos: 0 }
    }

    pub fn bits_left(&self) -> usize {
        self.data.len() * 8 - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.bits_left() == 0
    }

    pub fn read_bit(&mut self) -> Result<u8> {
        if self.is_empty() {
            return Err(Error::BufferShort {
                need: 1,
                left: 0,
            });
        }
        let byte = self.data[self.pos / 8];
        let bit = (byte >> (7 - self.pos % 8)) & 0x01;
        self.pos += 1;
        Ok(bit)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_bit()? == 1)
    }

    /// Read up to 32 bits MSB-first.
    pub fn read_bits(&mut self, n: usize) -> Result<u32> {
        debug_assert!(n <= 32);
        let mut v = 0u32;
        for _ in 0..n {
            v = (v << 1) | self.read_bit()? as u32;
        }
        Ok(v)
    }

    pub fn skip_bits(&mut self, n: usize) -> Result<()> {
        if self.bits_left() < n {
            return Err(Error::BufferShort {
                need: n.div_ceil(8),
                left: self.bits_left() / 8,
            });
        }
        self.pos += n;
        Ok(())
    }

    /// ue(v): unsigned Exp-Golomb, ISO/IEC 14496-10 §9.1.
    pub fn read_ue(&mut self) -> Result<u32> {
        let mut leading_zeros = 0usize;
        loop {
            if self.read_bit()? == 1 {
                break;
            }
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(Error::AvcDecode("ue(v) leading zeros overflow".into()));
            }
        }
        let suffix = self.read_bits(leading_zeros)?;
        Ok((1u32 << leading_zeros) - 1 + suffix)
    }

    /// se(v): signed Exp-Golomb, mapped per §9.1.1.
    pub fn read_se(&mut self) -> Result<i32> {
        let ue = self.read_ue()?;
        let v = ue.div_ceil(2) as i32;
        Ok(if ue % 2 == 0 { -v } else { v })
    }
}
