use crate::bitreader::BitReader;
use crate::error::{ErrorContext, ErrorKind, Res, ResultBuilder};
use std::io::Read;

pub const MAX_CODE_LEN: usize = 20;

/// A canonical Huffman decoding table for one of a block's coding groups.
///
/// `base` and `limit` are indexed by code length starting at 1 (`minLen` is
/// always `>= 1`), so both arrays are sized `MAX_CODE_LEN + 2` and index 0 is
/// unused, rather than shifting every access by one.
#[derive(Debug, Clone)]
pub struct HuffGroup {
    pub min_len: u32,
    pub max_len: u32,
    base: [i32; MAX_CODE_LEN + 2],
    limit: [i32; MAX_CODE_LEN + 2],
    permute: Vec<u16>,
}

struct Ctx;
impl ErrorContext for Ctx {
    fn describe(&self) -> Option<String> {
        Some("huffman table".into())
    }
}

impl HuffGroup {
    /// Builds canonical decoding tables from a set of per-symbol code lengths.
    pub fn build(lengths: &[u8]) -> Res<Self> {
        let ctx = Ctx;
        let min_len = lengths.iter().copied().min().message(|_| "empty code length table".into())?;
        let max_len = lengths.iter().copied().max().message(|_| "empty code length table".into())?;
        if !(1..=MAX_CODE_LEN as u8).contains(&min_len) || !(1..=MAX_CODE_LEN as u8).contains(&max_len) {
            ctx.data_error::<()>("code length out of range".into())?;
        }

        let mut permute = vec![0u16; lengths.len()];
        let mut next = 0usize;
        for len in min_len..=max_len {
            for (sym, &l) in lengths.iter().enumerate() {
                if l == len {
                    permute[next] = sym as u16;
                    next += 1;
                }
            }
        }

        let mut count = [0i32; MAX_CODE_LEN + 2];
        for &l in lengths {
            count[l as usize] += 1;
        }

        let mut base = [0i32; MAX_CODE_LEN + 2];
        let mut limit = [0i32; MAX_CODE_LEN + 2];
        let mut pp: i32 = 0;
        let mut cumulative = 0i32;
        for len in min_len..max_len {
            let len = len as usize;
            cumulative += count[len];
            limit[len] = ((pp + count[len]) << (max_len as usize - len)) - 1;
            pp = (pp + count[len]) << 1;
            base[len + 1] = pp - cumulative;
        }
        limit[max_len as usize] = pp + count[max_len as usize] - 1;
        base[min_len as usize] = 0;

        Ok(HuffGroup {
            min_len: min_len as u32,
            max_len: max_len as u32,
            base,
            limit,
            permute,
        })
    }

    /// Decodes the next symbol from the bit stream, consuming exactly as many
    /// bits as the code's length.
    pub fn decode<In: Read>(&self, r: &mut BitReader<In>) -> Res<u16> {
        let ctx = Ctx;
        let value = r.peek_bits(self.max_len)? as i32;
        let mut len = self.min_len;
        while len < self.max_len && value > self.limit[len as usize] {
            len += 1;
        }
        if value > self.limit[len as usize] {
            ctx.data_error::<u16>("huffman code exceeds table range".into())?;
        }
        r.consume_bits(self.max_len - len);
        let shifted = value >> (self.max_len - len);
        let idx = shifted - self.base[len as usize];
        match self.permute.get(idx as usize) {
            Some(&sym) => Ok(sym),
            None => ctx
                .data_error::<u16>("huffman symbol index out of range".into())
                .map_err(Into::into),
        }
    }

    /// `limit[maxLen] + 1` must equal `2^maxLen` for a complete canonical code.
    #[cfg(test)]
    fn is_complete(&self) -> bool {
        self.limit[self.max_len as usize] + 1 == (1i32 << self.max_len)
    }
}
