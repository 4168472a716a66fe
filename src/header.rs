use crate::bitreader::BitReader;
use crate::error::{ErrorContext, ErrorKind, Res};
use crate::huffman::HuffGroup;
use std::io::Read;

const COMPRESSED_MAGIC: u64 = 0x3141_5926_5359;
const EOS_MAGIC: u64 = 0x1772_4538_5090;

struct Ctx<'a>(&'a str);
impl ErrorContext for Ctx<'_> {
    fn describe(&self) -> Option<String> {
        Some(self.0.into())
    }
}

/// Parses and validates the 4-byte `"BZh" + digit` stream header, returning
/// the block size digit (1..=9).
pub fn read_stream_header<In: Read>(r: &mut BitReader<In>) -> Res<u32> {
    let ctx = Ctx("stream header");
    let magic = r.get_bits(24)?;
    if magic != 0x425A_68 {
        ctx.raise::<()>(ErrorKind::NotBzipData, "missing \"BZh\" signature".into())?;
    }
    let digit = r.get_bits(8)?;
    if !(b'1'..=b'9').contains(&(digit as u8)) {
        ctx.raise::<()>(ErrorKind::NotBzipData, "block size digit out of range".into())?;
    }
    Ok(digit - u32::from(b'0'))
}

pub enum BlockMagic {
    Compressed,
    EndOfStream { stream_crc: u32 },
}

/// Reads the 48-bit per-block magic and, for an end-of-stream marker, the
/// trailing stream CRC.
pub fn read_block_magic<In: Read>(r: &mut BitReader<In>) -> Res<BlockMagic> {
    let ctx = Ctx("block magic");
    let hi = u64::from(r.get_bits(24)?);
    let lo = u64::from(r.get_bits(24)?);
    let magic = (hi << 24) | lo;
    if magic == COMPRESSED_MAGIC {
        Ok(BlockMagic::Compressed)
    } else if magic == EOS_MAGIC {
        let stream_crc = r.get_bits(32)?;
        Ok(BlockMagic::EndOfStream { stream_crc })
    } else {
        ctx.raise(ErrorKind::NotBzipData, "unrecognized block magic".into())
            .map_err(Into::into)
    }
}

/// Everything parsed from a compressed block's header, ready to drive
/// symbol decoding.
pub struct CompressedBlockHeader {
    pub crc: u32,
    pub orig_ptr: u32,
    pub sym_to_byte: Vec<u8>,
    pub group_count: usize,
    pub selectors: Vec<u8>,
    pub groups: Vec<HuffGroup>,
    /// Number of in-alphabet symbols (excludes RUNA/RUNB and EOB).
    pub sym_total: usize,
}

pub fn read_compressed_block_header<In: Read>(
    r: &mut BitReader<In>,
) -> Res<CompressedBlockHeader> {
    let ctx = Ctx("compressed block header");

    let crc = r.get_bits(32)?;

    if r.get_bit()? {
        ctx.raise::<()>(ErrorKind::ObsoleteInput, "randomized block".into())?;
    }

    let orig_ptr = r.get_bits(24)?;

    let segment_mask = r.get_bits(16)?;
    let mut sym_to_byte = Vec::new();
    for i in 0..16 {
        if segment_mask & (0x8000 >> i) != 0 {
            let sub_mask = r.get_bits(16)?;
            for j in 0..16 {
                if sub_mask & (0x8000 >> j) != 0 {
                    sym_to_byte.push((16 * i + j) as u8);
                }
            }
        }
    }
    let sym_total = sym_to_byte.len();
    if sym_total == 0 {
        ctx.raise::<()>(ErrorKind::DataError, "empty symbol map".into())?;
    }

    let group_count = r.get_bits(3)? as usize;
    if !(2..=6).contains(&group_count) {
        ctx.raise::<()>(ErrorKind::DataError, "group count out of range".into())?;
    }

    let n_selectors = r.get_bits(15)? as usize;
    if n_selectors == 0 {
        ctx.raise::<()>(ErrorKind::DataError, "no selectors".into())?;
    }

    let mut mtf_groups: Vec<u8> = (0..group_count as u8).collect();
    let mut selectors = Vec::with_capacity(n_selectors);
    for _ in 0..n_selectors {
        let mut j = 0usize;
        while r.get_bit()? {
            j += 1;
            if j >= group_count {
                ctx.raise::<()>(ErrorKind::DataError, "selector MTF index too large".into())?;
            }
        }
        let selected = mtf_groups[j];
        mtf_groups.copy_within(0..j, 1);
        mtf_groups[0] = selected;
        selectors.push(selected);
    }

    let sym_count = sym_total + 2;
    let mut groups = Vec::with_capacity(group_count);
    for _ in 0..group_count {
        let mut len = r.get_bits(5)? as i32;
        let mut lengths = Vec::with_capacity(sym_count);
        for _ in 0..sym_count {
            loop {
                if !(1..=20).contains(&len) {
                    ctx.raise::<()>(ErrorKind::DataError, "huffman code length out of range".into())?;
                }
                if !r.get_bit()? {
                    // committing this length: the bit we just consumed ("0")
                    // terminates the delta loop for this symbol.
                    break;
                }
                if r.get_bit()? {
                    len += 1;
                } else {
                    len -= 1;
                }
            }
            lengths.push(len as u8);
        }
        groups.push(HuffGroup::build(&lengths)?);
    }

    Ok(CompressedBlockHeader {
        crc,
        orig_ptr,
        sym_to_byte,
        group_count,
        selectors,
        groups,
        sym_total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn bits(s: &str) -> Vec<u8> {
        let s: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        let mut out = Vec::new();
        for chunk in s.as_bytes().chunks(8) {
            let mut byte = 0u8;
            for (i, &c) in chunk.iter().enumerate() {
                if c == b'1' {
                    byte |= 0x80 >> i;
                }
            }
            out.push(byte);
        }
        out
    }

    #[test_log::test]
    fn parses_stream_header_digit() {
        let data = bits(&format!(
            "{:024b}{:08b}",
            0x425A68u32,
            b'9'
        ));
        let mut r = BitReader::new(Cursor::new(data));
        assert_eq!(read_stream_header(&mut r).unwrap(), 9);
    }

    #[test_log::test]
    fn rejects_bad_stream_magic() {
        let data = bits(&format!("{:024b}{:08b}", 0x000000u32, b'9'));
        let mut r = BitReader::new(Cursor::new(data));
        let err = read_stream_header(&mut r).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotBzipData);
    }

    #[test_log::test]
    fn recognizes_end_of_stream_magic() {
        let data = bits(&format!("{:048b}{:032b}", EOS_MAGIC, 0u32));
        let mut r = BitReader::new(Cursor::new(data));
        match read_block_magic(&mut r).unwrap() {
            BlockMagic::EndOfStream { stream_crc } => assert_eq!(stream_crc, 0),
            BlockMagic::Compressed => panic!("expected end of stream"),
        }
    }

    #[test_log::test]
    fn recognizes_compressed_block_magic() {
        let data = bits(&format!("{:048b}", COMPRESSED_MAGIC));
        let mut r = BitReader::new(Cursor::new(data));
        match read_block_magic(&mut r).unwrap() {
            BlockMagic::Compressed => {}
            BlockMagic::EndOfStream { .. } => panic!("expected compressed block"),
        }
    }
}
