use crate::bitreader::BitReader;
use crate::error::{ErrorContext, ErrorKind, Res, ResultBuilder};
use crate::header::CompressedBlockHeader;
use std::io::Read;

struct Ctx;
impl ErrorContext for Ctx {
    fn describe(&self) -> Option<String> {
        Some("block decoder".into())
    }
}

const GROUP_SPAN: u32 = 50;

/// Decodes one compressed block's symbol stream into the intermediate
/// `dbuf`/`byte_count` pair the IBWT stage consumes.
///
/// Runs the group-scheduled Huffman decode, the RLE2 run-length expansion,
/// and the Move-To-Front inversion in a single pass; `dbuf` entries hold only
/// the decoded byte (low 8 bits) at this stage, the IBWT build step fills in
/// the high-bits successor pointers afterward.
pub fn decode_block<In: Read>(
    r: &mut BitReader<In>,
    header: &CompressedBlockHeader,
    dbuf_size: usize,
    dbuf: &mut Vec<u32>,
) -> Res<[u32; 256]> {
    let ctx = Ctx;
    let sym_total = header.sym_total;
    let eob = sym_total as u16 + 1;

    let mut mtf: Vec<u8> = (0..sym_total as u8).collect();
    dbuf.clear();
    let mut byte_count = [0u32; 256];

    let mut run_pos: u32 = 0;
    let mut run_len: u64 = 0;

    let mut selector_idx = 0usize;
    let mut symbols_left = 0u32;

    loop {
        if symbols_left == 0 {
            ctx.assert(
                selector_idx < header.selectors.len(),
                ErrorKind::DataError,
                "selector list exhausted",
            )?;
            selector_idx += 1;
            symbols_left = GROUP_SPAN;
        }
        symbols_left -= 1;
        let selector = header.selectors[selector_idx - 1];
        let group = header
            .groups
            .get(selector as usize)
            .message(|_| "selector group out of range".into())?;

        let sym = group.decode(r)?;

        if sym == eob {
            flush_run(&ctx, dbuf, &mut byte_count, &mut run_len, &mtf, header, dbuf_size)?;
            break;
        }

        if sym == 0 || sym == 1 {
            if run_pos == 0 {
                run_pos = 1;
                run_len = 0;
            }
            run_len = run_len
                .checked_add(u64::from(run_pos) << sym)
                .message(|_| "run length overflow".into())?;
            run_pos = run_pos
                .checked_shl(1)
                .message(|_| "run length overflow".into())?;
            continue;
        }

        flush_run(&ctx, dbuf, &mut byte_count, &mut run_len, &mtf, header, dbuf_size)?;
        run_pos = 0;

        let j = usize::from(sym - 1);
        ctx.assert(j > 0 && j < mtf.len(), ErrorKind::DataError, "mtf index out of range")?;
        let uc = mtf[j];
        mtf.copy_within(0..j, 1);
        mtf[0] = uc;

        ctx.assert(dbuf.len() < dbuf_size, ErrorKind::DataError, "block exceeds buffer size")?;
        let byte = header.sym_to_byte[uc as usize];
        dbuf.push(u32::from(byte));
        byte_count[byte as usize] += 1;
    }

    log::trace!("decoded {} bytes into block buffer", dbuf.len());
    Ok(byte_count)
}

fn flush_run(
    ctx: &Ctx,
    dbuf: &mut Vec<u32>,
    byte_count: &mut [u32; 256],
    run_len: &mut u64,
    mtf: &[u8],
    header: &CompressedBlockHeader,
    dbuf_size: usize,
) -> Res<()> {
    if *run_len > 0 {
        if dbuf.len() as u64 + *run_len > dbuf_size as u64 {
            ctx.raise::<()>(ErrorKind::DataError, "run overflows block buffer".into())?;
        }
        let byte = header.sym_to_byte[mtf[0] as usize];
        for _ in 0..*run_len {
            dbuf.push(u32::from(byte));
            byte_count[byte as usize] += 1;
        }
        *run_len = 0;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::huffman::HuffGroup;
    use std::io::Cursor;

    fn header_for(
        sym_to_byte: Vec<u8>,
        groups: Vec<HuffGroup>,
        selectors: Vec<u8>,
    ) -> CompressedBlockHeader {
        let sym_total = sym_to_byte.len();
        CompressedBlockHeader {
            crc: 0,
            orig_ptr: 0,
            sym_to_byte,
            group_count: groups.len(),
            selectors,
            groups,
            sym_total,
        }
    }

    #[test_log::test]
    fn decodes_plain_symbols_without_runs() {
        // Alphabet {a,b}: symTotal=2, symbols are 0=RUNA,1=RUNB,2=a,3=EOB.
        let group = HuffGroup::build(&[2, 2, 2, 2]).unwrap();
        let header = header_for(vec![b'a', b'b'], vec![group], vec![0]);
        // sequence: sym2 ("10") selects mtf index 1 (the initial identity mtf
        // puts 'b' at index 1), then sym3=EOB ("11").
        let mut r = BitReader::new(Cursor::new(vec![0b10_11_0000]));
        let mut dbuf = Vec::new();
        let byte_count = decode_block(&mut r, &header, 100, &mut dbuf).unwrap();
        assert_eq!(dbuf, vec![u32::from(b'b')]);
        assert_eq!(byte_count[b'b' as usize], 1);
    }

    #[test_log::test]
    fn expands_runa_runb_into_repeated_bytes() {
        // symTotal=1 (just 'x'): symbols 0=RUNA,1=RUNB,2=EOB.
        let group = HuffGroup::build(&[1, 2, 2]).unwrap();
        // codes: sym0="0", sym1="10", sym2="11"
        let header = header_for(vec![b'x'], vec![group], vec![0, 0]);
        // RUNA, RUNB, EOB => run_len = 1*1 + 2*2 = 5
        let mut r = BitReader::new(Cursor::new(vec![0b0_10_11_000]));
        let mut dbuf = Vec::new();
        let byte_count = decode_block(&mut r, &header, 100, &mut dbuf).unwrap();
        assert_eq!(dbuf.len(), 5);
        assert!(dbuf.iter().all(|&v| v == u32::from(b'x')));
        assert_eq!(byte_count[b'x' as usize], 5);
    }
}
