#![allow(clippy::too_many_arguments)]
#![warn(clippy::indexing_slicing, clippy::unwrap_used, clippy::panic)]

mod bitreader;
mod block_decoder;
mod crc;
pub mod error;
mod header;
mod huffman;
mod ibwt;

use crate::bitreader::BitReader;
use crate::crc::BlockCrc;
use crate::error::{BzError, ErrorBuilder, ErrorContext, ErrorKind, Res};
use crate::header::{read_block_magic, read_compressed_block_header, read_stream_header, BlockMagic};
use crate::ibwt::{build_links, Emitter};
use std::io::{Read, Write};

pub use crate::error::exit_status;

struct StreamCtx {
    blocks_seen: u32,
    total_crc: u32,
}

impl ErrorContext for StreamCtx {
    fn describe(&self) -> Option<String> {
        Some(format!(
            "stream decoder after {} block(s), running crc {:08x}",
            self.blocks_seen, self.total_crc
        ))
    }
}

/// One in-flight block's emit-side state: the filled `dbuf`, its IBWT walk
/// cursor, and the per-block CRC accumulator.
struct ActiveBlock {
    dbuf: Vec<u32>,
    emitter: Emitter,
    crc: BlockCrc,
    header_crc: u32,
}

enum State {
    NeedBlock,
    InBlock(Box<ActiveBlock>),
    Done,
    Failed(ErrorKind),
}

/// What happened in one step of the read loop, decided while `self.state` is
/// borrowed, and acted on afterward so state transitions never need a second
/// mutable borrow of `self` while `self.state` is still live.
enum Step {
    Byte(u8),
    BlockDone { crc: u32, header_crc: u32 },
    NeedNewBlock,
    StreamDone,
}

/// Streaming BZip2 decompressor.
///
/// Wraps a byte source and implements `std::io::Read`, pulling one compressed
/// block at a time: parses its header, runs the Huffman/MTF/RLE2 decode into
/// an intermediate buffer, then drives the inverse-BWT walk to emit original
/// bytes while checking the block's CRC. Once a call fails, the decoder
/// latches into a terminal state and every subsequent `read` returns the same
/// error without re-entering decode logic.
pub struct Decompressor<In: Read> {
    reader: BitReader<In>,
    dbuf_size: usize,
    ctx: StreamCtx,
    state: State,
}

impl<In: Read> Decompressor<In> {
    /// Parses the stream header and prepares to decode blocks. Does not read
    /// any block data yet.
    pub fn new(input: In) -> Res<Self> {
        let mut reader = BitReader::new(input);
        let digit = read_stream_header(&mut reader)?;
        let dbuf_size = 100_000 * digit as usize;
        log::debug!(
            "bzip2 stream header parsed: block size 100k x {}, dbuf_size {}",
            digit,
            dbuf_size
        );
        Ok(Decompressor {
            reader,
            dbuf_size,
            ctx: StreamCtx {
                blocks_seen: 0,
                total_crc: 0,
            },
            state: State::NeedBlock,
        })
    }

    /// Reads the next block magic and either starts decoding a new block
    /// (returning `true`) or finds end-of-stream, verifies the trailer CRC,
    /// and transitions to `Done` (returning `false`).
    fn start_block(&mut self) -> Res<bool> {
        match read_block_magic(&mut self.reader)? {
            BlockMagic::EndOfStream { stream_crc } => {
                log::debug!(
                    "end-of-stream marker after {} block(s), crc {:08x} (expected {:08x})",
                    self.ctx.blocks_seen,
                    self.ctx.total_crc,
                    stream_crc
                );
                self.ctx.assert_data(self.ctx.total_crc, stream_crc, "stream crc")?;
                self.state = State::Done;
                Ok(false)
            }
            BlockMagic::Compressed => {
                let hdr = read_compressed_block_header(&mut self.reader)?;
                self.ctx.blocks_seen += 1;
                log::debug!(
                    "block {}: {} groups, {} selectors, {} symbols, origPtr {}",
                    self.ctx.blocks_seen,
                    hdr.group_count,
                    hdr.selectors.len(),
                    hdr.sym_total,
                    hdr.orig_ptr
                );

                let mut dbuf = Vec::new();
                dbuf.try_reserve_exact(self.dbuf_size).map_err(|e| {
                    BzError::from(ErrorBuilder {
                        kind: ErrorKind::OutOfMemory,
                        message: Some(format!("failed to allocate {} dbuf words", self.dbuf_size)),
                        context: self.ctx.describe(),
                        source: Some(Box::new(e)),
                    })
                })?;

                let mut byte_count =
                    block_decoder::decode_block(&mut self.reader, &hdr, self.dbuf_size, &mut dbuf)?;
                build_links(&mut dbuf, &mut byte_count);
                let emitter = Emitter::new(&dbuf, hdr.orig_ptr)?;

                self.state = State::InBlock(Box::new(ActiveBlock {
                    dbuf,
                    emitter,
                    crc: BlockCrc::new(),
                    header_crc: hdr.crc,
                }));
                Ok(true)
            }
        }
    }

    fn try_read(&mut self, buf: &mut [u8]) -> Res<usize> {
        let mut written = 0;
        while written < buf.len() {
            let step = match &mut self.state {
                State::Failed(kind) => {
                    return self
                        .ctx
                        .raise(*kind, "decoder already failed".into())
                        .map_err(Into::into);
                }
                State::Done => Step::StreamDone,
                State::NeedBlock => Step::NeedNewBlock,
                State::InBlock(active) => match active.emitter.next(&active.dbuf, &mut active.crc)? {
                    Some(b) => Step::Byte(b),
                    None => Step::BlockDone {
                        crc: active.crc.finish(),
                        header_crc: active.header_crc,
                    },
                },
            };

            match step {
                Step::StreamDone => break,
                Step::Byte(b) => {
                    if let Some(slot) = buf.get_mut(written) {
                        *slot = b;
                    }
                    written += 1;
                }
                Step::BlockDone { crc, header_crc } => {
                    log::debug!(
                        "block {} verified, crc {:08x} (expected {:08x})",
                        self.ctx.blocks_seen,
                        crc,
                        header_crc
                    );
                    self.ctx.assert_data(crc, header_crc, "block crc")?;
                    self.ctx.total_crc = crc::combine(self.ctx.total_crc, crc);
                    self.state = State::NeedBlock;
                }
                Step::NeedNewBlock => {
                    if !self.start_block()? {
                        break;
                    }
                }
            }
        }
        Ok(written)
    }
}

impl<In: Read> Read for Decompressor<In> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.try_read(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.state = State::Failed(e.kind);
                Err(e.into())
            }
        }
    }
}

/// Decompresses an entire BZip2 stream from `source` into `sink`.
///
/// A thin convenience loop over [`Decompressor`] for callers who want a
/// single call rather than streaming through the `Read` impl themselves.
pub fn decompress<R: Read, W: Write>(source: R, mut sink: W) -> Res<()> {
    let mut decompressor = Decompressor::new(source)?;
    let mut buf = [0u8; 4096];
    loop {
        let n = decompressor.try_read(&mut buf)?;
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n]).map_err(|e| {
            BzError::from(ErrorBuilder {
                kind: ErrorKind::UnexpectedOutputEof,
                message: Some("byte sink accepted fewer bytes than requested".into()),
                source: Some(Box::new(e)),
                ..Default::default()
            })
        })?;
    }
    Ok(())
}
