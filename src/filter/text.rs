//! Streaming base64 decoder.
//!
//! Base64 decodes in 4-symbol blocks, but reads split the text stream at
//! arbitrary offsets. The filter keeps a small block buffer so that a block
//! cut by a read boundary is completed by the next call instead of lost.
//!
//! Each call:
//! 1. tops up a partially filled block buffer from the front of the input;
//! 2. decodes the complete blocks it holds and slides any partial block to
//!    the head of the buffer;
//! 3. decodes the complete blocks left in the input directly;
//! 4. stashes a trailing partial block for the next call.
//!
//! A block ending in `=` closes one encoded message; another may follow it
//! in the same stream. Runs of blocks are therefore decoded in segments that
//! end after each padded block, so a padded block decodes the same wherever
//! a read boundary falls.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::BytesMut;

use super::Filter;
use crate::error::Result;

/// Symbols per base64 block.
pub const BLOCK_LEN: usize = 4;

/// Capacity of the internal block buffer (three blocks).
pub const BLOCK_BUFFER_SIZE: usize = BLOCK_LEN * 3;

/// Decodes a standard-alphabet base64 stream split at arbitrary boundaries.
///
/// `=` padding is accepted only in the last block of an encoded message.
#[derive(Debug, Clone)]
pub struct Base64DecodeFilter {
    blocks: [u8; BLOCK_BUFFER_SIZE],
    buffered: usize,
    decoded: Vec<u8>,
}

impl Base64DecodeFilter {
    /// Create a decoder with an empty block buffer.
    pub fn new() -> Self {
        Self {
            blocks: [0; BLOCK_BUFFER_SIZE],
            buffered: 0,
            decoded: Vec::with_capacity(BLOCK_BUFFER_SIZE),
        }
    }

    /// Number of symbols held back waiting for the rest of their block.
    #[inline]
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// Copy input into a partially filled block buffer. Returns bytes taken.
    fn fill_block_buffer(&mut self, input: &[u8]) -> usize {
        if self.buffered == 0 {
            return 0;
        }
        let take = (BLOCK_BUFFER_SIZE - self.buffered).min(input.len());
        self.blocks[self.buffered..self.buffered + take].copy_from_slice(&input[..take]);
        self.buffered += take;
        take
    }

    /// Decode whole blocks from the block buffer, keeping the partial tail.
    fn decode_block_buffer(&mut self) -> Result<()> {
        let whole = self.buffered - self.buffered % BLOCK_LEN;
        if whole == 0 {
            return Ok(());
        }
        decode_blocks(&self.blocks[..whole], &mut self.decoded)?;
        self.blocks.copy_within(whole..self.buffered, 0);
        self.buffered -= whole;
        Ok(())
    }

    fn run(&mut self, input: &[u8]) -> Result<()> {
        let used = self.fill_block_buffer(input);
        self.decode_block_buffer()?;

        let rest = &input[used..];
        let whole = rest.len() - rest.len() % BLOCK_LEN;
        decode_blocks(&rest[..whole], &mut self.decoded)?;

        let tail = &rest[whole..];
        self.blocks[self.buffered..self.buffered + tail.len()].copy_from_slice(tail);
        self.buffered += tail.len();
        Ok(())
    }
}

/// Decode whole blocks, appending to `out`. Each padded block ends a segment.
fn decode_blocks(blocks: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let mut start = 0;
    for (i, block) in blocks.chunks_exact(BLOCK_LEN).enumerate() {
        if block[BLOCK_LEN - 1] == b'=' {
            let end = (i + 1) * BLOCK_LEN;
            STANDARD.decode_vec(&blocks[start..end], out)?;
            start = end;
        }
    }
    if start < blocks.len() {
        STANDARD.decode_vec(&blocks[start..], out)?;
    }
    Ok(())
}

impl Default for Base64DecodeFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for Base64DecodeFilter {
    fn transform(&mut self, data: &mut BytesMut) -> Result<()> {
        let input = data.split();
        self.decoded.clear();

        if let Err(e) = self.run(&input) {
            self.buffered = 0;
            self.decoded.clear();
            return Err(e);
        }

        data.extend_from_slice(&self.decoded);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "base64"
    }
}
