//! Rolling XOR mask stream cipher.

use bytes::BytesMut;

use super::Filter;
use crate::error::{ChunkwireError, Result};

/// XORs the stream with a repeating mask.
///
/// The mask position persists across calls, so feeding a stream in pieces
/// produces the same bytes as feeding it at once. Applying the filter twice
/// with the same mask restores the input.
#[derive(Debug, Clone)]
pub struct XorFilter {
    mask: Vec<u8>,
    offset: usize,
}

impl XorFilter {
    /// Create a filter for a non-empty mask.
    pub fn new(mask: impl Into<Vec<u8>>) -> Result<Self> {
        let mask = mask.into();
        if mask.is_empty() {
            return Err(ChunkwireError::Config("xor mask must not be empty".to_string()));
        }
        Ok(Self { mask, offset: 0 })
    }

    /// Position in the mask the next byte will use.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// XOR a slice in place, advancing the mask cursor.
    pub fn apply(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            *byte ^= self.mask[self.offset];
            self.offset = (self.offset + 1) % self.mask.len();
        }
    }
}

impl Filter for XorFilter {
    fn transform(&mut self, data: &mut BytesMut) -> Result<()> {
        self.apply(data);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "xor"
    }
}
