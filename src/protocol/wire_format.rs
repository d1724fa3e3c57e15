//! Wire format encoding and decoding.
//!
//! Implements the 14-byte header format:
//! ```text
//! ┌────────────┬──────────┬──────────┬────────────┬──────────┬──────────────────────┐
//! │ Chunk size │ Main cmd │ Sub cmd  │ Data size  │ Data type│ Payload + padding    │
//! │ 4 bytes    │ 2 bytes  │ 2 bytes  │ 4 bytes    │ 2 bytes  │ chunk size - 10 bytes│
//! │ uint32 LE  │ uint16 LE│ uint16 LE│ uint32 LE  │ uint16 LE│                      │
//! └────────────┴──────────┴──────────┴────────────┴──────────┴──────────────────────┘
//! ```
//!
//! All multi-byte integers are Little Endian. The chunk size counts every
//! byte after the chunk size field itself and is always a multiple of 8.

use crate::error::{ChunkwireError, Result};

/// Header size in bytes (fixed, exactly 14).
pub const HEADER_SIZE: usize = 14;

/// Width of the leading chunk size field, which the chunk size excludes.
pub const CHUNK_SIZE_FIELD: usize = 4;

/// Largest chunk size accepted on the wire (64 KiB).
pub const MAX_CHUNK_SIZE: u32 = 64 * 1024;

/// Chunks are padded to a multiple of this many bytes.
pub const PADDING_ALIGN: u64 = 8;

/// Largest payload the encode path can frame without exceeding [`MAX_CHUNK_SIZE`].
pub const MAX_PAYLOAD_SIZE: usize = MAX_CHUNK_SIZE as usize - (HEADER_SIZE - CHUNK_SIZE_FIELD);

/// Round `n` up to the next multiple of [`PADDING_ALIGN`].
#[inline]
pub fn align8(n: u64) -> u64 {
    n.div_ceil(PADDING_ALIGN) * PADDING_ALIGN
}

/// Chunk size a frame carrying `declared_size` valid bytes must announce.
///
/// Computed in 64 bits so that hostile `declared_size` values cannot wrap.
#[inline]
pub fn chunk_size_for(declared_size: u32) -> u64 {
    align8(u64::from(declared_size) + (HEADER_SIZE - CHUNK_SIZE_FIELD) as u64)
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Bytes following the chunk size field (header remainder + padded payload).
    pub chunk_size: u32,
    /// Main command identifier.
    pub main_command_id: u16,
    /// Sub command identifier.
    pub sub_command_id: u16,
    /// Number of valid payload bytes.
    pub declared_size: u32,
    /// Tag identifying the payload encoding.
    pub data_type: u16,
}

impl Header {
    /// Build the header for a payload of `len` bytes.
    ///
    /// Fails with [`ChunkwireError::PayloadTooLarge`] when the padded chunk
    /// would exceed [`MAX_CHUNK_SIZE`].
    pub fn for_payload(
        main_command_id: u16,
        sub_command_id: u16,
        data_type: u16,
        len: usize,
    ) -> Result<Self> {
        if len > MAX_PAYLOAD_SIZE {
            return Err(ChunkwireError::PayloadTooLarge { len });
        }
        let declared_size = len as u32;
        Ok(Self {
            chunk_size: chunk_size_for(declared_size) as u32,
            main_command_id,
            sub_command_id,
            declared_size,
            data_type,
        })
    }

    /// Length of the padded payload buffer that follows the header.
    ///
    /// Zero for a chunk size too small to hold the header remainder.
    #[inline]
    pub fn padded_len(&self) -> usize {
        (self.chunk_size as usize + CHUNK_SIZE_FIELD).saturating_sub(HEADER_SIZE)
    }

    /// Total encoded frame length (header + padded payload).
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.chunk_size as usize + CHUNK_SIZE_FIELD
    }

    /// Encode header to bytes (Little Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use chunkwire::protocol::Header;
    ///
    /// let header = Header::for_payload(1, 2, 1, 5).unwrap();
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 14);
    /// assert_eq!(&bytes[0..4], &16u32.to_le_bytes());
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (14 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.chunk_size.to_le_bytes());
        buf[4..6].copy_from_slice(&self.main_command_id.to_le_bytes());
        buf[6..8].copy_from_slice(&self.sub_command_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.declared_size.to_le_bytes());
        buf[12..14].copy_from_slice(&self.data_type.to_le_bytes());
    }

    /// Decode and validate a header (Little Endian).
    ///
    /// Checks, in order:
    /// - at least 14 bytes are present
    /// - chunk size does not exceed [`MAX_CHUNK_SIZE`]
    /// - chunk size equals `align8(declared_size + 10)`
    ///
    /// # Example
    ///
    /// ```
    /// use chunkwire::protocol::Header;
    ///
    /// let bytes = [16, 0, 0, 0, 1, 0, 2, 0, 0, 0, 0, 0, 1, 0];
    /// let header = Header::decode(&bytes).unwrap();
    /// assert_eq!(header.main_command_id, 1);
    /// assert_eq!(header.sub_command_id, 2);
    /// assert_eq!(header.padded_len(), 6);
    /// ```
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(ChunkwireError::HeaderIncomplete { len: buf.len() });
        }

        let chunk_size = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if chunk_size > MAX_CHUNK_SIZE {
            return Err(ChunkwireError::FrameTooLarge { chunk_size });
        }

        let header = Self {
            chunk_size,
            main_command_id: u16::from_le_bytes([buf[4], buf[5]]),
            sub_command_id: u16::from_le_bytes([buf[6], buf[7]]),
            declared_size: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            data_type: u16::from_le_bytes([buf[12], buf[13]]),
        };

        let expected = chunk_size_for(header.declared_size);
        if expected != u64::from(chunk_size) {
            return Err(ChunkwireError::ChunkSizeMismatch {
                chunk_size,
                expected,
            });
        }

        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_len_of_undersized_header() {
        let header = Header {
            chunk_size: 8,
            main_command_id: 1,
            sub_command_id: 1,
            declared_size: 0,
            data_type: 1,
        };
        assert_eq!(header.padded_len(), 0);
        assert_eq!(header.frame_len(), 12);
        assert!(Header::decode(&header.encode()).is_err());
    }

    #[test]
    fn test_align8() {
        assert_eq!(align8(0), 0);
        assert_eq!(align8(1), 8);
        assert_eq!(align8(8), 8);
        assert_eq!(align8(10), 16);
        assert_eq!(align8(17), 24);
    }

    #[test]
    fn test_chunk_size_for_small_payloads() {
        assert_eq!(chunk_size_for(0), 16);
        assert_eq!(chunk_size_for(6), 16);
        assert_eq!(chunk_size_for(7), 24);
        assert_eq!(chunk_size_for(u32::MAX), align8(u64::from(u32::MAX) + 10));
    }

    #[test]
    fn test_header_little_endian_byte_order() {
        let header = Header {
            chunk_size: 0x0403_0201,
            main_command_id: 0x0605,
            sub_command_id: 0x0807,
            declared_size: 0x0C0B_0A09,
            data_type: 0x0E0D,
        };
        let bytes = header.encode();
        assert_eq!(bytes, [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14]);
    }

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::for_payload(7, 9, 1, 100).unwrap();
        let decoded = Header::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);
        assert_eq!(decoded.chunk_size, 112);
        assert_eq!(decoded.padded_len(), 102);
        assert_eq!(decoded.frame_len(), 116);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; 13];
        assert!(matches!(
            Header::decode(&buf),
            Err(ChunkwireError::HeaderIncomplete { len: 13 })
        ));
    }

    #[test]
    fn test_decode_chunk_too_large() {
        let mut buf = Header::for_payload(1, 1, 1, 8).unwrap().encode();
        buf[0..4].copy_from_slice(&(MAX_CHUNK_SIZE + 8).to_le_bytes());
        assert!(matches!(
            Header::decode(&buf),
            Err(ChunkwireError::FrameTooLarge { chunk_size }) if chunk_size == MAX_CHUNK_SIZE + 8
        ));
    }

    #[test]
    fn test_decode_chunk_size_mismatch() {
        // chunk size 10 with zero declared bytes: the formula demands 16
        let buf = [10, 0, 0, 0, 1, 0, 2, 0, 0, 0, 0, 0, 1, 0];
        assert!(matches!(
            Header::decode(&buf),
            Err(ChunkwireError::ChunkSizeMismatch {
                chunk_size: 10,
                expected: 16
            })
        ));
    }

    #[test]
    fn test_decode_hostile_declared_size_does_not_wrap() {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&8u32.to_le_bytes());
        buf[8..12].copy_from_slice(&(u32::MAX - 1).to_le_bytes());
        assert!(matches!(
            Header::decode(&buf),
            Err(ChunkwireError::ChunkSizeMismatch { chunk_size: 8, .. })
        ));
    }

    #[test]
    fn test_max_payload_boundary() {
        let header = Header::for_payload(1, 1, 1, MAX_PAYLOAD_SIZE).unwrap();
        assert_eq!(header.chunk_size, MAX_CHUNK_SIZE);
        assert!(Header::decode(&header.encode()).is_ok());

        assert!(matches!(
            Header::for_payload(1, 1, 1, MAX_PAYLOAD_SIZE + 1),
            Err(ChunkwireError::PayloadTooLarge { .. })
        ));
    }
}
