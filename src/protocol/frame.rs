//! Frame struct with typed accessors.
//!
//! A frame is built one of two ways:
//! - **decode path**: from a validated 14-byte header, with the padded
//!   payload buffer pre-sized and filled by successive
//!   [`Frame::write_payload`] calls until [`Frame::remaining_capacity`]
//!   reaches zero;
//! - **encode path**: from a command id and a payload, fully materialized.
//!
//! # Example
//!
//! ```
//! use chunkwire::protocol::{DataType, Frame};
//!
//! let frame = Frame::new(1, 2, DataType::PROTOBUF, b"hello").unwrap();
//! let wire = frame.encode();
//!
//! let mut decoded = Frame::decode_header(&wire[..14]).unwrap();
//! decoded.write_payload(&wire[14..]).unwrap();
//! assert_eq!(decoded.remaining_capacity(), 0);
//! assert_eq!(decoded.payload(), b"hello");
//! ```

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{Header, HEADER_SIZE};
use crate::error::{ChunkwireError, Result};

/// Well-known payload encoding tags.
pub struct DataType;

impl DataType {
    /// Payload is a serialized protobuf message.
    pub const PROTOBUF: u16 = 1;
    /// Payload is a packed C struct.
    pub const CLANG: u16 = 2;
}

/// A protocol frame: header plus padded payload buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    header: Header,
    /// Padded payload buffer (`chunk_size - 10` bytes).
    data: BytesMut,
    /// Bytes of `data` written so far on the decode path.
    filled: usize,
}

impl Frame {
    /// Create a complete frame from a command id and payload (encode path).
    pub fn new(
        main_command_id: u16,
        sub_command_id: u16,
        data_type: u16,
        payload: &[u8],
    ) -> Result<Self> {
        let header = Header::for_payload(main_command_id, sub_command_id, data_type, payload.len())?;
        let mut data = BytesMut::zeroed(header.padded_len());
        data[..payload.len()].copy_from_slice(payload);
        let filled = data.len();
        Ok(Self {
            header,
            data,
            filled,
        })
    }

    /// Create an empty frame skeleton from a header that passed [`Header::decode`].
    pub(crate) fn from_header(header: Header) -> Self {
        Self {
            header,
            data: BytesMut::zeroed(header.padded_len()),
            filled: 0,
        }
    }

    /// Decode and validate a 14-byte header, returning a frame awaiting its payload.
    pub fn decode_header(buf: &[u8]) -> Result<Self> {
        Header::decode(buf).map(Self::from_header)
    }

    /// Append payload bytes at the current fill offset.
    ///
    /// Returns the number of bytes consumed. Offering more bytes than
    /// [`remaining_capacity`](Self::remaining_capacity) fails with
    /// [`ChunkwireError::BufferOverrun`] and writes nothing.
    pub fn write_payload(&mut self, bytes: &[u8]) -> Result<usize> {
        let remaining = self.remaining_capacity();
        if bytes.len() > remaining {
            return Err(ChunkwireError::BufferOverrun {
                remaining,
                offered: bytes.len(),
            });
        }
        let end = self.filled + bytes.len();
        self.data[self.filled..end].copy_from_slice(bytes);
        self.filled = end;
        Ok(bytes.len())
    }

    /// Bytes still needed before the frame is complete.
    #[inline]
    pub fn remaining_capacity(&self) -> usize {
        self.data.len() - self.filled
    }

    /// Whether every payload byte (padding included) has been written.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.remaining_capacity() == 0
    }

    /// Serialize header and full padded payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.header.frame_len());
        buf.put_slice(&self.header.encode());
        buf.put_slice(&self.data);
        buf.freeze()
    }

    /// Get the decoded header.
    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The valid payload bytes (`declared_size` of them).
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.header.declared_size as usize]
    }

    /// The whole padded payload buffer.
    #[inline]
    pub fn padded_payload(&self) -> &[u8] {
        &self.data
    }

    /// Get the main command ID.
    #[inline]
    pub fn main_command_id(&self) -> u16 {
        self.header.main_command_id
    }

    /// Get the sub command ID.
    #[inline]
    pub fn sub_command_id(&self) -> u16 {
        self.header.sub_command_id
    }

    /// Get the payload encoding tag.
    #[inline]
    pub fn data_type(&self) -> u16 {
        self.header.data_type
    }

    /// Get the declared payload size.
    #[inline]
    pub fn declared_size(&self) -> u32 {
        self.header.declared_size
    }

    /// Get the chunk size.
    #[inline]
    pub fn chunk_size(&self) -> u32 {
        self.header.chunk_size
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chunk:{},main:{},sub:{},size:{},type:{} [",
            self.header.chunk_size,
            self.header.main_command_id,
            self.header.sub_command_id,
            self.header.declared_size,
            self.header.data_type
        )?;
        for (i, byte) in self.data.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        f.write_str("]")
    }
}

/// Encoded length of a frame carrying `payload_len` bytes, if it fits.
pub fn encoded_len(payload_len: usize) -> Option<usize> {
    Header::for_payload(0, 0, 0, payload_len)
        .ok()
        .map(|h| h.frame_len())
}

/// Build complete frame bytes from command id and payload (convenience function).
pub fn build_frame(
    main_command_id: u16,
    sub_command_id: u16,
    data_type: u16,
    payload: &[u8],
) -> Result<Bytes> {
    Frame::new(main_command_id, sub_command_id, data_type, payload).map(|f| f.encode())
}
