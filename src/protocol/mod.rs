//! Protocol module - wire format and frame types.
//!
//! This module implements the binary chunk protocol:
//! - 14-byte little-endian header encoding/decoding
//! - padding arithmetic (`chunk_size = align8(declared_size + 10)`)
//! - Frame struct with incremental fill and typed accessors

mod frame;
mod wire_format;

pub use frame::{build_frame, encoded_len, DataType, Frame};
pub use wire_format::{
    align8, chunk_size_for, Header, CHUNK_SIZE_FIELD, HEADER_SIZE, MAX_CHUNK_SIZE,
    MAX_PAYLOAD_SIZE, PADDING_ALIGN,
};
