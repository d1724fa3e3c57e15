//! Error types for chunkwire.

use thiserror::Error;

use crate::connection::ConnectionId;
use crate::lifecycle::LifecycleState;

/// Main error type for all chunkwire operations.
#[derive(Debug, Error)]
pub enum ChunkwireError {
    /// Fewer than 14 header bytes were supplied.
    #[error("header incomplete: got {len} bytes, need 14")]
    HeaderIncomplete { len: usize },

    /// The header announces a chunk larger than the protocol ceiling.
    #[error("chunk size {chunk_size} exceeds maximum 65536")]
    FrameTooLarge { chunk_size: u32 },

    /// A payload handed to the encode path cannot fit in one frame.
    #[error("payload of {len} bytes exceeds maximum frame payload")]
    PayloadTooLarge { len: usize },

    /// The two size fields of a header disagree.
    #[error("chunk size {chunk_size} does not match declared size (expected {expected})")]
    ChunkSizeMismatch { chunk_size: u32, expected: u64 },

    /// More payload bytes were offered than the frame has room for.
    #[error("buffer overrun: {remaining} bytes remaining, tried to write {offered}")]
    BufferOverrun { remaining: usize, offered: usize },

    /// Text-stream block decoding failed.
    #[error("text decode error: {0}")]
    TextDecode(#[from] base64::DecodeError),

    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The connection is already registered in the group.
    #[error("connection {0} already exists in group")]
    DuplicateMember(ConnectionId),

    /// The connection is not registered in the group.
    #[error("connection {0} not found in group")]
    NotAMember(ConnectionId),

    /// Work was submitted while not in the running state.
    #[error("not running (current state: {0})")]
    NotRunning(LifecycleState),

    /// A lifecycle transition was requested out of order.
    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    /// The connection's read loop was already started.
    #[error("connection already started")]
    AlreadyStarted,

    /// The connection has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The message sink's receiving side is gone.
    #[error("message sink closed")]
    SinkClosed,

    /// No handler registered for the command id.
    #[error("no handler for command {main}:{sub}")]
    HandlerNotFound { main: u16, sub: u16 },

    /// A handler reported a failure.
    #[error("handler error: {0}")]
    Handler(String),
}

/// Result type alias using ChunkwireError.
pub type Result<T> = std::result::Result<T, ChunkwireError>;
