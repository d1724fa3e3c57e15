//! Filter module - composable stateful stream transforms.
//!
//! A [`Filter`] takes the bytes produced by the previous stage, transforms
//! them in place, and leaves its output in the same buffer. An empty buffer
//! after a call means "need more input, nothing to emit yet".
//!
//! Provided filters:
//! - [`Base64DecodeFilter`] - streaming text-to-binary block decoder
//! - [`XorFilter`] - rolling XOR mask stream cipher
//! - [`FrameExtractor`] - turns the byte stream into [`Frame`]s
//!
//! Filters are chained with a [`FilterPipeline`].
//!
//! # Example
//!
//! ```
//! use chunkwire::filter::{Base64DecodeFilter, FilterPipeline, FrameExtractor, MessageSink, XorFilter};
//!
//! let mut pipeline = FilterPipeline::new();
//! pipeline.append(Base64DecodeFilter::new());
//! pipeline.append(XorFilter::new([0xFF]).unwrap());
//! pipeline.append(FrameExtractor::new());
//!
//! let (sink, mut frames) = MessageSink::channel();
//! pipeline.set_message_sink(Some(sink));
//! ```

mod frame;
mod pipeline;
mod text;
mod xor;

use bytes::BytesMut;
use tokio::sync::mpsc;

use crate::error::{ChunkwireError, Result};
use crate::protocol::Frame;

pub use frame::FrameExtractor;
pub use pipeline::FilterPipeline;
pub use text::{Base64DecodeFilter, BLOCK_BUFFER_SIZE, BLOCK_LEN};
pub use xor::XorFilter;

/// A single stateful stage of a [`FilterPipeline`].
///
/// Each instance holds private state needed to resume across read
/// boundaries, so an instance must never be shared between connections.
pub trait Filter: Send + 'static {
    /// Transform `data` in place.
    ///
    /// On return `data` holds this stage's output; leaving it empty means
    /// nothing can be emitted until more input arrives.
    fn transform(&mut self, data: &mut BytesMut) -> Result<()>;

    /// Bind or unbind the destination for decoded frames.
    ///
    /// Only stages that emit frames care; the default ignores it.
    fn set_message_sink(&mut self, _sink: Option<MessageSink>) {}

    /// Short name used in log output.
    fn name(&self) -> &'static str;
}

/// Destination for frames decoded on a connection.
///
/// A cheap clone of the sending half of a group's shared message channel.
#[derive(Debug, Clone)]
pub struct MessageSink {
    tx: mpsc::UnboundedSender<Frame>,
}

impl MessageSink {
    /// Wrap an existing channel sender.
    pub fn new(tx: mpsc::UnboundedSender<Frame>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiver that will see its frames.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Hand a completed frame to the receiving side.
    pub fn deliver(&self, frame: Frame) -> Result<()> {
        self.tx.send(frame).map_err(|_| ChunkwireError::SinkClosed)
    }

    /// Whether the receiving side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Whether both sinks feed the same channel.
    pub fn same_channel(&self, other: &MessageSink) -> bool {
        self.tx.same_channel(&other.tx)
    }
}
