//! Frame extractor for accumulating partial reads.
//!
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: collecting the 14 header bytes, possibly over many calls
//! - `WaitingForPayload`: header decoded, filling the padded payload buffer
//!
//! Completed frames go to the bound [`MessageSink`]. Used standalone,
//! [`FrameExtractor::push`] returns them directly instead.
//!
//! # Example
//!
//! ```
//! use chunkwire::filter::FrameExtractor;
//! use chunkwire::protocol::build_frame;
//!
//! let wire = build_frame(1, 2, 1, b"hello").unwrap();
//! let mut extractor = FrameExtractor::new();
//!
//! // Data arrives in chunks from socket
//! assert!(extractor.push(&wire[..9]).unwrap().is_empty());
//! let frames = extractor.push(&wire[9..]).unwrap();
//! assert_eq!(frames[0].payload(), b"hello");
//! ```

use bytes::BytesMut;

use super::{Filter, MessageSink};
use crate::error::Result;
use crate::protocol::{Frame, HEADER_SIZE};

/// State machine for frame parsing.
#[derive(Debug)]
enum State {
    /// Collecting header bytes.
    WaitingForHeader {
        buf: [u8; HEADER_SIZE],
        filled: usize,
    },
    /// Header parsed, waiting for payload bytes.
    WaitingForPayload(Frame),
}

impl State {
    fn fresh() -> Self {
        State::WaitingForHeader {
            buf: [0; HEADER_SIZE],
            filled: 0,
        }
    }
}

/// Final pipeline stage that cuts the byte stream into frames.
#[derive(Debug)]
pub struct FrameExtractor {
    state: State,
    sink: Option<MessageSink>,
}

impl FrameExtractor {
    /// Create an extractor waiting for its first header.
    pub fn new() -> Self {
        Self {
            state: State::fresh(),
            sink: None,
        }
    }

    /// Feed bytes and return every frame they complete.
    ///
    /// # Errors
    ///
    /// Propagates header validation failures. The in-progress frame and the
    /// remainder of `data` are discarded; the next call starts a new header.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        self.feed(data, &mut frames)?;
        Ok(frames)
    }

    /// Whether a partial header or payload is buffered.
    pub fn is_mid_frame(&self) -> bool {
        match &self.state {
            State::WaitingForHeader { filled, .. } => *filled > 0,
            State::WaitingForPayload(_) => true,
        }
    }

    /// Drop any partial frame and wait for a new header.
    pub fn reset(&mut self) {
        self.state = State::fresh();
    }

    fn feed(&mut self, mut data: &[u8], frames: &mut Vec<Frame>) -> Result<()> {
        while !data.is_empty() {
            match &mut self.state {
                State::WaitingForHeader { buf, filled } => {
                    let take = (HEADER_SIZE - *filled).min(data.len());
                    buf[*filled..*filled + take].copy_from_slice(&data[..take]);
                    *filled += take;
                    data = &data[take..];

                    if *filled < HEADER_SIZE {
                        return Ok(());
                    }

                    let decoded = Frame::decode_header(&buf[..]);
                    self.state = State::fresh();
                    let frame = decoded?;

                    if frame.is_complete() {
                        frames.push(frame);
                    } else {
                        self.state = State::WaitingForPayload(frame);
                    }
                }

                State::WaitingForPayload(frame) => {
                    let take = frame.remaining_capacity().min(data.len());
                    if let Err(e) = frame.write_payload(&data[..take]) {
                        self.state = State::fresh();
                        return Err(e);
                    }
                    data = &data[take..];

                    if frame.is_complete() {
                        if let State::WaitingForPayload(frame) =
                            std::mem::replace(&mut self.state, State::fresh())
                        {
                            frames.push(frame);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn deliver(&self, frames: Vec<Frame>) -> Result<()> {
        if frames.is_empty() {
            return Ok(());
        }
        match &self.sink {
            Some(sink) => {
                for frame in frames {
                    sink.deliver(frame)?;
                }
                Ok(())
            }
            None => {
                tracing::warn!(dropped = frames.len(), "no message sink bound, dropping frames");
                Ok(())
            }
        }
    }
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for FrameExtractor {
    fn transform(&mut self, data: &mut BytesMut) -> Result<()> {
        let input = data.split();
        let mut frames = Vec::new();
        let fed = self.feed(&input, &mut frames);
        // Frames completed before a failure still go out.
        self.deliver(frames)?;
        fed
    }

    fn set_message_sink(&mut self, sink: Option<MessageSink>) {
        self.sink = sink;
    }

    fn name(&self) -> &'static str {
        "frame"
    }
}
