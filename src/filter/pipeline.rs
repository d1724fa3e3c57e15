//! Ordered chain of filters.

use bytes::BytesMut;

use super::{Filter, MessageSink};
use crate::error::Result;

/// An ordered chain of [`Filter`]s fed from a connection's socket bytes.
///
/// `write` passes the input through each stage in turn. An empty output
/// from any stage ends the call early without error (that stage needs
/// more input). The first error ends the call and is returned.
#[derive(Default)]
pub struct FilterPipeline {
    filters: Vec<Box<dyn Filter>>,
    sink: Option<MessageSink>,
    scratch: BytesMut,
}

impl FilterPipeline {
    /// Create an empty pipeline (bytes pass through unchanged).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage, binding the current message sink to it.
    pub fn append<F: Filter>(&mut self, filter: F) -> &mut Self {
        self.append_boxed(Box::new(filter))
    }

    /// Append an already boxed stage.
    pub fn append_boxed(&mut self, mut filter: Box<dyn Filter>) -> &mut Self {
        filter.set_message_sink(self.sink.clone());
        self.filters.push(filter);
        self
    }

    /// Builder-style [`append`](Self::append).
    pub fn with<F: Filter>(mut self, filter: F) -> Self {
        self.append(filter);
        self
    }

    /// Bind (or with `None`, unbind) the sink on every stage that emits frames.
    pub fn set_message_sink(&mut self, sink: Option<MessageSink>) {
        for filter in &mut self.filters {
            filter.set_message_sink(sink.clone());
        }
        self.sink = sink;
    }

    /// The currently bound sink.
    pub fn message_sink(&self) -> Option<&MessageSink> {
        self.sink.as_ref()
    }

    /// Push `input` through the chain and return the last stage's output.
    pub fn write(&mut self, input: &[u8]) -> Result<BytesMut> {
        self.scratch.clear();
        self.scratch.extend_from_slice(input);

        for filter in &mut self.filters {
            if let Err(e) = filter.transform(&mut self.scratch) {
                tracing::warn!(filter = filter.name(), error = %e, "filter failed");
                return Err(e);
            }
            if self.scratch.is_empty() {
                break;
            }
        }

        Ok(self.scratch.split())
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether the pipeline has no stages.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Stage names in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }
}

impl std::fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterPipeline")
            .field("filters", &self.names())
            .field("sink_bound", &self.sink.is_some())
            .finish()
    }
}
