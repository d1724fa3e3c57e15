//! Command id routing.

use std::collections::HashMap;

use super::{BoxFuture, FrameHandler, HandlerResult};
use crate::error::ChunkwireError;
use crate::protocol::Frame;

/// Routes frames to handlers keyed by `(main, sub)` command id.
///
/// Frames with no matching route go to the fallback, if one is set;
/// otherwise the call fails with [`ChunkwireError::HandlerNotFound`].
#[derive(Default)]
pub struct CommandRouter {
    routes: HashMap<(u16, u16), Box<dyn FrameHandler>>,
    fallback: Option<Box<dyn FrameHandler>>,
}

impl CommandRouter {
    /// Create a router with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one command id, replacing any earlier one.
    pub fn route(mut self, main: u16, sub: u16, handler: impl FrameHandler) -> Self {
        self.routes.insert((main, sub), Box::new(handler));
        self
    }

    /// Handler for frames no route matches.
    pub fn fallback(mut self, handler: impl FrameHandler) -> Self {
        self.fallback = Some(Box::new(handler));
        self
    }

    /// Whether a route exists for the command id.
    pub fn contains(&self, main: u16, sub: u16) -> bool {
        self.routes.contains_key(&(main, sub))
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl FrameHandler for CommandRouter {
    fn call(&self, frame: Frame) -> BoxFuture<'static, HandlerResult> {
        let key = (frame.main_command_id(), frame.sub_command_id());
        match self.routes.get(&key).or(self.fallback.as_ref()) {
            Some(handler) => handler.call(frame),
            None => Box::pin(async move {
                Err(ChunkwireError::HandlerNotFound {
                    main: key.0,
                    sub: key.1,
                })
            }),
        }
    }
}

impl std::fmt::Debug for CommandRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut routes: Vec<_> = self.routes.keys().copied().collect();
        routes.sort_unstable();
        f.debug_struct("CommandRouter")
            .field("routes", &routes)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
