//! Handler module - what happens to a decoded frame.
//!
//! Provides:
//! - [`FrameHandler`] - the trait groups and dispatchers forward frames to
//! - [`handler_fn`] - adapts an async closure into a handler
//! - [`CommandRouter`] - routes frames by command id
//!
//! # Example
//!
//! ```
//! use chunkwire::handler::{handler_fn, CommandRouter};
//!
//! let router = CommandRouter::new()
//!     .route(1, 1, handler_fn(|frame| async move {
//!         tracing::info!(len = frame.payload().len(), "login");
//!         Ok(())
//!     }));
//! assert!(router.contains(1, 1));
//! ```

mod router;

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use crate::error::Result;
use crate::protocol::Frame;

pub use router::CommandRouter;

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Something that consumes decoded frames.
pub trait FrameHandler: Send + Sync + 'static {
    /// Handle one frame.
    fn call(&self, frame: Frame) -> BoxFuture<'static, HandlerResult>;
}

/// Handler backed by an async closure. Built with [`handler_fn`].
pub struct FnHandler<F, Fut> {
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

/// Wrap an async closure as a [`FrameHandler`].
pub fn handler_fn<F, Fut>(handler: F) -> FnHandler<F, Fut>
where
    F: Fn(Frame) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnHandler {
        handler,
        _phantom: PhantomData,
    }
}

impl<F, Fut> FrameHandler for FnHandler<F, Fut>
where
    F: Fn(Frame) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, frame: Frame) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(frame))
    }
}

impl<H: FrameHandler + ?Sized> FrameHandler for std::sync::Arc<H> {
    fn call(&self, frame: Frame) -> BoxFuture<'static, HandlerResult> {
        (**self).call(frame)
    }
}
