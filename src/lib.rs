//! # chunkwire
//!
//! Framework for TCP servers speaking a chunk-framed binary protocol.
//!
//! Incoming bytes pass through a per-connection chain of stream filters
//! (text decoding, stream ciphers, frame extraction) before they become
//! discrete [`Frame`](protocol::Frame)s. Frames from all connections in a
//! group land on one channel and are handed to a handler, typically a
//! [`Dispatcher`] that runs them with bounded concurrency.
//!
//! ## Architecture
//!
//! - **Protocol**: 14-byte little-endian header, payload padded to 8 bytes
//! - **Filters**: stateful transforms chained in a [`FilterPipeline`](filter::FilterPipeline)
//! - **Connection**: one socket, one pipeline, one read task
//! - **Group**: connections sharing a message channel and dispatch loop
//! - **Dispatcher**: semaphore-bounded worker pool with drain on stop
//! - **Manager**: accept loop, grouping policy, shutdown
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chunkwire::filter::{Base64DecodeFilter, FilterPipeline, FrameExtractor, XorFilter};
//! use chunkwire::handler::handler_fn;
//! use chunkwire::manager::AllInOnePolicy;
//! use chunkwire::{ConnectionManager, Dispatcher, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> chunkwire::Result<()> {
//!     let config = ServerConfig::default();
//!     let dispatcher = Dispatcher::new("workers", config.dispatcher_concurrency, handler_fn(|frame| async move {
//!         println!("{}", frame);
//!         Ok(())
//!     }));
//!     dispatcher.start()?;
//!
//!     let policy = AllInOnePolicy::default();
//!     policy.group().set_handler(Arc::new(dispatcher.clone()));
//!
//!     let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
//!     let manager = ConnectionManager::new(config)
//!         .with_policy(policy)
//!         .with_pipeline_factory(|| {
//!             let mut pipeline = FilterPipeline::new();
//!             pipeline.append(Base64DecodeFilter::new());
//!             if let Ok(xor) = XorFilter::new([0xFF]) {
//!                 pipeline.append(xor);
//!             }
//!             pipeline.append(FrameExtractor::new());
//!             pipeline
//!         });
//!
//!     manager.start(listener).await?;
//!     dispatcher.shutdown().await
//! }
//! ```

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod group;
pub mod handler;
pub mod lifecycle;
pub mod manager;
pub mod protocol;

pub use config::{ConnectionConfig, ServerConfig};
pub use connection::{Connection, ConnectionId, TcpConnection};
pub use dispatcher::Dispatcher;
pub use error::{ChunkwireError, Result};
pub use group::ConnectionGroup;
pub use handler::FrameHandler;
pub use manager::ConnectionManager;
