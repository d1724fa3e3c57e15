//! Connections and the per-connection read loop.
//!
//! A connection owns one byte stream and one [`FilterPipeline`]. Starting it
//! spawns a read task that feeds socket bytes through the pipeline; frames
//! the pipeline completes surface on whatever [`MessageSink`] the owning
//! group has bound.
//!
//! The read loop uses a buffer of twice the configured read size. Each read
//! lands in the half starting at the current offset; once the offset passes
//! the midpoint it wraps to zero, so consumed bytes are never copied.
//!
//! Read errors are counted and the loop ends once the configured limit is
//! reached. A successful read resets the count. Pipeline errors are logged
//! and never end the loop on their own.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::config::ConnectionConfig;
use crate::error::{ChunkwireError, Result};
use crate::filter::{FilterPipeline, MessageSink};
use crate::handler::BoxFuture;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next identifier.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One live peer, as seen by groups and the manager.
pub trait Connection: Send + Sync + 'static {
    /// Identifier used as the group membership key.
    fn id(&self) -> ConnectionId;

    /// Bind or unbind the destination for decoded frames.
    fn set_message_sink(&self, sink: Option<MessageSink>);

    /// Start reading from the peer.
    fn start(&self) -> Result<()>;

    /// Write raw bytes to the peer. Returns the number written.
    fn write(&self, data: Bytes) -> BoxFuture<'_, Result<usize>>;

    /// Close the connection. Closing twice is not an error.
    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

/// Connection lifecycle; each transition happens at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NotStarted,
    Running,
    Closed,
}

/// Why a read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadLoopExit {
    /// The peer closed its side.
    EndOfStream,
    /// Too many consecutive read errors.
    FailureLimit { failures: u32 },
    /// The connection was closed locally.
    Closed,
}

/// A [`Connection`] over any split async byte stream.
pub struct StreamConnection<R, W> {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    config: ConnectionConfig,
    state: Mutex<ConnectionState>,
    reader: Mutex<Option<R>>,
    writer: tokio::sync::Mutex<Option<W>>,
    pipeline: Arc<Mutex<FilterPipeline>>,
    cancel: CancellationToken,
    read_done: CancellationToken,
    exit: Arc<Mutex<Option<ReadLoopExit>>>,
}

/// A connection over a TCP socket.
pub type TcpConnection = StreamConnection<OwnedReadHalf, OwnedWriteHalf>;

impl TcpConnection {
    /// Take ownership of an accepted socket.
    pub fn from_tcp(stream: TcpStream, pipeline: FilterPipeline, config: ConnectionConfig) -> Self {
        let peer_addr = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        let mut conn = Self::from_split(reader, writer, pipeline, config);
        conn.peer_addr = peer_addr;
        conn
    }
}

impl<R, W> StreamConnection<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Build a connection from separate read and write halves.
    pub fn from_split(reader: R, writer: W, pipeline: FilterPipeline, config: ConnectionConfig) -> Self {
        Self {
            id: ConnectionId::next(),
            peer_addr: None,
            config,
            state: Mutex::new(ConnectionState::NotStarted),
            reader: Mutex::new(Some(reader)),
            writer: tokio::sync::Mutex::new(Some(writer)),
            pipeline: Arc::new(Mutex::new(pipeline)),
            cancel: CancellationToken::new(),
            read_done: CancellationToken::new(),
            exit: Arc::new(Mutex::new(None)),
        }
    }

    /// Remote address, when the stream is a socket.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Resolves once the read loop has ended, for whatever reason.
    ///
    /// Never resolves if the connection is never started.
    pub async fn read_stopped(&self) {
        self.read_done.cancelled().await
    }

    /// Why the read loop ended, once it has.
    pub fn read_exit(&self) -> Option<ReadLoopExit> {
        *self.exit.lock()
    }

    fn spawn_read_loop(&self, reader: R) {
        let id = self.id;
        let pipeline = self.pipeline.clone();
        let config = self.config;
        let cancel = self.cancel.clone();
        let done = self.read_done.clone();
        let exit = self.exit.clone();

        tokio::spawn(async move {
            let reason = read_loop(id, reader, pipeline, config, cancel).await;
            match reason {
                ReadLoopExit::FailureLimit { failures } => {
                    tracing::warn!(connection = %id, failures, "read loop gave up");
                }
                _ => tracing::debug!(connection = %id, ?reason, "read loop ended"),
            }
            *exit.lock() = Some(reason);
            done.cancel();
        });
    }
}

impl<R, W> Connection for StreamConnection<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn set_message_sink(&self, sink: Option<MessageSink>) {
        self.pipeline.lock().set_message_sink(sink);
    }

    fn start(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                ConnectionState::NotStarted => *state = ConnectionState::Running,
                ConnectionState::Running => return Err(ChunkwireError::AlreadyStarted),
                ConnectionState::Closed => return Err(ChunkwireError::ConnectionClosed),
            }
        }
        let reader = self.reader.lock().take().ok_or(ChunkwireError::AlreadyStarted)?;
        self.spawn_read_loop(reader);
        Ok(())
    }

    fn write(&self, data: Bytes) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move {
            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or(ChunkwireError::ConnectionClosed)?;
            writer.write_all(&data).await?;
            writer.flush().await?;
            Ok(data.len())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            *self.state.lock() = ConnectionState::Closed;
            self.cancel.cancel();
            self.reader.lock().take();

            let writer = self.writer.lock().await.take();
            if let Some(mut writer) = writer {
                tracing::debug!(connection = %self.id, "closing connection");
                writer.shutdown().await?;
            }
            Ok(())
        })
    }
}

impl<R, W> fmt::Debug for StreamConnection<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConnection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &*self.state.lock())
            .finish()
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    id: ConnectionId,
    mut reader: R,
    pipeline: Arc<Mutex<FilterPipeline>>,
    config: ConnectionConfig,
    cancel: CancellationToken,
) -> ReadLoopExit {
    let half = config.read_buffer_size.max(1);
    let mut buf = vec![0u8; half * 2];
    let mut offset = 0;
    let mut failures = 0u32;

    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ReadLoopExit::Closed,
            read = reader.read(&mut buf[offset..offset + half]) => read,
        };

        match read {
            Ok(0) => return ReadLoopExit::EndOfStream,
            Ok(n) => {
                failures = 0;
                // The pipeline logs the failing stage; the stream carries on.
                if let Err(e) = pipeline.lock().write(&buf[offset..offset + n]) {
                    tracing::debug!(connection = %id, error = %e, "dropped input after pipeline error");
                }
                offset += n;
                if offset >= half {
                    offset = 0;
                }
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(connection = %id, failures, error = %e, "read failed");
                if failures >= config.read_failure_limit {
                    return ReadLoopExit::FailureLimit { failures };
                }
            }
        }
    }
}
