//! Connection groups.
//!
//! A group is a registry of connections that share one inbound message
//! channel. Adding a connection binds the channel into its pipeline as the
//! message sink; removing it unbinds the sink. While the group is running, a
//! single dispatch task drains the channel in arrival order and forwards each
//! frame to the group's handler.
//!
//! Membership is guarded by a mutex. Anything that does I/O on members
//! (`broadcast`, `close_all`) copies the members out first and never holds
//! the lock across an await.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use crate::config::DEFAULT_CONNECTIONS_POOL_INIT_SIZE;
use crate::connection::{Connection, ConnectionId};
use crate::error::{ChunkwireError, Result};
use crate::filter::MessageSink;
use crate::handler::FrameHandler;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::protocol::Frame;

/// A set of connections sharing one message channel and dispatch loop.
///
/// Cloning yields another handle to the same group.
#[derive(Clone)]
pub struct ConnectionGroup {
    inner: Arc<GroupInner>,
}

struct GroupInner {
    name: String,
    members: Mutex<HashMap<ConnectionId, Arc<dyn Connection>>>,
    tx: mpsc::UnboundedSender<Frame>,
    /// Held by the dispatch loop for as long as it runs.
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>,
    handler: RwLock<Option<Arc<dyn FrameHandler>>>,
    lifecycle: Lifecycle,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl ConnectionGroup {
    /// Create an empty, idle group.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_CONNECTIONS_POOL_INIT_SIZE)
    }

    /// Create an empty group with room for `capacity` members.
    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(GroupInner {
                name: name.into(),
                members: Mutex::new(HashMap::with_capacity(capacity)),
                tx,
                rx: tokio::sync::Mutex::new(rx),
                handler: RwLock::new(None),
                lifecycle: Lifecycle::new(),
                stop_tx: Mutex::new(None),
            }),
        }
    }

    /// Group name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// A sink feeding this group's message channel.
    pub fn sink(&self) -> MessageSink {
        MessageSink::new(self.inner.tx.clone())
    }

    /// Register a connection and bind the group's sink into it.
    pub fn add(&self, conn: Arc<dyn Connection>) -> Result<()> {
        let id = conn.id();
        let mut members = self.inner.members.lock();
        if members.contains_key(&id) {
            return Err(ChunkwireError::DuplicateMember(id));
        }
        conn.set_message_sink(Some(self.sink()));
        members.insert(id, conn);
        tracing::debug!(group = %self.inner.name, connection = %id, "connection added");
        Ok(())
    }

    /// Deregister a connection and unbind its sink. The connection stays open.
    pub fn remove(&self, id: ConnectionId) -> Result<Arc<dyn Connection>> {
        let conn = self
            .inner
            .members
            .lock()
            .remove(&id)
            .ok_or(ChunkwireError::NotAMember(id))?;
        conn.set_message_sink(None);
        tracing::debug!(group = %self.inner.name, connection = %id, "connection removed");
        Ok(conn)
    }

    /// Deregister every member and unbind their sinks. Nothing is closed.
    pub fn remove_all(&self) -> Vec<Arc<dyn Connection>> {
        let removed = self.take_members();
        for conn in &removed {
            conn.set_message_sink(None);
        }
        removed
    }

    /// Deregister every member, then close them all concurrently.
    ///
    /// Close failures are logged. Returns how many members closed cleanly.
    pub async fn close_all(&self) -> usize {
        let snapshot = self.remove_all();
        let mut tasks = JoinSet::new();
        for conn in snapshot {
            tasks.spawn(async move {
                let id = conn.id();
                (id, conn.close().await)
            });
        }

        let mut closed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => closed += 1,
                Ok((id, Err(e))) => {
                    tracing::warn!(group = %self.inner.name, connection = %id, error = %e, "close failed");
                }
                Err(e) => {
                    tracing::warn!(group = %self.inner.name, error = %e, "close task failed");
                }
            }
        }
        closed
    }

    /// Write `data` to every current member concurrently.
    ///
    /// One member's failure does not affect the others. Returns how many
    /// writes succeeded.
    pub async fn broadcast(&self, data: Bytes) -> usize {
        let snapshot = self.members();
        let mut tasks = JoinSet::new();
        for conn in snapshot {
            let data = data.clone();
            tasks.spawn(async move {
                let id = conn.id();
                (id, conn.write(data).await)
            });
        }

        let mut delivered = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(_))) => delivered += 1,
                Ok((id, Err(e))) => {
                    tracing::warn!(group = %self.inner.name, connection = %id, error = %e, "broadcast write failed");
                }
                Err(e) => {
                    tracing::warn!(group = %self.inner.name, error = %e, "broadcast task failed");
                }
            }
        }
        delivered
    }

    /// Snapshot of the current members.
    pub fn members(&self) -> Vec<Arc<dyn Connection>> {
        self.inner.members.lock().values().cloned().collect()
    }

    /// Whether a connection is registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.inner.members.lock().contains_key(&id)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.inner.members.lock().len()
    }

    /// Whether the group has no members.
    pub fn is_empty(&self) -> bool {
        self.inner.members.lock().is_empty()
    }

    /// Set the handler frames are forwarded to.
    pub fn set_handler(&self, handler: Arc<dyn FrameHandler>) {
        *self.inner.handler.write() = Some(handler);
    }

    /// Remove the handler; frames are dropped until a new one is set.
    pub fn clear_handler(&self) {
        *self.inner.handler.write() = None;
    }

    /// Current lifecycle state of the dispatch loop.
    pub fn state(&self) -> LifecycleState {
        self.inner.lifecycle.current()
    }

    /// Start the dispatch loop.
    pub fn start(&self) -> Result<()> {
        let lifecycle = &self.inner.lifecycle;
        lifecycle.transition(LifecycleState::Starting)?;

        let (stop_tx, stop_rx) = oneshot::channel();
        *self.inner.stop_tx.lock() = Some(stop_tx);
        lifecycle.transition(LifecycleState::Running)?;

        tokio::spawn(dispatch_loop(self.inner.clone(), stop_rx));
        tracing::debug!(group = %self.inner.name, "dispatch loop started");
        Ok(())
    }

    /// Start the dispatch loop unless it is already starting or running.
    pub fn ensure_started(&self) -> Result<()> {
        match self.state() {
            LifecycleState::Idle => self.start(),
            LifecycleState::Starting | LifecycleState::Running => Ok(()),
            state => Err(ChunkwireError::NotRunning(state)),
        }
    }

    /// Signal the dispatch loop to exit.
    ///
    /// Returns once the signal is sent; use
    /// [`wait_for_complete`](Self::wait_for_complete) to wait for the loop.
    /// Frames still queued stay in the channel for the next start.
    pub fn stop(&self) -> Result<()> {
        self.inner.lifecycle.transition(LifecycleState::Stopping)?;
        if let Some(stop_tx) = self.inner.stop_tx.lock().take() {
            let _ = stop_tx.send(());
        }
        Ok(())
    }

    /// Wait until the dispatch loop is idle.
    pub async fn wait_for_complete(&self) {
        self.inner.lifecycle.wait_for(LifecycleState::Idle).await
    }

    fn take_members(&self) -> Vec<Arc<dyn Connection>> {
        let members = std::mem::take(&mut *self.inner.members.lock());
        members.into_values().collect()
    }
}

impl std::fmt::Debug for ConnectionGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGroup")
            .field("name", &self.inner.name)
            .field("members", &self.len())
            .field("state", &self.state())
            .finish()
    }
}

impl GroupInner {
    async fn forward(&self, frame: Frame) {
        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => {
                let (main, sub) = (frame.main_command_id(), frame.sub_command_id());
                if let Err(e) = handler.call(frame).await {
                    tracing::error!(group = %self.name, main, sub, error = %e, "handler failed");
                }
            }
            None => tracing::debug!(group = %self.name, "no handler set, dropping frame"),
        }
    }
}

async fn dispatch_loop(
    inner: Arc<GroupInner>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    {
        let mut rx = inner.rx.lock().await;
        loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                frame = rx.recv() => match frame {
                    Some(frame) => inner.forward(frame).await,
                    None => break,
                },
            }
        }
    }

    if let Err(e) = inner.lifecycle.transition(LifecycleState::Idle) {
        tracing::error!(group = %inner.name, error = %e, "dispatch loop exit out of order");
    }
    tracing::debug!(group = %inner.name, "dispatch loop stopped");
}
